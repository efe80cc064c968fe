/*!
 * KMS Core
 *
 * Envelope encryption and key lifecycle engine with a tamper-evident audit
 * chain.
 *
 * Key material is generated per algorithm, sealed with AES-256-GCM under an
 * operator-supplied master secret, and stored as an append-only version
 * history per logical key. Encryption always uses the current version of an
 * Active key; decryption uses the exact version named in the envelope,
 * whether the key is Active or Revoked. Every operation is recorded in an
 * HMAC-chained audit log that localizes tampering to the first altered
 * event.
 *
 * Supported algorithms:
 *
 * - AES-128-GCM, AES-256-GCM and ChaCha20-Poly1305 (AEAD)
 * - AES-256-CBC with HMAC-SHA256 (encrypt-then-MAC)
 * - RSA-2048 and RSA-4096 with OAEP/SHA-256
 * - ECDSA P-256 and P-384, Ed25519 (signatures)
 * - HMAC-SHA256 and HMAC-SHA512 (tags)
 */

/// Tamper-evident audit chain
pub mod audit;

/// Envelope format and per-algorithm cipher operations
pub mod cipher;

/// Engine configuration and process secrets
pub mod config;

/// Common error types for the key management engine
pub mod error;

/// Key material generation
pub mod keygen;

/// Key lifecycle state machine and version history
pub mod key_management;

/// Service facade with audited operations
pub mod kms;

/// Secure memory handling utilities
pub mod secure_memory;

/// Key and audit store adapters
pub mod storage;

/// Identifiers, algorithm tags and key states
pub mod types;

/// Utilities for cryptographic operations
pub mod utils;

/// Master key wrapping
pub mod wrapping;

// Re-export main types for convenience
pub use audit::{AuditEvent, AuditFilter, AuditStatus, ChainVerification};
pub use cipher::CipherEnvelope;
pub use config::EngineConfig;
pub use error::{KmsError, KmsResult};
pub use key_management::{KeySummary, RotationPolicy};
pub use kms::{Kms, OperationContext};
pub use types::{Algorithm, KeyId, KeyState};

/// The types most callers need.
///
/// ```
/// use kms_core::prelude::*;
///
/// fn main() -> KmsResult<()> {
///     let config = EngineConfig::new(&[0x01; 32], &[0x02; 32])?;
///     let kms = Kms::in_memory(config)?;
///     let ctx = OperationContext::new("alice");
///
///     let key = kms.create_key(&ctx, "payments", "AES256GCM")?;
///     let envelope = kms.encrypt(&ctx, &key.id, b"hello")?;
///     assert_eq!(kms.decrypt(&ctx, &envelope)?, b"hello");
///     Ok(())
/// }
/// ```
pub mod prelude {
    pub use crate::audit::{AuditEvent, AuditFilter, AuditStatus, AuditSummary, ChainVerification};
    pub use crate::cipher::CipherEnvelope;
    pub use crate::config::EngineConfig;
    pub use crate::error::{KmsError, KmsResult};
    pub use crate::key_management::{KeyAgeSummary, KeySummary, RotationPolicy};
    pub use crate::kms::{Kms, OperationContext};
    pub use crate::secure_memory::SecureBytes;
    pub use crate::storage::{FileAuditStore, FileKeyStore, MemoryStore};
    pub use crate::types::{Algorithm, KeyId, KeyState};
}
