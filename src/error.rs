/*!
 * Error Handling for the Key Management Core
 *
 * Provides one error type for every lifecycle, cipher, wrapping and audit
 * operation, with numeric error codes and user-facing messages. Messages
 * identify keys by id and version only; key material and secrets never
 * appear in an error.
 */

use thiserror::Error;

/// Comprehensive error type for all key management operations
#[derive(Debug, Error)]
pub enum KmsError {
    #[error("Unsupported algorithm: {algorithm}")]
    UnsupportedAlgorithm { algorithm: String },

    #[error("A key named '{name}' already exists")]
    DuplicateName { name: String },

    #[error("Key not found: {key_id}")]
    NotFound { key_id: String },

    #[error("Key has been deleted: {key_id}")]
    AlreadyDeleted { key_id: String },

    #[error("Key {key_id} is not active and cannot be used for new encryption")]
    KeyNotActive { key_id: String },

    #[error("Version {version} of key {key_id} does not exist")]
    VersionNotFound { key_id: String, version: u32 },

    #[error("Integrity check failed: {context}")]
    IntegrityFailure { context: String },

    #[error("Signature or MAC verification failed for key {key_id}")]
    SignatureMismatch { key_id: String },

    #[error("Envelope corrupted: {reason}")]
    EnvelopeCorrupted { reason: String },

    #[error("Storage unavailable: {operation} - {cause}")]
    StorageUnavailable { operation: String, cause: String },

    #[error("{action} on {resource_id} was applied but its audit event is deferred: {cause}")]
    AuditDeferred {
        action: String,
        resource_id: String,
        cause: String,
    },

    #[error("Storage conflict on key {key_id}: expected revision {expected}")]
    StorageConflict { key_id: String, expected: u64 },

    #[error("Invalid parameter: {parameter} - expected {expected}, got {actual}")]
    InvalidParameter {
        parameter: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cryptographic backend failure: {operation} - {cause}")]
    CryptoBackend { operation: String, cause: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Error code constants for different error categories
pub mod error_codes {
    // Algorithm and input errors: 1000-1999
    pub const UNSUPPORTED_ALGORITHM: u32 = 1001;
    pub const INVALID_PARAMETER: u32 = 1002;

    // Lifecycle errors: 2000-2999
    pub const DUPLICATE_NAME: u32 = 2001;
    pub const NOT_FOUND: u32 = 2002;
    pub const ALREADY_DELETED: u32 = 2003;
    pub const KEY_NOT_ACTIVE: u32 = 2004;
    pub const VERSION_NOT_FOUND: u32 = 2005;

    // Integrity errors: 3000-3999
    pub const INTEGRITY_FAILURE: u32 = 3001;
    pub const SIGNATURE_MISMATCH: u32 = 3002;
    pub const ENVELOPE_CORRUPTED: u32 = 3003;

    // Storage errors: 4000-4999
    pub const STORAGE_UNAVAILABLE: u32 = 4001;
    pub const STORAGE_CONFLICT: u32 = 4002;
    pub const AUDIT_DEFERRED: u32 = 4003;

    // Internal errors: 9000-9999
    pub const CONFIGURATION: u32 = 9001;
    pub const CRYPTO_BACKEND: u32 = 9002;
    pub const SERIALIZATION: u32 = 9003;
}

impl KmsError {
    /// Get the numeric error code for this error
    pub fn error_code(&self) -> u32 {
        match self {
            KmsError::UnsupportedAlgorithm { .. } => error_codes::UNSUPPORTED_ALGORITHM,
            KmsError::DuplicateName { .. } => error_codes::DUPLICATE_NAME,
            KmsError::NotFound { .. } => error_codes::NOT_FOUND,
            KmsError::AlreadyDeleted { .. } => error_codes::ALREADY_DELETED,
            KmsError::KeyNotActive { .. } => error_codes::KEY_NOT_ACTIVE,
            KmsError::VersionNotFound { .. } => error_codes::VERSION_NOT_FOUND,
            KmsError::IntegrityFailure { .. } => error_codes::INTEGRITY_FAILURE,
            KmsError::SignatureMismatch { .. } => error_codes::SIGNATURE_MISMATCH,
            KmsError::EnvelopeCorrupted { .. } => error_codes::ENVELOPE_CORRUPTED,
            KmsError::StorageUnavailable { .. } => error_codes::STORAGE_UNAVAILABLE,
            KmsError::AuditDeferred { .. } => error_codes::AUDIT_DEFERRED,
            KmsError::StorageConflict { .. } => error_codes::STORAGE_CONFLICT,
            KmsError::InvalidParameter { .. } => error_codes::INVALID_PARAMETER,
            KmsError::Configuration(_) => error_codes::CONFIGURATION,
            KmsError::CryptoBackend { .. } => error_codes::CRYPTO_BACKEND,
            KmsError::Serialization(_) => error_codes::SERIALIZATION,
        }
    }

    /// Get the error category/type as a string
    pub fn error_type(&self) -> &'static str {
        match self {
            KmsError::UnsupportedAlgorithm { .. } => "UnsupportedAlgorithm",
            KmsError::DuplicateName { .. } => "DuplicateName",
            KmsError::NotFound { .. } => "NotFound",
            KmsError::AlreadyDeleted { .. } => "AlreadyDeleted",
            KmsError::KeyNotActive { .. } => "KeyNotActive",
            KmsError::VersionNotFound { .. } => "VersionNotFound",
            KmsError::IntegrityFailure { .. } => "IntegrityFailure",
            KmsError::SignatureMismatch { .. } => "SignatureMismatch",
            KmsError::EnvelopeCorrupted { .. } => "EnvelopeCorrupted",
            KmsError::StorageUnavailable { .. } => "StorageUnavailable",
            KmsError::AuditDeferred { .. } => "AuditDeferred",
            KmsError::StorageConflict { .. } => "StorageConflict",
            KmsError::InvalidParameter { .. } => "InvalidParameter",
            KmsError::Configuration(_) => "Configuration",
            KmsError::CryptoBackend { .. } => "CryptoBackend",
            KmsError::Serialization(_) => "Serialization",
        }
    }

    /// Get a user-friendly error message
    pub fn user_friendly_message(&self) -> String {
        match self {
            KmsError::UnsupportedAlgorithm { algorithm } => format!(
                "Algorithm '{}' is not supported. Choose one of: {}.",
                algorithm,
                crate::types::Algorithm::all()
                    .iter()
                    .map(|a| a.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            KmsError::DuplicateName { name } => {
                format!("A key named '{}' already exists. Pick another name.", name)
            }
            KmsError::NotFound { .. } => "The requested key does not exist.".to_string(),
            KmsError::AlreadyDeleted { .. } => {
                "The requested key was deleted and can no longer be used.".to_string()
            }
            KmsError::KeyNotActive { .. } => {
                "The key has been revoked. It can still decrypt existing data but cannot encrypt new data."
                    .to_string()
            }
            KmsError::VersionNotFound { version, .. } => format!(
                "Key version {} does not exist. The data may have been produced by another key.",
                version
            ),
            KmsError::IntegrityFailure { .. } => {
                "Data failed its integrity check. It may have been tampered with.".to_string()
            }
            KmsError::SignatureMismatch { .. } => {
                "Signature verification failed. The data is not authentic.".to_string()
            }
            KmsError::EnvelopeCorrupted { .. } => {
                "The encrypted payload is malformed or does not match its key.".to_string()
            }
            KmsError::StorageUnavailable { .. } => {
                "Key storage is currently unavailable. Try again later.".to_string()
            }
            KmsError::AuditDeferred { action, .. } => format!(
                "The {} operation was applied, but the audit log is unavailable. Do not repeat it.",
                action
            ),
            KmsError::StorageConflict { .. } => {
                "The key was modified concurrently. Retry the operation.".to_string()
            }
            KmsError::InvalidParameter { parameter, expected, .. } => {
                format!("Invalid parameter '{}'. Expected {}.", parameter, expected)
            }
            KmsError::Configuration(_) => {
                "The key management service is misconfigured.".to_string()
            }
            KmsError::CryptoBackend { operation, .. } => {
                format!("Cryptographic operation '{}' failed.", operation)
            }
            KmsError::Serialization(_) => {
                "Data serialization failed. Data format may be corrupted.".to_string()
            }
        }
    }

    /// Whether this error reports a failed cryptographic integrity check.
    ///
    /// These are never retried or masked.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            KmsError::IntegrityFailure { .. }
                | KmsError::SignatureMismatch { .. }
                | KmsError::EnvelopeCorrupted { .. }
        )
    }

    /// Whether the failed operation may be retried locally
    pub fn is_retryable(&self) -> bool {
        matches!(self, KmsError::StorageConflict { .. })
    }

    /// Whether a store (key or audit) is down, so a batch should stop
    pub fn is_storage_outage(&self) -> bool {
        matches!(
            self,
            KmsError::StorageUnavailable { .. } | KmsError::AuditDeferred { .. }
        )
    }
}

/// Convenience constructors for common error types
impl KmsError {
    pub fn not_found(key_id: impl ToString) -> Self {
        KmsError::NotFound {
            key_id: key_id.to_string(),
        }
    }

    pub fn already_deleted(key_id: impl ToString) -> Self {
        KmsError::AlreadyDeleted {
            key_id: key_id.to_string(),
        }
    }

    pub fn integrity(context: &str) -> Self {
        KmsError::IntegrityFailure {
            context: context.to_string(),
        }
    }

    pub fn corrupted(reason: &str) -> Self {
        KmsError::EnvelopeCorrupted {
            reason: reason.to_string(),
        }
    }

    pub fn storage(operation: &str, cause: &str) -> Self {
        KmsError::StorageUnavailable {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn backend(operation: &str, cause: &str) -> Self {
        KmsError::CryptoBackend {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn invalid_parameter(parameter: &str, expected: &str, actual: &str) -> Self {
        KmsError::InvalidParameter {
            parameter: parameter.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

impl From<std::io::Error> for KmsError {
    fn from(err: std::io::Error) -> Self {
        KmsError::storage("io", &err.to_string())
    }
}

impl From<serde_json::Error> for KmsError {
    fn from(err: serde_json::Error) -> Self {
        KmsError::Serialization(err.to_string())
    }
}

/// Result type alias for key management operations
pub type KmsResult<T> = Result<T, KmsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_grouped() {
        let error = KmsError::not_found("k1");
        assert_eq!(error.error_code(), error_codes::NOT_FOUND);
        assert_eq!(error.error_type(), "NotFound");

        let error = KmsError::integrity("unwrap");
        assert_eq!(error.error_code(), error_codes::INTEGRITY_FAILURE);
    }

    #[test]
    fn test_integrity_errors_are_not_retryable() {
        let errors = [
            KmsError::integrity("tag"),
            KmsError::SignatureMismatch {
                key_id: "k".to_string(),
            },
            KmsError::corrupted("algorithm mismatch"),
        ];
        for error in errors {
            assert!(error.is_integrity_failure());
            assert!(!error.is_retryable());
        }

        let conflict = KmsError::StorageConflict {
            key_id: "k".to_string(),
            expected: 3,
        };
        assert!(conflict.is_retryable());
        assert!(!conflict.is_integrity_failure());
    }

    #[test]
    fn test_audit_deferred_is_an_outage_not_a_retry() {
        let error = KmsError::AuditDeferred {
            action: "delete_key".to_string(),
            resource_id: "k1".to_string(),
            cause: "disk full".to_string(),
        };
        assert_eq!(error.error_code(), error_codes::AUDIT_DEFERRED);
        assert!(error.is_storage_outage());
        assert!(!error.is_retryable());
        assert!(error.user_friendly_message().contains("Do not repeat"));
        assert!(KmsError::storage("append", "down").is_storage_outage());
    }

    #[test]
    fn test_user_friendly_message_lists_algorithms() {
        let error = KmsError::UnsupportedAlgorithm {
            algorithm: "DES".to_string(),
        };
        let message = error.user_friendly_message();
        assert!(message.contains("DES"));
        assert!(message.contains("AES256GCM"));
        assert!(message.contains("HMAC512"));
    }

    #[test]
    fn test_io_error_maps_to_storage_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let error: KmsError = io.into();
        assert_eq!(error.error_type(), "StorageUnavailable");
    }
}
