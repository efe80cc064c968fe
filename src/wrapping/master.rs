use std::fmt;
use std::sync::Arc;

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadCore, AeadInPlace, KeyInit, OsRng};
use aes_gcm::Aes256Gcm;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::config::EngineConfig;
use crate::error::{KmsError, KmsResult};
use crate::secure_memory::SecureBytes;
use crate::utils::base64_bytes;

/// Master key length in bytes
pub const MASTER_KEY_SIZE: usize = 32;

/// AES-GCM nonce length in bytes
pub const WRAP_NONCE_SIZE: usize = 12;

/// AES-GCM tag length in bytes
pub const WRAP_TAG_SIZE: usize = 16;

/// Key material sealed under the master secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub tag: Vec<u8>,
}

/// AES-256-GCM cipher keyed with the master secret
///
/// The secret is read-only for the lifetime of the engine instance, so the
/// cipher is shared behind an `Arc` without locking.
///
/// # Examples
///
/// ```
/// use kms_core::wrapping::MasterKey;
///
/// let master = MasterKey::new(&[0x42; 32]).unwrap();
/// let wrapped = master.wrap(b"data key", Some(b"key-1:v1")).unwrap();
/// let material = master.unwrap(&wrapped, Some(b"key-1:v1")).unwrap();
/// assert_eq!(material.as_bytes(), b"data key");
/// ```
#[derive(Clone)]
pub struct MasterKey {
    cipher: Arc<Aes256Gcm>,
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("cipher", &"[AES-256-GCM Cipher]")
            .finish()
    }
}

impl MasterKey {
    /// Create a master key from exactly 32 secret bytes
    ///
    /// # Errors
    ///
    /// Returns `KmsError::Configuration` if the key is not 32 bytes long
    pub fn new(key: &[u8]) -> KmsResult<Self> {
        if key.len() != MASTER_KEY_SIZE {
            return Err(KmsError::Configuration(format!(
                "master key must be {} bytes, got {}",
                MASTER_KEY_SIZE,
                key.len()
            )));
        }

        let cipher = Aes256Gcm::new(GenericArray::from_slice(key));
        Ok(Self {
            cipher: Arc::new(cipher),
        })
    }

    /// Create the master key held by an engine configuration
    pub fn from_config(config: &EngineConfig) -> KmsResult<Self> {
        Self::new(config.master_key().as_bytes())
    }

    /// Seal raw key material.
    ///
    /// A new random 96-bit nonce is generated on every call; there is no
    /// counter that could be reset.
    ///
    /// # Arguments
    ///
    /// * `material` - Raw key bytes of any length
    /// * `context` - Optional associated data the blob is bound to
    ///
    /// # Returns
    ///
    /// The nonce, ciphertext and detached tag
    pub fn wrap(&self, material: &[u8], context: Option<&[u8]>) -> KmsResult<WrappedKey> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut buffer = material.to_vec();

        let tag = self
            .cipher
            .encrypt_in_place_detached(&nonce, context.unwrap_or(&[]), &mut buffer)
            .map_err(|_| {
                buffer.zeroize();
                KmsError::backend("wrap", "AES-GCM encryption failed")
            })?;

        debug!("Wrapped {} bytes of key material", material.len());

        Ok(WrappedKey {
            nonce: nonce.to_vec(),
            ciphertext: buffer,
            tag: tag.to_vec(),
        })
    }

    /// Open a wrapped blob.
    ///
    /// # Errors
    ///
    /// Returns `KmsError::IntegrityFailure` if the blob is malformed, the tag
    /// does not verify, or the context differs from the one used to wrap.
    /// No bytes are returned on failure.
    pub fn unwrap(&self, wrapped: &WrappedKey, context: Option<&[u8]>) -> KmsResult<SecureBytes> {
        if wrapped.nonce.len() != WRAP_NONCE_SIZE || wrapped.tag.len() != WRAP_TAG_SIZE {
            warn!("Rejected wrapped key with malformed nonce or tag");
            return Err(KmsError::integrity("wrapped key has malformed nonce or tag"));
        }

        let mut buffer = wrapped.ciphertext.clone();
        let result = self.cipher.decrypt_in_place_detached(
            GenericArray::from_slice(&wrapped.nonce),
            context.unwrap_or(&[]),
            &mut buffer,
            GenericArray::from_slice(&wrapped.tag),
        );

        match result {
            Ok(()) => Ok(SecureBytes::from(buffer)),
            Err(_) => {
                buffer.zeroize();
                warn!("Wrapped key failed authentication");
                Err(KmsError::integrity("wrapped key failed authentication"))
            }
        }
    }
}
