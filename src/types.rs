//! Shared identifiers, algorithm tags and key states.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::KmsError;

/// Opaque, immutable identifier of a logical key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(Uuid);

impl KeyId {
    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for KeyId {
    type Err = KmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(KeyId)
            .map_err(|_| KmsError::invalid_parameter("key_id", "a UUID", s))
    }
}

/// Closed set of supported key algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    #[serde(rename = "AES128GCM")]
    Aes128Gcm,
    #[serde(rename = "AES256GCM")]
    Aes256Gcm,
    #[serde(rename = "AES256CBC")]
    Aes256Cbc,
    #[serde(rename = "ChaCha20Poly1305")]
    ChaCha20Poly1305,
    #[serde(rename = "RSA2048")]
    Rsa2048,
    #[serde(rename = "RSA4096")]
    Rsa4096,
    #[serde(rename = "ECC256")]
    Ecc256,
    #[serde(rename = "ECC384")]
    Ecc384,
    #[serde(rename = "Ed25519")]
    Ed25519,
    #[serde(rename = "HMAC256")]
    Hmac256,
    #[serde(rename = "HMAC512")]
    Hmac512,
}

/// How an algorithm's "encrypt" and "decrypt" operations behave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmFamily {
    /// Authenticated encryption with a nonce and detached tag
    Aead,
    /// AES-CBC with encrypt-then-MAC
    BlockCbc,
    /// RSA-OAEP public key encryption
    RsaOaep,
    /// ECDSA signatures
    Ecdsa,
    /// Ed25519 signatures
    EdDsa,
    /// HMAC tags
    Mac,
}

impl Algorithm {
    /// Every supported algorithm
    pub fn all() -> &'static [Algorithm] {
        &[
            Algorithm::Aes128Gcm,
            Algorithm::Aes256Gcm,
            Algorithm::Aes256Cbc,
            Algorithm::ChaCha20Poly1305,
            Algorithm::Rsa2048,
            Algorithm::Rsa4096,
            Algorithm::Ecc256,
            Algorithm::Ecc384,
            Algorithm::Ed25519,
            Algorithm::Hmac256,
            Algorithm::Hmac512,
        ]
    }

    /// The canonical tag used in envelopes, storage and configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Aes128Gcm => "AES128GCM",
            Algorithm::Aes256Gcm => "AES256GCM",
            Algorithm::Aes256Cbc => "AES256CBC",
            Algorithm::ChaCha20Poly1305 => "ChaCha20Poly1305",
            Algorithm::Rsa2048 => "RSA2048",
            Algorithm::Rsa4096 => "RSA4096",
            Algorithm::Ecc256 => "ECC256",
            Algorithm::Ecc384 => "ECC384",
            Algorithm::Ed25519 => "Ed25519",
            Algorithm::Hmac256 => "HMAC256",
            Algorithm::Hmac512 => "HMAC512",
        }
    }

    pub fn family(&self) -> AlgorithmFamily {
        match self {
            Algorithm::Aes128Gcm | Algorithm::Aes256Gcm | Algorithm::ChaCha20Poly1305 => {
                AlgorithmFamily::Aead
            }
            Algorithm::Aes256Cbc => AlgorithmFamily::BlockCbc,
            Algorithm::Rsa2048 | Algorithm::Rsa4096 => AlgorithmFamily::RsaOaep,
            Algorithm::Ecc256 | Algorithm::Ecc384 => AlgorithmFamily::Ecdsa,
            Algorithm::Ed25519 => AlgorithmFamily::EdDsa,
            Algorithm::Hmac256 | Algorithm::Hmac512 => AlgorithmFamily::Mac,
        }
    }

    /// Raw key length in bytes for symmetric and MAC algorithms
    pub fn symmetric_key_len(&self) -> Option<usize> {
        match self {
            Algorithm::Aes128Gcm => Some(16),
            Algorithm::Aes256Gcm | Algorithm::Aes256Cbc | Algorithm::ChaCha20Poly1305 => Some(32),
            Algorithm::Hmac256 => Some(32),
            Algorithm::Hmac512 => Some(64),
            Algorithm::Rsa2048
            | Algorithm::Rsa4096
            | Algorithm::Ecc256
            | Algorithm::Ecc384
            | Algorithm::Ed25519 => None,
        }
    }

    pub fn is_asymmetric(&self) -> bool {
        self.symmetric_key_len().is_none()
    }
}

impl Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = KmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "RSA" predates the sized RSA tags and still names a 2048-bit key
        if s == "RSA" {
            return Ok(Algorithm::Rsa2048);
        }
        Algorithm::all()
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| KmsError::UnsupportedAlgorithm {
                algorithm: s.to_string(),
            })
    }
}

/// Lifecycle state of a key record.
///
/// Deletion is not a state: a deleted record is removed from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyState {
    Active,
    Revoked,
}

impl Display for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyState::Active => write!(f, "Active"),
            KeyState::Revoked => write!(f, "Revoked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_tags_parse_back() {
        for algorithm in Algorithm::all() {
            let parsed: Algorithm = algorithm.to_string().parse().unwrap();
            assert_eq!(parsed, *algorithm);
        }
    }

    #[test]
    fn test_legacy_rsa_alias() {
        assert_eq!("RSA".parse::<Algorithm>().unwrap(), Algorithm::Rsa2048);
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let err = "DES3".parse::<Algorithm>().unwrap_err();
        assert!(matches!(err, KmsError::UnsupportedAlgorithm { .. }));
        assert!("aes256gcm".parse::<Algorithm>().is_err());
    }

    #[test]
    fn test_serde_uses_canonical_tags() {
        let json = serde_json::to_string(&Algorithm::ChaCha20Poly1305).unwrap();
        assert_eq!(json, "\"ChaCha20Poly1305\"");
        let parsed: Algorithm = serde_json::from_str("\"HMAC512\"").unwrap();
        assert_eq!(parsed, Algorithm::Hmac512);
    }

    #[test]
    fn test_symmetric_key_lengths() {
        assert_eq!(Algorithm::Aes128Gcm.symmetric_key_len(), Some(16));
        assert_eq!(Algorithm::Aes256Gcm.symmetric_key_len(), Some(32));
        assert_eq!(Algorithm::ChaCha20Poly1305.symmetric_key_len(), Some(32));
        assert_eq!(Algorithm::Hmac256.symmetric_key_len(), Some(32));
        assert_eq!(Algorithm::Hmac512.symmetric_key_len(), Some(64));
        assert!(Algorithm::Ed25519.is_asymmetric());
        assert!(Algorithm::Rsa4096.is_asymmetric());
    }

    #[test]
    fn test_key_id_roundtrip() {
        let id = KeyId::generate();
        let parsed: KeyId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<KeyId>().is_err());
    }
}
