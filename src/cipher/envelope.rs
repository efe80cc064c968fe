use serde::{Deserialize, Serialize};

use crate::error::{KmsError, KmsResult};
use crate::types::{Algorithm, KeyId};
use crate::utils::{base64_bytes, base64_opt, put_field};

/// Domain separator for the authenticated envelope header
const HEADER_DOMAIN: &[u8] = b"kms:envelope:v1";

/// Self-describing output of an encryption operation
///
/// This is the persisted wire format; field names and encodings are stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherEnvelope {
    pub key_id: KeyId,
    pub key_version: u32,
    pub algorithm: Algorithm,
    /// Nonce for AEAD algorithms, IV for AES-CBC
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_opt")]
    pub nonce: Option<Vec<u8>>,
    /// Ciphertext, or the signed message for signature and MAC algorithms
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_opt")]
    pub authentication_tag: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_opt")]
    pub signature: Option<Vec<u8>>,
}

impl CipherEnvelope {
    pub(crate) fn new(key_id: KeyId, key_version: u32, algorithm: Algorithm) -> Self {
        Self {
            key_id,
            key_version,
            algorithm,
            nonce: None,
            ciphertext: Vec::new(),
            authentication_tag: None,
            signature: None,
        }
    }

    /// Canonical encoding of `key_id`, `key_version` and `algorithm`
    pub fn header_bytes(&self) -> Vec<u8> {
        header_bytes(&self.key_id, self.key_version, self.algorithm)
    }

    /// Serialize the envelope to JSON
    pub fn to_json(&self) -> KmsResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse an envelope from JSON.
    ///
    /// Anything that does not parse as an envelope is `EnvelopeCorrupted`.
    pub fn from_json(json: &str) -> KmsResult<Self> {
        serde_json::from_str(json).map_err(|e| KmsError::corrupted(&e.to_string()))
    }

    /// Base64 of the JSON encoding, for opaque transport
    pub fn to_base64(&self) -> KmsResult<String> {
        Ok(base64::encode(self.to_json()?))
    }

    pub fn from_base64(encoded: &str) -> KmsResult<Self> {
        let json = base64::decode(encoded.trim())
            .map_err(|e| KmsError::corrupted(&format!("invalid base64: {}", e)))?;
        let json = String::from_utf8(json)
            .map_err(|_| KmsError::corrupted("envelope is not UTF-8 JSON"))?;
        Self::from_json(&json)
    }
}

pub(crate) fn header_bytes(key_id: &KeyId, key_version: u32, algorithm: Algorithm) -> Vec<u8> {
    let mut out = Vec::with_capacity(80);
    put_field(&mut out, HEADER_DOMAIN);
    put_field(&mut out, key_id.to_string().as_bytes());
    put_field(&mut out, &key_version.to_be_bytes());
    put_field(&mut out, algorithm.as_str().as_bytes());
    out
}
