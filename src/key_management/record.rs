use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{KmsError, KmsResult};
use crate::secure_memory::SecureBytes;
use crate::types::{Algorithm, KeyId, KeyState};
use crate::utils::{self, base64_opt};
use crate::wrapping::WrappedKey;

/// One generation of key material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVersion {
    /// 1-based, strictly increasing per record
    pub version_number: u32,
    pub wrapped_material: WrappedKey,
    /// Public half for asymmetric algorithms
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_opt")]
    pub public_key: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

/// A logical named key with its version history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub id: KeyId,
    pub name: String,
    pub algorithm: Algorithm,
    /// Append-only; index `i` holds version `i + 1`
    pub versions: Vec<KeyVersion>,
    pub lifecycle_state: KeyState,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, assigned by the store
    #[serde(default)]
    pub revision: u64,
}

impl KeyRecord {
    /// The current (highest) version
    pub fn current_version(&self) -> KmsResult<&KeyVersion> {
        self.versions
            .last()
            .ok_or_else(|| KmsError::integrity("key record has no versions"))
    }

    pub fn current_version_number(&self) -> u32 {
        self.versions.last().map(|v| v.version_number).unwrap_or(0)
    }

    /// Look up an exact version
    pub fn version(&self, version_number: u32) -> Option<&KeyVersion> {
        if version_number == 0 {
            return None;
        }
        self.versions
            .get(version_number as usize - 1)
            .filter(|v| v.version_number == version_number)
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle_state == KeyState::Active
    }

    /// When the key material was last replaced (creation counts)
    pub fn last_rotation(&self) -> DateTime<Utc> {
        self.rotated_at.unwrap_or(self.created_at)
    }

    /// Append the next version
    pub fn push_version(
        &mut self,
        wrapped_material: WrappedKey,
        public_key: Option<Vec<u8>>,
        created_at: DateTime<Utc>,
    ) -> &KeyVersion {
        let version_number = self.current_version_number() + 1;
        self.versions.push(KeyVersion {
            version_number,
            wrapped_material,
            public_key,
            created_at,
        });
        &self.versions[self.versions.len() - 1]
    }

    /// Metadata view without any key material
    pub fn summary(&self) -> KeySummary {
        let public_key_fingerprint = self
            .versions
            .last()
            .and_then(|v| v.public_key.as_deref())
            .map(utils::fingerprint);

        KeySummary {
            id: self.id,
            name: self.name.clone(),
            algorithm: self.algorithm,
            state: self.lifecycle_state,
            current_version: self.current_version_number(),
            created_by: self.created_by.clone(),
            created_at: self.created_at,
            rotated_at: self.rotated_at,
            revoked_at: self.revoked_at,
            public_key_fingerprint,
        }
    }
}

/// Key metadata returned by read operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySummary {
    pub id: KeyId,
    pub name: String,
    pub algorithm: Algorithm,
    pub state: KeyState,
    pub current_version: u32,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key_fingerprint: Option<String>,
}

/// Unwrapped key material for one exact version, ready for a cipher operation
#[derive(Debug, Clone)]
pub struct ResolvedKey {
    pub key_id: KeyId,
    pub algorithm: Algorithm,
    pub version: u32,
    pub material: SecureBytes,
    pub public_key: Option<Vec<u8>>,
}

/// Associated data binding a wrapped blob to its record and version
pub fn wrap_context(key_id: &KeyId, version: u32) -> Vec<u8> {
    format!("kms:key:{}:v{}", key_id, version).into_bytes()
}
