use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use parking_lot::Mutex;

use super::record::{wrap_context, KeyRecord, KeySummary, ResolvedKey};
use crate::config::EngineConfig;
use crate::error::{KmsError, KmsResult};
use crate::keygen;
use crate::storage::KeyStore;
use crate::types::{Algorithm, KeyId, KeyState};
use crate::wrapping::MasterKey;

/// Longest accepted key name, in bytes
pub const MAX_KEY_NAME_LEN: usize = 256;

/// Owns key state transitions and version history
pub struct KeyLifecycle {
    store: Arc<dyn KeyStore>,
    master: MasterKey,
    locks: Mutex<HashMap<KeyId, Arc<Mutex<()>>>>,
    conflict_retries: u32,
}

impl fmt::Debug for KeyLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyLifecycle")
            .field("master", &self.master)
            .field("conflict_retries", &self.conflict_retries)
            .finish()
    }
}

impl KeyLifecycle {
    pub fn new(master: MasterKey, store: Arc<dyn KeyStore>, conflict_retries: u32) -> Self {
        Self {
            store,
            master,
            locks: Mutex::new(HashMap::new()),
            conflict_retries,
        }
    }

    /// Build the engine from a configuration's master secret and retry bound
    pub fn from_config(config: &EngineConfig, store: Arc<dyn KeyStore>) -> KmsResult<Self> {
        Ok(Self::new(
            MasterKey::from_config(config)?,
            store,
            config.conflict_retries,
        ))
    }

    fn key_lock(&self, key_id: &KeyId) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(*key_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Serialized read-modify-write on one key.
    ///
    /// `change` returns `false` when the record needs no write. A stale
    /// write is retried from a fresh load up to `conflict_retries` times.
    fn update<F>(&self, key_id: &KeyId, operation: &str, mut change: F) -> KmsResult<KeyRecord>
    where
        F: FnMut(&mut KeyRecord) -> KmsResult<bool>,
    {
        let lock = self.key_lock(key_id);
        let _guard = lock.lock();

        let mut attempt = 0;
        loop {
            let mut record = self.store.load(key_id)?;
            let expected = record.revision;

            if !change(&mut record)? {
                return Ok(record);
            }

            match self.store.save(&record, expected) {
                Ok(revision) => {
                    record.revision = revision;
                    return Ok(record);
                }
                Err(e) if e.is_retryable() && attempt < self.conflict_retries => {
                    attempt += 1;
                    warn!(
                        "Storage conflict during {} on key {}; retrying ({}/{})",
                        operation, key_id, attempt, self.conflict_retries
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn wrap_new_version(
        &self,
        key_id: &KeyId,
        algorithm: Algorithm,
        version: u32,
    ) -> KmsResult<(crate::wrapping::WrappedKey, Option<Vec<u8>>)> {
        let material = keygen::generate(algorithm)?;
        let wrapped = self
            .master
            .wrap(material.secret.as_bytes(), Some(&wrap_context(key_id, version)))?;
        Ok((wrapped, material.public_key))
    }

    /// Create a new Active key with version 1.
    ///
    /// # Errors
    ///
    /// * `DuplicateName` if a live key already uses `name`
    /// * `InvalidParameter` for an empty or oversized name
    pub fn create(&self, name: &str, algorithm: Algorithm, created_by: &str) -> KmsResult<KeyRecord> {
        let name = name.trim();
        if name.is_empty() || name.len() > MAX_KEY_NAME_LEN {
            return Err(KmsError::invalid_parameter(
                "name",
                &format!("1 to {} bytes", MAX_KEY_NAME_LEN),
                &format!("{} bytes", name.len()),
            ));
        }
        if self.store.find_by_name(name)?.is_some() {
            return Err(KmsError::DuplicateName {
                name: name.to_string(),
            });
        }

        let id = KeyId::generate();
        let (wrapped, public_key) = self.wrap_new_version(&id, algorithm, 1)?;
        let now = Utc::now();

        let mut record = KeyRecord {
            id,
            name: name.to_string(),
            algorithm,
            versions: Vec::with_capacity(1),
            lifecycle_state: KeyState::Active,
            created_by: created_by.to_string(),
            created_at: now,
            rotated_at: None,
            revoked_at: None,
            revision: 0,
        };
        record.push_version(wrapped, public_key, now);
        record.revision = self.store.insert(&record)?;

        info!("Created {} key {} ('{}')", algorithm, id, record.name);
        Ok(record)
    }

    /// Append a fresh version of the same algorithm and make it current.
    ///
    /// Older versions are kept for decryption. The lifecycle state is not
    /// changed, so a revoked key can still be rotated.
    pub fn rotate(&self, key_id: &KeyId) -> KmsResult<KeyRecord> {
        let record = self.update(key_id, "rotate", |record| {
            let next = record.current_version_number() + 1;
            let (wrapped, public_key) = self.wrap_new_version(&record.id, record.algorithm, next)?;
            let now = Utc::now();
            record.push_version(wrapped, public_key, now);
            record.rotated_at = Some(now);
            Ok(true)
        })?;

        info!(
            "Rotated key {} to version {}",
            key_id,
            record.current_version_number()
        );
        Ok(record)
    }

    /// Move an Active key to Revoked. Revoking twice is a no-op.
    pub fn revoke(&self, key_id: &KeyId) -> KmsResult<KeyRecord> {
        let record = self.update(key_id, "revoke", |record| {
            if record.lifecycle_state == KeyState::Revoked {
                return Ok(false);
            }
            record.lifecycle_state = KeyState::Revoked;
            record.revoked_at = Some(Utc::now());
            Ok(true)
        })?;

        info!("Revoked key {}", key_id);
        Ok(record)
    }

    /// Permanently remove a key and every version of its material.
    ///
    /// Data encrypted under the key becomes unrecoverable. Later operations
    /// on the id fail with `AlreadyDeleted`.
    pub fn delete(&self, key_id: &KeyId) -> KmsResult<()> {
        let lock = self.key_lock(key_id);
        {
            let _guard = lock.lock();
            let mut attempt = 0;
            loop {
                let record = self.store.load(key_id)?;
                match self.store.remove(key_id, record.revision) {
                    Ok(()) => break,
                    Err(e) if e.is_retryable() && attempt < self.conflict_retries => {
                        attempt += 1;
                        warn!("Storage conflict during delete on key {}; retrying", key_id);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        self.locks.lock().remove(key_id);

        info!("Deleted key {}", key_id);
        Ok(())
    }

    /// Current version of an Active key, unwrapped.
    ///
    /// Fails with `KeyNotActive` for revoked keys.
    pub fn resolve_for_encrypt(&self, key_id: &KeyId) -> KmsResult<ResolvedKey> {
        let record = self.store.load(key_id)?;
        if !record.is_active() {
            return Err(KmsError::KeyNotActive {
                key_id: key_id.to_string(),
            });
        }

        let version = record.current_version()?;
        debug!(
            "Resolved key {} version {} for encryption",
            key_id, version.version_number
        );
        self.unwrap_version(&record, version.version_number)
    }

    /// An exact version, unwrapped, regardless of Active or Revoked state
    pub fn resolve_for_decrypt(&self, key_id: &KeyId, version: u32) -> KmsResult<ResolvedKey> {
        let record = self.store.load(key_id)?;
        debug!("Resolved key {} version {} for decryption", key_id, version);
        self.unwrap_version(&record, version)
    }

    fn unwrap_version(&self, record: &KeyRecord, version: u32) -> KmsResult<ResolvedKey> {
        let key_version = record
            .version(version)
            .ok_or_else(|| KmsError::VersionNotFound {
                key_id: record.id.to_string(),
                version,
            })?;

        let material = self.master.unwrap(
            &key_version.wrapped_material,
            Some(&wrap_context(&record.id, version)),
        )?;

        Ok(ResolvedKey {
            key_id: record.id,
            algorithm: record.algorithm,
            version,
            material,
            public_key: key_version.public_key.clone(),
        })
    }

    /// Metadata for one key
    pub fn get(&self, key_id: &KeyId) -> KmsResult<KeySummary> {
        Ok(self.store.load(key_id)?.summary())
    }

    /// Metadata for every live key, oldest first
    pub fn list(&self) -> KmsResult<Vec<KeySummary>> {
        Ok(self.store.list()?.iter().map(KeyRecord::summary).collect())
    }

    /// Public key of an asymmetric key; the current version unless given
    pub fn public_key(&self, key_id: &KeyId, version: Option<u32>) -> KmsResult<Vec<u8>> {
        let record = self.store.load(key_id)?;
        if !record.algorithm.is_asymmetric() {
            return Err(KmsError::invalid_parameter(
                "key_id",
                "an asymmetric key",
                record.algorithm.as_str(),
            ));
        }

        let version = version.unwrap_or_else(|| record.current_version_number());
        record
            .version(version)
            .and_then(|v| v.public_key.clone())
            .ok_or_else(|| KmsError::VersionNotFound {
                key_id: key_id.to_string(),
                version,
            })
    }

    pub(crate) fn store(&self) -> &Arc<dyn KeyStore> {
        &self.store
    }
}
