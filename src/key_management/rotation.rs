use chrono::{DateTime, Duration, Utc};
use log::{error, info};
use serde::{Deserialize, Serialize};

use super::lifecycle::KeyLifecycle;
use super::record::KeyRecord;
use crate::error::KmsResult;
use crate::types::{Algorithm, KeyId, KeyState};

/// Default interval between automatic rotations
pub const DEFAULT_ROTATION_INTERVAL_DAYS: u32 = 90;

/// Age-based rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationPolicy {
    /// Days after the last rotation (or creation) when a key becomes due
    pub rotation_interval_days: u32,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ROTATION_INTERVAL_DAYS)
    }
}

impl RotationPolicy {
    /// Creates a new key rotation policy
    pub fn new(rotation_interval_days: u32) -> Self {
        Self {
            rotation_interval_days,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::days(i64::from(self.rotation_interval_days))
    }

    /// Whether `record` is due for rotation at `now`.
    ///
    /// Only Active keys are ever due.
    pub fn should_rotate(&self, record: &KeyRecord, now: DateTime<Utc>) -> bool {
        record.lifecycle_state == KeyState::Active && now - record.last_rotation() >= self.interval()
    }
}

/// Age information for one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyAgeSummary {
    pub key_id: KeyId,
    pub name: String,
    pub algorithm: Algorithm,
    pub state: KeyState,
    pub current_version: u32,
    pub age_days: i64,
    pub days_since_rotation: i64,
    pub needs_rotation: bool,
}

impl KeyAgeSummary {
    pub fn for_record(record: &KeyRecord, policy: &RotationPolicy, now: DateTime<Utc>) -> Self {
        Self {
            key_id: record.id,
            name: record.name.clone(),
            algorithm: record.algorithm,
            state: record.lifecycle_state,
            current_version: record.current_version_number(),
            age_days: (now - record.created_at).num_days(),
            days_since_rotation: (now - record.last_rotation()).num_days(),
            needs_rotation: policy.should_rotate(record, now),
        }
    }
}

impl KeyLifecycle {
    /// Age summaries for every live key
    pub fn key_ages(&self, policy: &RotationPolicy, now: DateTime<Utc>) -> KmsResult<Vec<KeyAgeSummary>> {
        Ok(self
            .store()
            .list()?
            .iter()
            .map(|record| KeyAgeSummary::for_record(record, policy, now))
            .collect())
    }

    /// Ids of keys due for rotation at `now`
    pub fn keys_due_for_rotation(
        &self,
        policy: &RotationPolicy,
        now: DateTime<Utc>,
    ) -> KmsResult<Vec<KeyId>> {
        Ok(self
            .store()
            .list()?
            .iter()
            .filter(|record| policy.should_rotate(record, now))
            .map(|record| record.id)
            .collect())
    }

    /// Rotate every key due at `now`, one independent rotation at a time.
    ///
    /// `rotate` performs a single rotation; callers pass
    /// [`KeyLifecycle::rotate`] directly or wrap it (the service facade audits
    /// each one). A failure on one key is logged and skipped, except a store
    /// outage, which stops the batch. Returns the ids that were rotated.
    pub fn auto_rotate_keys<F>(
        &self,
        policy: &RotationPolicy,
        now: DateTime<Utc>,
        mut rotate: F,
    ) -> KmsResult<Vec<KeyId>>
    where
        F: FnMut(&KeyId) -> KmsResult<()>,
    {
        let due = self.keys_due_for_rotation(policy, now)?;
        let mut rotated = Vec::with_capacity(due.len());

        for key_id in &due {
            match rotate(key_id) {
                Ok(()) => rotated.push(*key_id),
                Err(e) if e.is_storage_outage() => {
                    error!(
                        "Automatic rotation stopped at key {} after {} of {} keys: {}",
                        key_id,
                        rotated.len(),
                        due.len(),
                        e
                    );
                    return Err(e);
                }
                Err(e) => error!("Automatic rotation of key {} failed: {}", key_id, e),
            }
        }

        info!("Automatic rotation rotated {} of {} due keys", rotated.len(), due.len());
        Ok(rotated)
    }
}
