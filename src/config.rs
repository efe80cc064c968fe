//! Engine configuration.
//!
//! The master wrapping secret and the audit secret are supplied once at
//! startup, held in memory only, and passed explicitly to each engine
//! instance. Nothing in this crate reads them from a global.

use std::env;
use std::fmt;

use crate::error::{KmsError, KmsResult};
use crate::key_management::RotationPolicy;
use crate::secure_memory::SecureBytes;

/// Minimum length of either secret, in bytes
pub const MIN_SECRET_LEN: usize = 32;

/// Default number of local retries after an optimistic-lock conflict
pub const DEFAULT_CONFLICT_RETRIES: u32 = 1;

pub const ENV_MASTER_KEY: &str = "KMS_MASTER_KEY";
pub const ENV_AUDIT_SECRET: &str = "KMS_AUDIT_SECRET";
pub const ENV_ROTATION_DAYS: &str = "KMS_ROTATION_DAYS";
pub const ENV_CONFLICT_RETRIES: &str = "KMS_CONFLICT_RETRIES";

/// Configuration for one engine instance
#[derive(Clone)]
pub struct EngineConfig {
    master_key: SecureBytes,
    audit_key: SecureBytes,
    /// Age-based rotation policy used by `auto_rotate`
    pub rotation_policy: RotationPolicy,
    /// Bounded retries after a `StorageConflict`
    pub conflict_retries: u32,
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("master_key", &"[REDACTED]")
            .field("audit_key", &"[REDACTED]")
            .field("rotation_policy", &self.rotation_policy)
            .field("conflict_retries", &self.conflict_retries)
            .finish()
    }
}

impl EngineConfig {
    /// Create a configuration from the two process secrets.
    ///
    /// # Arguments
    ///
    /// * `master_key` - Master wrapping secret; at least 32 bytes, the first 32 are used
    /// * `audit_key` - Audit chain secret; at least 32 bytes and distinct from the master secret
    ///
    /// # Errors
    ///
    /// Returns `KmsError::Configuration` if either secret is too short or both are equal
    pub fn new(master_key: &[u8], audit_key: &[u8]) -> KmsResult<Self> {
        if master_key.len() < MIN_SECRET_LEN {
            return Err(KmsError::Configuration(format!(
                "master key must be at least {} bytes, got {}",
                MIN_SECRET_LEN,
                master_key.len()
            )));
        }
        if audit_key.len() < MIN_SECRET_LEN {
            return Err(KmsError::Configuration(format!(
                "audit secret must be at least {} bytes, got {}",
                MIN_SECRET_LEN,
                audit_key.len()
            )));
        }
        if crate::utils::constant_time_eq(master_key, audit_key) {
            return Err(KmsError::Configuration(
                "audit secret must differ from the master key".to_string(),
            ));
        }

        Ok(Self {
            master_key: SecureBytes::new(&master_key[..MIN_SECRET_LEN]),
            audit_key: SecureBytes::new(audit_key),
            rotation_policy: RotationPolicy::default(),
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        })
    }

    /// Load configuration from the process environment.
    ///
    /// Secrets are read as hex; a value that is not valid hex is used as raw
    /// UTF-8 bytes. There are no default secrets.
    pub fn from_env() -> KmsResult<Self> {
        let master = read_secret(ENV_MASTER_KEY)?;
        let audit = read_secret(ENV_AUDIT_SECRET)?;
        let mut config = Self::new(master.as_bytes(), audit.as_bytes())?;

        if let Ok(days) = env::var(ENV_ROTATION_DAYS) {
            let days: u32 = days.trim().parse().map_err(|_| {
                KmsError::Configuration(format!("{} must be a positive integer", ENV_ROTATION_DAYS))
            })?;
            config.rotation_policy = RotationPolicy::new(days);
        }
        if let Ok(retries) = env::var(ENV_CONFLICT_RETRIES) {
            config.conflict_retries = retries.trim().parse().map_err(|_| {
                KmsError::Configuration(format!("{} must be an integer", ENV_CONFLICT_RETRIES))
            })?;
        }

        Ok(config)
    }

    /// Like [`EngineConfig::from_env`], but `None` when neither secret is set.
    ///
    /// A partial or invalid environment is still an error.
    pub fn from_env_if_present() -> KmsResult<Option<Self>> {
        if env::var_os(ENV_MASTER_KEY).is_none() && env::var_os(ENV_AUDIT_SECRET).is_none() {
            return Ok(None);
        }
        Self::from_env().map(Some)
    }

    pub fn with_rotation_policy(mut self, policy: RotationPolicy) -> Self {
        self.rotation_policy = policy;
        self
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    pub(crate) fn master_key(&self) -> &SecureBytes {
        &self.master_key
    }

    pub(crate) fn audit_key(&self) -> &SecureBytes {
        &self.audit_key
    }
}

fn read_secret(name: &str) -> KmsResult<SecureBytes> {
    let raw = env::var(name)
        .map_err(|_| KmsError::Configuration(format!("{} environment variable must be set", name)))?;
    Ok(decode_secret(raw.trim()))
}

fn decode_secret(value: &str) -> SecureBytes {
    match hex::decode(value) {
        Ok(bytes) => SecureBytes::from(bytes),
        Err(_) => SecureBytes::new(value.as_bytes()),
    }
}
