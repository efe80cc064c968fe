/*!
 * Key Management Service Facade
 *
 * Wires the lifecycle engine, the cipher engine and the audit chain into
 * one object with the operations exposed to callers. Every operation
 * records exactly one audit event with its outcome.
 *
 * When that event cannot be written, a read or cipher operation fails with
 * `StorageUnavailable` and releases no output. A create, rotate, revoke or
 * delete has already been committed by then, so its event is queued and the
 * caller gets `AuditDeferred`. Queued events are written, in order, ahead of
 * the next event the engine records.
 */

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};
use parking_lot::Mutex;

use crate::audit::{
    actions, resources, AuditChain, AuditEvent, AuditFilter, AuditStatus, AuditSummary,
    ChainVerification, EventRange, NewAuditEvent,
};
use crate::cipher::{CipherEngine, CipherEnvelope};
use crate::config::EngineConfig;
use crate::error::{KmsError, KmsResult};
use crate::key_management::{KeyLifecycle, KeySummary};
use crate::storage::{AuditStore, FileAuditStore, FileKeyStore, KeyStore, MemoryStore};
use crate::types::{Algorithm, KeyId};

/// Who is calling and from where; recorded on every audit event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationContext {
    pub actor: String,
    pub source_address: Option<String>,
}

impl OperationContext {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            source_address: None,
        }
    }

    pub fn with_source_address(mut self, source_address: impl Into<String>) -> Self {
        self.source_address = Some(source_address.into());
        self
    }

    /// Context for operations the service starts on its own
    pub fn system() -> Self {
        Self::new("system")
    }
}

/// The key management engine
pub struct Kms {
    config: EngineConfig,
    keys: Arc<KeyLifecycle>,
    cipher: CipherEngine,
    audit: AuditChain,
    /// Events of committed mutations still waiting for the audit store
    deferred: Mutex<VecDeque<NewAuditEvent>>,
}

impl Kms {
    /// Build an engine over the given stores.
    ///
    /// The audit chain resumes after the last stored event.
    pub fn new(
        config: EngineConfig,
        key_store: Arc<dyn KeyStore>,
        audit_store: Arc<dyn AuditStore>,
    ) -> KmsResult<Self> {
        let keys = Arc::new(KeyLifecycle::from_config(&config, key_store)?);
        let audit = AuditChain::from_config(&config, audit_store)?;

        Ok(Self {
            cipher: CipherEngine::new(keys.clone()),
            keys,
            audit,
            deferred: Mutex::new(VecDeque::new()),
            config,
        })
    }

    /// Engine backed by a process-local `MemoryStore`
    pub fn in_memory(config: EngineConfig) -> KmsResult<Self> {
        let store = Arc::new(MemoryStore::new());
        Self::new(config, store.clone(), store)
    }

    /// Engine persisting `keystore.json` and `audit.jsonl` under `dir`
    pub fn open_dir<P: AsRef<Path>>(config: EngineConfig, dir: P) -> KmsResult<Self> {
        let dir = dir.as_ref();
        let key_store = Arc::new(FileKeyStore::open(dir.join("keystore.json"))?);
        let audit_store = Arc::new(FileAuditStore::open(dir.join("audit.jsonl"))?);
        info!("Opened key management engine at {}", dir.display());
        Self::new(config, key_store, audit_store)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &Arc<KeyLifecycle> {
        &self.keys
    }

    pub fn audit_chain(&self) -> &AuditChain {
        &self.audit
    }

    /// Number of audit events queued behind a failed append
    pub fn pending_audit_events(&self) -> usize {
        self.deferred.lock().len()
    }

    /// Write queued audit events now, oldest first.
    ///
    /// Returns how many were written. Stops at the first failed append and
    /// keeps the rest queued.
    pub fn flush_pending_audit(&self) -> KmsResult<usize> {
        let mut deferred = self.deferred.lock();
        Self::drain_deferred(&self.audit, &mut deferred)
    }

    fn drain_deferred(audit: &AuditChain, deferred: &mut VecDeque<NewAuditEvent>) -> KmsResult<usize> {
        let mut written = 0;
        while let Some(entry) = deferred.front() {
            audit.append(entry.clone())?;
            deferred.pop_front();
            written += 1;
        }
        if written > 0 {
            info!("Wrote {} deferred audit events", written);
        }
        Ok(written)
    }

    /// Append one event behind any queued ones.
    ///
    /// `committed` marks an event describing a state change that already
    /// happened; on failure it is queued and `AuditDeferred` is returned
    /// instead of `StorageUnavailable`.
    #[allow(clippy::too_many_arguments)]
    fn record_event(
        &self,
        ctx: &OperationContext,
        action: &str,
        resource_type: &str,
        resource_id: Option<String>,
        status: AuditStatus,
        details: Option<String>,
        committed: bool,
    ) -> KmsResult<()> {
        let mut entry = NewAuditEvent::new(&ctx.actor, action, resource_type, status)
            .source_address(ctx.source_address.clone());
        entry.resource_id = resource_id;
        entry.details = details;

        let mut deferred = self.deferred.lock();
        let appended = Self::drain_deferred(&self.audit, &mut deferred)
            .and_then(|_| self.audit.append(entry.clone()).map(|_| ()));

        match appended {
            Ok(()) => Ok(()),
            Err(e) if committed => {
                error!("Audit append failed for committed {}; deferring: {}", action, e);
                let resource_id = entry.resource_id.clone().unwrap_or_default();
                entry.details = Some(match entry.details.take() {
                    Some(details) => format!("{} deferred=true", details),
                    None => "deferred=true".to_string(),
                });
                deferred.push_back(entry);
                Err(KmsError::AuditDeferred {
                    action: action.to_string(),
                    resource_id,
                    cause: e.to_string(),
                })
            }
            Err(e) => {
                error!("Audit append failed for {}; failing closed: {}", action, e);
                Err(e)
            }
        }
    }

    /// Record the outcome of an operation, then hand it back.
    ///
    /// `mutation` is set for operations that change key state; a successful
    /// one is committed before its event is written. Failures are logged
    /// with their error kind only.
    fn audited<T>(
        &self,
        ctx: &OperationContext,
        action: &str,
        resource_id: Option<String>,
        mutation: bool,
        outcome: KmsResult<T>,
        details: impl FnOnce(&T) -> Option<String>,
    ) -> KmsResult<T> {
        let (status, details) = match &outcome {
            Ok(value) => (AuditStatus::Success, details(value)),
            Err(e) => {
                if e.is_integrity_failure() {
                    warn!("{} by {} failed integrity checks: {}", action, ctx.actor, e);
                }
                (AuditStatus::Failure, Some(format!("{}: {}", e.error_type(), e)))
            }
        };

        let committed = mutation && outcome.is_ok();
        self.record_event(ctx, action, resources::KEY, resource_id, status, details, committed)?;
        outcome
    }

    /// Create a key; `algorithm` is one of the canonical tags (or `RSA`)
    pub fn create_key(
        &self,
        ctx: &OperationContext,
        name: &str,
        algorithm: &str,
    ) -> KmsResult<KeySummary> {
        let outcome = algorithm
            .parse::<Algorithm>()
            .and_then(|algorithm| self.keys.create(name, algorithm, &ctx.actor))
            .map(|record| record.summary());

        let resource_id = match &outcome {
            Ok(summary) => summary.id.to_string(),
            Err(_) => name.to_string(),
        };
        self.audited(ctx, actions::CREATE_KEY, Some(resource_id), true, outcome, |summary| {
            Some(format!("name={} algorithm={}", summary.name, summary.algorithm))
        })
    }

    pub fn rotate_key(&self, ctx: &OperationContext, key_id: &KeyId) -> KmsResult<KeySummary> {
        let outcome = self.keys.rotate(key_id).map(|record| record.summary());
        self.audited(ctx, actions::ROTATE_KEY, Some(key_id.to_string()), true, outcome, |summary| {
            Some(format!("version={}", summary.current_version))
        })
    }

    pub fn revoke_key(&self, ctx: &OperationContext, key_id: &KeyId) -> KmsResult<KeySummary> {
        let outcome = self.keys.revoke(key_id).map(|record| record.summary());
        self.audited(ctx, actions::REVOKE_KEY, Some(key_id.to_string()), true, outcome, |_| None)
    }

    /// Delete a key. Everything encrypted under it becomes unrecoverable.
    pub fn delete_key(&self, ctx: &OperationContext, key_id: &KeyId) -> KmsResult<()> {
        let outcome = self.keys.delete(key_id);
        self.audited(ctx, actions::DELETE_KEY, Some(key_id.to_string()), true, outcome, |_| None)
    }

    pub fn get_key(&self, ctx: &OperationContext, key_id: &KeyId) -> KmsResult<KeySummary> {
        let outcome = self.keys.get(key_id);
        self.audited(ctx, actions::GET_KEY, Some(key_id.to_string()), false, outcome, |_| None)
    }

    pub fn list_keys(&self, ctx: &OperationContext) -> KmsResult<Vec<KeySummary>> {
        let outcome = self.keys.list();
        self.audited(ctx, actions::LIST_KEYS, None, false, outcome, |keys| {
            Some(format!("count={}", keys.len()))
        })
    }

    pub fn public_key(
        &self,
        ctx: &OperationContext,
        key_id: &KeyId,
        version: Option<u32>,
    ) -> KmsResult<Vec<u8>> {
        let outcome = self.keys.public_key(key_id, version);
        self.audited(ctx, actions::GET_PUBLIC_KEY, Some(key_id.to_string()), false, outcome, |_| {
            version.map(|v| format!("version={}", v))
        })
    }

    pub fn encrypt(
        &self,
        ctx: &OperationContext,
        key_id: &KeyId,
        plaintext: &[u8],
    ) -> KmsResult<CipherEnvelope> {
        let outcome = self.cipher.encrypt(key_id, plaintext);
        self.audited(ctx, actions::ENCRYPT, Some(key_id.to_string()), false, outcome, |envelope| {
            Some(format!("version={} bytes={}", envelope.key_version, plaintext.len()))
        })
    }

    pub fn decrypt(&self, ctx: &OperationContext, envelope: &CipherEnvelope) -> KmsResult<Vec<u8>> {
        let outcome = self.cipher.decrypt(envelope);
        self.audited(
            ctx,
            actions::DECRYPT,
            Some(envelope.key_id.to_string()),
            false,
            outcome,
            |_| Some(format!("version={}", envelope.key_version)),
        )
    }

    /// Move an envelope to the current version of its key
    pub fn reencrypt(
        &self,
        ctx: &OperationContext,
        envelope: &CipherEnvelope,
    ) -> KmsResult<CipherEnvelope> {
        let outcome = self.cipher.reencrypt(envelope);
        self.audited(
            ctx,
            actions::REENCRYPT,
            Some(envelope.key_id.to_string()),
            false,
            outcome,
            |fresh| {
                Some(format!(
                    "from_version={} to_version={}",
                    envelope.key_version, fresh.key_version
                ))
            },
        )
    }

    /// Rotate every key the configured policy marks as due.
    ///
    /// Each rotation is its own audited operation; a final `auto_rotate`
    /// event records the batch. A store outage stops the batch. Returns the
    /// ids that were rotated.
    pub fn auto_rotate(&self, ctx: &OperationContext) -> KmsResult<Vec<KeyId>> {
        let policy = self.config.rotation_policy;
        let mut due_count = 0;
        let outcome = self.keys.auto_rotate_keys(&policy, Utc::now(), |key_id| {
            due_count += 1;
            self.rotate_key(ctx, key_id).map(|_| ())
        });

        if let Err(e @ KmsError::AuditDeferred { .. }) = outcome {
            return Err(e);
        }
        self.audited(ctx, actions::AUTO_ROTATE, None, false, outcome, |rotated| {
            Some(format!(
                "rotated={} due={} interval_days={}",
                rotated.len(),
                due_count,
                policy.rotation_interval_days
            ))
        })
    }

    /// Audit events matching `filter`, most recent first
    pub fn audit_events(
        &self,
        ctx: &OperationContext,
        filter: &AuditFilter,
        offset: usize,
        limit: usize,
    ) -> KmsResult<Vec<AuditEvent>> {
        let outcome = self.audit.query(filter, EventRange::page(offset, limit));
        let (status, details) = match &outcome {
            Ok(events) => (AuditStatus::Success, format!("returned={}", events.len())),
            Err(e) => (AuditStatus::Failure, e.error_type().to_string()),
        };
        self.record_event(
            ctx,
            actions::VIEW_AUDIT_LOG,
            resources::AUDIT_LOG,
            None,
            status,
            Some(details),
            false,
        )?;
        outcome
    }

    pub fn audit_summary(&self, ctx: &OperationContext) -> KmsResult<AuditSummary> {
        let outcome = self.audit.summary();
        let status = if outcome.is_ok() {
            AuditStatus::Success
        } else {
            AuditStatus::Failure
        };
        self.record_event(
            ctx,
            actions::VIEW_AUDIT_LOG,
            resources::AUDIT_LOG,
            None,
            status,
            Some("summary".to_string()),
            false,
        )?;
        outcome
    }

    /// Verify the stored audit chain.
    ///
    /// A detected tamper is returned as data, and the verification itself
    /// is recorded as a failure event.
    pub fn verify_audit_chain(&self, ctx: &OperationContext) -> KmsResult<ChainVerification> {
        let outcome = self.audit.verify_stored();
        let (status, details) = match &outcome {
            Ok(v) if v.is_valid() => (
                AuditStatus::Success,
                format!("events_verified={}", v.events_verified),
            ),
            Ok(v) => (
                AuditStatus::Failure,
                format!(
                    "first_tampered={} reason={}",
                    v.first_tampered.unwrap_or_default(),
                    v.reason.as_deref().unwrap_or("unknown")
                ),
            ),
            Err(e) => (AuditStatus::Failure, e.error_type().to_string()),
        };
        self.record_event(
            ctx,
            actions::VERIFY_AUDIT_CHAIN,
            resources::AUDIT_LOG,
            None,
            status,
            Some(details),
            false,
        )?;
        outcome
    }
}
