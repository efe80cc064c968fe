// Tamper detection over the audit chain as produced by real operations

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use kms_core::audit::{AuditChain, EventRange};
use kms_core::prelude::*;
use kms_core::storage::AuditStore;

const MASTER: [u8; 32] = [0x10; 32];
const AUDIT: [u8; 32] = [0x20; 32];

fn kms_with_store() -> (Kms, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let config = EngineConfig::new(&MASTER, &AUDIT).unwrap();
    let kms = Kms::new(config, store.clone(), store.clone()).unwrap();
    (kms, store)
}

fn generate_activity(kms: &Kms) {
    let ctx = OperationContext::new("operator").with_source_address("198.51.100.7");
    let key = kms.create_key(&ctx, "ledger", "AES256GCM").unwrap();
    let envelope = kms.encrypt(&ctx, &key.id, b"entry").unwrap();
    kms.rotate_key(&ctx, &key.id).unwrap();
    kms.decrypt(&ctx, &envelope).unwrap();
    kms.revoke_key(&ctx, &key.id).unwrap();
    let _ = kms.encrypt(&ctx, &key.id, b"refused");
}

#[test]
fn test_untouched_log_verifies() {
    let (kms, _) = kms_with_store();
    generate_activity(&kms);

    let verification = kms.verify_audit_chain(&OperationContext::system()).unwrap();
    assert!(verification.is_valid());
    assert_eq!(verification.events_verified, 6);

    // The verification was itself recorded
    assert_eq!(kms.audit_chain().next_sequence(), 8);
}

#[test]
fn test_any_single_edit_is_localized() {
    let (kms, _) = kms_with_store();
    generate_activity(&kms);
    let events = kms.audit_chain().all_events().unwrap();

    for position in 1..=events.len() {
        let mut tampered = events.clone();
        tampered[position - 1].status = match tampered[position - 1].status {
            AuditStatus::Success => AuditStatus::Failure,
            AuditStatus::Failure => AuditStatus::Success,
        };
        let verification = kms.audit_chain().verify(&tampered);
        assert_eq!(verification.first_tampered, Some(position));
    }
}

#[test]
fn test_stored_edit_is_reported_and_audited() {
    let (kms, store) = kms_with_store();
    generate_activity(&kms);

    let mut events = kms.audit_chain().all_events().unwrap();
    let mut edited = events.remove(3);
    edited.actor = "someone-else".to_string();
    store.replace_event(3, edited).unwrap();

    let ctx = OperationContext::new("auditor");
    let verification = kms.verify_audit_chain(&ctx).unwrap();
    assert_eq!(verification.first_tampered, Some(4));

    let last = kms.audit_chain().all_events().unwrap().pop().unwrap();
    assert_eq!(last.actor, "auditor");
    assert_eq!(last.status, AuditStatus::Failure);
    assert!(last.details.unwrap().contains("first_tampered=4"));
}

#[test]
fn test_deleted_event_is_reported() {
    let (kms, store) = kms_with_store();
    generate_activity(&kms);

    store.remove_event(1).unwrap();
    let verification = kms.audit_chain().verify_stored().unwrap();
    assert_eq!(verification.first_tampered, Some(2));
}

#[test]
fn test_chain_resumes_for_new_engine_instance() {
    let store = Arc::new(MemoryStore::new());
    {
        let config = EngineConfig::new(&MASTER, &AUDIT).unwrap();
        let kms = Kms::new(config, store.clone(), store.clone()).unwrap();
        generate_activity(&kms);
    }

    let config = EngineConfig::new(&MASTER, &AUDIT).unwrap();
    let kms = Kms::new(config, store.clone(), store.clone()).unwrap();
    kms.list_keys(&OperationContext::system()).unwrap();

    let chain = AuditChain::open(&AUDIT, store).unwrap();
    let verification = chain.verify_stored().unwrap();
    assert!(verification.is_valid());
    assert_eq!(verification.events_verified, 7);
}

#[test]
fn test_different_audit_secret_cannot_vouch_for_log() {
    let (kms, store) = kms_with_store();
    generate_activity(&kms);

    let impostor = AuditChain::open(&[0x30; 32], store).unwrap();
    assert_eq!(impostor.verify_stored().unwrap().first_tampered, Some(1));
}

/// Audit store that can be switched off to simulate an outage
struct UnreliableAuditStore {
    inner: Arc<MemoryStore>,
    down: AtomicBool,
}

impl UnreliableAuditStore {
    fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            down: AtomicBool::new(false),
        }
    }

    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

impl AuditStore for UnreliableAuditStore {
    fn append_event(&self, event: &AuditEvent) -> KmsResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(KmsError::storage("append_event", "audit volume offline"));
        }
        self.inner.append_event(event)
    }

    fn load_events(&self, filter: &AuditFilter, range: EventRange) -> KmsResult<Vec<AuditEvent>> {
        self.inner.load_events(filter, range)
    }

    fn last_event(&self) -> KmsResult<Option<AuditEvent>> {
        self.inner.last_event()
    }
}

fn kms_with_unreliable_audit() -> (Kms, Arc<UnreliableAuditStore>) {
    let store = Arc::new(MemoryStore::new());
    let audit = Arc::new(UnreliableAuditStore::new(store.clone()));
    let config = EngineConfig::new(&MASTER, &AUDIT).unwrap();
    let kms = Kms::new(config, store, audit.clone()).unwrap();
    (kms, audit)
}

#[test]
fn test_committed_delete_is_audited_after_outage() {
    let (kms, audit) = kms_with_unreliable_audit();
    let ctx = OperationContext::new("operator");
    let key = kms.create_key(&ctx, "ephemeral", "AES256GCM").unwrap();

    audit.set_down(true);
    let err = kms.delete_key(&ctx, &key.id).unwrap_err();
    assert!(matches!(err, KmsError::AuditDeferred { .. }));
    assert!(err.is_storage_outage());
    assert!(!err.is_retryable());

    // The delete stands even though its event is not written yet
    assert!(matches!(
        kms.lifecycle().get(&key.id),
        Err(KmsError::AlreadyDeleted { .. })
    ));
    assert_eq!(kms.pending_audit_events(), 1);

    audit.set_down(false);
    kms.list_keys(&ctx).unwrap();
    assert_eq!(kms.pending_audit_events(), 0);

    let events = kms.audit_chain().all_events().unwrap();
    let actions: Vec<&str> = events.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(actions, vec!["create_key", "delete_key", "list_keys"]);
    let deleted = &events[1];
    assert_eq!(deleted.status, AuditStatus::Success);
    assert_eq!(deleted.resource_id.as_deref(), Some(key.id.to_string().as_str()));
    assert!(deleted.details.as_deref().unwrap_or_default().contains("deferred=true"));

    assert!(kms.verify_audit_chain(&ctx).unwrap().is_valid());
}

#[test]
fn test_reads_fail_closed_while_audit_is_down() {
    let (kms, audit) = kms_with_unreliable_audit();
    let ctx = OperationContext::new("operator");
    let key = kms.create_key(&ctx, "ledger", "AES256GCM").unwrap();
    let envelope = kms.encrypt(&ctx, &key.id, b"entry").unwrap();

    audit.set_down(true);
    assert!(matches!(
        kms.encrypt(&ctx, &key.id, b"more"),
        Err(KmsError::StorageUnavailable { .. })
    ));
    assert!(matches!(
        kms.decrypt(&ctx, &envelope),
        Err(KmsError::StorageUnavailable { .. })
    ));
    assert_eq!(kms.pending_audit_events(), 0);

    audit.set_down(false);
    assert_eq!(kms.decrypt(&ctx, &envelope).unwrap(), b"entry".to_vec());
}

#[test]
fn test_deferred_rotation_is_not_repeated() {
    let (kms, audit) = kms_with_unreliable_audit();
    let ctx = OperationContext::new("operator");
    let key = kms.create_key(&ctx, "rotating", "AES256GCM").unwrap();

    audit.set_down(true);
    let err = kms.rotate_key(&ctx, &key.id).unwrap_err();
    match err {
        KmsError::AuditDeferred { action, resource_id, .. } => {
            assert_eq!(action, "rotate_key");
            assert_eq!(resource_id, key.id.to_string());
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(kms.lifecycle().get(&key.id).unwrap().current_version, 2);

    // A second committed mutation queues behind the first
    assert!(matches!(
        kms.revoke_key(&ctx, &key.id),
        Err(KmsError::AuditDeferred { .. })
    ));
    assert_eq!(kms.pending_audit_events(), 2);

    audit.set_down(false);
    assert_eq!(kms.flush_pending_audit().unwrap(), 2);

    let events = kms.audit_chain().all_events().unwrap();
    let actions: Vec<&str> = events.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(actions, vec!["create_key", "rotate_key", "revoke_key"]);
    assert!(events[1].details.as_deref().unwrap_or_default().contains("version=2"));
    assert!(kms.audit_chain().verify_stored().unwrap().is_valid());
}
