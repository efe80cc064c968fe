use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use super::{select_events, AuditStore, KeyStore};
use crate::audit::{AuditEvent, AuditFilter, EventRange};
use crate::error::{KmsError, KmsResult};
use crate::key_management::KeyRecord;
use crate::types::KeyId;

/// Live records plus tombstones; the shared logic of every key store
#[derive(Debug, Clone, Default)]
pub(crate) struct KeyTable {
    records: HashMap<KeyId, KeyRecord>,
    tombstones: HashSet<KeyId>,
}

impl KeyTable {
    pub(crate) fn from_parts(records: Vec<KeyRecord>, tombstones: Vec<KeyId>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.id, r)).collect(),
            tombstones: tombstones.into_iter().collect(),
        }
    }

    pub(crate) fn records(&self) -> Vec<KeyRecord> {
        let mut records: Vec<KeyRecord> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        records
    }

    pub(crate) fn tombstones(&self) -> Vec<KeyId> {
        let mut tombstones: Vec<KeyId> = self.tombstones.iter().copied().collect();
        tombstones.sort();
        tombstones
    }

    fn current(&self, key_id: &KeyId) -> KmsResult<&KeyRecord> {
        if self.tombstones.contains(key_id) {
            return Err(KmsError::already_deleted(key_id));
        }
        self.records
            .get(key_id)
            .ok_or_else(|| KmsError::not_found(key_id))
    }

    fn check_revision(&self, key_id: &KeyId, expected_revision: u64) -> KmsResult<()> {
        let current = self.current(key_id)?;
        if current.revision != expected_revision {
            return Err(KmsError::StorageConflict {
                key_id: key_id.to_string(),
                expected: expected_revision,
            });
        }
        Ok(())
    }

    pub(crate) fn load(&self, key_id: &KeyId) -> KmsResult<KeyRecord> {
        self.current(key_id).cloned()
    }

    pub(crate) fn find_by_name(&self, name: &str) -> Option<KeyRecord> {
        self.records.values().find(|r| r.name == name).cloned()
    }

    pub(crate) fn insert(&mut self, record: &KeyRecord) -> KmsResult<u64> {
        if self.records.values().any(|r| r.name == record.name) {
            return Err(KmsError::DuplicateName {
                name: record.name.clone(),
            });
        }
        if self.records.contains_key(&record.id) || self.tombstones.contains(&record.id) {
            return Err(KmsError::StorageConflict {
                key_id: record.id.to_string(),
                expected: 0,
            });
        }

        let mut stored = record.clone();
        stored.revision = 1;
        self.records.insert(stored.id, stored);
        Ok(1)
    }

    pub(crate) fn save(&mut self, record: &KeyRecord, expected_revision: u64) -> KmsResult<u64> {
        self.check_revision(&record.id, expected_revision)?;

        let mut stored = record.clone();
        stored.revision = expected_revision + 1;
        self.records.insert(stored.id, stored);
        Ok(expected_revision + 1)
    }

    pub(crate) fn remove(&mut self, key_id: &KeyId, expected_revision: u64) -> KmsResult<()> {
        self.check_revision(key_id, expected_revision)?;

        self.records.remove(key_id);
        self.tombstones.insert(*key_id);
        Ok(())
    }
}

/// Process-local store for keys and audit events
///
/// Whole records are replaced under the write lock, so readers see either
/// the old record or the new one.
#[derive(Debug, Default)]
pub struct MemoryStore {
    keys: RwLock<KeyTable>,
    events: RwLock<Vec<AuditEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored audit events
    pub fn event_count(&self) -> usize {
        self.events.read().len()
    }

    /// Overwrite a stored audit event in place.
    ///
    /// Exists so tamper detection can be exercised; nothing in the engine
    /// calls it.
    pub fn replace_event(&self, index: usize, event: AuditEvent) -> KmsResult<()> {
        let mut events = self.events.write();
        let slot = events.get_mut(index).ok_or_else(|| {
            KmsError::invalid_parameter("index", "an existing event position", &index.to_string())
        })?;
        *slot = event;
        Ok(())
    }

    /// Remove a stored audit event. Same caveat as [`MemoryStore::replace_event`].
    pub fn remove_event(&self, index: usize) -> KmsResult<AuditEvent> {
        let mut events = self.events.write();
        if index >= events.len() {
            return Err(KmsError::invalid_parameter(
                "index",
                "an existing event position",
                &index.to_string(),
            ));
        }
        Ok(events.remove(index))
    }
}

impl KeyStore for MemoryStore {
    fn load(&self, key_id: &KeyId) -> KmsResult<KeyRecord> {
        self.keys.read().load(key_id)
    }

    fn find_by_name(&self, name: &str) -> KmsResult<Option<KeyRecord>> {
        Ok(self.keys.read().find_by_name(name))
    }

    fn list(&self) -> KmsResult<Vec<KeyRecord>> {
        Ok(self.keys.read().records())
    }

    fn insert(&self, record: &KeyRecord) -> KmsResult<u64> {
        self.keys.write().insert(record)
    }

    fn save(&self, record: &KeyRecord, expected_revision: u64) -> KmsResult<u64> {
        self.keys.write().save(record, expected_revision)
    }

    fn remove(&self, key_id: &KeyId, expected_revision: u64) -> KmsResult<()> {
        self.keys.write().remove(key_id, expected_revision)
    }
}

impl AuditStore for MemoryStore {
    fn append_event(&self, event: &AuditEvent) -> KmsResult<()> {
        self.events.write().push(event.clone());
        Ok(())
    }

    fn load_events(&self, filter: &AuditFilter, range: EventRange) -> KmsResult<Vec<AuditEvent>> {
        Ok(select_events(&self.events.read(), filter, range))
    }

    fn last_event(&self) -> KmsResult<Option<AuditEvent>> {
        Ok(self.events.read().last().cloned())
    }
}
