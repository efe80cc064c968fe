/*!
 * Store Adapters
 *
 * The narrow persistence contract used by the lifecycle engine and the
 * audit chain, with an in-memory implementation and a file-backed one.
 *
 * Stores hand out and accept whole records. A `save` carries the revision
 * the caller loaded; if another writer got there first the store answers
 * `StorageConflict` and the caller reloads. Deleted keys leave a tombstone
 * so later lookups report `AlreadyDeleted` while the name becomes free.
 */

mod file;
mod memory;

pub use file::*;
pub use memory::*;

use crate::audit::{AuditEvent, AuditFilter, EventRange};
use crate::error::KmsResult;
use crate::key_management::KeyRecord;
use crate::types::KeyId;

/// Durable storage for key records
pub trait KeyStore: Send + Sync {
    /// Load a record
    ///
    /// Fails with `NotFound` for unknown ids and `AlreadyDeleted` for tombstones.
    fn load(&self, key_id: &KeyId) -> KmsResult<KeyRecord>;

    /// Find the live record with this name, if any
    fn find_by_name(&self, name: &str) -> KmsResult<Option<KeyRecord>>;

    /// All live records, oldest first
    fn list(&self) -> KmsResult<Vec<KeyRecord>>;

    /// Insert a new record and return its first revision
    ///
    /// Fails with `DuplicateName` if a live record already has the name.
    fn insert(&self, record: &KeyRecord) -> KmsResult<u64>;

    /// Replace a record if its stored revision still equals `expected_revision`
    ///
    /// Returns the new revision, or `StorageConflict` on a stale write.
    fn save(&self, record: &KeyRecord, expected_revision: u64) -> KmsResult<u64>;

    /// Remove a record, leaving a tombstone behind
    fn remove(&self, key_id: &KeyId, expected_revision: u64) -> KmsResult<()>;
}

/// Append-only storage for audit events
pub trait AuditStore: Send + Sync {
    fn append_event(&self, event: &AuditEvent) -> KmsResult<()>;

    /// Matching events, most recent first, restricted to `range`
    fn load_events(&self, filter: &AuditFilter, range: EventRange) -> KmsResult<Vec<AuditEvent>>;

    fn last_event(&self) -> KmsResult<Option<AuditEvent>>;
}

/// Apply a filter and range to events stored in sequence order
pub(crate) fn select_events(
    events: &[AuditEvent],
    filter: &AuditFilter,
    range: EventRange,
) -> Vec<AuditEvent> {
    events
        .iter()
        .rev()
        .filter(|event| filter.matches(event))
        .skip(range.offset)
        .take(range.limit.unwrap_or(usize::MAX))
        .cloned()
        .collect()
}
