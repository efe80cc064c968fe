use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, warn};
use parking_lot::Mutex;
use ring::hmac;

use super::event::{
    AuditEvent, AuditFilter, AuditSummary, ChainVerification, EventRange, NewAuditEvent,
};
use crate::config::EngineConfig;
use crate::error::{KmsError, KmsResult};
use crate::storage::AuditStore;

/// Predecessor tag of the first event
pub const GENESIS_TAG: [u8; 32] = [0u8; 32];

struct ChainHead {
    next_sequence: u64,
    last_tag: Vec<u8>,
}

/// Append-only, HMAC-chained audit log over an `AuditStore`
pub struct AuditChain {
    key: hmac::Key,
    store: Arc<dyn AuditStore>,
    head: Mutex<ChainHead>,
}

impl fmt::Debug for AuditChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = self.head.lock();
        f.debug_struct("AuditChain")
            .field("key", &"[REDACTED]")
            .field("next_sequence", &head.next_sequence)
            .finish()
    }
}

impl AuditChain {
    /// Open the chain, resuming after the last stored event.
    ///
    /// # Arguments
    ///
    /// * `audit_key` - Secret for the chain HMAC; must differ from the master secret
    /// * `store` - Where events are appended and read back
    ///
    /// # Errors
    ///
    /// Returns `IntegrityFailure` if the last stored event has a malformed tag
    pub fn open(audit_key: &[u8], store: Arc<dyn AuditStore>) -> KmsResult<Self> {
        let head = match store.last_event()? {
            Some(last) => ChainHead {
                next_sequence: last.sequence_number + 1,
                last_tag: hex::decode(&last.chain_tag)
                    .map_err(|_| KmsError::integrity("last audit event has a malformed chain tag"))?,
            },
            None => ChainHead {
                next_sequence: 1,
                last_tag: GENESIS_TAG.to_vec(),
            },
        };

        debug!("Audit chain opened at sequence {}", head.next_sequence);

        Ok(Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, audit_key),
            store,
            head: Mutex::new(head),
        })
    }

    /// Open the chain with the audit secret held by `config`
    pub fn from_config(config: &EngineConfig, store: Arc<dyn AuditStore>) -> KmsResult<Self> {
        Self::open(config.audit_key().as_bytes(), store)
    }

    /// Sequence number the next appended event will receive
    pub fn next_sequence(&self) -> u64 {
        self.head.lock().next_sequence
    }

    fn chain_input(previous: &[u8], event: &AuditEvent) -> Vec<u8> {
        let canonical = event.canonical_bytes();
        let mut data = Vec::with_capacity(previous.len() + canonical.len());
        data.extend_from_slice(previous);
        data.extend_from_slice(&canonical);
        data
    }

    /// Assign the next sequence number and chain tag, then persist.
    ///
    /// The head only advances once the store accepted the event, so a failed
    /// append leaves no gap.
    pub fn append(&self, entry: NewAuditEvent) -> KmsResult<AuditEvent> {
        let mut head = self.head.lock();

        let mut event = AuditEvent {
            sequence_number: head.next_sequence,
            timestamp: Utc::now(),
            actor: entry.actor,
            action: entry.action,
            resource_type: entry.resource_type,
            resource_id: entry.resource_id,
            status: entry.status,
            source_address: entry.source_address,
            details: entry.details,
            chain_tag: String::new(),
        };
        let tag = hmac::sign(&self.key, &Self::chain_input(&head.last_tag, &event));
        event.chain_tag = hex::encode(tag.as_ref());

        if let Err(e) = self.store.append_event(&event) {
            error!("Failed to append audit event {}: {}", event.sequence_number, e);
            return Err(match e {
                KmsError::StorageUnavailable { .. } => e,
                other => KmsError::storage("append_audit_event", &other.to_string()),
            });
        }

        head.next_sequence += 1;
        head.last_tag = tag.as_ref().to_vec();
        Ok(event)
    }

    /// Recompute the chain over `events`, given in sequence order from the
    /// first event.
    ///
    /// Reports the 1-based position of the first event whose sequence number
    /// or tag does not match.
    pub fn verify(&self, events: &[AuditEvent]) -> ChainVerification {
        let mut previous = GENESIS_TAG.to_vec();

        for (index, event) in events.iter().enumerate() {
            let position = index + 1;

            if event.sequence_number != position as u64 {
                return tampered(
                    position,
                    format!(
                        "expected sequence number {}, found {}",
                        position, event.sequence_number
                    ),
                );
            }

            let stored = match hex::decode(&event.chain_tag) {
                Ok(tag) => tag,
                Err(_) => return tampered(position, "malformed chain tag".to_string()),
            };

            if hmac::verify(&self.key, &Self::chain_input(&previous, event), &stored).is_err() {
                return tampered(position, "chain tag mismatch".to_string());
            }
            previous = stored;
        }

        ChainVerification {
            events_verified: events.len(),
            first_tampered: None,
            reason: None,
        }
    }

    /// Verify every stored event, including that none are missing at the end
    pub fn verify_stored(&self) -> KmsResult<ChainVerification> {
        let head = self.head.lock();
        let events = self.all_events()?;

        let verification = self.verify(&events);
        if !verification.is_valid() {
            return Ok(verification);
        }

        let expected = head.next_sequence - 1;
        if events.len() as u64 != expected {
            return Ok(tampered(
                events.len() + 1,
                format!("log holds {} events, chain head expects {}", events.len(), expected),
            ));
        }
        Ok(verification)
    }

    /// Every stored event in sequence order
    pub fn all_events(&self) -> KmsResult<Vec<AuditEvent>> {
        let mut events = self
            .store
            .load_events(&AuditFilter::default(), EventRange::all())?;
        events.reverse();
        Ok(events)
    }

    /// Filtered events, most recent first
    pub fn query(&self, filter: &AuditFilter, range: EventRange) -> KmsResult<Vec<AuditEvent>> {
        self.store.load_events(filter, range)
    }

    /// Totals and counts by action and status
    pub fn summary(&self) -> KmsResult<AuditSummary> {
        let events = self.all_events()?;
        let mut summary = AuditSummary {
            total_events: events.len() as u64,
            first_event_at: events.first().map(|e| e.timestamp),
            last_event_at: events.last().map(|e| e.timestamp),
            ..AuditSummary::default()
        };

        for event in &events {
            *summary.by_action.entry(event.action.clone()).or_insert(0) += 1;
            *summary
                .by_status
                .entry(event.status.as_str().to_string())
                .or_insert(0) += 1;
        }
        Ok(summary)
    }
}

fn tampered(position: usize, reason: String) -> ChainVerification {
    warn!("Audit chain verification failed at position {}: {}", position, reason);
    ChainVerification {
        events_verified: position - 1,
        first_tampered: Some(position),
        reason: Some(reason),
    }
}
