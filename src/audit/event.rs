use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::put_field;

/// Largest page returned by an audit query
pub const MAX_QUERY_LIMIT: usize = 1000;

/// Action names recorded by the engine
pub mod actions {
    pub const CREATE_KEY: &str = "create_key";
    pub const ROTATE_KEY: &str = "rotate_key";
    pub const REVOKE_KEY: &str = "revoke_key";
    pub const DELETE_KEY: &str = "delete_key";
    pub const GET_KEY: &str = "get_key";
    pub const LIST_KEYS: &str = "list_keys";
    pub const GET_PUBLIC_KEY: &str = "get_public_key";
    pub const ENCRYPT: &str = "encrypt";
    pub const DECRYPT: &str = "decrypt";
    pub const REENCRYPT: &str = "reencrypt";
    pub const AUTO_ROTATE: &str = "auto_rotate";
    pub const VIEW_AUDIT_LOG: &str = "view_audit_log";
    pub const VERIFY_AUDIT_CHAIN: &str = "verify_audit_chain";
}

/// Resource type names recorded by the engine
pub mod resources {
    pub const KEY: &str = "key";
    pub const AUDIT_LOG: &str = "audit_log";
}

/// Outcome of an audited operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failure,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields supplied by the caller of `AuditChain::append`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditEvent {
    pub actor: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub status: AuditStatus,
    pub source_address: Option<String>,
    pub details: Option<String>,
}

impl NewAuditEvent {
    pub fn new(actor: &str, action: &str, resource_type: &str, status: AuditStatus) -> Self {
        Self {
            actor: actor.to_string(),
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: None,
            status,
            source_address: None,
            details: None,
        }
    }

    pub fn resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn source_address(mut self, source_address: Option<String>) -> Self {
        self.source_address = source_address;
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// One immutable audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub sequence_number: u64,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub status: AuditStatus,
    pub source_address: Option<String>,
    pub details: Option<String>,
    /// Hex HMAC binding this event to every event before it
    pub chain_tag: String,
}

impl AuditEvent {
    /// Unambiguous byte encoding of every field except the chain tag
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        put_field(&mut out, &self.sequence_number.to_be_bytes());
        put_field(&mut out, &self.timestamp.timestamp().to_be_bytes());
        put_field(&mut out, &self.timestamp.timestamp_subsec_nanos().to_be_bytes());
        put_field(&mut out, self.actor.as_bytes());
        put_field(&mut out, self.action.as_bytes());
        put_field(&mut out, self.resource_type.as_bytes());
        put_optional(&mut out, self.resource_id.as_deref());
        put_field(&mut out, self.status.as_str().as_bytes());
        put_optional(&mut out, self.source_address.as_deref());
        put_optional(&mut out, self.details.as_deref());
        out
    }
}

fn put_optional(out: &mut Vec<u8>, field: Option<&str>) {
    match field {
        Some(value) => {
            out.push(1);
            put_field(out, value.as_bytes());
        }
        None => out.push(0),
    }
}

/// Query filter; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFilter {
    pub actor: Option<String>,
    pub action: Option<String>,
    pub status: Option<AuditStatus>,
    pub resource_id: Option<String>,
}

impl AuditFilter {
    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.actor.as_ref().map_or(true, |a| *a == event.actor)
            && self.action.as_ref().map_or(true, |a| *a == event.action)
            && self.status.map_or(true, |s| s == event.status)
            && self
                .resource_id
                .as_ref()
                .map_or(true, |r| event.resource_id.as_ref() == Some(r))
    }
}

/// Window over query results (most recent first)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRange {
    pub offset: usize,
    pub limit: Option<usize>,
}

impl EventRange {
    /// Every matching event
    pub fn all() -> Self {
        Self {
            offset: 0,
            limit: None,
        }
    }

    /// A page with `limit` clamped to `1..=MAX_QUERY_LIMIT`
    pub fn page(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: Some(limit.clamp(1, MAX_QUERY_LIMIT)),
        }
    }
}

impl Default for EventRange {
    fn default() -> Self {
        Self::page(0, 100)
    }
}

/// Aggregate counts over the whole log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub total_events: u64,
    pub by_action: BTreeMap<String, u64>,
    pub by_status: BTreeMap<String, u64>,
    pub first_event_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
}

/// Result of recomputing the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    /// Events checked before the first mismatch (all of them if valid)
    pub events_verified: usize,
    /// 1-based position of the first tampered event
    pub first_tampered: Option<usize>,
    pub reason: Option<String>,
}

impl ChainVerification {
    pub fn is_valid(&self) -> bool {
        self.first_tampered.is_none()
    }
}
