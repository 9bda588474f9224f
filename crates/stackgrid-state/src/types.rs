//! Persisted record types.

use serde::{Deserialize, Serialize};
use stackgrid_core::{ResourceDescription, ResourceKind, UnitName};

/// Provider-assigned resource identifier.
pub type ResourceId = String;

/// What the provider knows about one materialized resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceRecord {
    pub id: ResourceId,
    pub name: String,
    pub unit: UnitName,
    pub kind: ResourceKind,
    pub description: ResourceDescription,
    /// Fingerprint of `description` at the time it was written.
    pub fingerprint: String,
    /// Current capacity, for resources that have one.
    pub capacity: Option<u32>,
    /// Unix timestamp (seconds) when this record was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) when this record was last updated.
    pub updated_at: u64,
}

impl ResourceRecord {
    /// Build a fresh record for a description.
    pub fn new(id: ResourceId, unit: &str, description: ResourceDescription, now: u64) -> Self {
        Self {
            id,
            name: description.name().to_string(),
            unit: unit.to_string(),
            kind: description.kind(),
            fingerprint: description.fingerprint(),
            capacity: description.initial_capacity(),
            description,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Build the composite key for the metrics table.
///
/// `seq` orders samples that share a timestamp.
pub fn metric_key(stream_key: &str, timestamp: u64, seq: u32) -> String {
    format!("{}{seq:010}", metric_second_prefix(stream_key, timestamp))
}

/// Key prefix shared by every sample of a stream within one second.
pub fn metric_second_prefix(stream_key: &str, timestamp: u64) -> String {
    format!("{stream_key}@{timestamp:020}/")
}

/// Parse the sequence number back out of a metrics key.
pub fn metric_key_seq(key: &str) -> Option<u32> {
    key.rsplit_once('/').and_then(|(_, seq)| seq.parse().ok())
}
