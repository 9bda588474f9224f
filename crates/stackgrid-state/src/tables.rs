//! redb table definitions for the StackGrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records),
//! except the name index which maps straight to the id string.

use redb::TableDefinition;

/// Resource records keyed by provider id.
pub const RESOURCES: TableDefinition<&str, &[u8]> = TableDefinition::new("resources");

/// Resource name → provider id.
pub const RESOURCE_NAMES: TableDefinition<&str, &str> = TableDefinition::new("resource_names");

/// Metric samples keyed by `{stream_key}@{timestamp:020}/{seq:010}`.
pub const METRICS: TableDefinition<&str, &[u8]> = TableDefinition::new("metrics");
