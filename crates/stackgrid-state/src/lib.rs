//! stackgrid-state: embedded record-of-truth store for StackGrid.
//!
//! Backed by [redb](https://docs.rs/redb), it keeps what a provider has
//! materialized (one [`ResourceRecord`] per resource) and the metric
//! samples the scaling loop reads back.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! Resources are keyed by provider id, with a secondary name → id table
//! so lookups by resource name stay a point read. Metric samples use a
//! `{stream_key}@{timestamp}` composite key with a zero-padded timestamp,
//! so a prefix scan returns them in time order.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
