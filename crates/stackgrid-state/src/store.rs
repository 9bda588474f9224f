//! StateStore: redb-backed record of truth for StackGrid.
//!
//! Provides typed CRUD operations over resource records and metric
//! samples. All values are JSON-serialized into redb's `&[u8]` value
//! columns. The store supports both on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use stackgrid_core::MetricSample;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        txn.open_table(RESOURCE_NAMES).map_err(map_err!(Table))?;
        txn.open_table(METRICS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Resources ──────────────────────────────────────────────────

    /// Insert or update a resource record and its name index entry.
    pub fn put_resource(&self, record: &ResourceRecord) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
            table
                .insert(record.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            let mut names = txn.open_table(RESOURCE_NAMES).map_err(map_err!(Table))?;
            names
                .insert(record.name.as_str(), record.id.as_str())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = %record.id, name = %record.name, "resource stored");
        Ok(())
    }

    /// Get a resource by provider id.
    pub fn get_resource(&self, id: &str) -> StateResult<Option<ResourceRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: ResourceRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Resolve a resource name to its provider id.
    pub fn resource_id(&self, name: &str) -> StateResult<Option<ResourceId>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let names = txn.open_table(RESOURCE_NAMES).map_err(map_err!(Table))?;
        Ok(names
            .get(name)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_string()))
    }

    /// Get a resource by its name.
    pub fn find_resource(&self, name: &str) -> StateResult<Option<ResourceRecord>> {
        match self.resource_id(name)? {
            Some(id) => self.get_resource(&id),
            None => Ok(None),
        }
    }

    /// List all resource records.
    pub fn list_resources(&self) -> StateResult<Vec<ResourceRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: ResourceRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// List the records owned by one unit.
    pub fn list_resources_for_unit(&self, unit: &str) -> StateResult<Vec<ResourceRecord>> {
        Ok(self
            .list_resources()?
            .into_iter()
            .filter(|r| r.unit == unit)
            .collect())
    }

    /// Delete a resource by id. Returns true if it existed.
    pub fn delete_resource(&self, id: &str) -> StateResult<bool> {
        let Some(record) = self.get_resource(id)? else {
            return Ok(false);
        };
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
            table.remove(id).map_err(map_err!(Write))?;
            let mut names = txn.open_table(RESOURCE_NAMES).map_err(map_err!(Table))?;
            names.remove(record.name.as_str()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%id, name = %record.name, "resource deleted");
        Ok(true)
    }

    // ── Metrics ────────────────────────────────────────────────────

    /// Insert a metric sample for a stream.
    ///
    /// Samples sharing a timestamp are kept side by side; the sequence
    /// number is read inside the write transaction.
    pub fn put_metric(&self, stream_key: &str, sample: &MetricSample) -> StateResult<()> {
        let value = serde_json::to_vec(sample).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(METRICS).map_err(map_err!(Table))?;
            let second = metric_second_prefix(stream_key, sample.timestamp);
            let seq = {
                let last = table
                    .range(second.as_str()..)
                    .map_err(map_err!(Read))?
                    .map_while(|entry| match entry {
                        Ok((key, _)) if key.value().starts_with(&second) => Some(Ok(key.value().to_string())),
                        Ok(_) => None,
                        Err(e) => Some(Err(e)),
                    })
                    .last()
                    .transpose()
                    .map_err(map_err!(Read))?;
                last.as_deref().and_then(metric_key_seq).map_or(0, |seq| seq + 1)
            };
            let key = metric_key(stream_key, sample.timestamp, seq);
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Samples of a stream with `timestamp >= since`, oldest first.
    pub fn list_metrics(&self, stream_key: &str, since: u64) -> StateResult<Vec<MetricSample>> {
        let prefix = format!("{stream_key}@");
        let start = format!("{prefix}{since:020}");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(METRICS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(start.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let sample: MetricSample =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(sample);
        }
        Ok(results)
    }
}
