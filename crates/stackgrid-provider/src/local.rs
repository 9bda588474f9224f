//! LocalProvider: a provider and metric source over the redb state store.
//!
//! Resource ids are derived from the resource name, so repeated creates of
//! the same name land on the same record. Capacity writes are
//! compare-and-set against the stored value.

use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use stackgrid_core::{MetricQuery, MetricSample, ResourceDescription, Statistic};
use stackgrid_state::{ResourceId, ResourceRecord, StateStore};
use tracing::{debug, info};

use crate::error::{ProviderError, ProviderResult};
use crate::traits::{BoxFuture, MetricSource, Provider, ResourceDelta};

#[derive(Clone)]
pub struct LocalProvider {
    store: StateStore,
}

impl LocalProvider {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Provider backed by an in-memory store.
    pub fn in_memory() -> ProviderResult<Self> {
        Ok(Self::new(StateStore::open_in_memory()?))
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Record a resource that exists outside this provider's control,
    /// such as a network that a stack imports by id.
    pub fn register_existing(&self, unit: &str, description: ResourceDescription) -> ProviderResult<ResourceId> {
        let id = resource_id(&description);
        let record = ResourceRecord::new(id.clone(), unit, description, epoch_secs());
        self.store.put_resource(&record)?;
        info!(%id, name = %record.name, "existing resource registered");
        Ok(id)
    }

    /// Append a sample to a metric stream, stamped now.
    pub fn record_metric(&self, stream_key: &str, value: f64) -> ProviderResult<MetricSample> {
        let sample = MetricSample {
            value,
            timestamp: epoch_secs(),
        };
        self.record_sample(stream_key, &sample)?;
        Ok(sample)
    }

    pub fn record_sample(&self, stream_key: &str, sample: &MetricSample) -> ProviderResult<()> {
        self.store.put_metric(stream_key, sample)?;
        debug!(stream = %stream_key, value = sample.value, "metric recorded");
        Ok(())
    }

    fn create_sync(&self, unit: &str, description: &ResourceDescription) -> ProviderResult<ResourceId> {
        if let Some(id) = self.store.resource_id(description.name())? {
            debug!(%id, name = %description.name(), "create hit existing resource");
            return Ok(id);
        }
        if description.is_imported() {
            return Err(ProviderError::Rejected(format!(
                "{} is imported and cannot be created",
                description.name()
            )));
        }
        let id = resource_id(description);
        let record = ResourceRecord::new(id.clone(), unit, description.clone(), epoch_secs());
        self.store.put_resource(&record)?;
        info!(%id, name = %record.name, kind = record.kind.as_str(), "resource created");
        Ok(id)
    }

    fn read_sync(&self, id: &str) -> ProviderResult<ResourceRecord> {
        self.store
            .get_resource(id)?
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }

    fn update_sync(&self, id: &str, delta: ResourceDelta) -> ProviderResult<()> {
        let mut record = self.read_sync(id)?;
        match delta {
            ResourceDelta::Replace(description) => {
                if description.name() != record.name {
                    return Err(ProviderError::Rejected(format!(
                        "cannot rename {} to {}",
                        record.name,
                        description.name()
                    )));
                }
                record.capacity = match (&description, record.capacity) {
                    (ResourceDescription::ScalingGroup(group), Some(current)) => {
                        Some(group.bounds.clamp(current as i64))
                    }
                    _ => description.initial_capacity(),
                };
                record.kind = description.kind();
                record.fingerprint = description.fingerprint();
                record.description = description;
            }
            ResourceDelta::Capacity { from, to } => {
                if record.capacity != Some(from) {
                    return Err(ProviderError::Conflict {
                        id: id.to_string(),
                        expected: Some(from),
                        found: record.capacity,
                    });
                }
                if let ResourceDescription::ScalingGroup(group) = &record.description
                    && (to < group.bounds.min || to > group.bounds.max)
                {
                    return Err(ProviderError::Rejected(format!(
                        "capacity {to} outside [{}, {}] for {}",
                        group.bounds.min, group.bounds.max, record.name
                    )));
                }
                record.capacity = Some(to);
                info!(%id, name = %record.name, from, to, "capacity updated");
            }
        }
        record.updated_at = epoch_secs();
        self.store.put_resource(&record)?;
        Ok(())
    }

    fn sample_sync(&self, query: &MetricQuery) -> ProviderResult<MetricSample> {
        let stream = query.stream_key();
        let since = epoch_secs().saturating_sub(query.window_secs);
        let samples = self.store.list_metrics(&stream, since)?;
        aggregate(&samples, query.statistic).ok_or_else(|| {
            ProviderError::NotFound(format!(
                "no samples for {stream} in the last {}s",
                query.window_secs
            ))
        })
    }
}

impl Provider for LocalProvider {
    fn create<'a>(
        &'a self,
        unit: &'a str,
        description: &'a ResourceDescription,
    ) -> BoxFuture<'a, ProviderResult<ResourceId>> {
        Box::pin(async move { self.create_sync(unit, description) })
    }

    fn read<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ProviderResult<ResourceRecord>> {
        Box::pin(async move { self.read_sync(id) })
    }

    fn find<'a>(&'a self, name: &'a str) -> BoxFuture<'a, ProviderResult<Option<ResourceId>>> {
        Box::pin(async move { Ok(self.store.resource_id(name)?) })
    }

    fn update<'a>(&'a self, id: &'a str, delta: ResourceDelta) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move { self.update_sync(id, delta) })
    }

    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            if self.store.delete_resource(id)? {
                info!(%id, "resource deleted");
            }
            Ok(())
        })
    }

    fn list_unit<'a>(&'a self, unit: &'a str) -> BoxFuture<'a, ProviderResult<Vec<ResourceRecord>>> {
        Box::pin(async move { Ok(self.store.list_resources_for_unit(unit)?) })
    }
}

impl MetricSource for LocalProvider {
    fn sample<'a>(&'a self, query: &'a MetricQuery) -> BoxFuture<'a, ProviderResult<MetricSample>> {
        Box::pin(async move { self.sample_sync(query) })
    }
}

/// Reduce samples to one value; the timestamp is the newest sample's.
fn aggregate(samples: &[MetricSample], statistic: Statistic) -> Option<MetricSample> {
    let timestamp = samples.iter().map(|s| s.timestamp).max()?;
    let values = samples.iter().map(|s| s.value);
    let value = match statistic {
        Statistic::Average => values.sum::<f64>() / samples.len() as f64,
        Statistic::Sum => values.sum(),
        Statistic::Minimum => values.fold(f64::INFINITY, f64::min),
        Statistic::Maximum => values.fold(f64::NEG_INFINITY, f64::max),
    };
    Some(MetricSample { value, timestamp })
}

/// `{kind}-{first 12 hex chars of sha256(name)}`
fn resource_id(description: &ResourceDescription) -> ResourceId {
    let digest = Sha256::digest(description.name().as_bytes());
    format!("{}-{}", description.kind().as_str(), &hex::encode(digest)[..12])
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use stackgrid_core::*;

    fn scaling_group(min: u32, max: u32) -> ResourceDescription {
        ResourceDescription::ScalingGroup(ScalingGroupResource {
            name: "app/asg".to_string(),
            network: ResourceRef::new("network", "network/vpc"),
            tier: Tier::PrivateWithEgress,
            subnets: Vec::new(),
            security_group: ResourceRef::new("app", "app/asg-sg"),
            bounds: CapacityBounds::new(min, max),
        })
    }

    fn imported() -> ResourceDescription {
        ResourceDescription::ImportedNetwork(ImportedNetworkResource {
            name: "network/vpc".to_string(),
            vpc_id: "vpc-0abc".to_string(),
            vpc_name: "demo-vpc".to_string(),
            block: "10.1.0.0/20".parse().unwrap(),
            subnets: Vec::new(),
        })
    }

    fn cpu_query(statistic: Statistic, window_secs: u64) -> MetricQuery {
        MetricQuery {
            name: "CPUUtilization".to_string(),
            namespace: "AWS/EC2".to_string(),
            statistic,
            dimensions: BTreeMap::from([("AutoScalingGroupName".to_string(), "app/asg".to_string())]),
            window_secs,
        }
    }

    #[tokio::test]
    async fn create_is_idempotent_by_name() {
        let provider = LocalProvider::in_memory().unwrap();
        let desc = scaling_group(2, 10);
        let first = provider.create("app", &desc).await.unwrap();
        let second = provider.create("app", &desc).await.unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("scaling_group-"));

        let record = provider.read(&first).await.unwrap();
        assert_eq!(record.capacity, Some(2));
        assert_eq!(provider.find("app/asg").await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn read_missing_is_not_found() {
        let provider = LocalProvider::in_memory().unwrap();
        assert!(matches!(provider.read("nope").await, Err(ProviderError::NotFound(_))));
        assert_eq!(provider.find("app/asg").await.unwrap(), None);
    }

    #[tokio::test]
    async fn imported_resources_must_already_exist() {
        let provider = LocalProvider::in_memory().unwrap();
        assert!(matches!(
            provider.create("network", &imported()).await,
            Err(ProviderError::Rejected(_))
        ));

        let id = provider.register_existing("network", imported()).unwrap();
        assert_eq!(provider.create("network", &imported()).await.unwrap(), id);
    }

    #[tokio::test]
    async fn capacity_update_is_compare_and_set() {
        let provider = LocalProvider::in_memory().unwrap();
        let id = provider.create("app", &scaling_group(2, 10)).await.unwrap();

        provider
            .update(&id, ResourceDelta::Capacity { from: 2, to: 5 })
            .await
            .unwrap();
        assert_eq!(provider.read(&id).await.unwrap().capacity, Some(5));

        let stale = provider
            .update(&id, ResourceDelta::Capacity { from: 2, to: 3 })
            .await;
        assert!(matches!(
            stale,
            Err(ProviderError::Conflict {
                expected: Some(2),
                found: Some(5),
                ..
            })
        ));

        let out_of_bounds = provider
            .update(&id, ResourceDelta::Capacity { from: 5, to: 11 })
            .await;
        assert!(matches!(out_of_bounds, Err(ProviderError::Rejected(_))));
    }

    #[tokio::test]
    async fn replace_keeps_capacity_within_new_bounds() {
        let provider = LocalProvider::in_memory().unwrap();
        let id = provider.create("app", &scaling_group(2, 10)).await.unwrap();
        provider
            .update(&id, ResourceDelta::Capacity { from: 2, to: 9 })
            .await
            .unwrap();

        provider
            .update(&id, ResourceDelta::Replace(scaling_group(2, 6)))
            .await
            .unwrap();
        let record = provider.read(&id).await.unwrap();
        assert_eq!(record.capacity, Some(6));
        assert_eq!(record.fingerprint, scaling_group(2, 6).fingerprint());
    }

    #[tokio::test]
    async fn replace_cannot_rename() {
        let provider = LocalProvider::in_memory().unwrap();
        let id = provider.create("app", &scaling_group(2, 10)).await.unwrap();
        let result = provider.update(&id, ResourceDelta::Replace(imported())).await;
        assert!(matches!(result, Err(ProviderError::Rejected(_))));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let provider = LocalProvider::in_memory().unwrap();
        let id = provider.create("app", &scaling_group(2, 10)).await.unwrap();
        assert_eq!(provider.list_unit("app").await.unwrap().len(), 1);

        provider.delete(&id).await.unwrap();
        provider.delete(&id).await.unwrap();
        assert!(provider.list_unit("app").await.unwrap().is_empty());
        assert_eq!(provider.find("app/asg").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sample_aggregates_window() {
        let provider = LocalProvider::in_memory().unwrap();
        let query = cpu_query(Statistic::Average, 300);
        let stream = query.stream_key();
        let now = epoch_secs();

        // Outside the window.
        provider
            .record_sample(&stream, &MetricSample { value: 500.0, timestamp: now - 3600 })
            .unwrap();
        provider
            .record_sample(&stream, &MetricSample { value: 20.0, timestamp: now - 60 })
            .unwrap();
        provider
            .record_sample(&stream, &MetricSample { value: 40.0, timestamp: now - 30 })
            .unwrap();

        let avg = provider.sample(&query).await.unwrap();
        assert_eq!(avg.value, 30.0);
        assert_eq!(avg.timestamp, now - 30);

        let max = provider.sample(&cpu_query(Statistic::Maximum, 300)).await.unwrap();
        assert_eq!(max.value, 40.0);
        let sum = provider.sample(&cpu_query(Statistic::Sum, 300)).await.unwrap();
        assert_eq!(sum.value, 60.0);
        let min = provider.sample(&cpu_query(Statistic::Minimum, 7200)).await.unwrap();
        assert_eq!(min.value, 20.0);
    }

    #[tokio::test]
    async fn burst_in_one_second_counts_every_sample() {
        let provider = LocalProvider::in_memory().unwrap();
        let query = cpu_query(Statistic::Average, 300);
        let stream = query.stream_key();
        let now = epoch_secs();
        for value in [20.0, 40.0] {
            provider
                .record_sample(&stream, &MetricSample { value, timestamp: now })
                .unwrap();
        }

        assert_eq!(provider.store().list_metrics(&stream, 0).unwrap().len(), 2);
        assert_eq!(provider.sample(&query).await.unwrap().value, 30.0);
        let sum = provider.sample(&cpu_query(Statistic::Sum, 300)).await.unwrap();
        assert_eq!(sum.value, 60.0);
    }

    #[tokio::test]
    async fn sample_without_data_is_not_found() {
        let provider = LocalProvider::in_memory().unwrap();
        let result = provider.sample(&cpu_query(Statistic::Average, 60)).await;
        assert!(matches!(result, Err(ProviderError::NotFound(_))));

        provider
            .record_metric(&cpu_query(Statistic::Average, 60).stream_key(), 12.5)
            .unwrap();
        let sample = provider.sample(&cpu_query(Statistic::Average, 60)).await.unwrap();
        assert_eq!(sample.value, 12.5);
    }
}
