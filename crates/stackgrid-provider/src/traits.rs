//! Provider and metric-source traits.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use stackgrid_core::{MetricQuery, MetricSample, ResourceDescription};
use stackgrid_state::{ResourceId, ResourceRecord};

use crate::error::{ProviderError, ProviderResult};

/// Boxed, sendable future returned by the provider traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A change to an existing resource.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceDelta {
    /// Replace the whole description (same name).
    Replace(ResourceDescription),
    /// Compare-and-set the capacity of a scaling group.
    Capacity { from: u32, to: u32 },
}

/// The cloud control plane.
///
/// Completion is asynchronous; callers bound each call with
/// [`with_timeout`]. `create` is idempotent by resource name: creating a
/// name that already exists returns the existing id.
pub trait Provider: Send + Sync {
    fn create<'a>(
        &'a self,
        unit: &'a str,
        description: &'a ResourceDescription,
    ) -> BoxFuture<'a, ProviderResult<ResourceId>>;

    /// Current state of a resource, `NotFound` if it does not exist.
    fn read<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ProviderResult<ResourceRecord>>;

    /// Resolve a resource name to its id.
    fn find<'a>(&'a self, name: &'a str) -> BoxFuture<'a, ProviderResult<Option<ResourceId>>>;

    fn update<'a>(&'a self, id: &'a str, delta: ResourceDelta) -> BoxFuture<'a, ProviderResult<()>>;

    /// Delete a resource. Deleting a missing id succeeds.
    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ProviderResult<()>>;

    /// Every record owned by `unit`.
    fn list_unit<'a>(&'a self, unit: &'a str) -> BoxFuture<'a, ProviderResult<Vec<ResourceRecord>>>;
}

/// The telemetry source polled by the scaling loop.
pub trait MetricSource: Send + Sync {
    /// Aggregate of the stream over the query's window.
    fn sample<'a>(&'a self, query: &'a MetricQuery) -> BoxFuture<'a, ProviderResult<MetricSample>>;
}

/// Run a provider call, failing with `ProviderError::Timeout` after `limit`.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> ProviderResult<T>
where
    F: Future<Output = ProviderResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(limit)),
    }
}
