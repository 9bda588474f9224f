//! Provider double with injectable faults.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use stackgrid_core::ResourceDescription;
use stackgrid_orchestrator::ApplySettings;
use stackgrid_provider::{
    BoxFuture, LocalProvider, Provider, ProviderError, ProviderResult, ResourceDelta, ResourceId, ResourceState,
};

#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Reject every create.
    Reject,
    /// Reject the next `n` creates, then succeed.
    FailTimes(u32),
    /// Never complete a create.
    Hang,
    /// Wait before every create of this resource.
    Slow(Duration),
}

pub struct FaultyProvider {
    pub inner: LocalProvider,
    faults: Mutex<HashMap<String, Fault>>,
    creates: AtomicUsize,
}

impl FaultyProvider {
    pub fn new() -> Self {
        Self {
            inner: LocalProvider::in_memory().unwrap(),
            faults: Mutex::new(HashMap::new()),
            creates: AtomicUsize::new(0),
        }
    }

    pub fn with_fault(self, resource: &str, fault: Fault) -> Self {
        self.faults.lock().unwrap().insert(resource.to_string(), fault);
        self
    }

    /// Create calls seen, including rejected ones.
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Take the next fault for `resource`, if any applies.
    fn next_fault(&self, resource: &str) -> Option<Fault> {
        let mut faults = self.faults.lock().unwrap();
        match faults.get_mut(resource) {
            Some(Fault::FailTimes(0)) | None => None,
            Some(Fault::FailTimes(n)) => {
                *n -= 1;
                Some(Fault::Reject)
            }
            Some(fault) => Some(*fault),
        }
    }
}

impl Provider for FaultyProvider {
    fn create<'a>(
        &'a self,
        unit: &'a str,
        description: &'a ResourceDescription,
    ) -> BoxFuture<'a, ProviderResult<ResourceId>> {
        Box::pin(async move {
            self.creates.fetch_add(1, Ordering::SeqCst);
            match self.next_fault(description.name()) {
                Some(Fault::Reject) | Some(Fault::FailTimes(_)) => {
                    Err(ProviderError::Rejected(format!("injected fault on {}", description.name())))
                }
                Some(Fault::Slow(delay)) => {
                    tokio::time::sleep(delay).await;
                    self.inner.create(unit, description).await
                }
                Some(Fault::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    self.inner.create(unit, description).await
                }
                None => self.inner.create(unit, description).await,
            }
        })
    }

    fn read<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ProviderResult<ResourceState>> {
        self.inner.read(id)
    }

    fn find<'a>(&'a self, name: &'a str) -> BoxFuture<'a, ProviderResult<Option<ResourceId>>> {
        self.inner.find(name)
    }

    fn update<'a>(&'a self, id: &'a str, delta: ResourceDelta) -> BoxFuture<'a, ProviderResult<()>> {
        self.inner.update(id, delta)
    }

    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ProviderResult<()>> {
        self.inner.delete(id)
    }

    fn list_unit<'a>(&'a self, unit: &'a str) -> BoxFuture<'a, ProviderResult<Vec<ResourceState>>> {
        self.inner.list_unit(unit)
    }
}

/// Fast retries for tests.
pub fn settings() -> ApplySettings {
    ApplySettings {
        call_timeout: Duration::from_secs(5),
        max_attempts: 3,
        backoff_base: Duration::from_millis(1),
        backoff_max: Duration::from_millis(5),
        concurrency: 4,
        prune: false,
    }
}
