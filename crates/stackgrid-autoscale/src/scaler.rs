//! The periodic scaling loop.
//!
//! Every tick evaluates each registered pool: resolve the scaling group,
//! read its current capacity from the provider, sample the metric, run
//! the policy and, if the decision changes anything, write the new
//! capacity back with a compare-and-set update.
//!
//! Each pool carries a mutex taken with `try_lock`, so at most one
//! evaluation per pool is in flight; a pool still busy from an earlier
//! tick is skipped. Every provider and metric call is bounded by the
//! call timeout. A failed evaluation is logged and the capacity is left
//! as the provider has it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use stackgrid_core::{MetricQuery, ResourceName, ScalingPolicyResource};
use stackgrid_provider::{MetricSource, Provider, ResourceDelta, with_timeout};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::ScalingResult;
use crate::evaluator::{ScaleDecision, ScalingPolicy};

/// One pool under control.
#[derive(Debug, Clone)]
pub struct ScalingTarget {
    /// Name of the scaling group resource.
    pub pool: ResourceName,
    pub metric: MetricQuery,
    pub policy: ScalingPolicy,
}

impl ScalingTarget {
    pub fn from_resource(resource: &ScalingPolicyResource) -> ScalingResult<Self> {
        Ok(Self {
            pool: resource.scaling_group.name.clone(),
            metric: resource.policy.metric().clone(),
            policy: ScalingPolicy::from_resource(resource)?,
        })
    }
}

/// What happened to one pool during a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationOutcome {
    Scaled(ScaleDecision),
    Unchanged(ScaleDecision),
    /// The previous evaluation of this pool is still running.
    Skipped,
    /// Capacity left untouched.
    Failed(String),
}

struct PoolSlot {
    target: ScalingTarget,
    in_flight: Mutex<()>,
}

#[derive(Clone)]
pub struct ScalingController {
    provider: Arc<dyn Provider>,
    metrics: Arc<dyn MetricSource>,
    pools: Vec<Arc<PoolSlot>>,
    call_timeout: Duration,
}

impl ScalingController {
    pub fn new(provider: Arc<dyn Provider>, metrics: Arc<dyn MetricSource>, call_timeout: Duration) -> Self {
        Self {
            provider,
            metrics,
            pools: Vec::new(),
            call_timeout,
        }
    }

    pub fn add_target(&mut self, target: ScalingTarget) {
        debug!(pool = %target.pool, metric = %target.metric.stream_key(), "scaling target added");
        self.pools.push(Arc::new(PoolSlot {
            target,
            in_flight: Mutex::new(()),
        }));
    }

    pub fn targets(&self) -> impl Iterator<Item = &ScalingTarget> {
        self.pools.iter().map(|p| &p.target)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Evaluate every pool concurrently; results in registration order.
    pub async fn evaluate_all(&self) -> Vec<(ResourceName, EvaluationOutcome)> {
        let mut tasks = JoinSet::new();
        for (idx, slot) in self.pools.iter().enumerate() {
            let slot = Arc::clone(slot);
            let provider = Arc::clone(&self.provider);
            let metrics = Arc::clone(&self.metrics);
            let limit = self.call_timeout;
            tasks.spawn(async move {
                let outcome = evaluate_slot(provider.as_ref(), metrics.as_ref(), &slot, limit).await;
                (idx, outcome)
            });
        }

        let mut results: Vec<(usize, EvaluationOutcome)> = Vec::with_capacity(self.pools.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!(error = %e, "scaling evaluation task failed"),
            }
        }
        results.sort_by_key(|(idx, _)| *idx);
        results
            .into_iter()
            .map(|(idx, outcome)| (self.pools[idx].target.pool.clone(), outcome))
            .collect()
    }

    /// Run the scaling loop until `shutdown` changes.
    ///
    /// Ticks follow a fixed schedule and are spawned rather than awaited,
    /// so a slow tick never delays the next one; the per-pool guard skips
    /// pools that are still busy.
    pub async fn run(self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            pools = self.pools.len(),
            "scaling controller started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; evaluation starts one interval in.
        ticker.tick().await;

        let mut ticks = JoinSet::new();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let controller = self.clone();
                    ticks.spawn(async move { controller.evaluate_all().await });
                }
                Some(done) = ticks.join_next(), if !ticks.is_empty() => {
                    if let Err(e) = done {
                        error!(error = %e, "scaling tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("scaling controller shutting down");
                    break;
                }
            }
        }
        ticks.shutdown().await;
    }
}

async fn evaluate_slot(
    provider: &dyn Provider,
    metrics: &dyn MetricSource,
    slot: &PoolSlot,
    limit: Duration,
) -> EvaluationOutcome {
    let pool = &slot.target.pool;
    let Ok(_guard) = slot.in_flight.try_lock() else {
        debug!(%pool, "previous evaluation still in flight, skipping");
        return EvaluationOutcome::Skipped;
    };

    match adjust(provider, metrics, &slot.target, limit).await {
        Ok(decision) if decision.is_change() => EvaluationOutcome::Scaled(decision),
        Ok(decision) => EvaluationOutcome::Unchanged(decision),
        Err(e) => {
            warn!(%pool, error = %e, "scaling evaluation failed, capacity retained");
            EvaluationOutcome::Failed(e.to_string())
        }
    }
}

async fn adjust(
    provider: &dyn Provider,
    metrics: &dyn MetricSource,
    target: &ScalingTarget,
    limit: Duration,
) -> anyhow::Result<ScaleDecision> {
    let pool = &target.pool;
    let id = with_timeout(limit, provider.find(pool))
        .await?
        .ok_or_else(|| anyhow!("scaling group {pool} is not provisioned"))?;
    let record = with_timeout(limit, provider.read(&id)).await?;
    let current = record
        .capacity
        .ok_or_else(|| anyhow!("{pool} does not report a capacity"))?;
    let sample = with_timeout(limit, metrics.sample(&target.metric)).await?;

    let decision = target.policy.evaluate(&sample, current);
    if decision.is_change() {
        with_timeout(
            limit,
            provider.update(
                &id,
                ResourceDelta::Capacity {
                    from: current,
                    to: decision.new_capacity,
                },
            ),
        )
        .await?;
        info!(
            %pool,
            metric = sample.value,
            from = current,
            to = decision.new_capacity,
            delta = decision.delta,
            "capacity adjusted"
        );
    } else {
        debug!(%pool, metric = sample.value, capacity = current, "capacity unchanged");
    }
    Ok(decision)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use stackgrid_core::*;
    use stackgrid_provider::{BoxFuture, LocalProvider, ProviderResult, ResourceId, ResourceState};

    use crate::evaluator::StepScalingEvaluator;
    use crate::steps::StepTable;

    /// Delays `find`, then delegates to a local provider.
    struct SlowProvider {
        inner: LocalProvider,
        delay: Duration,
    }

    impl Provider for SlowProvider {
        fn create<'a>(
            &'a self,
            unit: &'a str,
            description: &'a ResourceDescription,
        ) -> BoxFuture<'a, ProviderResult<ResourceId>> {
            self.inner.create(unit, description)
        }

        fn read<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ProviderResult<ResourceState>> {
            self.inner.read(id)
        }

        fn find<'a>(&'a self, name: &'a str) -> BoxFuture<'a, ProviderResult<Option<ResourceId>>> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                self.inner.find(name).await
            })
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

    fn cpu() -> MetricQuery {
        MetricQuery {
            name: "CPUUtilization".to_string(),
            namespace: "AWS/EC2".to_string(),
            statistic: Statistic::Average,
            dimensions: BTreeMap::from([("AutoScalingGroupName".to_string(), "app/asg".to_string())]),
            window_secs: 300,
        }
    }

    fn target() -> ScalingTarget {
        let table = StepTable::new()
            .with_step(None, Some(1.0), -1)
            .unwrap()
            .with_step(Some(10.0), Some(60.0), 1)
            .unwrap()
            .with_step(Some(60.0), None, 3)
            .unwrap();
        ScalingTarget {
            pool: "app/asg".to_string(),
            metric: cpu(),
            policy: ScalingPolicy::Step(StepScalingEvaluator::new(table, CapacityBounds::new(2, 10)).unwrap()),
        }
    }

    async fn provisioned() -> (LocalProvider, ResourceId) {
        let provider = LocalProvider::in_memory().unwrap();
        let id = provider
            .create(
                "app",
                &ResourceDescription::ScalingGroup(ScalingGroupResource {
                    name: "app/asg".to_string(),
                    network: ResourceRef::new("network", "network/vpc"),
                    tier: Tier::PrivateWithEgress,
                    subnets: Vec::new(),
                    security_group: ResourceRef::new("app", "app/asg-sg"),
                    bounds: CapacityBounds::new(2, 10),
                }),
            )
            .await
            .unwrap();
        (provider, id)
    }

    fn controller(provider: Arc<dyn Provider>, metrics: LocalProvider, limit: Duration) -> ScalingController {
        let mut controller = ScalingController::new(provider, Arc::new(metrics), limit);
        controller.add_target(target());
        controller
    }

    #[tokio::test]
    async fn scales_pool_from_metric() {
        let (provider, id) = provisioned().await;
        provider.record_metric(&cpu().stream_key(), 65.0).unwrap();

        let c = controller(Arc::new(provider.clone()), provider.clone(), Duration::from_secs(1));
        let results = c.evaluate_all().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "app/asg");
        assert!(matches!(
            results[0].1,
            EvaluationOutcome::Scaled(ScaleDecision { delta: 3, new_capacity: 5, .. })
        ));
        assert_eq!(provider.read(&id).await.unwrap().capacity, Some(5));
    }

    #[tokio::test]
    async fn gap_leaves_capacity_alone() {
        let (provider, id) = provisioned().await;
        provider.record_metric(&cpu().stream_key(), 5.0).unwrap();

        let c = controller(Arc::new(provider.clone()), provider.clone(), Duration::from_secs(1));
        let results = c.evaluate_all().await;
        assert!(matches!(results[0].1, EvaluationOutcome::Unchanged(_)));
        assert_eq!(provider.read(&id).await.unwrap().capacity, Some(2));
    }

    #[tokio::test]
    async fn missing_metric_fails_without_change() {
        let (provider, id) = provisioned().await;
        let c = controller(Arc::new(provider.clone()), provider.clone(), Duration::from_secs(1));
        let results = c.evaluate_all().await;
        assert!(matches!(results[0].1, EvaluationOutcome::Failed(_)));
        assert_eq!(provider.read(&id).await.unwrap().capacity, Some(2));
    }

    #[tokio::test]
    async fn unprovisioned_pool_fails() {
        let provider = LocalProvider::in_memory().unwrap();
        provider.record_metric(&cpu().stream_key(), 65.0).unwrap();
        let c = controller(Arc::new(provider.clone()), provider, Duration::from_secs(1));
        let results = c.evaluate_all().await;
        assert!(matches!(&results[0].1, EvaluationOutcome::Failed(msg) if msg.contains("not provisioned")));
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let (provider, id) = provisioned().await;
        provider.record_metric(&cpu().stream_key(), 65.0).unwrap();
        let slow = SlowProvider {
            inner: provider.clone(),
            delay: Duration::from_secs(30),
        };

        let c = controller(Arc::new(slow), provider.clone(), Duration::from_millis(50));
        let started = std::time::Instant::now();
        let results = c.evaluate_all().await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(&results[0].1, EvaluationOutcome::Failed(msg) if msg.contains("timed out")));
        assert_eq!(provider.read(&id).await.unwrap().capacity, Some(2));
    }

    #[tokio::test]
    async fn one_evaluation_in_flight_per_pool() {
        let (provider, id) = provisioned().await;
        provider.record_metric(&cpu().stream_key(), 65.0).unwrap();
        let slow = SlowProvider {
            inner: provider.clone(),
            delay: Duration::from_millis(200),
        };

        let c = controller(Arc::new(slow), provider.clone(), Duration::from_secs(5));
        let (first, second) = tokio::join!(c.evaluate_all(), c.evaluate_all());
        let outcomes = [&first[0].1, &second[0].1];
        assert_eq!(
            outcomes.iter().filter(|o| matches!(o, EvaluationOutcome::Skipped)).count(),
            1
        );
        assert_eq!(
            outcomes.iter().filter(|o| matches!(o, EvaluationOutcome::Scaled(_))).count(),
            1
        );
        assert_eq!(provider.read(&id).await.unwrap().capacity, Some(5));
    }

    /// Counts `find` calls, each of which takes `delay`.
    struct CountingProvider {
        inner: SlowProvider,
        finds: std::sync::atomic::AtomicUsize,
    }

    impl Provider for CountingProvider {
        fn create<'a>(
            &'a self,
            unit: &'a str,
            description: &'a ResourceDescription,
        ) -> BoxFuture<'a, ProviderResult<ResourceId>> {
            self.inner.create(unit, description)
        }

        fn read<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ProviderResult<ResourceState>> {
            self.inner.read(id)
        }

        fn find<'a>(&'a self, name: &'a str) -> BoxFuture<'a, ProviderResult<Option<ResourceId>>> {
            self.finds.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
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

    #[tokio::test]
    async fn slow_ticks_keep_the_interval() {
        let (provider, _) = provisioned().await;
        provider.record_metric(&cpu().stream_key(), 5.0).unwrap();
        let counting = Arc::new(CountingProvider {
            inner: SlowProvider {
                inner: provider.clone(),
                delay: Duration::from_millis(80),
            },
            finds: std::sync::atomic::AtomicUsize::new(0),
        });
        let c = controller(counting.clone(), provider, Duration::from_secs(5));

        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(c.run(Duration::from_millis(100), rx));
        tokio::time::sleep(Duration::from_millis(2050)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let ticks = counting.finds.load(std::sync::atomic::Ordering::SeqCst);
        assert!(ticks >= 16, "only {ticks} ticks in 2s at a 100ms interval");
        assert!(ticks <= 21, "{ticks} ticks in 2s at a 100ms interval");
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (provider, id) = provisioned().await;
        provider.record_metric(&cpu().stream_key(), 65.0).unwrap();
        let c = controller(Arc::new(provider.clone()), provider.clone(), Duration::from_secs(1));

        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(c.run(Duration::from_millis(20), rx));
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("controller did not stop")
            .unwrap();
        let capacity = provider.read(&id).await.unwrap().capacity.unwrap();
        assert!(capacity > 2, "capacity {capacity} never grew");
        assert!(capacity <= 10);
    }
}
