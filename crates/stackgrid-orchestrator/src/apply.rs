//! Parallel apply.
//!
//! Units are started as soon as every unit they depend on has succeeded,
//! up to `concurrency` at a time. Inside a unit, resources are applied in
//! declaration order. A unit that fails stops its dependants, which are
//! reported as not attempted; nothing already applied is rolled back.
//!
//! Cancellation comes through a `watch` channel. Units still running are
//! aborted and, like units not yet started, reported as not attempted.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use stackgrid_core::config::OrchestratorSettings;
use stackgrid_core::{ResourceDescription, UnitName};
use stackgrid_provider::{Provider, ProviderError, ProviderResult, ResourceDelta, with_timeout};
use stackgrid_topology::{ProvisionableUnit, TopologyGraph};
use tokio::sync::{Semaphore, watch};
use tokio::task::{Id, JoinSet};
use tracing::{debug, info, warn};

use crate::error::OrchestratorResult;
use crate::plan::{Diff, Plan, diff, plan};

/// Timeouts, retries and fan-out for one apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplySettings {
    pub call_timeout: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub concurrency: usize,
    /// Delete provider records a unit no longer declares.
    pub prune: bool,
}

impl Default for ApplySettings {
    fn default() -> Self {
        Self::from(&OrchestratorSettings::default())
    }
}

impl From<&OrchestratorSettings> for ApplySettings {
    fn from(s: &OrchestratorSettings) -> Self {
        Self {
            call_timeout: Duration::from_secs(s.provider_timeout_secs),
            max_attempts: s.max_attempts.max(1),
            backoff_base: Duration::from_millis(s.backoff_base_ms),
            backoff_max: Duration::from_millis(s.backoff_max_ms),
            concurrency: s.concurrency.max(1),
            prune: false,
        }
    }
}

impl ApplySettings {
    pub fn with_prune(mut self, prune: bool) -> Self {
        self.prune = prune;
        self
    }

    /// Delay after failed attempt `attempt` (1-based): base doubled per
    /// attempt, capped at `backoff_max`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotAttemptedReason {
    Cancelled,
    /// The named dependency did not succeed.
    DependencyFailed(UnitName),
}

/// Result of applying one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum UnitOutcome {
    /// At least one resource was created.
    Created,
    /// Resources were updated or pruned, none created.
    Updated,
    Unchanged,
    Failed(String),
    NotAttempted(NotAttemptedReason),
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UnitOutcome::Created | UnitOutcome::Updated | UnitOutcome::Unchanged)
    }
}

impl fmt::Display for UnitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitOutcome::Created => f.write_str("created"),
            UnitOutcome::Updated => f.write_str("updated"),
            UnitOutcome::Unchanged => f.write_str("unchanged"),
            UnitOutcome::Failed(reason) => write!(f, "failed: {reason}"),
            UnitOutcome::NotAttempted(NotAttemptedReason::Cancelled) => f.write_str("not attempted: cancelled"),
            UnitOutcome::NotAttempted(NotAttemptedReason::DependencyFailed(dep)) => {
                write!(f, "not attempted: dependency {dep} did not succeed")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitReport {
    pub unit: UnitName,
    pub outcome: UnitOutcome,
}

/// One outcome per unit, in apply order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub units: Vec<UnitReport>,
}

impl ApplyReport {
    pub fn outcome(&self, unit: &str) -> Option<&UnitOutcome> {
        self.units.iter().find(|r| r.unit == unit).map(|r| &r.outcome)
    }

    pub fn is_success(&self) -> bool {
        self.units.iter().all(|r| r.outcome.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &UnitReport> {
        self.units
            .iter()
            .filter(|r| matches!(r.outcome, UnitOutcome::Failed(_)))
    }
}

enum Change {
    Created,
    Updated,
    Unchanged,
}

/// Drives plans and applies against one provider.
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    settings: ApplySettings,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn Provider>, settings: ApplySettings) -> Self {
        Self { provider, settings }
    }

    pub fn settings(&self) -> &ApplySettings {
        &self.settings
    }

    pub async fn plan(&self, graph: &TopologyGraph) -> OrchestratorResult<Plan> {
        plan(self.provider.as_ref(), graph, self.settings.call_timeout).await
    }

    /// Apply every unit of `graph`, stopping early if `shutdown` turns true.
    pub async fn apply(
        &self,
        graph: &TopologyGraph,
        mut shutdown: watch::Receiver<bool>,
    ) -> OrchestratorResult<ApplyReport> {
        graph.validate()?;
        let order = graph.topological_order()?;
        let mut deps: HashMap<&str, Vec<&str>> = HashMap::new();
        for unit in &order {
            deps.insert(unit.name(), graph.dependencies(unit.name())?);
        }

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut pending: Vec<&ProvisionableUnit> = order.clone();
        let mut outcomes: HashMap<String, UnitOutcome> = HashMap::new();
        let mut running: JoinSet<UnitOutcome> = JoinSet::new();
        let mut running_ids: HashMap<Id, String> = HashMap::new();
        let mut cancelled = *shutdown.borrow();
        let mut watching = true;

        info!(units = order.len(), concurrency = self.settings.concurrency, "apply started");

        loop {
            if !cancelled {
                pending.retain(|unit| {
                    let unit_deps = &deps[unit.name()];
                    if let Some(dep) = unit_deps
                        .iter()
                        .find(|d| outcomes.get(**d).is_some_and(|o| !o.is_success()))
                    {
                        debug!(unit = %unit.name(), dependency = %dep, "skipping unit");
                        outcomes.insert(
                            unit.name().to_string(),
                            UnitOutcome::NotAttempted(NotAttemptedReason::DependencyFailed(dep.to_string())),
                        );
                        return false;
                    }
                    if unit_deps.iter().all(|d| outcomes.contains_key(*d)) {
                        let handle = running.spawn(run_unit(
                            Arc::clone(&self.provider),
                            (*unit).clone(),
                            self.settings.clone(),
                            Arc::clone(&semaphore),
                        ));
                        running_ids.insert(handle.id(), unit.name().to_string());
                        return false;
                    }
                    true
                });
            }
            if cancelled || running.is_empty() {
                break;
            }

            tokio::select! {
                joined = running.join_next_with_id() => {
                    record(joined, &mut running_ids, &mut outcomes);
                }
                changed = shutdown.changed(), if watching => {
                    match changed {
                        Ok(()) => {
                            cancelled = *shutdown.borrow();
                        }
                        Err(_) => watching = false,
                    }
                }
            }
        }

        if cancelled {
            warn!(in_flight = running_ids.len(), pending = pending.len(), "apply cancelled");
            running.abort_all();
            while let Some(joined) = running.join_next_with_id().await {
                record(Some(joined), &mut running_ids, &mut outcomes);
            }
        }

        let units: Vec<UnitReport> = order
            .iter()
            .map(|unit| UnitReport {
                unit: unit.name().to_string(),
                outcome: outcomes
                    .remove(unit.name())
                    .unwrap_or(UnitOutcome::NotAttempted(NotAttemptedReason::Cancelled)),
            })
            .collect();
        let report = ApplyReport { units };
        info!(
            success = report.is_success(),
            failed = report.failed().count(),
            "apply finished"
        );
        Ok(report)
    }
}

fn record(
    joined: Option<Result<(Id, UnitOutcome), tokio::task::JoinError>>,
    running_ids: &mut HashMap<Id, String>,
    outcomes: &mut HashMap<String, UnitOutcome>,
) {
    let (id, outcome) = match joined {
        Some(Ok((id, outcome))) => (id, outcome),
        Some(Err(e)) if e.is_cancelled() => (e.id(), UnitOutcome::NotAttempted(NotAttemptedReason::Cancelled)),
        Some(Err(e)) => (e.id(), UnitOutcome::Failed(format!("apply task failed: {e}"))),
        None => return,
    };
    if let Some(unit) = running_ids.remove(&id) {
        info!(%unit, %outcome, "unit finished");
        outcomes.insert(unit, outcome);
    }
}

async fn run_unit(
    provider: Arc<dyn Provider>,
    unit: ProvisionableUnit,
    settings: ApplySettings,
    semaphore: Arc<Semaphore>,
) -> UnitOutcome {
    let Ok(_permit) = semaphore.acquire_owned().await else {
        return UnitOutcome::NotAttempted(NotAttemptedReason::Cancelled);
    };
    apply_unit(provider.as_ref(), &unit, &settings).await
}

async fn apply_unit(provider: &dyn Provider, unit: &ProvisionableUnit, settings: &ApplySettings) -> UnitOutcome {
    debug!(unit = %unit.name(), resources = unit.resources().len(), "applying unit");
    let mut created = 0usize;
    let mut updated = 0usize;

    for description in unit.resources() {
        match apply_resource(provider, unit.name(), description, settings).await {
            Ok(Change::Created) => created += 1,
            Ok(Change::Updated) => updated += 1,
            Ok(Change::Unchanged) => {}
            Err(e) => {
                warn!(unit = %unit.name(), resource = %description.name(), error = %e, "resource failed");
                return UnitOutcome::Failed(format!("{}: {e}", description.name()));
            }
        }
    }

    if settings.prune {
        match prune_unit(provider, unit, settings).await {
            Ok(removed) => updated += removed,
            Err(e) => {
                warn!(unit = %unit.name(), error = %e, "prune failed");
                return UnitOutcome::Failed(format!("prune: {e}"));
            }
        }
    }

    if created > 0 {
        UnitOutcome::Created
    } else if updated > 0 {
        UnitOutcome::Updated
    } else {
        UnitOutcome::Unchanged
    }
}

async fn apply_resource(
    provider: &dyn Provider,
    unit: &str,
    description: &ResourceDescription,
    settings: &ApplySettings,
) -> ProviderResult<Change> {
    let name = description.name();
    let record = match retry(settings, name, || provider.find(name)).await? {
        Some(id) => Some(retry(settings, name, || provider.read(&id)).await?),
        None => None,
    };

    match diff(description, record.as_ref()) {
        Diff::Missing => Err(ProviderError::NotFound(format!("imported resource {name} not found"))),
        Diff::Lookup | Diff::Unchanged => {
            debug!(resource = %name, "unchanged");
            Ok(Change::Unchanged)
        }
        Diff::Create => {
            let id = retry(settings, name, || provider.create(unit, description)).await?;
            debug!(resource = %name, %id, "created");
            Ok(Change::Created)
        }
        Diff::Update(id) => {
            retry(settings, name, || {
                provider.update(&id, ResourceDelta::Replace(description.clone()))
            })
            .await?;
            debug!(resource = %name, %id, "updated");
            Ok(Change::Updated)
        }
    }
}

/// Delete records the unit owns but no longer declares.
async fn prune_unit(provider: &dyn Provider, unit: &ProvisionableUnit, settings: &ApplySettings) -> ProviderResult<usize> {
    let known = retry(settings, unit.name(), || provider.list_unit(unit.name())).await?;
    let mut removed = 0;
    for record in known.iter().rev() {
        if unit.resource(&record.name).is_some() {
            continue;
        }
        retry(settings, &record.name, || provider.delete(&record.id)).await?;
        info!(unit = %unit.name(), resource = %record.name, "pruned");
        removed += 1;
    }
    Ok(removed)
}

/// Call the provider with a timeout, retrying transient failures.
async fn retry<T, F, Fut>(settings: &ApplySettings, what: &str, mut call: F) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    let mut attempt = 1;
    loop {
        match with_timeout(settings.call_timeout, call()).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < settings.max_attempts => {
                let delay = settings.backoff(attempt);
                warn!(
                    resource = %what,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "provider call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
