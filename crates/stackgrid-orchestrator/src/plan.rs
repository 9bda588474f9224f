//! Read-only diff of declared resources against the provider.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use stackgrid_core::{ResourceDescription, ResourceKind, UnitName};
use stackgrid_provider::{Provider, ResourceId, ResourceState, with_timeout};
use stackgrid_topology::TopologyGraph;

use crate::error::{OrchestratorError, OrchestratorResult};

/// How a declared resource compares with the provider's record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Diff {
    Create,
    Update(ResourceId),
    Unchanged,
    /// Imported and present.
    Lookup,
    /// Imported and absent.
    Missing,
}

pub(crate) fn diff(description: &ResourceDescription, record: Option<&ResourceState>) -> Diff {
    match (description.is_imported(), record) {
        (true, Some(_)) => Diff::Lookup,
        (true, None) => Diff::Missing,
        (false, None) => Diff::Create,
        (false, Some(r)) if r.fingerprint == description.fingerprint() => Diff::Unchanged,
        (false, Some(r)) => Diff::Update(r.id.clone()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    Create,
    Update,
    Unchanged,
    /// Imported resource found at the provider.
    Lookup,
    /// Imported resource the provider does not know; apply will fail.
    Missing,
    /// Known to the provider but no longer declared; deleted by a pruning apply.
    Prune,
}

impl PlanAction {
    pub fn is_change(self) -> bool {
        matches!(self, PlanAction::Create | PlanAction::Update | PlanAction::Prune)
    }
}

impl From<&Diff> for PlanAction {
    fn from(diff: &Diff) -> Self {
        match diff {
            Diff::Create => PlanAction::Create,
            Diff::Update(_) => PlanAction::Update,
            Diff::Unchanged => PlanAction::Unchanged,
            Diff::Lookup => PlanAction::Lookup,
            Diff::Missing => PlanAction::Missing,
        }
    }
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanAction::Create => "create",
            PlanAction::Update => "update",
            PlanAction::Unchanged => "unchanged",
            PlanAction::Lookup => "lookup",
            PlanAction::Missing => "missing",
            PlanAction::Prune => "prune",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourcePlan {
    pub name: String,
    pub kind: ResourceKind,
    pub action: PlanAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitPlan {
    pub unit: UnitName,
    pub resources: Vec<ResourcePlan>,
}

impl UnitPlan {
    pub fn changes(&self) -> usize {
        self.resources.iter().filter(|r| r.action.is_change()).count()
    }
}

/// Per-unit plan, in apply order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub units: Vec<UnitPlan>,
}

impl Plan {
    pub fn unit(&self, name: &str) -> Option<&UnitPlan> {
        self.units.iter().find(|u| u.unit == name)
    }

    pub fn has_changes(&self) -> bool {
        self.units.iter().any(|u| u.changes() > 0)
    }
}

/// Look up a resource's record by name.
pub(crate) async fn current_record(
    provider: &dyn Provider,
    name: &str,
    limit: Duration,
) -> stackgrid_provider::ProviderResult<Option<ResourceState>> {
    match with_timeout(limit, provider.find(name)).await? {
        Some(id) => Ok(Some(with_timeout(limit, provider.read(&id)).await?)),
        None => Ok(None),
    }
}

/// Build a plan with provider reads only.
pub async fn plan(provider: &dyn Provider, graph: &TopologyGraph, limit: Duration) -> OrchestratorResult<Plan> {
    let mut units = Vec::with_capacity(graph.len());
    for unit in graph.topological_order()? {
        let mut resources = Vec::with_capacity(unit.resources().len());
        for description in unit.resources() {
            let record = current_record(provider, description.name(), limit)
                .await
                .map_err(|source| OrchestratorError::Provider {
                    resource: description.name().to_string(),
                    source,
                })?;
            resources.push(ResourcePlan {
                name: description.name().to_string(),
                kind: description.kind(),
                action: PlanAction::from(&diff(description, record.as_ref())),
            });
        }

        let known = with_timeout(limit, provider.list_unit(unit.name()))
            .await
            .map_err(|source| OrchestratorError::Provider {
                resource: unit.name().to_string(),
                source,
            })?;
        for record in known {
            if unit.resource(&record.name).is_none() {
                resources.push(ResourcePlan {
                    name: record.name,
                    kind: record.kind,
                    action: PlanAction::Prune,
                });
            }
        }

        units.push(UnitPlan {
            unit: unit.name().to_string(),
            resources,
        });
    }
    Ok(Plan { units })
}
