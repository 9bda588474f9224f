//! Provisionable units.

use std::collections::BTreeSet;

use serde::Serialize;
use stackgrid_core::{ResourceDescription, ResourceKind, ResourceRef, UnitName};

use crate::error::{TopologyError, TopologyResult};

/// What a unit contributes to the stack, derived from its resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Network,
    Security,
    LoadBalancing,
    Scaling,
    Compute,
}

impl Capability {
    pub fn of(kind: ResourceKind) -> Capability {
        match kind {
            ResourceKind::Network | ResourceKind::ImportedNetwork => Capability::Network,
            ResourceKind::SecurityGroup => Capability::Security,
            ResourceKind::LoadBalancer | ResourceKind::TargetPool => Capability::LoadBalancing,
            ResourceKind::ScalingGroup | ResourceKind::ScalingPolicy => Capability::Scaling,
            ResourceKind::Instance => Capability::Compute,
        }
    }
}

/// A named node of the topology: the resources it owns, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionableUnit {
    name: UnitName,
    resources: Vec<ResourceDescription>,
}

impl ProvisionableUnit {
    pub fn new(name: impl Into<UnitName>) -> Self {
        Self {
            name: name.into(),
            resources: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a resource. Its name must be `{unit}/...` and unique in the unit.
    pub fn add_resource(&mut self, resource: ResourceDescription) -> TopologyResult<()> {
        let resource_name = resource.name();
        let owned = resource_name
            .strip_prefix(self.name.as_str())
            .is_some_and(|rest| rest.starts_with('/'));
        if !owned {
            return Err(TopologyError::ForeignResource {
                unit: self.name.clone(),
                resource: resource_name.to_string(),
            });
        }
        if self.resource(resource_name).is_some() {
            return Err(TopologyError::DuplicateResource {
                unit: self.name.clone(),
                resource: resource_name.to_string(),
            });
        }
        self.resources.push(resource);
        Ok(())
    }

    pub fn with_resource(mut self, resource: ResourceDescription) -> TopologyResult<Self> {
        self.add_resource(resource)?;
        Ok(self)
    }

    pub fn resources(&self) -> &[ResourceDescription] {
        &self.resources
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceDescription> {
        self.resources.iter().find(|r| r.name() == name)
    }

    pub fn capabilities(&self) -> BTreeSet<Capability> {
        self.resources
            .iter()
            .map(|r| Capability::of(r.kind()))
            .collect()
    }

    /// References to resources outside this unit.
    pub fn external_references(&self) -> Vec<ResourceRef> {
        self.resources
            .iter()
            .flat_map(|r| r.references())
            .filter(|r| r.unit != self.name)
            .collect()
    }

    /// References to resources inside this unit.
    pub fn internal_references(&self) -> Vec<ResourceRef> {
        self.resources
            .iter()
            .flat_map(|r| r.references())
            .filter(|r| r.unit == self.name)
            .collect()
    }
}
