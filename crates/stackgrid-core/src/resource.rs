//! Provider-facing resource descriptions.
//!
//! A description is the pure-data form of one resource a provider can
//! materialize. Cross-resource links are [`ResourceRef`]s resolved by
//! name, never live object references, so a description serializes to
//! the same bytes regardless of how the stack was assembled.

use std::fmt;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::*;

/// Explicit reference to a resource owned by some unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    pub unit: UnitName,
    pub name: ResourceName,
}

impl ResourceRef {
    pub fn new(unit: impl Into<UnitName>, name: impl Into<ResourceName>) -> Self {
        Self {
            unit: unit.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Unit owning a `{unit}/{local}` resource name.
pub fn owner_unit(name: &str) -> &str {
    name.split_once('/').map_or(name, |(unit, _)| unit)
}

/// Discriminant of [`ResourceDescription`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Network,
    ImportedNetwork,
    SecurityGroup,
    LoadBalancer,
    TargetPool,
    ScalingGroup,
    ScalingPolicy,
    Instance,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Network => "network",
            ResourceKind::ImportedNetwork => "imported_network",
            ResourceKind::SecurityGroup => "security_group",
            ResourceKind::LoadBalancer => "load_balancer",
            ResourceKind::TargetPool => "target_pool",
            ResourceKind::ScalingGroup => "scaling_group",
            ResourceKind::ScalingPolicy => "scaling_policy",
            ResourceKind::Instance => "instance",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A network with its allocated subnets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkResource {
    pub name: ResourceName,
    pub block: Ipv4Net,
    pub subnets: Vec<Subnet>,
}

/// An existing network, looked up rather than created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedNetworkResource {
    pub name: ResourceName,
    pub vpc_id: String,
    pub vpc_name: String,
    pub block: Ipv4Net,
    pub subnets: Vec<Subnet>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupResource {
    pub network: ResourceRef,
    pub group: SecurityGroup,
}

/// A listener on a load balancer, forwarding to one target pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerSpec {
    pub port: u16,
    pub protocol: Protocol,
    pub target_pool: ResourceName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerResource {
    pub name: ResourceName,
    pub network: ResourceRef,
    pub tier: Tier,
    pub subnets: Vec<Ipv4Net>,
    pub internet_facing: bool,
    pub security_group: ResourceRef,
    pub listeners: Vec<ListenerSpec>,
}

/// The membership set behind a listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetPoolResource {
    pub name: ResourceName,
    pub load_balancer: ResourceRef,
    pub port: u16,
    pub protocol: Protocol,
    pub health_check: HealthCheckContract,
    pub members: ResourceRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingGroupResource {
    pub name: ResourceName,
    pub network: ResourceRef,
    pub tier: Tier,
    pub subnets: Vec<Ipv4Net>,
    pub security_group: ResourceRef,
    pub bounds: CapacityBounds,
}

/// How a scaling group reacts to its metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScalingPolicySpec {
    Step {
        metric: MetricQuery,
        steps: Vec<ScalingStep>,
    },
    TargetTracking {
        metric: MetricQuery,
        target_value: f64,
    },
}

impl ScalingPolicySpec {
    pub fn metric(&self) -> &MetricQuery {
        match self {
            ScalingPolicySpec::Step { metric, .. } => metric,
            ScalingPolicySpec::TargetTracking { metric, .. } => metric,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicyResource {
    pub name: ResourceName,
    pub scaling_group: ResourceRef,
    pub bounds: CapacityBounds,
    pub policy: ScalingPolicySpec,
}

/// A single standalone compute instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceResource {
    pub name: ResourceName,
    pub network: ResourceRef,
    pub subnet: Subnet,
    pub security_group: ResourceRef,
}

/// Pure-data description of one provider resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceDescription {
    Network(NetworkResource),
    ImportedNetwork(ImportedNetworkResource),
    SecurityGroup(SecurityGroupResource),
    LoadBalancer(LoadBalancerResource),
    TargetPool(TargetPoolResource),
    ScalingGroup(ScalingGroupResource),
    ScalingPolicy(ScalingPolicyResource),
    Instance(InstanceResource),
}

impl ResourceDescription {
    pub fn name(&self) -> &str {
        match self {
            ResourceDescription::Network(r) => &r.name,
            ResourceDescription::ImportedNetwork(r) => &r.name,
            ResourceDescription::SecurityGroup(r) => &r.group.name,
            ResourceDescription::LoadBalancer(r) => &r.name,
            ResourceDescription::TargetPool(r) => &r.name,
            ResourceDescription::ScalingGroup(r) => &r.name,
            ResourceDescription::ScalingPolicy(r) => &r.name,
            ResourceDescription::Instance(r) => &r.name,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceDescription::Network(_) => ResourceKind::Network,
            ResourceDescription::ImportedNetwork(_) => ResourceKind::ImportedNetwork,
            ResourceDescription::SecurityGroup(_) => ResourceKind::SecurityGroup,
            ResourceDescription::LoadBalancer(_) => ResourceKind::LoadBalancer,
            ResourceDescription::TargetPool(_) => ResourceKind::TargetPool,
            ResourceDescription::ScalingGroup(_) => ResourceKind::ScalingGroup,
            ResourceDescription::ScalingPolicy(_) => ResourceKind::ScalingPolicy,
            ResourceDescription::Instance(_) => ResourceKind::Instance,
        }
    }

    /// Imported resources are read from the provider, never created.
    pub fn is_imported(&self) -> bool {
        matches!(self, ResourceDescription::ImportedNetwork(_))
    }

    /// Every resource this description points at.
    ///
    /// Security-group peers are references too: a rule sourced from
    /// another group needs that group to exist.
    pub fn references(&self) -> Vec<ResourceRef> {
        match self {
            ResourceDescription::Network(_) | ResourceDescription::ImportedNetwork(_) => Vec::new(),
            ResourceDescription::SecurityGroup(r) => {
                let mut refs = vec![r.network.clone()];
                for rule in &r.group.rules {
                    if let Peer::Group(name) = &rule.source
                        && name != &r.group.name
                    {
                        refs.push(ResourceRef::new(owner_unit(name), name.clone()));
                    }
                }
                refs
            }
            ResourceDescription::LoadBalancer(r) => {
                vec![r.network.clone(), r.security_group.clone()]
            }
            ResourceDescription::TargetPool(r) => {
                vec![r.load_balancer.clone(), r.members.clone()]
            }
            ResourceDescription::ScalingGroup(r) => {
                vec![r.network.clone(), r.security_group.clone()]
            }
            ResourceDescription::ScalingPolicy(r) => vec![r.scaling_group.clone()],
            ResourceDescription::Instance(r) => {
                vec![r.network.clone(), r.security_group.clone()]
            }
        }
    }

    /// Capacity a freshly created resource starts with, if it has one.
    pub fn initial_capacity(&self) -> Option<u32> {
        match self {
            ResourceDescription::ScalingGroup(r) => Some(r.bounds.min),
            _ => None,
        }
    }

    /// Hex SHA-256 of the canonical JSON encoding.
    pub fn fingerprint(&self) -> String {
        // Serializing plain data with string keys cannot fail.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}
