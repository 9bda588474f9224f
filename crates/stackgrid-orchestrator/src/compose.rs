//! Stack composition.
//!
//! Each configured unit becomes a [`ProvisionableUnit`] whose resources
//! are named `{unit}/{local}`:
//!
//! | kind               | resources                                               |
//! |--------------------|---------------------------------------------------------|
//! | `network`          | `vpc`                                                   |
//! | `imported_network` | `vpc` (looked up, never created)                        |
//! | `application`      | `alb-sg`, `asg-sg`, `alb`, `asg`, `targets`, `scaling-policy` |
//! | `web_server`       | `web-sg`, `instance`, plus the application set when balanced |
//!
//! Resources are listed in the order they are applied.

use std::collections::BTreeMap;

use ipnet::Ipv4Net;
use stackgrid_autoscale::{ScalingTarget, StepTable};
use stackgrid_balancer::{LoadBalancer, TargetPool};
use stackgrid_core::config::{StackConfig, UnitConfig, UnitKind};
use stackgrid_core::*;
use stackgrid_network::{SecurityPolicyGraph, SubnetAllocation, allocate};
use stackgrid_topology::{ProvisionableUnit, TopologyError, TopologyGraph};
use tracing::{debug, info};

use crate::error::{ComposeError, ComposeResult};

/// A composed, validated stack.
#[derive(Debug, Clone)]
pub struct Stack {
    pub name: String,
    pub graph: TopologyGraph,
    pub policy: SecurityPolicyGraph,
    /// Subnet layout per network unit.
    pub networks: BTreeMap<UnitName, SubnetAllocation>,
    pub load_balancers: Vec<LoadBalancer>,
    pub scaling: Vec<ScalingTarget>,
}

impl Stack {
    /// Every resource of every unit, in declaration order.
    pub fn resources(&self) -> impl Iterator<Item = (&str, &ResourceDescription)> {
        self.graph
            .units()
            .iter()
            .flat_map(|u| u.resources().iter().map(move |r| (u.name(), r)))
    }
}

/// Compose a stack file into a validated [`Stack`].
pub fn compose(config: &StackConfig) -> ComposeResult<Stack> {
    let mut stack = Stack {
        name: config.stack.name.clone(),
        graph: TopologyGraph::new(),
        policy: SecurityPolicyGraph::new(),
        networks: BTreeMap::new(),
        load_balancers: Vec::new(),
        scaling: Vec::new(),
    };

    // Networks first: other units read their subnet layout.
    let mut networks: Vec<(usize, ProvisionableUnit)> = Vec::new();
    for (idx, unit) in config.units.iter().enumerate() {
        match unit.kind() {
            UnitKind::Network | UnitKind::ImportedNetwork => {
                networks.push((idx, compose_network(unit, &mut stack)?));
            }
            UnitKind::Application | UnitKind::WebServer => {}
        }
    }

    let mut composed: Vec<(usize, ProvisionableUnit)> = networks;
    for (idx, unit) in config.units.iter().enumerate() {
        let built = match unit.kind() {
            UnitKind::Network | UnitKind::ImportedNetwork => continue,
            UnitKind::Application => compose_application(config, unit, &mut stack)?,
            UnitKind::WebServer => compose_web_server(config, unit, &mut stack)?,
        };
        composed.push((idx, built));
    }
    composed.sort_by_key(|(idx, _)| *idx);

    for (_, unit) in composed {
        stack.graph.add_unit(unit)?;
    }
    for unit in &config.units {
        for dep in unit.dependencies() {
            stack.graph.add_dependency(&unit.name, &dep)?;
        }
    }
    stack.graph.validate()?;

    let violations = stack.policy.validate();
    if !violations.is_empty() {
        return Err(ComposeError::Policy(violations));
    }

    info!(
        stack = %stack.name,
        units = stack.graph.len(),
        resources = stack.resources().count(),
        "stack composed"
    );
    Ok(stack)
}

fn compose_network(unit: &UnitConfig, stack: &mut Stack) -> ComposeResult<ProvisionableUnit> {
    let block = unit
        .address_block
        .ok_or_else(|| ComposeError::invalid(&unit.name, "address_block is required"))?;
    let allocation = allocate(block, unit.zone_count(), &unit.tiers())?;
    let name = vpc_name(&unit.name);

    let description = match unit.kind() {
        UnitKind::ImportedNetwork => {
            let vpc_id = unit
                .vpc_id
                .clone()
                .ok_or_else(|| ComposeError::invalid(&unit.name, "vpc_id is required"))?;
            ResourceDescription::ImportedNetwork(ImportedNetworkResource {
                name,
                vpc_name: unit.vpc_name.clone().unwrap_or_else(|| vpc_id.clone()),
                vpc_id,
                block: allocation.block(),
                subnets: allocation.subnets().to_vec(),
            })
        }
        _ => ResourceDescription::Network(NetworkResource {
            name,
            block: allocation.block(),
            subnets: allocation.subnets().to_vec(),
        }),
    };

    debug!(unit = %unit.name, block = %allocation.block(), subnets = allocation.subnets().len(), "network composed");
    stack.networks.insert(unit.name.clone(), allocation);
    Ok(ProvisionableUnit::new(unit.name.clone()).with_resource(description)?)
}

fn compose_application(
    config: &StackConfig,
    unit: &UnitConfig,
    stack: &mut Stack,
) -> ComposeResult<ProvisionableUnit> {
    let (network, allocation) = network_of(config, unit, stack)?;
    let mut built = ProvisionableUnit::new(unit.name.clone());
    for resource in balanced_group(unit, &network, &allocation, stack)? {
        built.add_resource(resource)?;
    }
    Ok(built)
}

fn compose_web_server(
    config: &StackConfig,
    unit: &UnitConfig,
    stack: &mut Stack,
) -> ComposeResult<ProvisionableUnit> {
    let (network, allocation) = network_of(config, unit, stack)?;
    let port = unit.listener_port();
    let public = allocation.in_tier(Tier::Public);
    let Some(subnet) = public.first().copied() else {
        return Err(ComposeError::invalid(
            &unit.name,
            format!("network {} has no public subnets", network.unit),
        ));
    };

    let sg_name = format!("{}/web-sg", unit.name);
    let group = SecurityGroup::new(sg_name.clone())
        .with_members([subnet.cidr])
        .with_rule(IngressRule::tcp(Peer::any_ipv4(), port).with_description(format!("Allow port {port} web")));
    stack.policy.declare_group(group.clone())?;

    let mut built = ProvisionableUnit::new(unit.name.clone())
        .with_resource(ResourceDescription::SecurityGroup(SecurityGroupResource {
            network: network.clone(),
            group,
        }))?
        .with_resource(ResourceDescription::Instance(InstanceResource {
            name: format!("{}/instance", unit.name),
            network: network.clone(),
            subnet,
            security_group: ResourceRef::new(unit.name.clone(), sg_name),
        }))?;

    if unit.load_balanced() {
        for resource in balanced_group(unit, &network, &allocation, stack)? {
            built.add_resource(resource)?;
        }
    }
    Ok(built)
}

/// Load balancer in front of a scaling group, with both security groups,
/// the listener binding and an optional scaling policy.
fn balanced_group(
    unit: &UnitConfig,
    network: &ResourceRef,
    allocation: &SubnetAllocation,
    stack: &mut Stack,
) -> ComposeResult<Vec<ResourceDescription>> {
    let name = &unit.name;
    let port = unit.listener_port();
    let bounds = unit.bounds();
    let balancer_subnets = tier_subnets(name, allocation, unit.balancer_tier())?;
    let compute_subnets = tier_subnets(name, allocation, unit.compute_tier())?;

    let alb_sg = format!("{name}/alb-sg");
    let asg_sg = format!("{name}/asg-sg");
    let alb = format!("{name}/alb");
    let asg = format!("{name}/asg");

    let alb_group = SecurityGroup::new(alb_sg.clone())
        .with_members(balancer_subnets.clone())
        .with_rule(IngressRule::tcp(Peer::any_ipv4(), port).with_description(format!("Allow port {port} web")));
    let asg_group = SecurityGroup::new(asg_sg.clone())
        .with_members(compute_subnets.clone())
        .with_rule(IngressRule::tcp(Peer::group(alb_sg.clone()), port));
    stack.policy.declare_group(alb_group.clone())?;
    stack.policy.declare_group(asg_group.clone())?;
    stack.policy.require_edge(&alb_sg, &asg_sg, port, Protocol::Tcp);

    let pool = TargetPool::new(format!("{name}/targets"), ResourceRef::new(name.clone(), asg.clone()), bounds)?;
    let mut balancer = LoadBalancer::new(alb.clone(), unit.balancer_tier(), balancer_subnets);
    let binding = balancer.bind(port, pool, unit.health_check())?;

    let mut resources = vec![
        ResourceDescription::SecurityGroup(SecurityGroupResource {
            network: network.clone(),
            group: alb_group,
        }),
        ResourceDescription::SecurityGroup(SecurityGroupResource {
            network: network.clone(),
            group: asg_group,
        }),
        ResourceDescription::LoadBalancer(balancer.to_resource(
            network.clone(),
            ResourceRef::new(name.clone(), alb_sg),
        )),
        ResourceDescription::ScalingGroup(ScalingGroupResource {
            name: asg.clone(),
            network: network.clone(),
            tier: unit.compute_tier(),
            subnets: compute_subnets,
            security_group: ResourceRef::new(name.clone(), asg_sg),
            bounds,
        }),
        ResourceDescription::TargetPool(binding.to_resource(ResourceRef::new(name.clone(), alb))),
    ];

    if let Some(policy) = scaling_policy(unit, &asg)? {
        stack.scaling.push(ScalingTarget::from_resource(&policy)?);
        resources.push(ResourceDescription::ScalingPolicy(policy));
    }
    stack.load_balancers.push(balancer);
    Ok(resources)
}

fn scaling_policy(unit: &UnitConfig, asg: &str) -> ComposeResult<Option<ScalingPolicyResource>> {
    let metric = unit.metric_query(asg);
    let policy = match (&unit.scaling_steps, unit.target_utilization) {
        (Some(_), Some(_)) => {
            return Err(ComposeError::invalid(
                &unit.name,
                "scaling_steps and target_utilization are mutually exclusive",
            ));
        }
        (Some(steps), None) => {
            let open: Vec<ScalingStep> = steps
                .iter()
                .map(|s| ScalingStep::new(s.lower, s.upper, s.change))
                .collect();
            let table = StepTable::from_open_steps(&open)?;
            ScalingPolicySpec::Step {
                metric,
                steps: table.steps().to_vec(),
            }
        }
        (None, Some(target_value)) => ScalingPolicySpec::TargetTracking { metric, target_value },
        (None, None) => return Ok(None),
    };
    Ok(Some(ScalingPolicyResource {
        name: format!("{}/scaling-policy", unit.name),
        scaling_group: ResourceRef::new(unit.name.clone(), asg.to_string()),
        bounds: unit.bounds(),
        policy,
    }))
}

/// The network a unit sits on, as a reference plus its subnet layout.
fn network_of(
    config: &StackConfig,
    unit: &UnitConfig,
    stack: &Stack,
) -> ComposeResult<(ResourceRef, SubnetAllocation)> {
    let network = unit
        .network
        .as_deref()
        .ok_or_else(|| ComposeError::invalid(&unit.name, "network is required"))?;
    if config.unit(network).is_none() {
        return Err(TopologyError::UnknownUnit(network.to_string()).into());
    }
    let allocation = stack
        .networks
        .get(network)
        .cloned()
        .ok_or_else(|| ComposeError::invalid(&unit.name, format!("{network} is not a network unit")))?;
    Ok((ResourceRef::new(network, vpc_name(network)), allocation))
}

fn tier_subnets(unit: &str, allocation: &SubnetAllocation, tier: Tier) -> ComposeResult<Vec<Ipv4Net>> {
    let cidrs = allocation.cidrs_in_tier(tier);
    if cidrs.is_empty() {
        return Err(ComposeError::invalid(unit, format!("network has no {tier} subnets")));
    }
    Ok(cidrs)
}

fn vpc_name(network_unit: &str) -> ResourceName {
    format!("{network_unit}/vpc")
}
