//! Listener ↔ target-pool bindings.

use std::collections::BTreeMap;

use ipnet::Ipv4Net;
use serde::Serialize;
use stackgrid_core::*;
use tracing::{debug, info};

use crate::error::{BindingError, BindingResult};

/// The compute members behind a listener, bounded in size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetPool {
    pub name: ResourceName,
    /// The scaling group or instance providing members.
    pub members: ResourceRef,
    pub bounds: CapacityBounds,
}

impl TargetPool {
    pub fn new(name: impl Into<ResourceName>, members: ResourceRef, bounds: CapacityBounds) -> BindingResult<Self> {
        if !bounds.is_valid() {
            return Err(BindingError::InvalidCapacity {
                min: bounds.min,
                max: bounds.max,
            });
        }
        Ok(Self {
            name: name.into(),
            members,
            bounds,
        })
    }
}

/// An active association of one listener with one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    pub load_balancer: ResourceName,
    pub port: u16,
    pub protocol: Protocol,
    pub pool: TargetPool,
    pub health_check: HealthCheckContract,
}

impl Binding {
    /// Provider description of the bound pool.
    pub fn to_resource(&self, load_balancer: ResourceRef) -> TargetPoolResource {
        TargetPoolResource {
            name: self.pool.name.clone(),
            load_balancer,
            port: self.port,
            protocol: self.protocol,
            health_check: self.health_check.clone(),
            members: self.pool.members.clone(),
        }
    }
}

/// Check a health-check contract for internal consistency.
pub fn validate_health_check(hc: &HealthCheckContract) -> BindingResult<()> {
    if hc.healthy_threshold < 1 {
        return Err(BindingError::InvalidHealthCheck(
            "healthy threshold must be at least 1".to_string(),
        ));
    }
    if hc.unhealthy_threshold < 1 {
        return Err(BindingError::InvalidHealthCheck(
            "unhealthy threshold must be at least 1".to_string(),
        ));
    }
    if hc.timeout_secs == 0 {
        return Err(BindingError::InvalidHealthCheck(
            "timeout must be greater than zero".to_string(),
        ));
    }
    if matches!(hc.protocol, Protocol::Http | Protocol::Https) && !hc.path.starts_with('/') {
        return Err(BindingError::InvalidHealthCheck(format!(
            "path must start with '/': {}",
            hc.path
        )));
    }
    Ok(())
}

/// A load balancer placed on the subnets of one tier.
#[derive(Debug, Clone)]
pub struct LoadBalancer {
    name: ResourceName,
    tier: Tier,
    subnets: Vec<Ipv4Net>,
    internet_facing: bool,
    protocol: Protocol,
    /// port → binding
    listeners: BTreeMap<u16, Binding>,
}

impl LoadBalancer {
    /// An HTTP load balancer; internet-facing when placed in the public tier.
    pub fn new(name: impl Into<ResourceName>, tier: Tier, subnets: Vec<Ipv4Net>) -> Self {
        Self {
            name: name.into(),
            tier,
            subnets,
            internet_facing: tier == Tier::Public,
            protocol: Protocol::Http,
            listeners: BTreeMap::new(),
        }
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn internet_facing(&self) -> bool {
        self.internet_facing
    }

    /// Open a listener on `port` forwarding to `pool`.
    ///
    /// A pool may back at most one listener of this balancer. The check
    /// does not look at other balancers; pools are named after the unit
    /// that owns them, and each unit composes a single balancer.
    pub fn bind(
        &mut self,
        port: u16,
        pool: TargetPool,
        health_check: HealthCheckContract,
    ) -> BindingResult<Binding> {
        validate_health_check(&health_check)?;
        if self.listeners.contains_key(&port) {
            return Err(BindingError::ListenerInUse {
                load_balancer: self.name.clone(),
                port,
            });
        }
        if let Some(existing) = self.binding_for_pool(&pool.name) {
            return Err(BindingError::PoolAlreadyBound {
                pool: pool.name,
                port: existing.port,
            });
        }

        let binding = Binding {
            load_balancer: self.name.clone(),
            port,
            protocol: self.protocol,
            pool,
            health_check,
        };
        info!(
            load_balancer = %self.name,
            port,
            pool = %binding.pool.name,
            "listener bound"
        );
        self.listeners.insert(port, binding.clone());
        Ok(binding)
    }

    /// Close the listener on `port`, releasing its pool.
    pub fn unbind(&mut self, port: u16) -> BindingResult<Binding> {
        let binding = self
            .listeners
            .remove(&port)
            .ok_or_else(|| BindingError::UnknownListener {
                load_balancer: self.name.clone(),
                port,
            })?;
        debug!(load_balancer = %self.name, port, pool = %binding.pool.name, "listener unbound");
        Ok(binding)
    }

    pub fn binding_for_pool(&self, pool: &str) -> Option<&Binding> {
        self.listeners.values().find(|b| b.pool.name == pool)
    }

    /// Bindings ordered by port.
    pub fn bindings(&self) -> impl Iterator<Item = &Binding> {
        self.listeners.values()
    }

    /// Provider description of the balancer and its listeners.
    pub fn to_resource(&self, network: ResourceRef, security_group: ResourceRef) -> LoadBalancerResource {
        LoadBalancerResource {
            name: self.name.clone(),
            network,
            tier: self.tier,
            subnets: self.subnets.clone(),
            internet_facing: self.internet_facing,
            security_group,
            listeners: self
                .listeners
                .values()
                .map(|b| ListenerSpec {
                    port: b.port,
                    protocol: b.protocol,
                    target_pool: b.pool.name.clone(),
                })
                .collect(),
        }
    }
}
