//! stack.toml configuration parser.
//!
//! A stack file enumerates exactly which units to materialize and their
//! parameters. Every optional field has a documented default, resolved
//! through the accessor methods on [`UnitConfig`].

use std::collections::BTreeMap;
use std::path::Path;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::types::*;

pub const DEFAULT_ZONE_COUNT: u8 = 2;
pub const DEFAULT_MIN_CAPACITY: u32 = 2;
pub const DEFAULT_MAX_CAPACITY: u32 = 10;
pub const DEFAULT_LISTENER_PORT: u16 = 80;
pub const DEFAULT_METRIC_NAME: &str = "CPUUtilization";
pub const DEFAULT_METRIC_NAMESPACE: &str = "AWS/EC2";
pub const DEFAULT_METRIC_PERIOD_SECS: u64 = 60;
/// Dimension key used to scope a scaling metric to its group.
pub const SCALING_GROUP_DIMENSION: &str = "AutoScalingGroupName";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackConfig {
    pub stack: StackMeta,
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    #[serde(default)]
    pub scaling: ScalingSettings,
    #[serde(default, rename = "unit")]
    pub units: Vec<UnitConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackMeta {
    pub name: String,
    pub region: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub provider_timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub concurrency: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            provider_timeout_secs: 30,
            max_attempts: 3,
            backoff_base_ms: 200,
            backoff_max_ms: 5000,
            concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingSettings {
    pub interval_secs: u64,
    pub call_timeout_secs: u64,
}

impl Default for ScalingSettings {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            call_timeout_secs: 10,
        }
    }
}

/// What a unit provisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// A new network carved into subnets.
    Network,
    /// An existing network, looked up by id.
    ImportedNetwork,
    /// Load balancer in front of an autoscaling group.
    Application,
    /// A standalone public instance, optionally with its own balanced group.
    WebServer,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitConfig {
    pub name: String,
    pub kind: Option<UnitKind>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Network unit whose subnets this unit uses (implies a dependency).
    pub network: Option<String>,

    // network / imported_network
    pub address_block: Option<Ipv4Net>,
    pub zone_count: Option<u8>,
    pub tiers: Option<Vec<TierSpec>>,
    pub vpc_id: Option<String>,
    pub vpc_name: Option<String>,

    // application / web_server
    pub min_capacity: Option<u32>,
    pub max_capacity: Option<u32>,
    pub scaling_steps: Option<Vec<StepConfig>>,
    pub target_utilization: Option<f64>,
    pub metric: Option<MetricConfig>,
    pub listener_port: Option<u16>,
    pub health_check: Option<HealthCheckConfig>,
    pub compute_tier: Option<Tier>,
    pub balancer_tier: Option<Tier>,
    /// web_server only: also put a balanced scaling group next to the instance.
    pub load_balanced: Option<bool>,
}

/// A step as written in a stack file. Either bound may be omitted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub change: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub path: Option<String>,
    pub port: Option<u16>,
    pub protocol: Option<Protocol>,
    pub healthy_threshold: Option<u32>,
    pub unhealthy_threshold: Option<u32>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricConfig {
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub statistic: Option<Statistic>,
    pub period_secs: Option<u64>,
}

/// Tier layout used when a network unit does not list its tiers.
pub fn default_tiers() -> Vec<TierSpec> {
    vec![
        TierSpec::new(Tier::Public, 24),
        TierSpec::new(Tier::PrivateWithEgress, 24),
        TierSpec::new(Tier::PrivateIsolated, 24),
    ]
}

impl UnitConfig {
    pub fn kind(&self) -> UnitKind {
        self.kind.unwrap_or(UnitKind::Application)
    }

    pub fn zone_count(&self) -> u8 {
        self.zone_count.unwrap_or(DEFAULT_ZONE_COUNT)
    }

    pub fn tiers(&self) -> Vec<TierSpec> {
        self.tiers.clone().unwrap_or_else(default_tiers)
    }

    pub fn bounds(&self) -> CapacityBounds {
        CapacityBounds::new(
            self.min_capacity.unwrap_or(DEFAULT_MIN_CAPACITY),
            self.max_capacity.unwrap_or(DEFAULT_MAX_CAPACITY),
        )
    }

    pub fn listener_port(&self) -> u16 {
        self.listener_port.unwrap_or(DEFAULT_LISTENER_PORT)
    }

    pub fn compute_tier(&self) -> Tier {
        self.compute_tier.unwrap_or(Tier::PrivateWithEgress)
    }

    pub fn balancer_tier(&self) -> Tier {
        self.balancer_tier.unwrap_or(Tier::Public)
    }

    pub fn load_balanced(&self) -> bool {
        self.load_balanced.unwrap_or(true)
    }

    /// Health-check contract with defaults filled in.
    ///
    /// The probe port follows the listener port unless set explicitly.
    pub fn health_check(&self) -> HealthCheckContract {
        let base = HealthCheckContract {
            port: self.listener_port(),
            ..HealthCheckContract::default()
        };
        let Some(hc) = &self.health_check else {
            return base;
        };
        HealthCheckContract {
            path: hc.path.clone().unwrap_or(base.path),
            port: hc.port.unwrap_or(base.port),
            protocol: hc.protocol.unwrap_or(base.protocol),
            healthy_threshold: hc.healthy_threshold.unwrap_or(base.healthy_threshold),
            unhealthy_threshold: hc.unhealthy_threshold.unwrap_or(base.unhealthy_threshold),
            timeout_secs: hc.timeout_secs.unwrap_or(base.timeout_secs),
        }
    }

    /// Metric query for this unit's scaling group.
    pub fn metric_query(&self, scaling_group: &str) -> MetricQuery {
        let cfg = self.metric.clone().unwrap_or_default();
        let mut dimensions = BTreeMap::new();
        dimensions.insert(SCALING_GROUP_DIMENSION.to_string(), scaling_group.to_string());
        MetricQuery {
            name: cfg.name.unwrap_or_else(|| DEFAULT_METRIC_NAME.to_string()),
            namespace: cfg
                .namespace
                .unwrap_or_else(|| DEFAULT_METRIC_NAMESPACE.to_string()),
            statistic: cfg.statistic.unwrap_or_default(),
            dimensions,
            window_secs: cfg.period_secs.unwrap_or(DEFAULT_METRIC_PERIOD_SECS),
        }
    }

    /// Every unit this one depends on, `network` included, without duplicates.
    pub fn dependencies(&self) -> Vec<String> {
        let mut deps = self.depends_on.clone();
        if let Some(network) = &self.network
            && !deps.contains(network)
        {
            deps.push(network.clone());
        }
        deps
    }
}

impl StackConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: StackConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn unit(&self, name: &str) -> Option<&UnitConfig> {
        self.units.iter().find(|u| u.name == name)
    }

    /// Scaffold the two-unit stack: a fresh network and a balanced,
    /// step-scaled application in front of it.
    pub fn scaffold(name: &str, address_block: Ipv4Net) -> Self {
        StackConfig {
            stack: StackMeta {
                name: name.to_string(),
                region: None,
            },
            orchestrator: OrchestratorSettings::default(),
            scaling: ScalingSettings::default(),
            units: vec![
                UnitConfig {
                    name: "network".to_string(),
                    kind: Some(UnitKind::Network),
                    address_block: Some(address_block),
                    zone_count: Some(DEFAULT_ZONE_COUNT),
                    tiers: Some(default_tiers()),
                    ..UnitConfig::default()
                },
                UnitConfig {
                    name: "application".to_string(),
                    kind: Some(UnitKind::Application),
                    network: Some("network".to_string()),
                    min_capacity: Some(DEFAULT_MIN_CAPACITY),
                    max_capacity: Some(DEFAULT_MAX_CAPACITY),
                    listener_port: Some(DEFAULT_LISTENER_PORT),
                    scaling_steps: Some(vec![
                        StepConfig { lower: None, upper: Some(1.0), change: -1 },
                        StepConfig { lower: Some(10.0), upper: None, change: 1 },
                        StepConfig { lower: Some(60.0), upper: None, change: 3 },
                    ]),
                    ..UnitConfig::default()
                },
            ],
        }
    }
}
