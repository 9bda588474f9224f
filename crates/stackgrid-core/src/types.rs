//! Shared types used across StackGrid crates.
//!
//! These types describe network layout, permission boundaries, load
//! balancer contracts and scaling configuration. All of them are
//! serializable so they can be embedded in resource descriptions and
//! persisted by the provider.

use std::collections::BTreeMap;
use std::fmt;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

/// Globally unique resource name, `{unit}/{local-name}`.
pub type ResourceName = String;

/// Name of a provisionable unit.
pub type UnitName = String;

// ── Network layout ────────────────────────────────────────────────

/// An availability zone, identified by its index in the stack's zone set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Zone(pub u8);

impl Zone {
    /// Highest number of zones a stack may span (one per suffix letter).
    pub const MAX: u8 = 26;

    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Letter suffix used in zone names (`a`, `b`, ...); `None` past `z`.
    pub fn suffix(self) -> Option<char> {
        (self.0 < Self::MAX).then(|| char::from(b'a' + self.0))
    }

    /// The first `count` zones in order.
    pub fn first(count: u8) -> impl Iterator<Item = Zone> {
        (0..count).map(Zone)
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.suffix() {
            Some(letter) => write!(f, "{letter}"),
            None => write!(f, "zone-{}", self.0),
        }
    }
}

/// Reachability class of a subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Routed to and from the internet.
    Public,
    /// Outbound internet access through NAT only.
    PrivateWithEgress,
    /// No route outside the network.
    PrivateIsolated,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Public => "public",
            Tier::PrivateWithEgress => "private_with_egress",
            Tier::PrivateIsolated => "private_isolated",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tier together with the prefix length of its per-zone subnets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSpec {
    pub tier: Tier,
    pub prefix: u8,
}

impl TierSpec {
    pub fn new(tier: Tier, prefix: u8) -> Self {
        Self { tier, prefix }
    }
}

/// A subnet carved out of an address block for one (zone, tier) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subnet {
    pub zone: Zone,
    pub tier: Tier,
    pub cidr: Ipv4Net,
}

impl Subnet {
    /// Stable local name, e.g. `public-a`.
    pub fn label(&self) -> String {
        format!("{}-{}", self.tier, self.zone)
    }
}

// ── Security ──────────────────────────────────────────────────────

/// Transport or application protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Http,
    Https,
}

impl Protocol {
    /// The transport protocol a security rule needs to carry this protocol.
    pub fn transport(self) -> Protocol {
        match self {
            Protocol::Http | Protocol::Https => Protocol::Tcp,
            other => other,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
            Protocol::Http => "http",
            Protocol::Https => "https",
        };
        f.write_str(s)
    }
}

/// Traffic source of an ingress rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Peer {
    /// Any address inside this block.
    Cidr(Ipv4Net),
    /// Members of the named security group.
    Group(ResourceName),
}

impl Peer {
    /// `0.0.0.0/0`.
    pub fn any_ipv4() -> Self {
        Peer::Cidr(Ipv4Net::default())
    }

    pub fn group(name: impl Into<ResourceName>) -> Self {
        Peer::Group(name.into())
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peer::Cidr(net) => write!(f, "{net}"),
            Peer::Group(name) => write!(f, "sg:{name}"),
        }
    }
}

/// A single permission: traffic from `source` on `port`/`protocol`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IngressRule {
    pub source: Peer,
    pub port: u16,
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl IngressRule {
    pub fn tcp(source: Peer, port: u16) -> Self {
        Self {
            source,
            port,
            protocol: Protocol::Tcp,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// True when both rules grant the same permission (description ignored).
    pub fn same_permission(&self, other: &IngressRule) -> bool {
        self.source == other.source && self.port == other.port && self.protocol == other.protocol
    }

    /// True when this rule admits `protocol` traffic on `port`.
    pub fn admits(&self, port: u16, protocol: Protocol) -> bool {
        self.port == port && self.protocol == protocol.transport()
    }
}

/// A named permission boundary with its ordered ingress rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub name: ResourceName,
    pub rules: Vec<IngressRule>,
    /// Subnets the group's members are placed in.
    #[serde(default)]
    pub members: Vec<Ipv4Net>,
}

impl SecurityGroup {
    pub fn new(name: impl Into<ResourceName>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
            members: Vec::new(),
        }
    }

    pub fn with_members(mut self, members: impl IntoIterator<Item = Ipv4Net>) -> Self {
        self.members.extend(members);
        self
    }

    pub fn with_rule(mut self, rule: IngressRule) -> Self {
        self.rules.push(rule);
        self
    }
}

// ── Load balancing ────────────────────────────────────────────────

/// Health-check contract handed to the provider for member admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckContract {
    pub path: String,
    pub port: u16,
    pub protocol: Protocol,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
    pub timeout_secs: u64,
}

impl Default for HealthCheckContract {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            port: 80,
            protocol: Protocol::Http,
            healthy_threshold: 5,
            unhealthy_threshold: 2,
            timeout_secs: 10,
        }
    }
}

/// Inclusive capacity range of a target pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityBounds {
    pub min: u32,
    pub max: u32,
}

impl CapacityBounds {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn is_valid(&self) -> bool {
        self.min <= self.max
    }

    /// Clamp a signed capacity into `[min, max]`.
    pub fn clamp(&self, capacity: i64) -> u32 {
        capacity.clamp(self.min as i64, self.max as i64) as u32
    }
}

// ── Scaling ───────────────────────────────────────────────────────

/// One row of a step-scaling table over `[lower, upper)`.
///
/// An absent bound is unbounded on that side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalingStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
    pub delta: i32,
}

impl ScalingStep {
    pub fn new(lower: Option<f64>, upper: Option<f64>, delta: i32) -> Self {
        Self { lower, upper, delta }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lower.is_none_or(|lo| value >= lo) && self.upper.is_none_or(|hi| value < hi)
    }

    /// True when the two half-open intervals share at least one value.
    pub fn overlaps(&self, other: &ScalingStep) -> bool {
        let lo = max_lower(self.lower, other.lower);
        let hi = min_upper(self.upper, other.upper);
        match (lo, hi) {
            (Some(lo), Some(hi)) => lo < hi,
            _ => true,
        }
    }
}

fn max_lower(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

fn min_upper(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// An observed metric value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub value: f64,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
}

/// Aggregation applied to raw datapoints inside the sampling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    #[default]
    Average,
    Sum,
    Minimum,
    Maximum,
}

/// Identifies a metric stream and the window to aggregate it over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricQuery {
    pub name: String,
    pub namespace: String,
    pub statistic: Statistic,
    pub dimensions: BTreeMap<String, String>,
    pub window_secs: u64,
}

impl MetricQuery {
    /// Stream key, independent of statistic and window.
    pub fn stream_key(&self) -> String {
        let dims: Vec<String> = self
            .dimensions
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        format!("{}/{}[{}]", self.namespace, self.name, dims.join(","))
    }
}
