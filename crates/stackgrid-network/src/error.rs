//! Network planning error types.

use ipnet::Ipv4Net;
use stackgrid_core::{Protocol, Tier};
use thiserror::Error;

/// Errors raised while planning address space or security policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("address block {block} cannot hold {requested} subnets (only {allocated} fit)")]
    CapacityExceeded {
        block: Ipv4Net,
        requested: usize,
        allocated: usize,
    },

    #[error("subnet prefix /{prefix} must be longer than block prefix /{block_prefix} and at most /32")]
    InvalidPrefix { prefix: u8, block_prefix: u8 },

    #[error("tier listed more than once: {0}")]
    DuplicateTier(Tier),

    #[error("zone count must be between 1 and {max}, got {count}")]
    InvalidZoneCount { count: u8, max: u8 },

    #[error("security group declared twice: {0}")]
    DuplicateGroup(String),

    #[error("unknown security group: {0}")]
    UnknownGroup(String),

    #[error("security group {group} references undeclared group {referenced}")]
    UndeclaredGroupReference { group: String, referenced: String },

    #[error("security group {group} has a redundant rule: {rule}")]
    RedundantRule { group: String, rule: String },

    #[error("{to} does not admit {protocol} traffic from {from} on port {port}")]
    MissingRequiredEdge {
        from: String,
        to: String,
        port: u16,
        protocol: Protocol,
    },
}

pub type NetworkResult<T> = Result<T, NetworkError>;
