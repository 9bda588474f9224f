//! stackgrid-core: shared data model for StackGrid.
//!
//! Everything in this crate is pure data: zones, tiers, subnets, security
//! groups, health-check contracts, scaling steps, and the resource
//! descriptions handed to a provider. No type here performs I/O; the
//! logic that validates and composes these types lives in the subsystem
//! crates (`stackgrid-network`, `stackgrid-topology`, ...).

pub mod config;
pub mod resource;
pub mod types;

pub use config::StackConfig;
pub use resource::*;
pub use types::*;
