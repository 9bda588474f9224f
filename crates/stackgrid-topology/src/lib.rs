//! stackgrid-topology: provisionable units and the DAG between them.
//!
//! A [`ProvisionableUnit`] is a named bundle of resource descriptions.
//! Units never hold each other; they reference resources by name and
//! declare `depends_on` edges in a [`TopologyGraph`], which produces a
//! deterministic apply order and rejects cycles, unknown units and
//! references to units outside a unit's dependency closure.

pub mod error;
pub mod graph;
pub mod unit;

pub use error::{TopologyError, TopologyResult};
pub use graph::TopologyGraph;
pub use unit::{Capability, ProvisionableUnit};
