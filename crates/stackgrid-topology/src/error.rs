//! Topology error types.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("dependency cycle detected: {}", cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },

    #[error("unknown unit: {0}")]
    UnknownUnit(String),

    #[error("unit declared twice: {0}")]
    DuplicateUnit(String),

    #[error("unit {unit} declares resource {resource} twice")]
    DuplicateResource { unit: String, resource: String },

    #[error("resource {resource} is not named after its unit {unit}")]
    ForeignResource { unit: String, resource: String },

    #[error("unit {unit} references {resource} of unit {owner} without depending on it")]
    UndeclaredDependency {
        unit: String,
        resource: String,
        owner: String,
    },

    #[error("unit {unit} references unknown resource {resource}")]
    UnknownResource { unit: String, resource: String },
}

pub type TopologyResult<T> = Result<T, TopologyError>;
