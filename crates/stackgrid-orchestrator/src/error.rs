//! Orchestrator error types.

use stackgrid_autoscale::ScalingError;
use stackgrid_balancer::BindingError;
use stackgrid_network::{NetworkError, Violation};
use stackgrid_provider::ProviderError;
use stackgrid_topology::TopologyError;
use thiserror::Error;

/// Structural errors found while composing a stack.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComposeError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error(transparent)]
    Scaling(#[from] ScalingError),

    #[error("security policy is invalid: {}", describe(.0))]
    Policy(Vec<Violation>),

    #[error("unit {unit}: {reason}")]
    InvalidUnit { unit: String, reason: String },
}

impl ComposeError {
    pub(crate) fn invalid(unit: &str, reason: impl Into<String>) -> Self {
        ComposeError::InvalidUnit {
            unit: unit.to_string(),
            reason: reason.into(),
        }
    }
}

fn describe(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| NetworkError::from(v.clone()).to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type ComposeResult<T> = Result<T, ComposeError>;

/// Errors that stop a plan or apply as a whole.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error("provider error on {resource}: {source}")]
    Provider {
        resource: String,
        source: ProviderError,
    },
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
