//! Scaling configuration errors.

use stackgrid_core::ScalingStep;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScalingError {
    #[error("step {added:?} overlaps existing step {existing:?}")]
    AmbiguousStep {
        existing: ScalingStep,
        added: ScalingStep,
    },

    #[error("invalid bounds: {0}")]
    InvalidBounds(String),
}

pub type ScalingResult<T> = Result<T, ScalingError>;
