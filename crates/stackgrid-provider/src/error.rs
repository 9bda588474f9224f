//! Provider boundary error types.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider rejected request: {0}")]
    Rejected(String),

    #[error("conflicting update on {id}: expected capacity {expected:?}, found {found:?}")]
    Conflict {
        id: String,
        expected: Option<u32>,
        found: Option<u32>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("state store error: {0}")]
    State(#[from] stackgrid_state::StateError),
}

impl ProviderError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout(_) | ProviderError::Rejected(_) | ProviderError::Conflict { .. }
        )
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
