//! Binding error types.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("load balancer {load_balancer} already has a listener on port {port}")]
    ListenerInUse { load_balancer: String, port: u16 },

    #[error("target pool {pool} is already bound to port {port}; unbind it first")]
    PoolAlreadyBound { pool: String, port: u16 },

    #[error("load balancer {load_balancer} has no listener on port {port}")]
    UnknownListener { load_balancer: String, port: u16 },

    #[error("invalid health check: {0}")]
    InvalidHealthCheck(String),

    #[error("invalid capacity bounds: min {min} > max {max}")]
    InvalidCapacity { min: u32, max: u32 },
}

pub type BindingResult<T> = Result<T, BindingError>;
