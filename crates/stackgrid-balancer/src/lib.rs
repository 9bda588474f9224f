//! stackgrid-balancer: binds target pools to load-balancer listeners.
//!
//! One listener per port per load balancer; a pool sits behind at most
//! one listener at a time and must be unbound before it can move. The
//! health-check contract is validated for internal consistency only;
//! probing members is the provider's job.

pub mod binding;
pub mod error;

pub use binding::{Binding, LoadBalancer, TargetPool, validate_health_check};
pub use error::{BindingError, BindingResult};
