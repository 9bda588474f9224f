//! stackgrid-network: address planning and permission graphs.
//!
//! # Components
//!
//! - **`allocator`**: carves one address block into per-(zone, tier)
//!   subnets in a fixed zone-major, tier-minor order.
//! - **`security`**: the security-group policy graph of who may reach
//!   whom on which port, plus validation (dangling group references,
//!   redundant rules, required edges such as load balancer → compute).

pub mod allocator;
pub mod error;
pub mod security;

pub use allocator::{SubnetAllocation, allocate};
pub use error::{NetworkError, NetworkResult};
pub use security::{Edge, RequiredEdge, SecurityPolicyGraph, Violation};
