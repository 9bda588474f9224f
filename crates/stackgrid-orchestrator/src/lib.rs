//! stackgrid-orchestrator: from a stack file to provisioned resources.
//!
//! # Pipeline
//!
//! 1. **compose**: turn a [`StackConfig`](stackgrid_core::StackConfig)
//!    into a [`Stack`]: subnets from the allocator, security groups in a
//!    policy graph, listener bindings, scaling targets, and one
//!    [`ProvisionableUnit`](stackgrid_topology::ProvisionableUnit) per
//!    configured unit in a topology graph. Every structural check runs
//!    here, before any provider call.
//! 2. **plan**: diff each declared resource against the provider's
//!    record by fingerprint, reading only.
//! 3. **apply**: walk the graph, running units whose dependencies have
//!    succeeded in parallel. Provider calls are bounded by a timeout and
//!    transient failures are retried with exponential backoff. A failed
//!    unit stops its dependants; independent units carry on.

pub mod apply;
pub mod compose;
pub mod error;
pub mod plan;

pub use apply::{ApplyReport, ApplySettings, NotAttemptedReason, Orchestrator, UnitOutcome, UnitReport};
pub use compose::{Stack, compose};
pub use error::{ComposeError, ComposeResult, OrchestratorError, OrchestratorResult};
pub use plan::{Plan, PlanAction, ResourcePlan, UnitPlan};
