//! stackgrid-provider: the boundary to the systems that do the work.
//!
//! Two collaborators sit behind traits:
//!
//! - [`Provider`]: the cloud control plane (`create`, `read`, `find`,
//!   `update`, `delete`). Calls are idempotent by resource name.
//! - [`MetricSource`]: `sample(query)` for the scaling loop.
//!
//! [`LocalProvider`] implements both on top of the redb state store, so a
//! stack can be planned, applied and scaled end to end on one machine.
//!
//! Trait methods return boxed futures so the traits stay object-safe and
//! can be shared as `Arc<dyn Provider>` across tasks.

pub mod error;
pub mod local;
pub mod traits;

pub use error::{ProviderError, ProviderResult};
pub use local::LocalProvider;
pub use stackgrid_state::{ResourceId, ResourceRecord as ResourceState};
pub use traits::{BoxFuture, MetricSource, Provider, ResourceDelta, with_timeout};
