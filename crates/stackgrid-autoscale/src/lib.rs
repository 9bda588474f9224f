//! stackgrid-autoscale: metric-driven capacity adjustment.
//!
//! A [`ScalingPolicy`] maps one metric sample and the current capacity to
//! a [`ScaleDecision`]. Two policies exist:
//!
//! - **Step scaling** over a [`StepTable`] of non-overlapping half-open
//!   `[lower, upper)` intervals. A sample outside every interval means no
//!   change.
//! - **Target tracking** toward a target value:
//!
//! ```text
//! if value > target * 1.1:
//!     desired = ceil(current * (value / target))
//! if value < target * 0.5 and current > min:
//!     desired = ceil(current * (value / target))
//! new = clamp(desired, min, max)
//! ```
//!
//! The reported delta is always the applied one, after clamping.
//!
//! [`ScalingController`] runs the policies on a fixed interval against a
//! provider and metric source, one in-flight evaluation per pool.

pub mod error;
pub mod evaluator;
pub mod scaler;
pub mod steps;

pub use error::{ScalingError, ScalingResult};
pub use evaluator::{ScaleDecision, ScalingPolicy, StepScalingEvaluator, TargetTracking};
pub use scaler::{EvaluationOutcome, ScalingController, ScalingTarget};
pub use steps::StepTable;
