//! Scaling evaluators.
//!
//! Both evaluators are stateless: everything they need besides their
//! configuration is the sample and the capacity read just before the call.

use serde::Serialize;
use stackgrid_core::{CapacityBounds, MetricSample, ScalingPolicyResource, ScalingPolicySpec};
use tracing::{debug, warn};

use crate::error::{ScalingError, ScalingResult};
use crate::steps::StepTable;

/// The outcome of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScaleDecision {
    /// Capacity the decision was computed from.
    pub current: u32,
    /// Change the policy asked for, before clamping.
    pub nominal_delta: i32,
    /// Change actually applied: `new_capacity - current`.
    pub delta: i32,
    pub new_capacity: u32,
}

impl ScaleDecision {
    fn unchanged(current: u32) -> Self {
        Self {
            current,
            nominal_delta: 0,
            delta: 0,
            new_capacity: current,
        }
    }

    fn clamped(current: u32, nominal_delta: i64, bounds: CapacityBounds) -> Self {
        let new_capacity = bounds.clamp(current as i64 + nominal_delta);
        Self {
            current,
            nominal_delta: saturate(nominal_delta),
            delta: saturate(new_capacity as i64 - current as i64),
            new_capacity,
        }
    }

    pub fn is_change(&self) -> bool {
        self.delta != 0
    }
}

fn saturate(v: i64) -> i32 {
    v.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Step scaling over a [`StepTable`] within capacity bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct StepScalingEvaluator {
    table: StepTable,
    bounds: CapacityBounds,
}

impl StepScalingEvaluator {
    pub fn new(table: StepTable, bounds: CapacityBounds) -> ScalingResult<Self> {
        check_capacity(bounds)?;
        Ok(Self { table, bounds })
    }

    pub fn table(&self) -> &StepTable {
        &self.table
    }

    pub fn bounds(&self) -> CapacityBounds {
        self.bounds
    }

    /// Apply the step containing `sample.value`; no step means no change.
    pub fn evaluate(&self, sample: &MetricSample, current: u32) -> ScaleDecision {
        if !sample.value.is_finite() {
            warn!(value = sample.value, "ignoring non-finite metric sample");
            return ScaleDecision::unchanged(current);
        }
        let Some(step) = self.table.find(sample.value) else {
            debug!(value = sample.value, current, "no step matches");
            return ScaleDecision::unchanged(current);
        };
        let decision = ScaleDecision::clamped(current, step.delta as i64, self.bounds);
        debug!(
            value = sample.value,
            current,
            nominal = decision.nominal_delta,
            applied = decision.delta,
            "step matched"
        );
        decision
    }
}

/// Proportional scaling toward a target metric value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetTracking {
    target_value: f64,
    bounds: CapacityBounds,
}

impl TargetTracking {
    /// Scale out above this multiple of the target.
    pub const SCALE_OUT_RATIO: f64 = 1.1;
    /// Scale in below this multiple of the target.
    pub const SCALE_IN_RATIO: f64 = 0.5;

    pub fn new(target_value: f64, bounds: CapacityBounds) -> ScalingResult<Self> {
        if !target_value.is_finite() || target_value <= 0.0 {
            return Err(ScalingError::InvalidBounds(format!(
                "target value must be positive, got {target_value}"
            )));
        }
        check_capacity(bounds)?;
        Ok(Self { target_value, bounds })
    }

    pub fn target_value(&self) -> f64 {
        self.target_value
    }

    pub fn evaluate(&self, sample: &MetricSample, current: u32) -> ScaleDecision {
        let value = sample.value;
        let target = self.target_value;
        if !value.is_finite() || value < 0.0 {
            warn!(value, "ignoring invalid metric sample");
            return ScaleDecision::unchanged(current);
        }
        let ratio = value / target;

        if value > target * Self::SCALE_OUT_RATIO {
            let desired = (current.max(1) as f64 * ratio).ceil() as i64;
            let decision = ScaleDecision::clamped(current, desired - current as i64, self.bounds);
            if decision.new_capacity > current {
                debug!(value, target, from = current, to = decision.new_capacity, "scaling out");
                return decision;
            }
        }

        if value < target * Self::SCALE_IN_RATIO && current > self.bounds.min {
            let desired = (current as f64 * ratio).ceil().max(1.0) as i64;
            let decision = ScaleDecision::clamped(current, desired - current as i64, self.bounds);
            if decision.new_capacity < current {
                debug!(value, target, from = current, to = decision.new_capacity, "scaling in");
                return decision;
            }
        }

        ScaleDecision::unchanged(current)
    }
}

/// A scaling policy as the control loop runs it.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalingPolicy {
    Step(StepScalingEvaluator),
    TargetTracking(TargetTracking),
}

impl ScalingPolicy {
    /// Rebuild a policy from its resource description.
    pub fn from_resource(resource: &ScalingPolicyResource) -> ScalingResult<Self> {
        match &resource.policy {
            ScalingPolicySpec::Step { steps, .. } => Ok(ScalingPolicy::Step(StepScalingEvaluator::new(
                StepTable::from_steps(steps.iter().copied())?,
                resource.bounds,
            )?)),
            ScalingPolicySpec::TargetTracking { target_value, .. } => Ok(ScalingPolicy::TargetTracking(
                TargetTracking::new(*target_value, resource.bounds)?,
            )),
        }
    }

    pub fn bounds(&self) -> CapacityBounds {
        match self {
            ScalingPolicy::Step(e) => e.bounds(),
            ScalingPolicy::TargetTracking(t) => t.bounds,
        }
    }

    pub fn evaluate(&self, sample: &MetricSample, current: u32) -> ScaleDecision {
        match self {
            ScalingPolicy::Step(e) => e.evaluate(sample, current),
            ScalingPolicy::TargetTracking(t) => t.evaluate(sample, current),
        }
    }
}

fn check_capacity(bounds: CapacityBounds) -> ScalingResult<()> {
    if !bounds.is_valid() {
        return Err(ScalingError::InvalidBounds(format!(
            "min capacity {} exceeds max capacity {}",
            bounds.min, bounds.max
        )));
    }
    Ok(())
}
