//! Step tables.
//!
//! Steps are half-open `[lower, upper)` intervals over the metric's value
//! domain. Overlaps are rejected when a step is added, so evaluation never
//! has to choose between two steps. Gaps are allowed and mean "no change".

use stackgrid_core::ScalingStep;

use crate::error::{ScalingError, ScalingResult};

/// Non-overlapping steps ordered by lower bound.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepTable {
    steps: Vec<ScalingStep>,
}

impl StepTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from fully specified steps.
    pub fn from_steps(steps: impl IntoIterator<Item = ScalingStep>) -> ScalingResult<Self> {
        let mut table = Self::new();
        for step in steps {
            table.add_step(step)?;
        }
        Ok(table)
    }

    /// Build a table from steps that give only one bound each.
    ///
    /// A lower-only step is closed by the nearest lower bound above it,
    /// an upper-only step by the nearest upper bound below it. Steps that
    /// give both bounds, or neither, are taken as written.
    pub fn from_open_steps(steps: &[ScalingStep]) -> ScalingResult<Self> {
        let closed: Vec<ScalingStep> = steps
            .iter()
            .enumerate()
            .map(|(i, step)| {
                let others = steps
                    .iter()
                    .enumerate()
                    .filter(move |(j, _)| *j != i)
                    .map(|(_, s)| s);
                match (step.lower, step.upper) {
                    (Some(lo), None) => {
                        let upper = others
                            .filter_map(|s| s.lower)
                            .filter(|&l| l > lo)
                            .reduce(f64::min);
                        ScalingStep::new(Some(lo), upper, step.delta)
                    }
                    (None, Some(hi)) => {
                        let lower = others
                            .filter_map(|s| s.upper)
                            .filter(|&u| u < hi)
                            .reduce(f64::max);
                        ScalingStep::new(lower, Some(hi), step.delta)
                    }
                    _ => *step,
                }
            })
            .collect();
        Self::from_steps(closed)
    }

    /// Add a step, failing if it overlaps one already present.
    pub fn add_step(&mut self, step: ScalingStep) -> ScalingResult<()> {
        check_bounds(&step)?;
        if let Some(existing) = self.steps.iter().find(|s| s.overlaps(&step)) {
            return Err(ScalingError::AmbiguousStep {
                existing: *existing,
                added: step,
            });
        }
        let key = lower_key(&step);
        let pos = self.steps.partition_point(|s| lower_key(s) < key);
        self.steps.insert(pos, step);
        Ok(())
    }

    pub fn with_step(mut self, lower: Option<f64>, upper: Option<f64>, delta: i32) -> ScalingResult<Self> {
        self.add_step(ScalingStep::new(lower, upper, delta))?;
        Ok(self)
    }

    /// The step whose interval contains `value`.
    pub fn find(&self, value: f64) -> Option<&ScalingStep> {
        self.steps.iter().find(|s| s.contains(value))
    }

    pub fn steps(&self) -> &[ScalingStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

fn lower_key(step: &ScalingStep) -> f64 {
    step.lower.unwrap_or(f64::NEG_INFINITY)
}

fn check_bounds(step: &ScalingStep) -> ScalingResult<()> {
    if step.lower.is_some_and(f64::is_nan) || step.upper.is_some_and(f64::is_nan) {
        return Err(ScalingError::InvalidBounds(format!("NaN bound in step {step:?}")));
    }
    if let (Some(lo), Some(hi)) = (step.lower, step.upper)
        && lo >= hi
    {
        return Err(ScalingError::InvalidBounds(format!(
            "lower bound {lo} is not below upper bound {hi}"
        )));
    }
    Ok(())
}
