//! Topology graph: units plus `depends_on` edges.
//!
//! Ordering uses Kahn's algorithm with a min-heap keyed on declaration
//! index, so independent units always come out in the order they were
//! added. Cycles are reported with the offending unit sequence.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use tracing::debug;

use crate::error::{TopologyError, TopologyResult};
use crate::unit::ProvisionableUnit;

#[derive(Debug, Clone, Default)]
pub struct TopologyGraph {
    /// Units in declaration order.
    units: Vec<ProvisionableUnit>,
    index: HashMap<String, usize>,
    /// `deps[i]` = indices unit `i` depends on, in declaration order.
    deps: Vec<Vec<usize>>,
}

impl TopologyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_unit(&mut self, unit: ProvisionableUnit) -> TopologyResult<()> {
        if self.index.contains_key(unit.name()) {
            return Err(TopologyError::DuplicateUnit(unit.name().to_string()));
        }
        self.index.insert(unit.name().to_string(), self.units.len());
        self.units.push(unit);
        self.deps.push(Vec::new());
        Ok(())
    }

    /// Record that `from` depends on `to` (`to` is applied first).
    pub fn add_dependency(&mut self, from: &str, to: &str) -> TopologyResult<()> {
        let from_idx = self.idx(from)?;
        let to_idx = self.idx(to)?;
        if !self.deps[from_idx].contains(&to_idx) {
            self.deps[from_idx].push(to_idx);
            debug!(%from, %to, "dependency added");
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn unit(&self, name: &str) -> Option<&ProvisionableUnit> {
        self.index.get(name).map(|&i| &self.units[i])
    }

    /// Units in declaration order.
    pub fn units(&self) -> &[ProvisionableUnit] {
        &self.units
    }

    /// Direct dependencies of `name`.
    pub fn dependencies(&self, name: &str) -> TopologyResult<Vec<&str>> {
        let idx = self.idx(name)?;
        Ok(self.deps[idx].iter().map(|&d| self.units[d].name()).collect())
    }

    /// Units that depend directly on `name`.
    pub fn dependents(&self, name: &str) -> TopologyResult<Vec<&str>> {
        let idx = self.idx(name)?;
        Ok(self
            .deps
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.contains(&idx))
            .map(|(i, _)| self.units[i].name())
            .collect())
    }

    /// Every unit `name` depends on, directly or not.
    pub fn transitive_dependencies(&self, name: &str) -> TopologyResult<BTreeSet<&str>> {
        let idx = self.idx(name)?;
        let mut seen = BTreeSet::new();
        let mut stack = self.deps[idx].clone();
        while let Some(d) = stack.pop() {
            if seen.insert(d) {
                stack.extend(self.deps[d].iter().copied());
            }
        }
        Ok(seen.into_iter().map(|i| self.units[i].name()).collect())
    }

    /// Units ordered so each appears after everything it depends on.
    pub fn topological_order(&self) -> TopologyResult<Vec<&ProvisionableUnit>> {
        let n = self.units.len();
        let mut pending: Vec<usize> = self.deps.iter().map(Vec::len).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, deps) in self.deps.iter().enumerate() {
            for &d in deps {
                dependents[d].push(i);
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = pending
            .iter()
            .enumerate()
            .filter(|(_, p)| **p == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(i)) = ready.pop() {
            order.push(i);
            for &dep in &dependents[i] {
                pending[dep] -= 1;
                if pending[dep] == 0 {
                    ready.push(Reverse(dep));
                }
            }
        }

        if order.len() < n {
            return Err(TopologyError::CycleDetected {
                cycle: self.find_cycle(&pending),
            });
        }

        Ok(order.into_iter().map(|i| &self.units[i]).collect())
    }

    /// Check every cross-resource reference.
    ///
    /// A reference must point at a resource that exists, owned either by
    /// the referencing unit or by one of its (transitive) dependencies.
    pub fn validate_references(&self) -> TopologyResult<()> {
        for unit in &self.units {
            let reachable = self.transitive_dependencies(unit.name())?;
            for reference in unit.external_references() {
                let Some(owner) = self.unit(&reference.unit) else {
                    return Err(TopologyError::UnknownUnit(reference.unit));
                };
                if !reachable.contains(owner.name()) {
                    return Err(TopologyError::UndeclaredDependency {
                        unit: unit.name().to_string(),
                        resource: reference.name,
                        owner: reference.unit,
                    });
                }
                if owner.resource(&reference.name).is_none() {
                    return Err(TopologyError::UnknownResource {
                        unit: unit.name().to_string(),
                        resource: reference.name,
                    });
                }
            }
            for reference in unit.internal_references() {
                if unit.resource(&reference.name).is_none() {
                    return Err(TopologyError::UnknownResource {
                        unit: unit.name().to_string(),
                        resource: reference.name,
                    });
                }
            }
        }
        Ok(())
    }

    /// Ordering plus reference checks.
    pub fn validate(&self) -> TopologyResult<()> {
        self.topological_order()?;
        self.validate_references()
    }

    fn idx(&self, name: &str) -> TopologyResult<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| TopologyError::UnknownUnit(name.to_string()))
    }

    /// Walk unresolved dependencies from the first stuck unit until one repeats.
    ///
    /// Every unit Kahn's algorithm could not emit still has an unemitted
    /// dependency, so the walk always closes a loop.
    fn find_cycle(&self, pending: &[usize]) -> Vec<String> {
        let Some(start) = pending.iter().position(|&p| p > 0) else {
            return Vec::new();
        };
        let mut path = vec![start];
        let mut current = start;
        loop {
            let Some(&next) = self.deps[current].iter().find(|&&d| pending[d] > 0) else {
                return Vec::new();
            };
            if let Some(pos) = path.iter().position(|&p| p == next) {
                let mut cycle: Vec<String> = path[pos..]
                    .iter()
                    .map(|&i| self.units[i].name().to_string())
                    .collect();
                cycle.push(self.units[next].name().to_string());
                return cycle;
            }
            path.push(next);
            current = next;
        }
    }
}
