use crate::errors::{AbError, AbResult};
use crate::tunable::{Tunable, TunableValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named set of tunables that share a reconfiguration cost: changing any
/// tunable in the group is assumed to require paying `cost` once, not once
/// per tunable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CovariantGroup {
    name: String,
    cost: u64,
    tunables: BTreeMap<String, Tunable>,
    /// Starts `true` (initial assignment counts as an update); cleared by
    /// `reset`; set by any assignment that changes a value.
    dirty: bool,
}

impl CovariantGroup {
    pub fn new(name: impl Into<String>, cost: u64, tunables: Vec<Tunable>) -> Self {
        let tunables = tunables.into_iter().map(|t| (t.name().to_string(), t)).collect();
        CovariantGroup {
            name: name.into(),
            cost,
            tunables,
            dirty: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cost(&self) -> u64 {
        self.cost
    }

    pub fn is_updated(&self) -> bool {
        self.dirty
    }

    /// Cost incurred by this group since the last `reset`, `0` if clean.
    pub fn get_cost(&self) -> u64 {
        if self.dirty {
            self.cost
        } else {
            0
        }
    }

    pub fn reset(&mut self) {
        self.dirty = false;
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tunables.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&Tunable> {
        self.tunables.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Tunable> {
        self.tunables.get_mut(name)
    }

    pub fn tunables(&self) -> impl Iterator<Item = &Tunable> {
        self.tunables.values()
    }

    pub fn tunables_mut(&mut self) -> impl Iterator<Item = &mut Tunable> {
        self.tunables.values_mut()
    }

    pub fn assign(&mut self, name: &str, value: TunableValue) -> AbResult<()> {
        let tunable = self.tunables.get_mut(name).ok_or_else(|| AbError::InvalidTunable {
            tunable: name.to_string(),
            reason: format!("no such tunable in group '{}'", self.name),
        })?;
        if tunable.assign(value)? {
            self.dirty = true;
        }
        Ok(())
    }

    pub fn is_defaults(&self) -> bool {
        self.tunables.values().all(Tunable::is_default)
    }

    pub fn restore_defaults(&mut self) {
        for t in self.tunables.values_mut() {
            if !t.is_default() {
                t.restore_default();
                self.dirty = true;
            }
        }
    }

    /// Default-value equality used by `TunableGroups::merge` — compares
    /// only each tunable's default, never its current value.
    pub fn equals_defaults(&self, other: &CovariantGroup) -> bool {
        if self.name != other.name || self.tunables.len() != other.tunables.len() {
            return false;
        }
        self.tunables.iter().all(|(name, t)| {
            other
                .tunables
                .get(name)
                .is_some_and(|o| o.default_value() == t.default_value() && o.tunable_type() == t.tunable_type())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunable::NumericTunableSpec;
    use std::collections::BTreeMap as Map;

    fn tunable(name: &str, default: i64) -> Tunable {
        Tunable::new_numeric(NumericTunableSpec {
            name: name.into(),
            is_integer: true,
            default: TunableValue::Int(default),
            range: (0.0, 100.0),
            quantization_bins: None,
            log: false,
            distribution: Default::default(),
            special: vec![],
            special_weights: None,
            range_weight: None,
            meta: Map::new(),
        })
        .unwrap()
    }

    #[test]
    fn dirty_starts_true_and_cost_follows_it() {
        let g = CovariantGroup::new("g", 5, vec![tunable("x", 0)]);
        assert!(g.is_updated());
        assert_eq!(g.get_cost(), 5);
    }

    #[test]
    fn reset_clears_dirty_and_zeroes_cost() {
        let mut g = CovariantGroup::new("g", 5, vec![tunable("x", 0)]);
        g.reset();
        assert!(!g.is_updated());
        assert_eq!(g.get_cost(), 0);
    }

    #[test]
    fn assign_same_value_does_not_redirty_after_reset() {
        let mut g = CovariantGroup::new("g", 5, vec![tunable("x", 0)]);
        g.reset();
        g.assign("x", TunableValue::Int(0)).unwrap();
        assert!(!g.is_updated());
        g.assign("x", TunableValue::Int(1)).unwrap();
        assert!(g.is_updated());
    }
}
