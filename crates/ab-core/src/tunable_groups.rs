use crate::covariant_group::CovariantGroup;
use crate::errors::{AbError, AbResult};
use crate::tunable::TunableValue;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

type SharedGroup = Arc<Mutex<CovariantGroup>>;

/// The full parameter space: an indexed collection of covariant groups.
///
/// `subgroup` returns a view that shares the underlying group storage (via
/// `Arc<Mutex<_>>`) with its parent, so a mutation made through the view is
/// observable through every other holder of the same groups.
#[derive(Clone, Default)]
pub struct TunableGroups {
    groups: BTreeMap<String, SharedGroup>,
    /// tunable name -> owning group name; tunable names are globally unique.
    tunable_index: BTreeMap<String, String>,
}

impl TunableGroups {
    pub fn new() -> Self {
        TunableGroups::default()
    }

    /// Adds a fresh group, erroring on a duplicate group name or a tunable
    /// name that collides with one already indexed under another group.
    pub fn add_group(&mut self, group: CovariantGroup) -> AbResult<()> {
        if self.groups.contains_key(group.name()) {
            return Err(AbError::Config(format!(
                "duplicate covariant group '{}'",
                group.name()
            )));
        }
        for name in group.names() {
            if self.tunable_index.contains_key(name) {
                return Err(AbError::Config(format!(
                    "tunable '{name}' already belongs to another group"
                )));
            }
        }
        let group_name = group.name().to_string();
        let tunable_names: Vec<String> = group.names().map(str::to_string).collect();
        self.groups.insert(group_name.clone(), Arc::new(Mutex::new(group)));
        for t in tunable_names {
            self.tunable_index.insert(t, group_name.clone());
        }
        Ok(())
    }

    fn add_shared_group(&mut self, name: String, shared: SharedGroup) -> AbResult<()> {
        if self.groups.contains_key(&name) {
            return Err(AbError::Config(format!("duplicate covariant group '{name}'")));
        }
        let tunable_names: Vec<String> = shared.lock().names().map(str::to_string).collect();
        for t in &tunable_names {
            if self.tunable_index.contains_key(t) {
                return Err(AbError::Config(format!(
                    "tunable '{t}' already belongs to another group"
                )));
            }
        }
        self.groups.insert(name.clone(), shared);
        for t in tunable_names {
            self.tunable_index.insert(t, name.clone());
        }
        Ok(())
    }

    pub fn covariant_group_names(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    pub fn contains(&self, tunable_name: &str) -> bool {
        self.tunable_index.contains_key(tunable_name)
    }

    pub fn get(&self, tunable_name: &str) -> Option<TunableValue> {
        let group_name = self.tunable_index.get(tunable_name)?;
        let group = self.groups.get(group_name)?;
        Some(group.lock().get(tunable_name)?.current_value().clone())
    }

    pub fn set(&mut self, tunable_name: &str, value: TunableValue) -> AbResult<()> {
        let group_name = self
            .tunable_index
            .get(tunable_name)
            .ok_or_else(|| AbError::InvalidTunable {
                tunable: tunable_name.to_string(),
                reason: "no such tunable in this TunableGroups".to_string(),
            })?
            .clone();
        let group = self.groups.get(&group_name).expect("index is consistent with groups");
        group.lock().assign(tunable_name, value)
    }

    /// Writes through a `name -> value` map to the owning groups.
    pub fn assign(&mut self, values: &BTreeMap<String, TunableValue>) -> AbResult<()> {
        for (name, value) in values {
            self.set(name, value.clone())?;
        }
        Ok(())
    }

    /// Writes through a `name -> canonical string` map, parsing each value
    /// per the receiving tunable's own type (spec §4.2, config
    /// reconstruction for resumed experiments). Unknown names are
    /// ignored, so a caller can pass a full stored param set even when
    /// this `TunableGroups` only covers a subgroup of it.
    pub fn assign_from_canonical(&mut self, values: &BTreeMap<String, String>) -> AbResult<()> {
        for t in self.tunables() {
            if let Some(repr) = values.get(t.name()) {
                let value = t.parse_canonical(repr)?;
                self.set(t.name(), value)?;
            }
        }
        Ok(())
    }

    pub fn is_defaults(&self) -> bool {
        self.groups.values().all(|g| g.lock().is_defaults())
    }

    pub fn restore_defaults(&mut self) {
        for g in self.groups.values() {
            g.lock().restore_defaults();
        }
    }

    pub fn is_updated(&self) -> bool {
        self.groups.values().any(|g| g.lock().is_updated())
    }

    pub fn reset(&mut self) {
        for g in self.groups.values() {
            g.lock().reset();
        }
    }

    /// Total re-configuration cost of every dirty group.
    pub fn total_cost(&self) -> u64 {
        self.groups.values().map(|g| g.lock().get_cost()).sum()
    }

    /// Iterates every `(tunable_name, value)` pair in a stable, sorted order.
    pub fn iter_values(&self) -> Vec<(String, TunableValue)> {
        self.tunable_index
            .keys()
            .map(|name| (name.clone(), self.get(name).expect("indexed tunable must resolve")))
            .collect()
    }

    /// Clones every tunable's full definition (domain, distribution,
    /// current value), sorted by name — the configuration space is derived
    /// once from this snapshot.
    pub fn tunables(&self) -> Vec<crate::tunable::Tunable> {
        self.tunable_index
            .iter()
            .map(|(name, group_name)| {
                self.groups[group_name]
                    .lock()
                    .get(name)
                    .expect("index is consistent with groups")
                    .clone()
            })
            .collect()
    }

    /// Returns a view over a subset of covariant groups that shares storage
    /// with `self` — mutating a tunable through the returned view is
    /// visible through `self` and vice versa.
    pub fn subgroup(&self, group_names: &[&str]) -> AbResult<TunableGroups> {
        let mut sub = TunableGroups::new();
        for name in group_names {
            let shared = self.groups.get(*name).ok_or_else(|| AbError::Config(format!(
                "unknown covariant group '{name}'"
            )))?;
            sub.add_shared_group(name.to_string(), Arc::clone(shared))?;
        }
        Ok(sub)
    }

    /// Adds every group from `other` that doesn't already exist here,
    /// sharing storage with `other` (not deep-copying). Overlapping group
    /// names are rejected unless their *default* values agree tunable for
    /// tunable — differing *current* values are tolerated.
    pub fn merge(&mut self, other: &TunableGroups) -> AbResult<()> {
        for (name, shared) in &other.groups {
            match self.groups.get(name) {
                None => {
                    self.add_shared_group(name.clone(), Arc::clone(shared))?;
                }
                Some(existing) => {
                    let existing_guard = existing.lock();
                    let other_guard = shared.lock();
                    if !existing_guard.equals_defaults(&other_guard) {
                        return Err(AbError::Config(format!(
                            "cannot merge: group '{name}' has conflicting defaults"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Deep copy: every group gets a fresh, independent `Arc`.
    pub fn deep_copy(&self) -> TunableGroups {
        let mut copy = TunableGroups::new();
        for (name, shared) in &self.groups {
            let cloned_group = shared.lock().clone();
            copy.add_group(cloned_group).expect("copying a valid TunableGroups cannot fail");
            debug_assert!(copy.groups.contains_key(name));
        }
        copy
    }

    /// Deterministic serialization used as the pre-image of the config
    /// content hash: `T-Config-Dedup` depends on two semantically
    /// identical groups producing the identical string.
    pub fn to_canonical_string(&self) -> String {
        let mut out = String::new();
        for (group_name, group) in &self.groups {
            let group = group.lock();
            out.push_str(group_name);
            out.push('{');
            let mut names: Vec<&str> = group.names().collect();
            names.sort_unstable();
            for name in names {
                let value = group.get(name).expect("name came from this group's own index");
                out.push_str(name);
                out.push('=');
                out.push_str(&value.current_value().canonical_repr());
                out.push(';');
            }
            out.push('}');
        }
        out
    }

    /// SHA-256 hex digest of `to_canonical_string()`.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_canonical_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunable::{NumericTunableSpec, Tunable, TunableDistribution};
    use std::collections::BTreeMap as Map;

    fn num_group(group_name: &str, tunable_name: &str, default: i64) -> CovariantGroup {
        let t = Tunable::new_numeric(NumericTunableSpec {
            name: tunable_name.into(),
            is_integer: true,
            default: TunableValue::Int(default),
            range: (0.0, 100.0),
            quantization_bins: None,
            log: false,
            distribution: TunableDistribution::Uniform,
            special: vec![],
            special_weights: None,
            range_weight: None,
            meta: Map::new(),
        })
        .unwrap();
        CovariantGroup::new(group_name, 1, vec![t])
    }

    #[test]
    fn subgroup_mutation_is_visible_in_parent() {
        let mut parent = TunableGroups::new();
        parent.add_group(num_group("g1", "x", 0)).unwrap();
        parent.add_group(num_group("g2", "y", 0)).unwrap();

        let mut view = parent.subgroup(&["g1"]).unwrap();
        view.set("x", TunableValue::Int(42)).unwrap();

        assert_eq!(parent.get("x"), Some(TunableValue::Int(42)));
    }

    #[test]
    fn deep_copy_does_not_share_state() {
        let mut parent = TunableGroups::new();
        parent.add_group(num_group("g1", "x", 0)).unwrap();
        let mut copy = parent.deep_copy();
        copy.set("x", TunableValue::Int(99)).unwrap();
        assert_eq!(parent.get("x"), Some(TunableValue::Int(0)));
        assert_eq!(copy.get("x"), Some(TunableValue::Int(99)));
    }

    #[test]
    fn config_dedup_matches_for_identical_assignments() {
        let mut a = TunableGroups::new();
        a.add_group(num_group("g1", "x", 0)).unwrap();
        let mut b = TunableGroups::new();
        b.add_group(num_group("g1", "x", 0)).unwrap();
        assert_eq!(a.content_hash(), b.content_hash());

        b.set("x", TunableValue::Int(1)).unwrap();
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn merge_rejects_conflicting_defaults_but_allows_differing_current() {
        let mut a = TunableGroups::new();
        a.add_group(num_group("g1", "x", 0)).unwrap();
        let mut b = TunableGroups::new();
        b.add_group(num_group("g1", "x", 0)).unwrap();
        b.set("x", TunableValue::Int(50)).unwrap();
        // same defaults, differing current value: allowed
        a.merge(&b).unwrap();

        let mut c = TunableGroups::new();
        let mut conflicting = num_group("g1", "x", 0);
        conflicting.restore_defaults();
        // build one with a different default value
        let t = Tunable::new_numeric(NumericTunableSpec {
            name: "x".into(),
            is_integer: true,
            default: TunableValue::Int(7),
            range: (0.0, 100.0),
            quantization_bins: None,
            log: false,
            distribution: TunableDistribution::Uniform,
            special: vec![],
            special_weights: None,
            range_weight: None,
            meta: Map::new(),
        })
        .unwrap();
        c.add_group(CovariantGroup::new("g1", 1, vec![t])).unwrap();

        let mut d = TunableGroups::new();
        d.add_group(num_group("g1", "x", 0)).unwrap();
        assert!(d.merge(&c).is_err());
    }

    #[test]
    fn is_defaults_and_restore() {
        let mut tg = TunableGroups::new();
        tg.add_group(num_group("g1", "x", 0)).unwrap();
        assert!(tg.is_defaults());
        tg.set("x", TunableValue::Int(10)).unwrap();
        assert!(!tg.is_defaults());
        tg.restore_defaults();
        assert!(tg.is_defaults());
    }
}
