use ab_core::TunableGroups;
use sha2::{Digest, Sha256};

/// A stable hash over an experiment's tunable *signature* — the set of
/// group names and tunable names, independent of current values. Used to
/// validate that a resumed experiment's tunable groups haven't changed
/// shape (spec §3 Experiment invariant).
pub fn tunable_signature(tunables: &TunableGroups) -> String {
    let mut groups = tunables.covariant_group_names();
    groups.sort();
    let mut names: Vec<String> = tunables.iter_values().into_iter().map(|(n, _)| n).collect();
    names.sort();
    let preimage = format!("groups:{}|tunables:{}", groups.join(","), names.join(","));
    let mut hasher = Sha256::new();
    hasher.update(preimage.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ab_core::{CovariantGroup, NumericTunableSpec, Tunable, TunableValue};
    use std::collections::BTreeMap;

    fn groups_with(name: &str) -> TunableGroups {
        let t = Tunable::new_numeric(NumericTunableSpec {
            name: name.into(),
            is_integer: true,
            default: TunableValue::Int(0),
            range: (0.0, 10.0),
            quantization_bins: None,
            log: false,
            distribution: Default::default(),
            special: vec![],
            special_weights: None,
            range_weight: None,
            meta: BTreeMap::new(),
        })
        .unwrap();
        let mut tg = TunableGroups::new();
        tg.add_group(CovariantGroup::new("g", 1, vec![t])).unwrap();
        tg
    }

    #[test]
    fn signature_ignores_current_value() {
        let mut a = groups_with("x");
        let b = groups_with("x");
        a.set("x", TunableValue::Int(5)).unwrap();
        assert_eq!(tunable_signature(&a), tunable_signature(&b));
    }

    #[test]
    fn signature_differs_on_renamed_tunable() {
        let a = groups_with("x");
        let b = groups_with("y");
        assert_ne!(tunable_signature(&a), tunable_signature(&b));
    }
}
