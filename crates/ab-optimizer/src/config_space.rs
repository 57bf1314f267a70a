use ab_core::{Tunable, TunableGroups, TunableType, TunableValue};
use rand::Rng;
use std::collections::BTreeMap;

/// The configuration space an optimizer searches: one dimension per
/// tunable, derived once from a `TunableGroups` snapshot (spec §4.4 item 1
/// "Configuration space"). Dimension order is the tunable name sort order
/// `TunableGroups::tunables()` already produces, so a `Vec<f64>` point and
/// a `TunableGroups` assignment translate back and forth unambiguously.
#[derive(Clone)]
pub struct ConfigurationSpace {
    dimensions: Vec<Tunable>,
}

impl ConfigurationSpace {
    pub fn from_tunables(tunables: &TunableGroups) -> Self {
        ConfigurationSpace {
            dimensions: tunables.tunables(),
        }
    }

    pub fn dimensionality(&self) -> usize {
        self.dimensions.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.dimensions.iter().map(Tunable::name).collect()
    }

    pub fn dimension(&self, index: usize) -> &Tunable {
        &self.dimensions[index]
    }

    pub fn dimensions(&self) -> &[Tunable] {
        &self.dimensions
    }

    /// Draws one point by sampling every dimension independently, honoring
    /// each tunable's distribution, log scale, quantization and
    /// special-value biasing.
    pub fn sample(&self, rng: &mut impl Rng) -> BTreeMap<String, TunableValue> {
        self.dimensions
            .iter()
            .map(|t| (t.name().to_string(), t.sample(rng)))
            .collect()
    }

    /// Projects a `TunableGroups` assignment onto the unit hypercube, one
    /// coordinate per dimension, via each tunable's own `normalize`.
    pub fn to_point(&self, tunables: &TunableGroups) -> Vec<f64> {
        self.dimensions
            .iter()
            .map(|t| {
                let value = tunables.get(t.name()).unwrap_or_else(|| t.default_value().clone());
                t.normalize(&value)
            })
            .collect()
    }

    /// Inverse of `to_point`: maps a unit-hypercube point back to a
    /// concrete value per dimension. Numeric dimensions are denormalized
    /// linearly (in log space when the tunable samples on a log scale);
    /// categorical dimensions pick the nearest equispaced index.
    pub fn from_point(&self, point: &[f64]) -> BTreeMap<String, TunableValue> {
        self.dimensions
            .iter()
            .zip(point.iter())
            .map(|(t, &coord)| (t.name().to_string(), denormalize(t, coord.clamp(0.0, 1.0))))
            .collect()
    }
}

fn denormalize(t: &Tunable, coord: f64) -> TunableValue {
    match t.tunable_type() {
        TunableType::Categorical => {
            let cats = t.categories();
            if cats.len() <= 1 {
                return TunableValue::Categorical(cats.first().cloned().unwrap_or_default());
            }
            let idx = (coord * (cats.len() - 1) as f64).round() as usize;
            TunableValue::Categorical(cats[idx.min(cats.len() - 1)].clone())
        }
        TunableType::Integer | TunableType::Float => {
            let (lo, hi) = t.range().expect("numeric dimension always has a range");
            let value = if t.is_log() && lo > 0.0 {
                let (llo, lhi) = (lo.ln(), hi.ln());
                (llo + coord * (lhi - llo)).exp()
            } else {
                lo + coord * (hi - lo)
            };
            let value = value.clamp(lo, hi);
            if t.tunable_type() == TunableType::Integer {
                TunableValue::Int(value.round() as i64)
            } else {
                TunableValue::Float(value)
            }
        }
    }
}
