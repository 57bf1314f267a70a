use crate::errors::{AbError, AbResult};
use rand::Rng;
use rand_distr::{Beta, Distribution as _, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single value a tunable can hold. Mirrors the source's `int | float |
/// str | None` union as an explicit tagged variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TunableValue {
    Int(i64),
    Float(f64),
    Categorical(String),
    Null,
}

impl TunableValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TunableValue::Int(i) => Some(*i as f64),
            TunableValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_categorical(&self) -> Option<&str> {
        match self {
            TunableValue::Categorical(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Canonical textual form used by `TunableGroups::to_canonical_string`.
    pub fn canonical_repr(&self) -> String {
        match self {
            TunableValue::Int(i) => i.to_string(),
            TunableValue::Float(f) => format!("{f:.17}"),
            TunableValue::Categorical(s) => s.clone(),
            TunableValue::Null => "null".to_string(),
        }
    }
}

impl std::fmt::Display for TunableValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical_repr())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TunableType {
    Integer,
    Float,
    Categorical,
}

/// Sampling distribution for numeric tunables. `Uniform` is the default
/// when a tunable definition omits `distribution`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "lowercase")]
pub enum TunableDistribution {
    Uniform,
    Normal { mu: f64, sigma: f64 },
    Beta { alpha: f64, beta: f64 },
}

impl Default for TunableDistribution {
    fn default() -> Self {
        TunableDistribution::Uniform
    }
}

/// How many distinct values a tunable's domain admits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cardinality {
    Finite(u64),
    Infinite,
}

/// A single typed parameter with a domain, a default, and a current value.
///
/// Equality (`PartialEq`) intentionally compares only `name`, `tunable_type`
/// and `current` — range, quantization and special values describe how the
/// domain was built, not what the tunable currently is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tunable {
    name: String,
    tunable_type: TunableType,
    default: TunableValue,
    current: TunableValue,

    // numeric domain (Integer / Float only)
    range: Option<(f64, f64)>,
    quantization_bins: Option<u32>,
    log: bool,
    distribution: TunableDistribution,
    special: Vec<TunableValue>,
    special_weights: Option<Vec<f64>>,
    range_weight: Option<f64>,

    // categorical domain
    categories: Vec<String>,
    category_weights: Option<Vec<f64>>,

    #[serde(default)]
    meta: BTreeMap<String, serde_json::Value>,
}

impl PartialEq for Tunable {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.tunable_type == other.tunable_type
            && self.current == other.current
    }
}

pub struct NumericTunableSpec {
    pub name: String,
    pub is_integer: bool,
    pub default: TunableValue,
    pub range: (f64, f64),
    pub quantization_bins: Option<u32>,
    pub log: bool,
    pub distribution: TunableDistribution,
    pub special: Vec<TunableValue>,
    pub special_weights: Option<Vec<f64>>,
    pub range_weight: Option<f64>,
    pub meta: BTreeMap<String, serde_json::Value>,
}

impl Tunable {
    pub fn new_numeric(spec: NumericTunableSpec) -> AbResult<Self> {
        let (lo, hi) = spec.range;
        if !(lo < hi) {
            return Err(AbError::InvalidTunable {
                tunable: spec.name,
                reason: format!("range [{lo}, {hi}] must satisfy lo < hi"),
            });
        }
        if let Some(n) = spec.quantization_bins {
            if n < 2 {
                return Err(AbError::InvalidTunable {
                    tunable: spec.name,
                    reason: format!("quantization_bins must be >= 2, got {n}"),
                });
            }
        }
        if spec.log && lo <= 0.0 {
            return Err(AbError::InvalidTunable {
                tunable: spec.name,
                reason: "log sampling requires lo > 0".to_string(),
            });
        }
        for sv in &spec.special {
            let v = sv.as_f64().ok_or_else(|| AbError::InvalidTunable {
                tunable: spec.name.clone(),
                reason: "special values must be numeric for a numeric tunable".to_string(),
            })?;
            if v < lo || v > hi {
                return Err(AbError::InvalidTunable {
                    tunable: spec.name,
                    reason: format!("special value {v} is outside range [{lo}, {hi}]"),
                });
            }
        }
        if let Some(w) = &spec.special_weights {
            if w.len() != spec.special.len() {
                return Err(AbError::InvalidTunable {
                    tunable: spec.name,
                    reason: "special_weights length must match special values length".to_string(),
                });
            }
            if w.iter().any(|x| *x < 0.0) {
                return Err(AbError::InvalidTunable {
                    tunable: spec.name,
                    reason: "special_weights must be non-negative".to_string(),
                });
            }
            if spec.range_weight.is_none() {
                return Err(AbError::InvalidTunable {
                    tunable: spec.name,
                    reason: "special_weights requires range_weight to also be present"
                        .to_string(),
                });
            }
            let total: f64 = w.iter().sum::<f64>() + spec.range_weight.unwrap_or(0.0);
            if total <= 0.0 {
                return Err(AbError::InvalidTunable {
                    tunable: spec.name,
                    reason: "total special-value probability mass must be positive".to_string(),
                });
            }
        }
        let default_f = spec.default.as_f64().ok_or_else(|| AbError::InvalidTunable {
            tunable: spec.name.clone(),
            reason: "default must be numeric for a numeric tunable".to_string(),
        })?;
        if default_f < lo || default_f > hi {
            return Err(AbError::InvalidTunable {
                tunable: spec.name,
                reason: format!("default {default_f} is outside range [{lo}, {hi}]"),
            });
        }

        Ok(Tunable {
            name: spec.name,
            tunable_type: if spec.is_integer {
                TunableType::Integer
            } else {
                TunableType::Float
            },
            default: spec.default.clone(),
            current: spec.default,
            range: Some((lo, hi)),
            quantization_bins: spec.quantization_bins,
            log: spec.log,
            distribution: spec.distribution,
            special: spec.special,
            special_weights: spec.special_weights,
            range_weight: spec.range_weight,
            categories: Vec::new(),
            category_weights: None,
            meta: spec.meta,
        })
    }

    pub fn new_categorical(
        name: impl Into<String>,
        values: Vec<String>,
        default: String,
        weights: Option<Vec<f64>>,
        meta: BTreeMap<String, serde_json::Value>,
    ) -> AbResult<Self> {
        let name = name.into();
        if values.is_empty() {
            return Err(AbError::InvalidTunable {
                tunable: name,
                reason: "categorical tunable must list at least one value".to_string(),
            });
        }
        let mut seen = std::collections::HashSet::new();
        for v in &values {
            if !seen.insert(v.as_str()) {
                return Err(AbError::InvalidTunable {
                    tunable: name,
                    reason: format!("duplicate categorical value '{v}'"),
                });
            }
        }
        if !values.contains(&default) {
            return Err(AbError::InvalidTunable {
                tunable: name,
                reason: format!("default '{default}' is not among the categorical values"),
            });
        }
        if let Some(w) = &weights {
            if w.len() != values.len() {
                return Err(AbError::InvalidTunable {
                    tunable: name,
                    reason: "values_weights length must match values length".to_string(),
                });
            }
            if w.iter().any(|x| *x < 0.0) {
                return Err(AbError::InvalidTunable {
                    tunable: name,
                    reason: "values_weights must be non-negative".to_string(),
                });
            }
            if w.iter().all(|x| *x == 0.0) {
                return Err(AbError::InvalidTunable {
                    tunable: name,
                    reason: "values_weights cannot be all zero".to_string(),
                });
            }
        }
        Ok(Tunable {
            name,
            tunable_type: TunableType::Categorical,
            default: TunableValue::Categorical(default.clone()),
            current: TunableValue::Categorical(default),
            range: None,
            quantization_bins: None,
            log: false,
            distribution: TunableDistribution::Uniform,
            special: Vec::new(),
            special_weights: None,
            range_weight: None,
            categories: values,
            category_weights: weights,
            meta,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tunable_type(&self) -> TunableType {
        self.tunable_type
    }

    pub fn default_value(&self) -> &TunableValue {
        &self.default
    }

    pub fn current_value(&self) -> &TunableValue {
        &self.current
    }

    pub fn is_default(&self) -> bool {
        self.current == self.default
    }

    pub fn restore_default(&mut self) {
        self.current = self.default.clone();
    }

    /// Returns the ordered category list (empty for numeric tunables).
    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    /// Numeric domain bounds, `None` for categorical tunables.
    pub fn range(&self) -> Option<(f64, f64)> {
        self.range
    }

    /// Whether this numeric tunable samples in log space.
    pub fn is_log(&self) -> bool {
        self.log
    }

    /// Number of quantization bins, if the domain is quantized.
    pub fn quantization_bins(&self) -> Option<u32> {
        self.quantization_bins
    }

    /// Validates `value` against the domain without mutating state.
    pub fn contains(&self, value: &TunableValue) -> bool {
        match self.tunable_type {
            TunableType::Categorical => matches!(value, TunableValue::Categorical(s) if self.categories.iter().any(|c| c == s)),
            TunableType::Integer | TunableType::Float => {
                let Some(v) = value.as_f64() else {
                    return false;
                };
                let Some((lo, hi)) = self.range else {
                    return false;
                };
                v >= lo && v <= hi
            }
        }
    }

    /// Parses a value previously produced by `TunableValue::canonical_repr`
    /// back into a typed value, using this tunable's own type to decide
    /// how to read the string (used to reconstruct a stored configuration
    /// from `Storage`'s canonical per-param strings).
    pub fn parse_canonical(&self, repr: &str) -> AbResult<TunableValue> {
        match self.tunable_type {
            TunableType::Categorical => Ok(TunableValue::Categorical(repr.to_string())),
            TunableType::Integer => repr.parse::<i64>().map(TunableValue::Int).map_err(|_| AbError::InvalidTunable {
                tunable: self.name.clone(),
                reason: format!("'{repr}' is not a valid integer canonical value"),
            }),
            TunableType::Float => repr.parse::<f64>().map(TunableValue::Float).map_err(|_| AbError::InvalidTunable {
                tunable: self.name.clone(),
                reason: format!("'{repr}' is not a valid float canonical value"),
            }),
        }
    }

    /// Assigns a new value, validating domain membership. Returns whether
    /// the value actually changed (used by `CovariantGroup` to set its
    /// dirty flag).
    pub fn assign(&mut self, value: TunableValue) -> AbResult<bool> {
        if !self.contains(&value) {
            return Err(AbError::InvalidTunable {
                tunable: self.name.clone(),
                reason: format!("value {value} is outside the tunable's domain"),
            });
        }
        let value = if self.tunable_type == TunableType::Integer {
            match value {
                TunableValue::Float(f) => TunableValue::Int(f.round() as i64),
                other => other,
            }
        } else {
            value
        };
        let changed = value != self.current;
        self.current = value;
        Ok(changed)
    }

    /// Linear-maps numeric tunables into `[0,1]`; maps categoricals by
    /// index / (|cats| - 1), clipped to `[0,1]`.
    pub fn normalize(&self, value: &TunableValue) -> f64 {
        match self.tunable_type {
            TunableType::Categorical => {
                let Some(s) = value.as_categorical() else {
                    return 0.0;
                };
                let Some(idx) = self.categories.iter().position(|c| c == s) else {
                    return 0.0;
                };
                if self.categories.len() <= 1 {
                    0.0
                } else {
                    (idx as f64 / (self.categories.len() - 1) as f64).clamp(0.0, 1.0)
                }
            }
            TunableType::Integer | TunableType::Float => {
                let Some((lo, hi)) = self.range else { return 0.0 };
                let Some(v) = value.as_f64() else { return 0.0 };
                ((v - lo) / (hi - lo)).clamp(0.0, 1.0)
            }
        }
    }

    pub fn cardinality(&self) -> Cardinality {
        match self.tunable_type {
            TunableType::Categorical => Cardinality::Finite(self.categories.len() as u64),
            TunableType::Integer => {
                if let Some(n) = self.quantization_bins {
                    Cardinality::Finite(n as u64)
                } else if let Some((lo, hi)) = self.range {
                    Cardinality::Finite((hi - lo).round() as u64 + 1)
                } else {
                    Cardinality::Infinite
                }
            }
            TunableType::Float => {
                if let Some(n) = self.quantization_bins {
                    Cardinality::Finite(n as u64)
                } else {
                    Cardinality::Infinite
                }
            }
        }
    }

    /// Enumerates the quantized/categorical value set in ascending order.
    /// Used by the grid optimizer; `None` for unquantized floats.
    pub fn enumerate_values(&self) -> Option<Vec<TunableValue>> {
        match self.tunable_type {
            TunableType::Categorical => Some(
                self.categories
                    .iter()
                    .map(|c| TunableValue::Categorical(c.clone()))
                    .collect(),
            ),
            TunableType::Integer => {
                let (lo, hi) = self.range?;
                if let Some(n) = self.quantization_bins {
                    Some(
                        quantize_bins(lo, hi, n, self.log)
                            .into_iter()
                            .map(|v| TunableValue::Int(v.round() as i64))
                            .collect(),
                    )
                } else {
                    Some(
                        ((lo.round() as i64)..=(hi.round() as i64))
                            .map(TunableValue::Int)
                            .collect(),
                    )
                }
            }
            TunableType::Float => {
                let (lo, hi) = self.range?;
                let n = self.quantization_bins?;
                Some(
                    quantize_bins(lo, hi, n, self.log)
                        .into_iter()
                        .map(TunableValue::Float)
                        .collect(),
                )
            }
        }
    }

    /// Draws a random value from this tunable's domain, respecting
    /// distribution, log scale, quantization and special-value weights.
    pub fn sample(&self, rng: &mut impl Rng) -> TunableValue {
        match self.tunable_type {
            TunableType::Categorical => {
                let idx = weighted_index(rng, &self.category_weights, self.categories.len());
                TunableValue::Categorical(self.categories[idx].clone())
            }
            TunableType::Integer | TunableType::Float => {
                let raw = self.sample_numeric(rng);
                let snapped = self.snap_to_domain(raw);
                if self.tunable_type == TunableType::Integer {
                    TunableValue::Int(snapped.round() as i64)
                } else {
                    TunableValue::Float(snapped)
                }
            }
        }
    }

    fn sample_numeric(&self, rng: &mut impl Rng) -> f64 {
        let (lo, hi) = self.range.expect("numeric tunable always has a range");

        if !self.special.is_empty() {
            let weights = self
                .special_weights
                .clone()
                .unwrap_or_else(|| vec![1.0; self.special.len()]);
            let range_weight = self.range_weight.unwrap_or(1.0);
            let total: f64 = weights.iter().sum::<f64>() + range_weight;
            let mut u = rng.gen_range(0.0..total);
            for (sv, w) in self.special.iter().zip(weights.iter()) {
                if u < *w {
                    return sv.as_f64().unwrap_or(lo);
                }
                u -= w;
            }
            // falls through to the range distribution
        }

        self.sample_from_range(rng, lo, hi)
    }

    fn sample_from_range(&self, rng: &mut impl Rng, lo: f64, hi: f64) -> f64 {
        let (space_lo, space_hi) = if self.log {
            (lo.ln(), hi.ln())
        } else {
            (lo, hi)
        };
        let sampled_space = match &self.distribution {
            TunableDistribution::Uniform => rng.gen_range(space_lo..=space_hi),
            TunableDistribution::Normal { mu, sigma } => {
                let normal = Normal::new(*mu, sigma.max(1e-12)).unwrap();
                normal.sample(rng).clamp(space_lo, space_hi)
            }
            TunableDistribution::Beta { alpha, beta } => {
                let beta_dist = Beta::new(alpha.max(1e-6), beta.max(1e-6)).unwrap();
                let u: f64 = beta_dist.sample(rng);
                space_lo + u * (space_hi - space_lo)
            }
        };
        if self.log {
            sampled_space.exp()
        } else {
            sampled_space
        }
    }

    /// Snaps a continuously sampled value to the nearest quantization bin,
    /// if one is configured; otherwise clamps to the range.
    fn snap_to_domain(&self, raw: f64) -> f64 {
        let (lo, hi) = self.range.expect("numeric tunable always has a range");
        let raw = raw.clamp(lo, hi);
        if let Some(n) = self.quantization_bins {
            let bins = quantize_bins(lo, hi, n, self.log);
            nearest(&bins, raw)
        } else {
            raw
        }
    }
}

fn quantize_bins(lo: f64, hi: f64, n: u32, log: bool) -> Vec<f64> {
    let n = n.max(2);
    if log {
        let (llo, lhi) = (lo.ln(), hi.ln());
        (0..n)
            .map(|i| (llo + (lhi - llo) * i as f64 / (n - 1) as f64).exp())
            .collect()
    } else {
        (0..n)
            .map(|i| lo + (hi - lo) * i as f64 / (n - 1) as f64)
            .collect()
    }
}

fn nearest(bins: &[f64], value: f64) -> f64 {
    bins.iter()
        .copied()
        .min_by(|a, b| {
            (a - value)
                .abs()
                .partial_cmp(&(b - value).abs())
                .unwrap()
        })
        .unwrap_or(value)
}

fn weighted_index(rng: &mut impl Rng, weights: &Option<Vec<f64>>, len: usize) -> usize {
    match weights {
        None => rng.gen_range(0..len),
        Some(w) => {
            let total: f64 = w.iter().sum();
            let mut u = rng.gen_range(0.0..total);
            for (i, wi) in w.iter().enumerate() {
                if u < *wi {
                    return i;
                }
                u -= wi;
            }
            len - 1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn int_tunable(lo: f64, hi: f64, default: i64) -> Tunable {
        Tunable::new_numeric(NumericTunableSpec {
            name: "x".into(),
            is_integer: true,
            default: TunableValue::Int(default),
            range: (lo, hi),
            quantization_bins: None,
            log: false,
            distribution: TunableDistribution::Uniform,
            special: vec![],
            special_weights: None,
            range_weight: None,
            meta: BTreeMap::new(),
        })
        .unwrap()
    }

    #[test]
    fn sample_stays_in_range() {
        let t = int_tunable(-100.0, 100.0, 0);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let v = t.sample(&mut rng);
            let f = v.as_f64().unwrap();
            assert!((-100.0..=100.0).contains(&f));
        }
    }

    #[test]
    fn normalize_default_in_unit_interval() {
        let t = int_tunable(-100.0, 100.0, 0);
        let n = t.normalize(t.default_value());
        assert!((0.0..=1.0).contains(&n));
        assert!((n - 0.5).abs() < 1e-9);
    }

    #[test]
    fn assign_sets_changed_flag_correctly() {
        let mut t = int_tunable(-100.0, 100.0, 0);
        assert!(!t.assign(TunableValue::Int(0)).unwrap());
        assert!(t.assign(TunableValue::Int(5)).unwrap());
        assert!(!t.assign(TunableValue::Int(5)).unwrap());
    }

    #[test]
    fn assign_out_of_range_rejected() {
        let mut t = int_tunable(-100.0, 100.0, 0);
        assert!(t.assign(TunableValue::Int(101)).is_err());
    }

    #[test]
    fn categorical_requires_default_membership() {
        let err = Tunable::new_categorical(
            "choice",
            vec!["a".into(), "b".into()],
            "c".into(),
            None,
            BTreeMap::new(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn categorical_normalize_is_equispaced() {
        let t = Tunable::new_categorical(
            "choice",
            vec!["a".into(), "b".into(), "c".into()],
            "a".into(),
            None,
            BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(t.normalize(&TunableValue::Categorical("a".into())), 0.0);
        assert_eq!(t.normalize(&TunableValue::Categorical("b".into())), 0.5);
        assert_eq!(t.normalize(&TunableValue::Categorical("c".into())), 1.0);
    }

    #[test]
    fn equality_ignores_range() {
        let a = int_tunable(-100.0, 100.0, 0);
        let b = int_tunable(-5.0, 5.0, 0);
        assert_eq!(a, b);
    }

    #[test]
    fn quantized_grid_has_exact_endpoints() {
        let mut t = Tunable::new_numeric(NumericTunableSpec {
            name: "q".into(),
            is_integer: false,
            default: TunableValue::Float(0.0),
            range: (0.0, 10.0),
            quantization_bins: Some(5),
            log: false,
            distribution: TunableDistribution::Uniform,
            special: vec![],
            special_weights: None,
            range_weight: None,
            meta: BTreeMap::new(),
        })
        .unwrap();
        let values = t.enumerate_values().unwrap();
        assert_eq!(values.len(), 5);
        assert_eq!(values[0], TunableValue::Float(0.0));
        assert_eq!(values[4], TunableValue::Float(10.0));
        // and a continuously sampled value snaps onto that same grid
        t.assign(TunableValue::Float(2.3)).unwrap();
    }

    #[test]
    fn special_values_must_lie_in_range() {
        let err = Tunable::new_numeric(NumericTunableSpec {
            name: "s".into(),
            is_integer: true,
            default: TunableValue::Int(0),
            range: (0.0, 10.0),
            quantization_bins: None,
            log: false,
            distribution: TunableDistribution::Uniform,
            special: vec![TunableValue::Int(50)],
            special_weights: None,
            range_weight: Some(1.0),
            meta: BTreeMap::new(),
        });
        assert!(err.is_err());
    }
}
