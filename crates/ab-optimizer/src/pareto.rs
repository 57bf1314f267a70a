use ab_core::{ObjectiveDirection, ObjectiveMap, ScoreMap, TunableGroups};
use rand::Rng;
use std::collections::BTreeMap;

/// Two-sided confidence interval around a Monte-Carlo hypervolume estimate
/// (spec §4.5 "Hypervolume estimator"). Not an exact hypervolume
/// computation — an estimator, hence the name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeEstimator {
    pub estimate: f64,
    pub lower: f64,
    pub upper: f64,
    pub samples: usize,
}

/// Maintains the non-dominated set of observations under per-objective
/// min/max directions (spec C8). `objectives` and `parameters` rows share
/// index order.
pub struct ParetoFrontier {
    objectives: ObjectiveMap,
    rows: Vec<(ScoreMap, TunableGroups)>,
    volume_samples: usize,
}

impl ParetoFrontier {
    pub fn new(objectives: ObjectiveMap) -> Self {
        ParetoFrontier::with_volume_samples(objectives, 10_000)
    }

    pub fn with_volume_samples(objectives: ObjectiveMap, volume_samples: usize) -> Self {
        ParetoFrontier {
            objectives,
            rows: Vec::new(),
            volume_samples,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Appends the new rows and re-applies the dominance filter over the
    /// combined set. `a` dominates `b` iff, under per-objective direction,
    /// `a` is no worse than `b` on every objective and strictly better on
    /// at least one (T-Pareto-Invariant).
    pub fn update(&mut self, new_objectives: Vec<ScoreMap>, new_parameters: Vec<TunableGroups>) {
        debug_assert_eq!(new_objectives.len(), new_parameters.len());
        let candidates: Vec<(ScoreMap, TunableGroups)> = self
            .rows
            .drain(..)
            .chain(new_objectives.into_iter().zip(new_parameters))
            .collect();

        let mut kept = Vec::with_capacity(candidates.len());
        for (i, candidate) in candidates.iter().enumerate() {
            let dominated = candidates
                .iter()
                .enumerate()
                .any(|(j, other)| j != i && self.dominates(&other.0, &candidate.0));
            if !dominated {
                kept.push(candidate.clone());
            }
        }
        self.rows = kept;
    }

    /// Snapshot of the current non-dominated set.
    pub fn current(&self) -> (Vec<ScoreMap>, Vec<TunableGroups>) {
        self.rows.iter().map(|(s, t)| (s.clone(), t.clone())).unzip()
    }

    fn dominates(&self, a: &ScoreMap, b: &ScoreMap) -> bool {
        let mut strictly_better_somewhere = false;
        for (name, direction) in &self.objectives {
            let (Some(&av), Some(&bv)) = (a.get(name), b.get(name)) else {
                return false;
            };
            let (no_worse, better) = match direction {
                ObjectiveDirection::Min => (av <= bv, av < bv),
                ObjectiveDirection::Max => (av >= bv, av > bv),
            };
            if !no_worse {
                return false;
            }
            strictly_better_somewhere |= better;
        }
        strictly_better_somewhere
    }

    /// Monte-Carlo hypervolume estimate over the bounding hyper-rectangle
    /// running from the frontier's ideal corner to the worst-observed
    /// (reference) corner, with a normal-approximation confidence interval
    /// at significance `alpha`.
    pub fn approximate_volume(&self, alpha: f64) -> VolumeEstimator {
        if self.rows.is_empty() {
            return VolumeEstimator {
                estimate: 0.0,
                lower: 0.0,
                upper: 0.0,
                samples: 0,
            };
        }

        let mut ideal = BTreeMap::new();
        let mut reference = BTreeMap::new();
        for (name, direction) in &self.objectives {
            let values: Vec<f64> = self.rows.iter().filter_map(|(s, _)| s.get(name).copied()).collect();
            if values.is_empty() {
                continue;
            }
            let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            match direction {
                ObjectiveDirection::Min => {
                    ideal.insert(name.clone(), min);
                    reference.insert(name.clone(), max);
                }
                ObjectiveDirection::Max => {
                    ideal.insert(name.clone(), max);
                    reference.insert(name.clone(), min);
                }
            }
        }

        let volume: f64 = ideal.keys().map(|n| (reference[n] - ideal[n]).abs()).product();
        if !volume.is_finite() || volume <= 0.0 {
            return VolumeEstimator {
                estimate: 0.0,
                lower: 0.0,
                upper: 0.0,
                samples: self.volume_samples,
            };
        }

        let mut rng = rand::thread_rng();
        let mut dominated_count = 0usize;
        for _ in 0..self.volume_samples {
            let mut point = ScoreMap::new();
            for name in ideal.keys() {
                let (a, b) = (ideal[name], reference[name]);
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                point.insert(name.clone(), if lo < hi { rng.gen_range(lo..hi) } else { lo });
            }
            if self.rows.iter().any(|(s, _)| self.weakly_dominates(s, &point)) {
                dominated_count += 1;
            }
        }

        let n = self.volume_samples as f64;
        let p = dominated_count as f64 / n;
        let se = (p * (1.0 - p) / n).max(0.0).sqrt();
        let z = inverse_normal_cdf(1.0 - alpha / 2.0);
        VolumeEstimator {
            estimate: p * volume,
            lower: (p - z * se).max(0.0) * volume,
            upper: (p + z * se).min(1.0) * volume,
            samples: self.volume_samples,
        }
    }

    fn weakly_dominates(&self, row: &ScoreMap, point: &ScoreMap) -> bool {
        self.objectives.iter().all(|(name, direction)| {
            let (Some(&rv), Some(&pv)) = (row.get(name), point.get(name)) else {
                return false;
            };
            match direction {
                ObjectiveDirection::Min => rv <= pv,
                ObjectiveDirection::Max => rv >= pv,
            }
        })
    }
}

/// Acklam's rational approximation of the standard normal quantile
/// function, accurate to ~1.15e-9 — adequate for a reporting-only CI.
fn inverse_normal_cdf(p: f64) -> f64 {
    let p = p.clamp(1e-12, 1.0 - 1e-12);
    let a = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    let b = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    let c = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    let d = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    let p_low = 0.02425;
    if p < p_low {
        let q = (-2.0 * p.ln()).sqrt();
        (((((c[0] * q + c[1]) * q + c[2]) * q + c[3]) * q + c[4]) * q + c[5])
            / ((((d[0] * q + d[1]) * q + d[2]) * q + d[3]) * q + 1.0)
    } else if p <= 1.0 - p_low {
        let q = p - 0.5;
        let r = q * q;
        (((((a[0] * r + a[1]) * r + a[2]) * r + a[3]) * r + a[4]) * r + a[5]) * q
            / (((((b[0] * r + b[1]) * r + b[2]) * r + b[3]) * r + b[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((c[0] * q + c[1]) * q + c[2]) * q + c[3]) * q + c[4]) * q + c[5])
            / ((((d[0] * q + d[1]) * q + d[2]) * q + d[3]) * q + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ab_core::{CovariantGroup, NumericTunableSpec, Tunable, TunableValue};
    use std::collections::BTreeMap as Map;

    fn objectives_min_both() -> ObjectiveMap {
        let mut m = ObjectiveMap::new();
        m.insert("y1".to_string(), ObjectiveDirection::Min);
        m.insert("y2".to_string(), ObjectiveDirection::Min);
        m
    }

    fn dummy_tunables() -> TunableGroups {
        let t = Tunable::new_numeric(NumericTunableSpec {
            name: "x".into(),
            is_integer: true,
            default: TunableValue::Int(0),
            range: (0.0, 10.0),
            quantization_bins: None,
            log: false,
            distribution: Default::default(),
            special: vec![],
            special_weights: None,
            range_weight: None,
            meta: Map::new(),
        })
        .unwrap();
        let mut tg = TunableGroups::new();
        tg.add_group(CovariantGroup::new("g", 1, vec![t])).unwrap();
        tg
    }

    fn score(y1: f64, y2: f64) -> ScoreMap {
        let mut s = ScoreMap::new();
        s.insert("y1".to_string(), y1);
        s.insert("y2".to_string(), y2);
        s
    }

    #[test]
    fn two_objective_frontier_matches_scenario() {
        let mut pf = ParetoFrontier::new(objectives_min_both());
        let points = [(1.0, 4.0), (2.0, 3.0), (3.0, 2.0), (4.0, 1.0)];
        for (y1, y2) in points {
            pf.update(vec![score(y1, y2)], vec![dummy_tunables()]);
        }
        assert_eq!(pf.len(), 4);

        pf.update(vec![score(2.0, 2.0)], vec![dummy_tunables()]);
        let (objectives, _) = pf.current();
        assert_eq!(objectives.len(), 3);
        let retained: Vec<(f64, f64)> = objectives.iter().map(|s| (s["y1"], s["y2"])).collect();
        assert!(retained.contains(&(1.0, 4.0)));
        assert!(retained.contains(&(2.0, 2.0)));
        assert!(retained.contains(&(4.0, 1.0)));
    }

    #[test]
    fn dominated_point_never_retained() {
        let mut pf = ParetoFrontier::new(objectives_min_both());
        pf.update(vec![score(1.0, 1.0)], vec![dummy_tunables()]);
        pf.update(vec![score(2.0, 2.0)], vec![dummy_tunables()]);
        assert_eq!(pf.len(), 1);
    }

    #[test]
    fn hypervolume_is_positive_for_nonempty_frontier() {
        let mut pf = ParetoFrontier::with_volume_samples(objectives_min_both(), 2_000);
        pf.update(
            vec![score(1.0, 4.0), score(2.0, 3.0), score(4.0, 1.0)],
            vec![dummy_tunables(), dummy_tunables(), dummy_tunables()],
        );
        let vol = pf.approximate_volume(0.05);
        assert!(vol.estimate > 0.0);
        assert!(vol.lower <= vol.estimate);
        assert!(vol.estimate <= vol.upper);
    }
}
