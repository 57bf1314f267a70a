use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Optimization direction for a single named objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectiveDirection {
    Min,
    Max,
}

impl ObjectiveDirection {
    /// Sign applied when converting a user-facing score into the
    /// optimizer's internal always-minimizing convention.
    pub fn sign(self) -> f64 {
        match self {
            ObjectiveDirection::Min => 1.0,
            ObjectiveDirection::Max => -1.0,
        }
    }
}

/// The full set of named objectives for an experiment, with direction.
pub type ObjectiveMap = BTreeMap<String, ObjectiveDirection>;

/// A named score vector, keyed the same way as an `ObjectiveMap`.
pub type ScoreMap = BTreeMap<String, f64>;

/// Flips a user-facing score map into the optimizer's internal
/// always-minimizing convention, one sign per objective.
pub fn to_internal_scores(objectives: &ObjectiveMap, scores: &ScoreMap) -> ScoreMap {
    scores
        .iter()
        .map(|(name, v)| {
            let sign = objectives.get(name).copied().unwrap_or(ObjectiveDirection::Min).sign();
            (name.clone(), v * sign)
        })
        .collect()
}

/// Flips internal scores back to the user-facing direction.
pub fn to_external_scores(objectives: &ObjectiveMap, internal: &ScoreMap) -> ScoreMap {
    // sign() is its own inverse ({-1,1})
    to_internal_scores(objectives, internal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_objective_flips_sign_both_ways() {
        let mut objectives = ObjectiveMap::new();
        objectives.insert("throughput".to_string(), ObjectiveDirection::Max);
        let mut scores = ScoreMap::new();
        scores.insert("throughput".to_string(), 42.0);

        let internal = to_internal_scores(&objectives, &scores);
        assert_eq!(internal["throughput"], -42.0);

        let external = to_external_scores(&objectives, &internal);
        assert_eq!(external["throughput"], 42.0);
    }

    #[test]
    fn min_objective_keeps_sign() {
        let mut objectives = ObjectiveMap::new();
        objectives.insert("latency".to_string(), ObjectiveDirection::Min);
        let mut scores = ScoreMap::new();
        scores.insert("latency".to_string(), 7.5);
        let internal = to_internal_scores(&objectives, &scores);
        assert_eq!(internal["latency"], 7.5);
    }
}
