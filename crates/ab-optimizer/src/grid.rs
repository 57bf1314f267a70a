use crate::error::{OptResult, OptimizerError};
use crate::optimizer::{check_score_matches_status, internal_score_for, BestTracker, Optimizer};
use ab_core::{ObjectiveMap, ScoreMap, Status, Tunable, TunableGroups, TunableValue};
use std::collections::{BTreeMap, VecDeque};

type Assignment = BTreeMap<String, TunableValue>;

fn assignment_key(assignment: &Assignment) -> String {
    let mut out = String::new();
    for (name, value) in assignment {
        out.push_str(name);
        out.push('=');
        out.push_str(&value.canonical_repr());
        out.push(';');
    }
    out
}

fn full_product(dims: &[Tunable]) -> Vec<Assignment> {
    let mut combos: Vec<Assignment> = vec![Assignment::new()];
    for t in dims {
        let values = t.enumerate_values().expect("checked enumerable at construction");
        let mut next = Vec::with_capacity(combos.len() * values.len().max(1));
        for combo in &combos {
            for v in &values {
                let mut c = combo.clone();
                c.insert(t.name().to_string(), v.clone());
                next.push(c);
            }
        }
        combos = next;
    }
    combos
}

/// Pre-enumerates the full cartesian product of per-tunable value sets
/// (spec §4.4 "Grid optimizer"). Serves defaults first, then the rest in
/// dictionary order; refills from the original product once exhausted,
/// but only while the iteration cap has not yet been reached.
pub struct GridOptimizer {
    name: String,
    template: TunableGroups,
    objectives: ObjectiveMap,
    full_product: Vec<Assignment>,
    pending: VecDeque<Assignment>,
    suggested: BTreeMap<String, Assignment>,
    iteration: u64,
    max_iterations: u64,
    best: BestTracker,
}

impl GridOptimizer {
    pub fn new(template: TunableGroups, objectives: ObjectiveMap, max_iterations: u64) -> OptResult<Self> {
        let dims = template.tunables();
        for t in &dims {
            if t.enumerate_values().is_none() {
                return Err(OptimizerError::Config(format!(
                    "grid optimizer requires every tunable to be enumerable; '{}' is an unquantized float",
                    t.name()
                )));
            }
        }
        let mut product = full_product(&dims);
        let defaults: Assignment = dims.iter().map(|t| (t.name().to_string(), t.default_value().clone())).collect();
        let defaults_key = assignment_key(&defaults);
        if let Some(pos) = product.iter().position(|c| assignment_key(c) == defaults_key) {
            let defaults_combo = product.remove(pos);
            product.insert(0, defaults_combo);
        } else {
            product.insert(0, defaults);
        }
        Ok(GridOptimizer {
            name: "grid".to_string(),
            template,
            objectives,
            pending: product.iter().cloned().collect(),
            full_product: product,
            suggested: BTreeMap::new(),
            iteration: 0,
            max_iterations,
            best: BestTracker::default(),
        })
    }

    fn refill(&mut self) {
        self.pending = self.full_product.iter().cloned().collect();
    }

    fn apply(&self, assignment: &Assignment) -> TunableGroups {
        let mut tg = self.template.deep_copy();
        for (name, value) in assignment {
            tg.set(name, value.clone()).expect("grid assignment always lies in its own domain");
        }
        tg
    }

    fn extract_assignment(&self, tunables: &TunableGroups) -> Assignment {
        self.template
            .tunables()
            .iter()
            .map(|t| {
                let value = tunables.get(t.name()).unwrap_or_else(|| t.default_value().clone());
                (t.name().to_string(), value)
            })
            .collect()
    }
}

impl Optimizer for GridOptimizer {
    fn suggest(&mut self) -> TunableGroups {
        self.iteration += 1;
        if self.pending.is_empty() {
            self.refill();
        }
        let assignment = self.pending.pop_front().unwrap_or_else(|| self.full_product[0].clone());
        self.suggested.insert(assignment_key(&assignment), assignment.clone());
        self.apply(&assignment)
    }

    fn register(&mut self, tunables: &TunableGroups, status: Status, score: Option<ScoreMap>) -> OptResult<Option<ScoreMap>> {
        check_score_matches_status(status, &score)?;
        let internal = internal_score_for(&self.objectives, status, &score);
        self.best.observe(&internal, tunables);
        let key = assignment_key(&self.extract_assignment(tunables));
        self.suggested.remove(&key);
        Ok(Some(internal))
    }

    fn bulk_register(&mut self, configs: &[TunableGroups], scores: &[Option<ScoreMap>], statuses: &[Status]) -> OptResult<bool> {
        if configs.is_empty() {
            return Ok(false);
        }
        for ((tunables, score), status) in configs.iter().zip(scores.iter()).zip(statuses.iter()) {
            check_score_matches_status(*status, score)?;
            let internal = internal_score_for(&self.objectives, *status, score);
            self.best.observe(&internal, tunables);
            let key = assignment_key(&self.extract_assignment(tunables));
            self.pending.retain(|a| assignment_key(a) != key);
            self.suggested.remove(&key);
        }
        Ok(true)
    }

    fn not_converged(&self) -> bool {
        !(self.pending.is_empty() && self.suggested.is_empty() && self.iteration >= self.max_iterations)
    }

    fn get_best_observation(&self) -> Option<(ScoreMap, TunableGroups)> {
        self.best.best(&self.objectives)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ab_core::{CovariantGroup, NumericTunableSpec, ObjectiveDirection, TunableDistribution};
    use std::collections::BTreeMap as Map;

    fn small_space() -> TunableGroups {
        let choice = Tunable::new_categorical(
            "choice",
            vec!["a".into(), "b".into(), "c".into()],
            "a".into(),
            None,
            Map::new(),
        )
        .unwrap();
        let count = Tunable::new_numeric(NumericTunableSpec {
            name: "count".into(),
            is_integer: true,
            default: TunableValue::Int(1),
            range: (1.0, 3.0),
            quantization_bins: None,
            log: false,
            distribution: TunableDistribution::Uniform,
            special: vec![],
            special_weights: None,
            range_weight: None,
            meta: Map::new(),
        })
        .unwrap();
        let ratio = Tunable::new_numeric(NumericTunableSpec {
            name: "ratio".into(),
            is_integer: false,
            default: TunableValue::Float(0.0),
            range: (0.0, 1.0),
            quantization_bins: Some(5),
            log: false,
            distribution: TunableDistribution::Uniform,
            special: vec![],
            special_weights: None,
            range_weight: None,
            meta: Map::new(),
        })
        .unwrap();
        let mut tg = TunableGroups::new();
        tg.add_group(CovariantGroup::new("g", 1, vec![choice, count, ratio])).unwrap();
        tg
    }

    fn min_objective() -> ObjectiveMap {
        let mut m = ObjectiveMap::new();
        m.insert("y".to_string(), ObjectiveDirection::Min);
        m
    }

    #[test]
    fn first_45_suggestions_cover_every_cell_exactly_once() {
        let mut opt = GridOptimizer::new(small_space(), min_objective(), 1000).unwrap();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..45 {
            let tg = opt.suggest();
            let key = assignment_key(&opt.extract_assignment(&tg));
            assert!(seen.insert(key), "suggestion repeated before the grid was exhausted");
        }
        assert_eq!(seen.len(), 45);
    }

    #[test]
    fn iteration_46_begins_a_refill() {
        let mut opt = GridOptimizer::new(small_space(), min_objective(), 1000).unwrap();
        let first_round: Vec<String> = (0..45).map(|_| assignment_key(&opt.extract_assignment(&opt.suggest()))).collect();
        let forty_sixth = assignment_key(&opt.extract_assignment(&opt.suggest()));
        assert_eq!(forty_sixth, first_round[0], "refill restarts from the same dictionary order, defaults first");
    }

    #[test]
    fn rejects_unquantized_float_tunable() {
        let x = Tunable::new_numeric(NumericTunableSpec {
            name: "x".into(),
            is_integer: false,
            default: TunableValue::Float(0.0),
            range: (0.0, 1.0),
            quantization_bins: None,
            log: false,
            distribution: TunableDistribution::Uniform,
            special: vec![],
            special_weights: None,
            range_weight: None,
            meta: Map::new(),
        })
        .unwrap();
        let mut tg = TunableGroups::new();
        tg.add_group(CovariantGroup::new("g", 1, vec![x])).unwrap();
        assert!(GridOptimizer::new(tg, min_objective(), 10).is_err());
    }

    #[test]
    fn categorical_preference_scenario() {
        let choice = Tunable::new_categorical(
            "choice",
            vec!["a".into(), "b".into(), "c".into()],
            "a".into(),
            None,
            Map::new(),
        )
        .unwrap();
        let mut tg = TunableGroups::new();
        tg.add_group(CovariantGroup::new("g", 1, vec![choice])).unwrap();
        let mut opt = GridOptimizer::new(tg, min_objective(), 30).unwrap();
        let scores = |c: &str| -> f64 {
            match c {
                "a" => 10.0,
                "b" => 5.0,
                _ => 1.0,
            }
        };
        for _ in 0..30 {
            if !opt.not_converged() {
                break;
            }
            let tg = opt.suggest();
            let choice_value = tg.get("choice").unwrap();
            let choice = choice_value.as_categorical().unwrap_or("a");
            let mut score = ScoreMap::new();
            score.insert("y".to_string(), scores(choice));
            opt.register(&tg, Status::Succeeded, Some(score)).unwrap();
        }
        let (_, best_tg) = opt.get_best_observation().unwrap();
        assert_eq!(best_tg.get("choice").unwrap(), TunableValue::Categorical("c".to_string()));
    }
}
