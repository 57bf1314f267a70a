use crate::error::OptResult;
use crate::optimizer::{check_score_matches_status, internal_score_for, BestTracker, Optimizer};
use ab_core::{ObjectiveMap, ScoreMap, Status, TunableGroups};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Draws each tunable independently from its own sampling distribution
/// (spec §4.4 "Random optimizer"). Converges when the iteration cap is
/// reached.
pub struct RandomOptimizer {
    name: String,
    template: TunableGroups,
    objectives: ObjectiveMap,
    rng: StdRng,
    iteration: u64,
    max_iterations: u64,
    start_with_defaults: bool,
    best: BestTracker,
}

impl RandomOptimizer {
    pub fn new(template: TunableGroups, objectives: ObjectiveMap, max_iterations: u64, start_with_defaults: bool, seed: u64) -> Self {
        RandomOptimizer {
            name: "random".to_string(),
            template,
            objectives,
            rng: StdRng::seed_from_u64(seed),
            iteration: 0,
            max_iterations,
            start_with_defaults,
            best: BestTracker::default(),
        }
    }

    fn random_point(&mut self) -> TunableGroups {
        let mut tg = self.template.deep_copy();
        let values: Vec<(String, ab_core::TunableValue)> = tg
            .tunables()
            .iter()
            .map(|t| (t.name().to_string(), t.sample(&mut self.rng)))
            .collect();
        for (name, value) in values {
            tg.set(&name, value).expect("sampled value always lies in its own domain");
        }
        tg
    }
}

impl Optimizer for RandomOptimizer {
    fn suggest(&mut self) -> TunableGroups {
        self.iteration += 1;
        if self.start_with_defaults && self.iteration == 1 {
            let mut tg = self.template.deep_copy();
            tg.restore_defaults();
            return tg;
        }
        self.random_point()
    }

    fn register(&mut self, tunables: &TunableGroups, status: Status, score: Option<ScoreMap>) -> OptResult<Option<ScoreMap>> {
        check_score_matches_status(status, &score)?;
        let internal = internal_score_for(&self.objectives, status, &score);
        self.best.observe(&internal, tunables);
        Ok(Some(internal))
    }

    fn bulk_register(&mut self, configs: &[TunableGroups], scores: &[Option<ScoreMap>], statuses: &[Status]) -> OptResult<bool> {
        if configs.is_empty() {
            return Ok(false);
        }
        for ((tunables, score), status) in configs.iter().zip(scores.iter()).zip(statuses.iter()) {
            self.register(tunables, *status, score.clone())?;
        }
        self.start_with_defaults = false;
        Ok(true)
    }

    fn not_converged(&self) -> bool {
        self.iteration < self.max_iterations
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
    use ab_core::{CovariantGroup, NumericTunableSpec, ObjectiveDirection, Tunable, TunableDistribution, TunableValue};
    use std::collections::BTreeMap;

    fn quadratic_space() -> TunableGroups {
        let x = Tunable::new_numeric(NumericTunableSpec {
            name: "x".into(),
            is_integer: false,
            default: TunableValue::Float(0.0),
            range: (-100.0, 100.0),
            quantization_bins: None,
            log: false,
            distribution: TunableDistribution::Uniform,
            special: vec![],
            special_weights: None,
            range_weight: None,
            meta: BTreeMap::new(),
        })
        .unwrap();
        let mut tg = TunableGroups::new();
        tg.add_group(CovariantGroup::new("g", 1, vec![x])).unwrap();
        tg
    }

    fn min_objective() -> ObjectiveMap {
        let mut m = ObjectiveMap::new();
        m.insert("y".to_string(), ObjectiveDirection::Min);
        m
    }

    #[test]
    fn hundred_iterations_of_random_search_finds_a_small_quadratic() {
        let mut opt = RandomOptimizer::new(quadratic_space(), min_objective(), 100, false, 11);
        while opt.not_converged() {
            let tg = opt.suggest();
            let x = tg.get("x").unwrap().as_f64().unwrap();
            let y = x * x;
            let mut score = ScoreMap::new();
            score.insert("y".to_string(), y);
            opt.register(&tg, Status::Succeeded, Some(score)).unwrap();
        }
        let (best, _) = opt.get_best_observation().unwrap();
        assert!(best["y"] <= 1000.0);
    }

    #[test]
    fn register_rejects_score_status_mismatch() {
        let mut opt = RandomOptimizer::new(quadratic_space(), min_objective(), 10, false, 1);
        let tg = opt.suggest();
        assert!(opt.register(&tg, Status::Failed, Some(ScoreMap::new())).is_err());
        assert!(opt.register(&tg, Status::Succeeded, None).is_err());
    }

    #[test]
    fn bulk_register_disables_start_with_defaults_permanently() {
        let mut opt = RandomOptimizer::new(quadratic_space(), min_objective(), 10, true, 2);
        let tg = opt.suggest();
        let mut score = ScoreMap::new();
        score.insert("y".to_string(), 4.0);
        opt.bulk_register(&[tg], &[Some(score)], &[Status::Succeeded]).unwrap();
        assert!(!opt.start_with_defaults);
    }
}
