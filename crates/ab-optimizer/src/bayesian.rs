use crate::acquisition::{probability_of_pareto_improvement, upper_confidence_bound_on_improvement};
use crate::candidates::{CandidateSubOptimizer, RandomSearchSubOptimizer};
use crate::config_space::ConfigurationSpace;
use crate::error::OptResult;
use crate::forest::{ForestConfig, HomogeneousRandomForest};
use crate::optimizer::{check_score_matches_status, internal_score_for, BestTracker, Optimizer};
use crate::pareto::ParetoFrontier;
use crate::space_adapter::{IdentityAdapter, LlamaTuneAdapter, SpaceAdapter};
use ab_core::{ObjectiveMap, ScoreMap, Status, TunableGroups};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;

/// Tuning knobs for [`BayesianOptimizer`] (spec §4.4 item 3).
#[derive(Clone, Copy)]
pub struct BayesianConfig {
    pub forest: ForestConfig,
    /// Below this many observations, `suggest` draws uniformly at random
    /// instead of invoking the surrogate.
    pub min_samples_required: usize,
    /// Exploration weight for `upper_confidence_bound_on_improvement`.
    pub alpha: f64,
    /// Candidate points the sub-optimizer draws per `suggest` call.
    pub num_candidates: usize,
    pub use_llamatune: bool,
    pub llamatune_internal_dim: usize,
    pub llamatune_special_bias_fraction: f64,
    pub seed: u64,
}

impl Default for BayesianConfig {
    fn default() -> Self {
        BayesianConfig {
            forest: ForestConfig::default(),
            min_samples_required: 10,
            alpha: 1.0,
            num_candidates: 100,
            use_llamatune: false,
            llamatune_internal_dim: 8,
            llamatune_special_bias_fraction: 0.2,
            seed: 0,
        }
    }
}

fn fnv1a(name: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in name.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Surrogate-driven optimizer over a dimensioned configuration space
/// (spec §4.4 "Bayesian optimizer"): one [`HomogeneousRandomForest`] per
/// objective, [`SpaceAdapter`]-projected candidate search scored by an
/// acquisition function, with a random-suggestion fallback below
/// `min_samples_required` observations or when the forest cannot yet
/// predict.
pub struct BayesianOptimizer {
    name: String,
    template: TunableGroups,
    objectives: ObjectiveMap,
    config_space: ConfigurationSpace,
    adapter: Box<dyn SpaceAdapter>,
    candidate_optimizer: Box<dyn CandidateSubOptimizer>,
    forests: BTreeMap<String, HomogeneousRandomForest>,
    pareto: ParetoFrontier,
    history_internal_points: Vec<Vec<f64>>,
    history_scores: BTreeMap<String, Vec<f64>>,
    config: BayesianConfig,
    iteration: u64,
    max_iterations: u64,
    start_with_defaults: bool,
    best: BestTracker,
    rng: StdRng,
}

impl BayesianOptimizer {
    pub fn new(
        template: TunableGroups,
        objectives: ObjectiveMap,
        max_iterations: u64,
        start_with_defaults: bool,
        config: BayesianConfig,
    ) -> Self {
        let config_space = ConfigurationSpace::from_tunables(&template);
        let adapter: Box<dyn SpaceAdapter> = if config.use_llamatune {
            Box::new(LlamaTuneAdapter::new(
                &config_space,
                config.llamatune_internal_dim,
                config.llamatune_special_bias_fraction,
                config.seed,
            ))
        } else {
            Box::new(IdentityAdapter::new(&config_space))
        };
        let internal_dim = adapter.internal_dimensionality();
        let forests = objectives
            .keys()
            .map(|name| {
                let forest = HomogeneousRandomForest::new(config.forest, internal_dim, config.seed ^ fnv1a(name));
                (name.clone(), forest)
            })
            .collect();
        let pareto = ParetoFrontier::new(objectives.clone());
        BayesianOptimizer {
            name: "bayesian".to_string(),
            template,
            objectives,
            config_space,
            adapter,
            candidate_optimizer: Box::new(RandomSearchSubOptimizer::new(config.num_candidates)),
            forests,
            pareto,
            history_internal_points: Vec::new(),
            history_scores: BTreeMap::new(),
            config,
            iteration: 0,
            max_iterations,
            start_with_defaults,
            best: BestTracker::default(),
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    fn internal_point_to_tunables(&self, internal_point: &[f64]) -> TunableGroups {
        let full = self.adapter.project(internal_point);
        let values = self.config_space.from_point(&full);
        let mut tg = self.template.deep_copy();
        for (name, value) in values {
            tg.set(&name, value).expect("from_point always yields an in-domain value");
        }
        tg
    }

    fn random_suggestion(&mut self) -> TunableGroups {
        let mut point = self.adapter.sample_internal(&mut self.rng);
        let mut attempts = 0;
        while !self.adapter.round_trips(&point) && attempts < 5 {
            point = self.adapter.sample_internal(&mut self.rng);
            attempts += 1;
        }
        self.internal_point_to_tunables(&point)
    }

    /// Refits every per-objective forest (cheap to call repeatedly: each
    /// underlying tree gates its own rebuild on
    /// `n_new_samples_before_refit`, per spec §4.4 item 4).
    fn refit_forests(&mut self) {
        for (name, forest) in self.forests.iter_mut() {
            if let Some(targets) = self.history_scores.get(name) {
                forest.fit(&self.history_internal_points, targets);
            }
        }
    }

    fn guided_suggestion(&mut self) -> TunableGroups {
        self.refit_forests();
        let internal_dim = self.adapter.internal_dimensionality();
        let multi = self.objectives.len() > 1;
        let single_name = self.objectives.keys().next().cloned();
        let best_scalar = single_name
            .as_ref()
            .and_then(|n| self.history_scores.get(n))
            .and_then(|v| v.iter().cloned().fold(None, |acc: Option<f64>, x| Some(acc.map_or(x, |a| a.min(x)))))
            .unwrap_or(f64::INFINITY);

        let forests = &self.forests;
        let pareto = &self.pareto;
        let adapter = &self.adapter;
        let alpha = self.config.alpha;

        let acquisition = |point: &[f64]| -> f64 {
            let full = adapter.project(point);
            if multi {
                let mut means = ScoreMap::new();
                let mut stds = ScoreMap::new();
                for (name, forest) in forests {
                    match forest.predict(&full) {
                        Ok(p) => {
                            means.insert(name.clone(), p.mean);
                            stds.insert(name.clone(), p.variance.max(0.0).sqrt());
                        }
                        Err(_) => {
                            means.insert(name.clone(), f64::INFINITY);
                            stds.insert(name.clone(), 0.0);
                        }
                    }
                }
                probability_of_pareto_improvement(&means, &stds, pareto)
            } else {
                let Some(name) = &single_name else { return f64::NEG_INFINITY };
                match forests.get(name).and_then(|f| f.predict(&full).ok()) {
                    Some(p) => upper_confidence_bound_on_improvement(&p, best_scalar, alpha),
                    None => f64::NEG_INFINITY,
                }
            }
        };

        let any_forest_ready = self.forests.values().any(|f| f.predict(&vec![0.5; internal_dim]).is_ok());
        if !any_forest_ready {
            tracing::warn!(optimizer = %self.name, "surrogate not yet fit; falling back to a random suggestion");
            return self.random_suggestion();
        }

        let (best_point, _score) = self.candidate_optimizer.argmax(internal_dim, &mut self.rng, &acquisition);
        self.internal_point_to_tunables(&best_point)
    }
}

impl Optimizer for BayesianOptimizer {
    fn suggest(&mut self) -> TunableGroups {
        self.iteration += 1;
        if self.start_with_defaults && self.iteration == 1 {
            let mut tg = self.template.deep_copy();
            tg.restore_defaults();
            return tg;
        }
        if self.history_internal_points.len() < self.config.min_samples_required {
            return self.random_suggestion();
        }
        self.guided_suggestion()
    }

    fn register(&mut self, tunables: &TunableGroups, status: Status, score: Option<ScoreMap>) -> OptResult<Option<ScoreMap>> {
        check_score_matches_status(status, &score)?;
        let internal = internal_score_for(&self.objectives, status, &score);
        self.best.observe(&internal, tunables);

        let full_point = self.config_space.to_point(tunables);
        let internal_point = self.adapter.to_internal(&full_point);
        self.history_internal_points.push(internal_point);
        for (name, value) in &internal {
            self.history_scores.entry(name.clone()).or_default().push(*value);
        }
        if status.is_succeeded() {
            self.pareto.update(vec![internal.clone()], vec![tunables.clone()]);
        }
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
    use std::collections::BTreeMap as Map;

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
            meta: Map::new(),
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
    fn below_min_samples_required_suggests_are_in_domain() {
        let mut opt = BayesianOptimizer::new(
            quadratic_space(),
            min_objective(),
            50,
            false,
            BayesianConfig {
                min_samples_required: 20,
                ..Default::default()
            },
        );
        for _ in 0..5 {
            let tg = opt.suggest();
            let x = tg.get("x").unwrap().as_f64().unwrap();
            assert!((-100.0..=100.0).contains(&x));
        }
    }

    #[test]
    fn best_observation_tracks_minimum_internal_score() {
        let mut opt = BayesianOptimizer::new(quadratic_space(), min_objective(), 50, false, BayesianConfig::default());
        for x in [50.0, -10.0, 3.0, 80.0] {
            let mut tg = quadratic_space();
            tg.set("x", TunableValue::Float(x)).unwrap();
            let mut score = ScoreMap::new();
            score.insert("y".to_string(), x * x);
            opt.register(&tg, Status::Succeeded, Some(score)).unwrap();
        }
        let (best, best_tg) = opt.get_best_observation().unwrap();
        assert_eq!(best["y"], 9.0);
        assert_eq!(best_tg.get("x"), Some(TunableValue::Float(3.0)));
    }

    #[test]
    fn max_objective_best_observation_flips_sign_back() {
        let mut objectives = ObjectiveMap::new();
        objectives.insert("throughput".to_string(), ObjectiveDirection::Max);
        let mut opt = BayesianOptimizer::new(quadratic_space(), objectives, 50, false, BayesianConfig::default());
        for v in [10.0, 50.0, 20.0] {
            let tg = quadratic_space();
            let mut score = ScoreMap::new();
            score.insert("throughput".to_string(), v);
            opt.register(&tg, Status::Succeeded, Some(score)).unwrap();
        }
        let (best, _) = opt.get_best_observation().unwrap();
        assert_eq!(best["throughput"], 50.0);
    }

    #[test]
    fn failed_trial_scores_positive_infinity_internally() {
        let mut opt = BayesianOptimizer::new(quadratic_space(), min_objective(), 50, false, BayesianConfig::default());
        let tg = quadratic_space();
        let internal = opt.register(&tg, Status::Failed, None).unwrap().unwrap();
        assert_eq!(internal["y"], f64::INFINITY);
    }

    #[test]
    fn bulk_register_disables_start_with_defaults_permanently() {
        let mut opt = BayesianOptimizer::new(quadratic_space(), min_objective(), 50, true, BayesianConfig::default());
        let tg = quadratic_space();
        let mut score = ScoreMap::new();
        score.insert("y".to_string(), 0.0);
        opt.bulk_register(&[tg], &[Some(score)], &[Status::Succeeded]).unwrap();
        assert!(!opt.start_with_defaults);
    }
}
