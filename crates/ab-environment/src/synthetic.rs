use crate::environment::{Environment, GlobalConfig};
use crate::error::{EnvResult, EnvironmentError};
use crate::state::StateMachine;
use ab_core::{ScoreMap, Status, TunableGroups};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// Configuration for [`SyntheticEnvironment`] (grounded on
/// `mlos_bench.environments.mock_env.MockEnv`, the source's own
/// scheduler-side stand-in for a real benchmark target). Unlike
/// [`crate::MockEnvironment`], which replays a fixed script and exists
/// purely to pin down `TrialRunner`/`Scheduler` state-machine behavior
/// in tests, this one actually responds to the tunable assignment it is
/// given — a convex function of every tunable's normalized position —
/// so a CLI run against it exercises a real, if synthetic, optimization
/// landscape.
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Objective metric names to report; every metric gets the same
    /// computed score.
    pub metrics: Vec<String>,
    /// `Some(seed)` for reproducible Gaussian noise, `None` for no noise.
    pub seed: Option<u64>,
    /// Standard deviation of the Gaussian noise added before clamping
    /// and rescaling (source's `_NOISE_VAR`, exposed as a parameter
    /// rather than hardcoded).
    pub noise_std: f64,
    /// Rescales the `[0, 1]` raw score into `[lo, hi]`; `None` leaves it
    /// in `[0, 1]`.
    pub range: Option<(f64, f64)>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        SyntheticConfig {
            metrics: vec!["score".to_string()],
            seed: None,
            noise_std: 0.2,
            range: None,
        }
    }
}

/// A runnable stand-in benchmark target: `score = mean((normalized
/// tunable value)^2)` over every tunable in the assignment, optionally
/// perturbed by Gaussian noise and rescaled. Always succeeds
/// immediately — there is no asynchronous run phase to poll.
pub struct SyntheticEnvironment {
    name: String,
    config: SyntheticConfig,
    state: StateMachine,
    rng: Option<StdRng>,
    tunables: Option<TunableGroups>,
}

impl SyntheticEnvironment {
    pub fn new(name: impl Into<String>, config: SyntheticConfig) -> Self {
        let rng = config.seed.map(StdRng::seed_from_u64);
        SyntheticEnvironment {
            name: name.into(),
            config,
            state: StateMachine::new(),
            rng,
            tunables: None,
        }
    }

    fn produce_metrics(&mut self) -> ScoreMap {
        let tunables = self.tunables.as_ref().expect("setup sets tunables before run");
        let normalized: Vec<f64> = tunables
            .tunables()
            .iter()
            .map(|t| tunables.get(t.name()).map(|v| t.normalize(&v)).unwrap_or(0.0))
            .collect();
        let raw = if normalized.is_empty() {
            0.0
        } else {
            normalized.iter().map(|x| x * x).sum::<f64>() / normalized.len() as f64
        };
        let noise = match &mut self.rng {
            Some(rng) if self.config.noise_std > 0.0 => {
                let normal = Normal::new(0.0, self.config.noise_std).unwrap();
                normal.sample(rng)
            }
            _ => 0.0,
        };
        let mut score = (raw + noise).clamp(0.0, 1.0);
        if let Some((lo, hi)) = self.config.range {
            score = lo + score * (hi - lo);
        }
        self.config.metrics.iter().map(|m| (m.clone(), score)).collect()
    }
}

impl Environment for SyntheticEnvironment {
    fn name(&self) -> &str {
        &self.name
    }

    fn enter_context(&mut self) -> EnvResult<()> {
        self.state.enter_context();
        Ok(())
    }

    fn exit_context(&mut self) -> EnvResult<()> {
        self.state.exit_context();
        Ok(())
    }

    fn setup(&mut self, tunables: &TunableGroups, _global_config: &GlobalConfig) -> EnvResult<bool> {
        let hash = tunables.content_hash();
        if self.state.begin_setup(&hash)? {
            return Ok(true);
        }
        self.tunables = Some(tunables.deep_copy());
        self.state.mark_ready(hash);
        Ok(true)
    }

    fn run(&mut self) -> EnvResult<(Status, DateTime<Utc>, Option<ScoreMap>)> {
        self.state.require_ready("run")?;
        self.state.mark_running();
        let metrics = self.produce_metrics();
        self.state.mark_ready_after_run();
        Ok((Status::Succeeded, Utc::now(), Some(metrics)))
    }

    fn status(&mut self) -> EnvResult<(Status, DateTime<Utc>, Vec<(DateTime<Utc>, String, f64)>)> {
        if self.state.phase().is_none() {
            return Err(EnvironmentError::InvalidState {
                expected: "entered context".to_string(),
                actual: "not in context (status)".to_string(),
            });
        }
        Ok((Status::Succeeded, Utc::now(), Vec::new()))
    }

    fn teardown(&mut self) -> EnvResult<()> {
        self.state.teardown();
        self.tunables = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ab_core::{CovariantGroup, NumericTunableSpec, Tunable, TunableValue};
    use std::collections::BTreeMap;

    fn tunables_at(x: f64) -> TunableGroups {
        let t = Tunable::new_numeric(NumericTunableSpec {
            name: "x".into(),
            is_integer: false,
            default: TunableValue::Float(0.0),
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
        tg.set("x", TunableValue::Float(x)).unwrap();
        tg
    }

    #[test]
    fn higher_normalized_value_scores_higher_noiseless() {
        let mut low = SyntheticEnvironment::new("bench", SyntheticConfig { noise_std: 0.0, ..Default::default() });
        let mut high = SyntheticEnvironment::new("bench", SyntheticConfig { noise_std: 0.0, ..Default::default() });
        low.enter_context().unwrap();
        high.enter_context().unwrap();
        low.setup(&tunables_at(1.0), &GlobalConfig::new()).unwrap();
        high.setup(&tunables_at(9.0), &GlobalConfig::new()).unwrap();
        let (_, _, low_metrics) = low.run().unwrap();
        let (_, _, high_metrics) = high.run().unwrap();
        let low_score = low_metrics.unwrap()["score"];
        let high_score = high_metrics.unwrap()["score"];
        assert!(high_score > low_score);
    }

    #[test]
    fn score_is_deterministic_for_a_fixed_seed() {
        let cfg = SyntheticConfig { seed: Some(7), noise_std: 0.2, ..Default::default() };
        let mut a = SyntheticEnvironment::new("bench", cfg.clone());
        let mut b = SyntheticEnvironment::new("bench", cfg);
        for env in [&mut a, &mut b] {
            env.enter_context().unwrap();
            env.setup(&tunables_at(5.0), &GlobalConfig::new()).unwrap();
        }
        let (_, _, ma) = a.run().unwrap();
        let (_, _, mb) = b.run().unwrap();
        assert_eq!(ma.unwrap()["score"], mb.unwrap()["score"]);
    }

    #[test]
    fn range_rescales_output() {
        let cfg = SyntheticConfig {
            noise_std: 0.0,
            range: Some((100.0, 200.0)),
            ..Default::default()
        };
        let mut env = SyntheticEnvironment::new("bench", cfg);
        env.enter_context().unwrap();
        env.setup(&tunables_at(0.0), &GlobalConfig::new()).unwrap();
        let (_, _, metrics) = env.run().unwrap();
        assert_eq!(metrics.unwrap()["score"], 100.0);
    }

    #[test]
    fn run_before_setup_is_invalid_state() {
        let mut env = SyntheticEnvironment::new("bench", SyntheticConfig::default());
        env.enter_context().unwrap();
        assert!(env.run().is_err());
    }
}
