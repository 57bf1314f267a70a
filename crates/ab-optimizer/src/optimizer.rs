use crate::error::OptResult;
use ab_core::{to_external_scores, to_internal_scores, ObjectiveMap, ScoreMap, Status, TunableGroups};

/// Contract every optimizer variant (Random, Grid, Bayesian) implements
/// (spec §4.4, C9). The scheduler is the sole writer: it owns the
/// optimizer for its lifetime and drives `suggest`/`register`/
/// `bulk_register` from a single thread.
pub trait Optimizer: Send {
    /// A copy of the optimizer's tunables with values set to the next
    /// candidate. Increments the internal iteration counter.
    fn suggest(&mut self) -> TunableGroups;

    /// Registers one observation. `status.is_succeeded() <=> score.is_some()`
    /// must hold — violating it is a configuration error. Returns the
    /// sign-flipped (always-minimizing) internal score map.
    fn register(&mut self, tunables: &TunableGroups, status: Status, score: Option<ScoreMap>) -> OptResult<Option<ScoreMap>>;

    /// Pre-loads historical data. If non-empty and the optimizer was
    /// configured to start with defaults, start-with-defaults is disabled
    /// permanently (spec §9 Open Question 2: a one-way latch).
    fn bulk_register(&mut self, configs: &[TunableGroups], scores: &[Option<ScoreMap>], statuses: &[Status]) -> OptResult<bool>;

    /// Default: iteration counter < max_iterations. Grid overrides this.
    fn not_converged(&self) -> bool;

    fn get_best_observation(&self) -> Option<(ScoreMap, TunableGroups)>;

    fn name(&self) -> &str;
}

/// Shared minimizing-score bookkeeping used by every optimizer variant:
/// converts a registration into the internal always-minimizing
/// convention, tracks the best-seen point by the sum of internal scores
/// (the natural scalarization when an optimizer variant has no
/// dedicated multi-objective handling, e.g. Random and Grid), and flips
/// back to the user-facing direction for `get_best_observation`.
#[derive(Default)]
pub(crate) struct BestTracker {
    best_internal: Option<ScoreMap>,
    best_tunables: Option<TunableGroups>,
}

impl BestTracker {
    pub(crate) fn observe(&mut self, internal_score: &ScoreMap, tunables: &TunableGroups) {
        let candidate_key: f64 = internal_score.values().sum();
        let replace = match &self.best_internal {
            None => true,
            Some(current) => candidate_key < current.values().sum::<f64>(),
        };
        if replace {
            self.best_internal = Some(internal_score.clone());
            self.best_tunables = Some(tunables.clone());
        }
    }

    pub(crate) fn best(&self, objectives: &ObjectiveMap) -> Option<(ScoreMap, TunableGroups)> {
        let internal = self.best_internal.as_ref()?;
        let tunables = self.best_tunables.as_ref()?;
        Some((to_external_scores(objectives, internal), tunables.clone()))
    }
}

/// Internal score for a registration: `to_internal_scores` of the
/// user-facing score when present, else `+inf` on every objective
/// (spec §4.4 "Scoring sign convention": failures score `+inf`).
pub(crate) fn internal_score_for(objectives: &ObjectiveMap, status: Status, score: &Option<ScoreMap>) -> ScoreMap {
    match score {
        Some(s) => to_internal_scores(objectives, s),
        None => {
            debug_assert!(!status.is_succeeded());
            objectives.keys().map(|name| (name.clone(), f64::INFINITY)).collect()
        }
    }
}

pub(crate) fn check_score_matches_status(status: Status, score: &Option<ScoreMap>) -> OptResult<()> {
    if status.is_succeeded() != score.is_some() {
        return Err(crate::error::OptimizerError::Config(format!(
            "status {status} {} a score, but {}",
            if status.is_succeeded() { "requires" } else { "must not carry" },
            if score.is_some() { "one was given" } else { "none was given" },
        )));
    }
    Ok(())
}
