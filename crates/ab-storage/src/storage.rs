use crate::error::StorageResult;
use crate::model::{Experiment, LoadedTrials, Trial};
use ab_core::{ObjectiveMap, ScoreMap, Status, TunableGroups};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// The append-only, queryable log of experiments, tunable configurations,
/// trials, results, and telemetry (spec §4.2, C5).
///
/// Implementations must serialize writes to a given trial, and a single
/// `load` call must be snapshot-consistent.
pub trait Storage: Send + Sync {
    /// Creates a new experiment, or resumes an existing one by
    /// `experiment_id`. On resume, the objective map and tunable-group
    /// signature must match the stored experiment; a mismatch is
    /// `StorageError::IncompatibleResume`.
    fn create_or_resume_experiment(
        &self,
        experiment_id: &str,
        start_trial_id: i64,
        root_env_config: &str,
        description: &str,
        tunables: &TunableGroups,
        objectives: &ObjectiveMap,
    ) -> StorageResult<Experiment>;

    /// Deduplicates `tunables` by the SHA-256 content hash of its
    /// canonical string form, returning the (possibly pre-existing)
    /// `config_id`.
    fn get_or_insert_config(&self, tunables: &TunableGroups) -> StorageResult<i64>;

    /// The per-tunable canonical string values a prior `get_or_insert_config`
    /// stored under `config_id`, keyed by tunable name. Used to reconstruct
    /// a `TunableGroups` (via `TunableGroups::assign_from_canonical`) when
    /// bulk-registering historical trials with an optimizer on resume.
    fn get_config_values(&self, config_id: i64) -> StorageResult<BTreeMap<String, String>>;

    /// Allocates the next `trial_id` for `experiment`, links it to the
    /// (deduplicated) config for `tunables`, and persists it as `Pending`.
    fn new_trial(
        &self,
        experiment: &Experiment,
        tunables: &TunableGroups,
        ts_start: Option<DateTime<Utc>>,
        config_map: BTreeMap<String, String>,
    ) -> StorageResult<Trial>;

    /// Trials with `ts_end IS NULL`, `ts_start <= now_utc OR ts_start IS
    /// NULL`, and status in `{Pending}` (or `{Pending, Ready, Running}`
    /// when `include_running`), ordered by ascending `trial_id`.
    fn pending_trials(
        &self,
        experiment: &Experiment,
        now_utc: DateTime<Utc>,
        include_running: bool,
    ) -> StorageResult<Vec<Trial>>;

    /// Terminal trials with `trial_id > after_trial_id`, ascending.
    /// `scores` is populated only for succeeded trials.
    fn load(&self, experiment: &Experiment, after_trial_id: i64) -> StorageResult<LoadedTrials>;

    /// Updates a trial's status (and, on success, its result metrics).
    /// Idempotent; a no-op once the trial has already reached a terminal
    /// status (`T-Terminal-Immutable`). Sets `ts_end` when `status` is
    /// terminal.
    fn update_trial(
        &self,
        experiment: &Experiment,
        trial_id: i64,
        status: Status,
        ts: DateTime<Utc>,
        metrics: Option<ScoreMap>,
    ) -> StorageResult<()>;

    /// Assigns a trial runner id to a trial that doesn't have one yet.
    fn assign_trial_runner(
        &self,
        experiment: &Experiment,
        trial_id: i64,
        trial_runner_id: &str,
    ) -> StorageResult<()>;

    /// Pure append of telemetry triples for a trial; does not change the
    /// trial's stored status (callers pass the observed status purely for
    /// logging/consistency checks).
    fn append_telemetry(
        &self,
        experiment: &Experiment,
        trial_id: i64,
        status: Status,
        ts: DateTime<Utc>,
        triples: &[(DateTime<Utc>, String, f64)],
    ) -> StorageResult<()>;

    /// Pulls trials from `other_experiment_ids` (which must share the same
    /// tunable signature) into the view used for analysis, without
    /// mutating the other experiments' own storage rows.
    fn merge_experiments(
        &self,
        experiment: &Experiment,
        other_experiment_ids: &[String],
    ) -> StorageResult<Vec<Trial>>;

    /// Fetches one trial by id, terminal or not.
    fn get_trial(&self, experiment: &Experiment, trial_id: i64) -> StorageResult<Trial>;
}
