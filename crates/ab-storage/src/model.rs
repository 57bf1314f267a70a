use ab_core::{ObjectiveMap, ScoreMap, Status};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One experiment: a sequence of trials sharing an identifier, a tunable
/// signature, and an objective map. See spec §3 "Experiment".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub experiment_id: String,
    pub description: String,
    pub root_env_config: String,
    pub git_repo: Option<String>,
    pub git_commit: Option<String>,
    pub objectives: ObjectiveMap,
    /// Content hash of the tunable-group signature this experiment was
    /// created with; resumes are validated against this.
    pub tunable_signature: String,
    pub start_trial_id: i64,
    pub merged_experiment_ids: Vec<String>,
}

/// A single row in the (deduplicated) config table: `config_id` plus the
/// content hash it was inserted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigId(pub i64);

/// One telemetry observation: `(timestamp, metric_name, value)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryPoint {
    pub ts: DateTime<Utc>,
    pub metric: String,
    pub value: f64,
}

/// One trial: `(experiment_id, trial_id)` plus its current lifecycle
/// state, its config assignment, and free-form metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trial {
    pub experiment_id: String,
    pub trial_id: i64,
    pub config_id: i64,
    pub trial_runner_id: Option<String>,
    pub status: Status,
    pub ts_start: Option<DateTime<Utc>>,
    pub ts_end: Option<DateTime<Utc>>,
    /// Free-form config-metadata (optimizer name, repeat index, is_defaults
    /// flag, objective-direction snapshot, ...).
    pub config_map: BTreeMap<String, String>,
    pub results: BTreeMap<String, f64>,
    pub telemetry: Vec<TelemetryPoint>,
}

impl Trial {
    pub fn is_terminal(&self) -> bool {
        self.status.is_completed()
    }
}

/// Result of `Storage::load`: parallel vectors, one entry per terminal
/// trial with `trial_id > after_trial_id`, in ascending `trial_id` order.
/// `scores[i]` is `None` unless `statuses[i].is_succeeded()`.
#[derive(Debug, Clone, Default)]
pub struct LoadedTrials {
    pub trial_ids: Vec<i64>,
    pub config_ids: Vec<i64>,
    pub scores: Vec<Option<ScoreMap>>,
    pub statuses: Vec<Status>,
}

impl LoadedTrials {
    pub fn len(&self) -> usize {
        self.trial_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trial_ids.is_empty()
    }

    pub fn max_trial_id(&self) -> Option<i64> {
        self.trial_ids.iter().copied().max()
    }
}
