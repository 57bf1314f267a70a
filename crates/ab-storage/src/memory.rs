use crate::error::{StorageError, StorageResult};
use crate::model::{Experiment, LoadedTrials, Trial};
use crate::signature::tunable_signature;
use crate::storage::Storage;
use ab_core::{to_internal_scores, ObjectiveMap, ScoreMap, Status, TunableGroups};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;

#[derive(Default)]
struct State {
    experiments: BTreeMap<String, Experiment>,
    config_by_hash: BTreeMap<String, i64>,
    config_values: BTreeMap<i64, BTreeMap<String, String>>,
    next_config_id: i64,
    trials: BTreeMap<(String, i64), Trial>,
    next_trial_id: BTreeMap<String, i64>,
}

/// `Arc<Mutex<...>>`-guarded in-process [`Storage`] implementation.
/// Used by tests and by the CLI's `--in-memory` escape hatch.
pub struct InMemoryStorage {
    state: Mutex<State>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        InMemoryStorage {
            state: Mutex::new(State::default()),
        }
    }
}

fn truncate_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    let micros = ts.timestamp_subsec_micros();
    ts - chrono::Duration::nanoseconds((ts.timestamp_subsec_nanos() - micros * 1000) as i64)
}

impl Storage for InMemoryStorage {
    fn create_or_resume_experiment(
        &self,
        experiment_id: &str,
        start_trial_id: i64,
        root_env_config: &str,
        description: &str,
        tunables: &TunableGroups,
        objectives: &ObjectiveMap,
    ) -> StorageResult<Experiment> {
        let sig = tunable_signature(tunables);
        let mut state = self.state.lock();
        if let Some(existing) = state.experiments.get(experiment_id) {
            if &existing.objectives != objectives {
                return Err(StorageError::IncompatibleResume {
                    experiment_id: experiment_id.to_string(),
                    reason: "objective map differs from stored experiment".to_string(),
                });
            }
            if existing.tunable_signature != sig {
                return Err(StorageError::IncompatibleResume {
                    experiment_id: experiment_id.to_string(),
                    reason: "tunable-group signature differs from stored experiment".to_string(),
                });
            }
            return Ok(existing.clone());
        }
        let (git_repo, git_commit) = capture_git_info(root_env_config);
        let experiment = Experiment {
            experiment_id: experiment_id.to_string(),
            description: description.to_string(),
            root_env_config: root_env_config.to_string(),
            git_repo,
            git_commit,
            objectives: objectives.clone(),
            tunable_signature: sig,
            start_trial_id,
            merged_experiment_ids: Vec::new(),
        };
        state.experiments.insert(experiment_id.to_string(), experiment.clone());
        state.next_trial_id.insert(experiment_id.to_string(), start_trial_id);
        Ok(experiment)
    }

    fn get_or_insert_config(&self, tunables: &TunableGroups) -> StorageResult<i64> {
        let hash = tunables.content_hash();
        let mut state = self.state.lock();
        if let Some(id) = state.config_by_hash.get(&hash) {
            return Ok(*id);
        }
        let id = state.next_config_id;
        state.next_config_id += 1;
        state.config_by_hash.insert(hash, id);
        let values: BTreeMap<String, String> = tunables
            .iter_values()
            .into_iter()
            .map(|(name, value)| (name, value.canonical_repr()))
            .collect();
        state.config_values.insert(id, values);
        Ok(id)
    }

    fn get_config_values(&self, config_id: i64) -> StorageResult<BTreeMap<String, String>> {
        let state = self.state.lock();
        state
            .config_values
            .get(&config_id)
            .cloned()
            .ok_or(StorageError::UnknownConfig(config_id))
    }

    fn new_trial(
        &self,
        experiment: &Experiment,
        tunables: &TunableGroups,
        ts_start: Option<DateTime<Utc>>,
        config_map: BTreeMap<String, String>,
    ) -> StorageResult<Trial> {
        let config_id = self.get_or_insert_config(tunables)?;
        let mut state = self.state.lock();
        if !state.experiments.contains_key(&experiment.experiment_id) {
            return Err(StorageError::UnknownExperiment(experiment.experiment_id.clone()));
        }
        let next = state
            .next_trial_id
            .entry(experiment.experiment_id.clone())
            .or_insert(experiment.start_trial_id);
        let trial_id = *next;
        *next += 1;
        let trial = Trial {
            experiment_id: experiment.experiment_id.clone(),
            trial_id,
            config_id,
            trial_runner_id: None,
            status: Status::Pending,
            ts_start: ts_start.map(truncate_micros),
            ts_end: None,
            config_map,
            results: BTreeMap::new(),
            telemetry: Vec::new(),
        };
        state
            .trials
            .insert((experiment.experiment_id.clone(), trial_id), trial.clone());
        Ok(trial)
    }

    fn pending_trials(
        &self,
        experiment: &Experiment,
        now_utc: DateTime<Utc>,
        include_running: bool,
    ) -> StorageResult<Vec<Trial>> {
        let state = self.state.lock();
        let mut out: Vec<Trial> = state
            .trials
            .values()
            .filter(|t| t.experiment_id == experiment.experiment_id)
            .filter(|t| t.ts_end.is_none())
            .filter(|t| t.ts_start.map_or(true, |ts| ts <= now_utc))
            .filter(|t| {
                if include_running {
                    matches!(t.status, Status::Pending | Status::Ready | Status::Running)
                } else {
                    matches!(t.status, Status::Pending)
                }
            })
            .cloned()
            .collect();
        out.sort_by_key(|t| t.trial_id);
        Ok(out)
    }

    fn load(&self, experiment: &Experiment, after_trial_id: i64) -> StorageResult<LoadedTrials> {
        let state = self.state.lock();
        let mut rows: Vec<&Trial> = state
            .trials
            .values()
            .filter(|t| t.experiment_id == experiment.experiment_id)
            .filter(|t| t.trial_id > after_trial_id)
            .filter(|t| t.is_terminal())
            .collect();
        rows.sort_by_key(|t| t.trial_id);

        let mut loaded = LoadedTrials::default();
        for t in rows {
            loaded.trial_ids.push(t.trial_id);
            loaded.config_ids.push(t.config_id);
            loaded.statuses.push(t.status);
            loaded.scores.push(if t.status.is_succeeded() {
                Some(to_internal_scores(&experiment.objectives, &t.results))
            } else {
                None
            });
        }
        Ok(loaded)
    }

    fn update_trial(
        &self,
        experiment: &Experiment,
        trial_id: i64,
        status: Status,
        ts: DateTime<Utc>,
        metrics: Option<ScoreMap>,
    ) -> StorageResult<()> {
        let mut state = self.state.lock();
        let key = (experiment.experiment_id.clone(), trial_id);
        let trial = state.trials.get_mut(&key).ok_or_else(|| StorageError::UnknownTrial {
            experiment_id: experiment.experiment_id.clone(),
            trial_id,
        })?;
        if trial.is_terminal() {
            // T-Terminal-Immutable: a terminal trial never changes status again.
            return Ok(());
        }
        trial.status = status;
        if status.is_completed() {
            trial.ts_end = Some(truncate_micros(ts));
        }
        if let Some(metrics) = metrics {
            if status.is_succeeded() {
                trial.results = metrics;
            }
        }
        Ok(())
    }

    fn assign_trial_runner(
        &self,
        experiment: &Experiment,
        trial_id: i64,
        trial_runner_id: &str,
    ) -> StorageResult<()> {
        let mut state = self.state.lock();
        let key = (experiment.experiment_id.clone(), trial_id);
        let trial = state.trials.get_mut(&key).ok_or_else(|| StorageError::UnknownTrial {
            experiment_id: experiment.experiment_id.clone(),
            trial_id,
        })?;
        trial.trial_runner_id = Some(trial_runner_id.to_string());
        Ok(())
    }

    fn append_telemetry(
        &self,
        experiment: &Experiment,
        trial_id: i64,
        _status: Status,
        ts: DateTime<Utc>,
        triples: &[(DateTime<Utc>, String, f64)],
    ) -> StorageResult<()> {
        let mut state = self.state.lock();
        let key = (experiment.experiment_id.clone(), trial_id);
        let trial = state.trials.get_mut(&key).ok_or_else(|| StorageError::UnknownTrial {
            experiment_id: experiment.experiment_id.clone(),
            trial_id,
        })?;
        for (t, metric, value) in triples {
            trial.telemetry.push(crate::model::TelemetryPoint {
                ts: truncate_micros(*t),
                metric: metric.clone(),
                value: *value,
            });
        }
        trial.telemetry.sort_by(|a, b| a.ts.cmp(&b.ts).then_with(|| a.metric.cmp(&b.metric)));
        let _ = ts;
        Ok(())
    }

    fn merge_experiments(
        &self,
        experiment: &Experiment,
        other_experiment_ids: &[String],
    ) -> StorageResult<Vec<Trial>> {
        let state = self.state.lock();
        let mut out = Vec::new();
        for other_id in other_experiment_ids {
            let other = state
                .experiments
                .get(other_id)
                .ok_or_else(|| StorageError::UnknownExperiment(other_id.clone()))?;
            if other.tunable_signature != experiment.tunable_signature {
                return Err(StorageError::IncompatibleResume {
                    experiment_id: other_id.clone(),
                    reason: "tunable signature differs, cannot merge".to_string(),
                });
            }
            out.extend(
                state
                    .trials
                    .values()
                    .filter(|t| &t.experiment_id == other_id)
                    .cloned(),
            );
        }
        out.sort_by_key(|t| t.trial_id);
        Ok(out)
    }

    fn get_trial(&self, experiment: &Experiment, trial_id: i64) -> StorageResult<Trial> {
        let state = self.state.lock();
        state
            .trials
            .get(&(experiment.experiment_id.clone(), trial_id))
            .cloned()
            .ok_or_else(|| StorageError::UnknownTrial {
                experiment_id: experiment.experiment_id.clone(),
                trial_id,
            })
    }
}

/// Best-effort `git rev-parse`/`git remote get-url origin` lookup run from
/// the directory containing `root_env_config`. Failure is never fatal —
/// both fields are simply left `None`.
fn capture_git_info(root_env_config: &str) -> (Option<String>, Option<String>) {
    let dir = std::path::Path::new(root_env_config)
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| std::path::PathBuf::from("."));

    let run = |args: &[&str]| -> Option<String> {
        let output = std::process::Command::new("git").args(args).current_dir(&dir).output().ok()?;
        if !output.status.success() {
            return None;
        }
        let s = String::from_utf8(output.stdout).ok()?.trim().to_string();
        if s.is_empty() {
            None
        } else {
            Some(s)
        }
    };

    let commit = run(&["rev-parse", "HEAD"]);
    let repo = run(&["remote", "get-url", "origin"]);
    (repo, commit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ab_core::{CovariantGroup, NumericTunableSpec, ObjectiveDirection, Tunable, TunableValue};

    fn tunables() -> TunableGroups {
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
            meta: BTreeMap::new(),
        })
        .unwrap();
        let mut tg = TunableGroups::new();
        tg.add_group(CovariantGroup::new("g", 1, vec![t])).unwrap();
        tg
    }

    fn objectives() -> ObjectiveMap {
        let mut m = ObjectiveMap::new();
        m.insert("score".to_string(), ObjectiveDirection::Min);
        m
    }

    #[test]
    fn trial_ids_are_strictly_ascending_from_start() {
        let storage = InMemoryStorage::new();
        let tg = tunables();
        let exp = storage
            .create_or_resume_experiment("E1", 1, "env.json", "d", &tg, &objectives())
            .unwrap();
        let t1 = storage.new_trial(&exp, &tg, None, BTreeMap::new()).unwrap();
        let t2 = storage.new_trial(&exp, &tg, None, BTreeMap::new()).unwrap();
        assert_eq!(t1.trial_id, 1);
        assert_eq!(t2.trial_id, 2);
    }

    #[test]
    fn terminal_trial_is_immutable() {
        let storage = InMemoryStorage::new();
        let tg = tunables();
        let exp = storage
            .create_or_resume_experiment("E1", 1, "env.json", "d", &tg, &objectives())
            .unwrap();
        let t = storage.new_trial(&exp, &tg, None, BTreeMap::new()).unwrap();
        let now = Utc::now();
        storage.update_trial(&exp, t.trial_id, Status::Succeeded, now, None).unwrap();
        storage.update_trial(&exp, t.trial_id, Status::Failed, now, None).unwrap();
        let reloaded = storage.get_trial(&exp, t.trial_id).unwrap();
        assert_eq!(reloaded.status, Status::Succeeded);
    }

    #[test]
    fn load_returns_only_terminal_trials_ascending() {
        let storage = InMemoryStorage::new();
        let tg = tunables();
        let exp = storage
            .create_or_resume_experiment("E1", 1, "env.json", "d", &tg, &objectives())
            .unwrap();
        let t1 = storage.new_trial(&exp, &tg, None, BTreeMap::new()).unwrap();
        let _t2 = storage.new_trial(&exp, &tg, None, BTreeMap::new()).unwrap();
        let now = Utc::now();
        storage.update_trial(&exp, t1.trial_id, Status::Succeeded, now, None).unwrap();

        let loaded = storage.load(&exp, 0).unwrap();
        assert_eq!(loaded.trial_ids, vec![1]);
        assert!(loaded.scores[0].is_some());
    }

    #[test]
    fn resume_with_incompatible_objectives_fails() {
        let storage = InMemoryStorage::new();
        let tg = tunables();
        storage
            .create_or_resume_experiment("E1", 1, "env.json", "d", &tg, &objectives())
            .unwrap();
        let mut other_obj = ObjectiveMap::new();
        other_obj.insert("score".to_string(), ObjectiveDirection::Max);
        let result = storage.create_or_resume_experiment("E1", 1, "env.json", "d", &tg, &other_obj);
        assert!(result.is_err());
    }

    #[test]
    fn config_dedup_returns_same_id_for_identical_assignment() {
        let storage = InMemoryStorage::new();
        let tg = tunables();
        let id1 = storage.get_or_insert_config(&tg).unwrap();
        let id2 = storage.get_or_insert_config(&tg).unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn config_values_round_trip_through_tunable_groups() {
        let storage = InMemoryStorage::new();
        let mut tg = tunables();
        tg.set("x", TunableValue::Int(7)).unwrap();
        let id = storage.get_or_insert_config(&tg).unwrap();

        let values = storage.get_config_values(id).unwrap();
        let mut reconstructed = tunables();
        reconstructed.assign_from_canonical(&values).unwrap();
        assert_eq!(reconstructed.get("x"), Some(TunableValue::Int(7)));
    }

    #[test]
    fn get_config_values_rejects_unknown_id() {
        let storage = InMemoryStorage::new();
        assert!(storage.get_config_values(999).is_err());
    }
}
