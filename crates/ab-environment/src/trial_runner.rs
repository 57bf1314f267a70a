use crate::environment::{Environment, GlobalConfig};
use crate::error::{EnvResult, EnvironmentError};
use ab_core::{ScoreMap, Status, TunableGroups};
use ab_storage::{Experiment, Storage, Trial};
use chrono::Utc;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

/// Binds one [`Environment`] instance to a stable runner id and executes a
/// single [`Trial`] end-to-end (spec C7).
pub struct TrialRunner {
    trial_runner_id: String,
    environment: Box<dyn Environment>,
}

/// Poll-loop parameters for the `status()` phase of `execute`.
#[derive(Debug, Clone, Copy)]
pub struct PollSchedule {
    pub interval: Duration,
    /// `None` means no deadline: poll until a terminal status.
    pub timeout: Option<Duration>,
}

impl Default for PollSchedule {
    fn default() -> Self {
        PollSchedule {
            interval: Duration::from_millis(50),
            timeout: None,
        }
    }
}

struct RunOutcome {
    status: Status,
    metrics: Option<ScoreMap>,
}

impl TrialRunner {
    pub fn new(trial_runner_id: impl Into<String>, environment: Box<dyn Environment>) -> Self {
        TrialRunner {
            trial_runner_id: trial_runner_id.into(),
            environment,
        }
    }

    pub fn id(&self) -> &str {
        &self.trial_runner_id
    }

    /// Defensive teardown for a runner that is not mid-trial (`execute`
    /// already tears down and exits context on every path, so this only
    /// matters for a runner that was configured but never assigned a
    /// trial). Idempotent; called by the scheduler on exit when
    /// `do_teardown` is set.
    pub fn teardown_idle(&mut self) -> EnvResult<()> {
        self.environment.enter_context()?;
        let teardown_result = self.environment.teardown();
        let exit_result = self.environment.exit_context();
        teardown_result?;
        exit_result?;
        Ok(())
    }

    /// Executes `trial` end to end: enter context, setup, run, poll to
    /// terminal or timeout, teardown, exit context. Teardown and
    /// exit-context always run — even when setup/run panics or errors —
    /// matching spec §4.3 step 5 ("always; inside a guaranteed-release
    /// scope").
    pub fn execute(
        &mut self,
        storage: &dyn Storage,
        experiment: &Experiment,
        trial: &Trial,
        tunables: &TunableGroups,
        global_config: &GlobalConfig,
        schedule: PollSchedule,
    ) -> EnvResult<Status> {
        storage
            .assign_trial_runner(experiment, trial.trial_id, &self.trial_runner_id)
            .map_err(|e| EnvironmentError::Internal(e.to_string()))?;

        self.environment.enter_context()?;

        let env = AssertUnwindSafe(&mut *self.environment);
        let outcome = catch_unwind(move || {
            run_and_poll(env.0, storage, experiment, trial, tunables, global_config, schedule)
        });

        let final_status = match outcome {
            Ok(Ok(RunOutcome { status, metrics })) => {
                storage
                    .update_trial(experiment, trial.trial_id, status, Utc::now(), metrics)
                    .map_err(|e| EnvironmentError::Internal(e.to_string()))?;
                status
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, trial_id = trial.trial_id, "trial failed");
                let status = if matches!(e, EnvironmentError::TimedOut { .. }) {
                    Status::TimedOut
                } else {
                    Status::Failed
                };
                storage
                    .update_trial(experiment, trial.trial_id, status, Utc::now(), None)
                    .map_err(|e| EnvironmentError::Internal(e.to_string()))?;
                status
            }
            Err(panic) => {
                tracing::error!(panic = %panic_message(&panic), trial_id = trial.trial_id, "trial panicked");
                storage
                    .update_trial(experiment, trial.trial_id, Status::Failed, Utc::now(), None)
                    .map_err(|e| EnvironmentError::Internal(e.to_string()))?;
                Status::Failed
            }
        };

        let teardown_result = self.environment.teardown();
        let exit_result = self.environment.exit_context();
        teardown_result?;
        exit_result?;

        Ok(final_status)
    }
}

fn run_and_poll(
    environment: &mut dyn Environment,
    storage: &dyn Storage,
    experiment: &Experiment,
    trial: &Trial,
    tunables: &TunableGroups,
    global_config: &GlobalConfig,
    schedule: PollSchedule,
) -> EnvResult<RunOutcome> {
    if !environment.setup(tunables, global_config)? {
        return Err(EnvironmentError::SetupFailed(format!(
            "environment '{}' could not reach Ready",
            environment.name()
        )));
    }

    let (status, ts, metrics) = environment.run()?;
    append_telemetry(storage, experiment, trial.trial_id, status, ts, &[]);
    if status.is_completed() {
        return Ok(RunOutcome { status, metrics });
    }

    let start = Instant::now();
    loop {
        if let Some(timeout) = schedule.timeout {
            if start.elapsed() >= timeout {
                return Err(EnvironmentError::TimedOut {
                    timeout_secs: timeout.as_secs(),
                });
            }
        }
        std::thread::sleep(schedule.interval);
        let (polled_status, ts, telemetry) = environment.status()?;
        append_telemetry(storage, experiment, trial.trial_id, polled_status, ts, &telemetry);
        if polled_status.is_completed() {
            return Ok(RunOutcome {
                status: polled_status,
                metrics: None,
            });
        }
    }
}

fn append_telemetry(
    storage: &dyn Storage,
    experiment: &Experiment,
    trial_id: i64,
    status: Status,
    ts: chrono::DateTime<Utc>,
    triples: &[(chrono::DateTime<Utc>, String, f64)],
) {
    if triples.is_empty() {
        return;
    }
    if let Err(e) = storage.append_telemetry(experiment, trial_id, status, ts, triples) {
        tracing::warn!(error = %e, trial_id, "failed to append telemetry");
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockEnvironment, MockScript};
    use ab_core::{CovariantGroup, NumericTunableSpec, ObjectiveDirection, ObjectiveMap, Tunable, TunableValue};
    use ab_storage::InMemoryStorage;
    use std::collections::BTreeMap;

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
    fn successful_trial_persists_succeeded_with_metrics() {
        let storage = InMemoryStorage::new();
        let tg = tunables();
        let exp = storage
            .create_or_resume_experiment("E1", 1, "env.json", "d", &tg, &objectives())
            .unwrap();
        let trial = storage.new_trial(&exp, &tg, None, BTreeMap::new()).unwrap();

        let mut metrics = ScoreMap::new();
        metrics.insert("score".to_string(), 1.5);
        let script = MockScript {
            run_metrics: Some(metrics),
            ..Default::default()
        };
        let mut runner = TrialRunner::new("runner-0", Box::new(MockEnvironment::new("mock", script)));
        let status = runner
            .execute(&storage, &exp, &trial, &tg, &GlobalConfig::new(), PollSchedule::default())
            .unwrap();
        assert_eq!(status, Status::Succeeded);

        let reloaded = storage.get_trial(&exp, trial.trial_id).unwrap();
        assert_eq!(reloaded.status, Status::Succeeded);
        assert_eq!(reloaded.results.get("score"), Some(&1.5));
    }

    #[test]
    fn failed_setup_marks_trial_failed() {
        let storage = InMemoryStorage::new();
        let tg = tunables();
        let exp = storage
            .create_or_resume_experiment("E1", 1, "env.json", "d", &tg, &objectives())
            .unwrap();
        let trial = storage.new_trial(&exp, &tg, None, BTreeMap::new()).unwrap();

        let script = MockScript {
            setup_succeeds: false,
            ..Default::default()
        };
        let mut runner = TrialRunner::new("runner-0", Box::new(MockEnvironment::new("mock", script)));
        let status = runner
            .execute(&storage, &exp, &trial, &tg, &GlobalConfig::new(), PollSchedule::default())
            .unwrap();
        assert_eq!(status, Status::Failed);

        let reloaded = storage.get_trial(&exp, trial.trial_id).unwrap();
        assert_eq!(reloaded.status, Status::Failed);
    }

    #[test]
    fn timeout_marks_trial_timed_out() {
        let storage = InMemoryStorage::new();
        let tg = tunables();
        let exp = storage
            .create_or_resume_experiment("E1", 1, "env.json", "d", &tg, &objectives())
            .unwrap();
        let trial = storage.new_trial(&exp, &tg, None, BTreeMap::new()).unwrap();

        let script = MockScript {
            run_status: Status::Running,
            status_polls: vec![crate::mock::MockStatusPoll {
                status: Status::Running,
                metrics: vec![],
            }],
            ..Default::default()
        };
        let mut runner = TrialRunner::new("runner-0", Box::new(MockEnvironment::new("mock", script)));
        let schedule = PollSchedule {
            interval: Duration::from_millis(1),
            timeout: Some(Duration::from_millis(5)),
        };
        let status = runner.execute(&storage, &exp, &trial, &tg, &GlobalConfig::new(), schedule).unwrap();
        assert_eq!(status, Status::TimedOut);
    }
}
