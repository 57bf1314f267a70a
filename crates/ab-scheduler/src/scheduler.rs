use crate::assignment::{RoundRobinAssignment, RunnerAssignmentPolicy};
use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use ab_core::{ObjectiveMap, TunableGroups};
use ab_environment::{GlobalConfig, PollSchedule, TrialRunner};
use ab_optimizer::Optimizer;
use ab_storage::{Experiment, Storage, Trial};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation handle: checked at the next loop-iteration
/// boundary (spec §5 "Cancellation & timeouts"). In-flight trials still
/// run to completion or their own timeout.
#[derive(Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

fn objectives_snapshot(objectives: &ObjectiveMap) -> String {
    objectives
        .iter()
        .map(|(name, dir)| format!("{name}={}", if matches!(dir, ab_core::ObjectiveDirection::Max) { "max" } else { "min" }))
        .collect::<Vec<_>>()
        .join(",")
}

/// Closes the optimization loop (spec C10): suggest -> schedule repeats
/// -> assign runner -> run -> register -> persist -> check stopping.
/// Exclusively owns its optimizer, its storage handle, and its trial
/// runners for its lifetime (spec §3 Ownership).
pub struct Scheduler {
    storage: Box<dyn Storage>,
    optimizer: Box<dyn Optimizer>,
    runners: Vec<TrialRunner>,
    tunables_template: TunableGroups,
    objectives: ObjectiveMap,
    config: SchedulerConfig,
    global_config: GlobalConfig,
    assignment_policy: Box<dyn RunnerAssignmentPolicy>,
    poll_schedule: PollSchedule,
    experiment: Option<Experiment>,
    seed_tunables: Option<TunableGroups>,
    last_seen_trial_id: i64,
    trial_count: i64,
    cancel: CancelHandle,
}

impl Scheduler {
    pub fn new(
        storage: Box<dyn Storage>,
        optimizer: Box<dyn Optimizer>,
        runners: Vec<TrialRunner>,
        tunables_template: TunableGroups,
        objectives: ObjectiveMap,
        config: SchedulerConfig,
        global_config: GlobalConfig,
    ) -> Self {
        Scheduler {
            storage,
            optimizer,
            runners,
            tunables_template,
            objectives,
            config,
            global_config,
            assignment_policy: Box::new(RoundRobinAssignment::new()),
            poll_schedule: PollSchedule::default(),
            experiment: None,
            seed_tunables: None,
            last_seen_trial_id: 0,
            trial_count: 0,
            cancel: CancelHandle::default(),
        }
    }

    /// Overrides the default round-robin runner assignment (spec §4.6
    /// "subclasses may override `assign_trial_runner`").
    pub fn with_assignment_policy(mut self, policy: Box<dyn RunnerAssignmentPolicy>) -> Self {
        self.assignment_policy = policy;
        self
    }

    pub fn with_poll_schedule(mut self, schedule: PollSchedule) -> Self {
        self.poll_schedule = schedule;
        self
    }

    /// A caller-supplied tunable assignment (e.g. from `--tunable-values`)
    /// to seed the first trial with, instead of leaving the very first
    /// suggestion to the optimizer's own start-with-defaults handling.
    pub fn with_seed_tunables(mut self, tunables: TunableGroups) -> Self {
        self.seed_tunables = Some(tunables);
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Enters the scoped experiment context, seeds the initial trial (if
    /// any), and runs the loop until `not_done()` is false or the
    /// scheduler is canceled. Closes the experiment and (if configured)
    /// tears down every non-running runner on every exit path.
    pub fn start(&mut self) -> SchedulerResult<()> {
        let experiment = self.storage.create_or_resume_experiment(
            &self.config.experiment_id,
            self.config.start_trial_id,
            &self.config.root_env_config,
            &self.config.description,
            &self.tunables_template,
            &self.objectives,
        )?;
        self.last_seen_trial_id = experiment.start_trial_id - 1;
        self.trial_count = self.count_existing_trials(&experiment)?;
        self.experiment = Some(experiment);

        if let Some(seed) = self.seed_tunables.take() {
            self.schedule_trial(&seed.clone())?;
        }

        let result = self.run_loop();

        let teardown_result = if self.config.do_teardown {
            self.teardown_idle_runners()
        } else {
            Ok(())
        };

        result.and(teardown_result)
    }

    fn count_existing_trials(&self, experiment: &Experiment) -> SchedulerResult<i64> {
        let terminal = self.storage.load(experiment, experiment.start_trial_id - 1)?;
        let now = Utc::now();
        let pending = self.storage.pending_trials(experiment, now, true)?;
        Ok(terminal.len() as i64 + pending.len() as i64)
    }

    fn run_loop(&mut self) -> SchedulerResult<()> {
        while self.not_done() && !self.cancel.is_canceled() {
            self.schedule_new_suggestions()?;
            self.run_schedule()?;
        }
        Ok(())
    }

    /// `optimizer.not_converged() AND (max_trials <= 0 OR trial_count < max_trials)`.
    pub fn not_done(&self) -> bool {
        self.optimizer.not_converged() && (self.config.max_trials <= 0 || self.trial_count < self.config.max_trials)
    }

    fn experiment(&self) -> SchedulerResult<Experiment> {
        self.experiment.clone().ok_or_else(|| SchedulerError::Internal("scheduler has not been started".to_string()))
    }

    fn tunables_from_config(&self, config_id: i64) -> SchedulerResult<TunableGroups> {
        let values = self.storage.get_config_values(config_id)?;
        let mut tg = self.tunables_template.deep_copy();
        tg.assign_from_canonical(&values).map_err(|e| SchedulerError::Internal(e.to_string()))?;
        Ok(tg)
    }

    /// Loads every completed trial not yet seen by the optimizer,
    /// bulk-registers them, advances `last_seen_trial_id`, then — if the
    /// loop isn't done — asks the optimizer for a suggestion and
    /// schedules its repeats (spec §4.6 step 1).
    fn schedule_new_suggestions(&mut self) -> SchedulerResult<()> {
        let experiment = self.experiment()?;
        let loaded = self.storage.load(&experiment, self.last_seen_trial_id)?;
        if !loaded.is_empty() {
            let mut configs = Vec::with_capacity(loaded.len());
            for &config_id in &loaded.config_ids {
                configs.push(self.tunables_from_config(config_id)?);
            }
            self.optimizer.bulk_register(&configs, &loaded.scores, &loaded.statuses)?;
            if let Some(max_id) = loaded.max_trial_id() {
                self.last_seen_trial_id = self.last_seen_trial_id.max(max_id);
            }
        }
        if self.not_done() {
            let suggestion = self.optimizer.suggest();
            self.schedule_trial(&suggestion)?;
        }
        Ok(())
    }

    /// Creates `trial_config_repeat_count` trials that share a `config_id`
    /// but carry distinct `trial_id`s and a `repeat_i` field in their
    /// config-metadata map (spec §4.6 "Trial repeat policy").
    fn schedule_trial(&mut self, tunables: &TunableGroups) -> SchedulerResult<()> {
        let experiment = self.experiment()?;
        let is_defaults = tunables.is_defaults();
        for repeat_i in 0..self.config.trial_config_repeat_count {
            let mut config_map = BTreeMap::new();
            config_map.insert("optimizer".to_string(), self.optimizer.name().to_string());
            config_map.insert("repeat_i".to_string(), repeat_i.to_string());
            config_map.insert("is_defaults".to_string(), is_defaults.to_string());
            config_map.insert("objectives".to_string(), objectives_snapshot(&self.objectives));
            self.storage.new_trial(&experiment, tunables, None, config_map)?;
            self.trial_count += 1;
        }
        Ok(())
    }

    /// Iterates `pending_trials(now, include_running=false)`, assigns
    /// each unassigned trial a runner via the configured policy, and
    /// executes it. Runners with work fan out on a bounded
    /// `std::thread::scope` (spec SPEC_FULL §5 "Threading primitives").
    fn run_schedule(&mut self) -> SchedulerResult<()> {
        let experiment = self.experiment()?;
        if self.runners.is_empty() {
            return Err(SchedulerError::NoRunners);
        }
        let now = Utc::now();
        let pending = self.storage.pending_trials(&experiment, now, false)?;
        if pending.is_empty() {
            return Ok(());
        }

        let num_runners = self.runners.len();
        let mut by_runner: Vec<Vec<(Trial, TunableGroups)>> = (0..num_runners).map(|_| Vec::new()).collect();
        for trial in pending {
            if trial.trial_runner_id.is_some() {
                continue;
            }
            let tunables = self.tunables_from_config(trial.config_id)?;
            let idx = self.assignment_policy.assign(&trial, num_runners);
            by_runner[idx].push((trial, tunables));
        }

        let storage_ref = self.storage.as_ref();
        let global_config = &self.global_config;
        let schedule = self.poll_schedule;
        let mut slots: Vec<Option<&mut TrialRunner>> = self.runners.iter_mut().map(Some).collect();

        std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for (idx, work) in by_runner.into_iter().enumerate() {
                if work.is_empty() {
                    continue;
                }
                let runner = slots[idx].take().expect("each runner index is drained at most once");
                let experiment_ref = &experiment;
                handles.push(scope.spawn(move || {
                    for (trial, tunables) in work {
                        if let Err(e) = runner.execute(storage_ref, experiment_ref, &trial, &tunables, global_config, schedule) {
                            tracing::error!(error = %e, trial_id = trial.trial_id, "trial runner execution failed");
                        }
                    }
                }));
            }
            for handle in handles {
                let _ = handle.join();
            }
        });

        Ok(())
    }

    /// Tears down every runner whose environment is not currently
    /// running (spec §4.6 "On exit"). Runners are idempotent to
    /// teardown, so this is safe to call even on a runner that never
    /// executed a trial.
    fn teardown_idle_runners(&mut self) -> SchedulerResult<()> {
        for runner in &mut self.runners {
            if let Err(e) = runner.teardown_idle() {
                tracing::warn!(error = %e, runner = runner.id(), "runner teardown failed on scheduler exit");
            }
        }
        Ok(())
    }

    pub fn get_best_observation(&self) -> Option<(ab_core::ScoreMap, TunableGroups)> {
        self.optimizer.get_best_observation()
    }
}
