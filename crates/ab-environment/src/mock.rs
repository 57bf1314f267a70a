use crate::environment::{Environment, GlobalConfig};
use crate::error::{EnvResult, EnvironmentError};
use crate::state::StateMachine;
use ab_core::{ScoreMap, Status, TunableGroups};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// One scripted telemetry poll: a status and the metrics observed since
/// the previous poll.
#[derive(Debug, Clone, Default)]
pub struct MockStatusPoll {
    pub status: Status,
    pub metrics: Vec<(String, f64)>,
}

/// Declarative per-phase script driving a [`MockEnvironment`] — grounded
/// on `mlos_bench.environments.mock_env`, used exclusively as a
/// stand-in target system in tests.
#[derive(Debug, Clone)]
pub struct MockScript {
    /// Whether `setup` succeeds the first time it is called.
    pub setup_succeeds: bool,
    /// The status `run` reports.
    pub run_status: Status,
    /// Metrics returned by `run` — only honored when `run_status` is
    /// `Succeeded` (the trait contract: metrics accompany terminal
    /// success only).
    pub run_metrics: Option<ScoreMap>,
    /// Simulated time spent in `run`, applied as a real sleep so tests
    /// can exercise timeout handling.
    pub run_sleep: Duration,
    /// Sequential telemetry polls consumed one per `status()` call; the
    /// last one repeats once exhausted.
    pub status_polls: Vec<MockStatusPoll>,
    /// Number of `run` calls that raise a transient I/O error before the
    /// scripted outcome is returned — exercises retry discipline.
    pub transient_failures_before_run: u32,
}

impl Default for MockScript {
    fn default() -> Self {
        MockScript {
            setup_succeeds: true,
            run_status: Status::Succeeded,
            run_metrics: Some(ScoreMap::new()),
            run_sleep: Duration::from_millis(0),
            status_polls: Vec::new(),
            transient_failures_before_run: 0,
        }
    }
}

/// A mock target-system [`Environment`] driven entirely by a
/// [`MockScript`]; no real resources are ever touched.
pub struct MockEnvironment {
    name: String,
    script: MockScript,
    state: StateMachine,
    poll_index: usize,
    run_attempts: u32,
}

impl MockEnvironment {
    pub fn new(name: impl Into<String>, script: MockScript) -> Self {
        MockEnvironment {
            name: name.into(),
            script,
            state: StateMachine::new(),
            poll_index: 0,
            run_attempts: 0,
        }
    }
}

impl Environment for MockEnvironment {
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
        if !self.script.setup_succeeds {
            return Ok(false);
        }
        self.state.mark_ready(hash);
        Ok(true)
    }

    fn run(&mut self) -> EnvResult<(Status, DateTime<Utc>, Option<ScoreMap>)> {
        self.state.require_ready("run")?;
        self.state.mark_running();
        if self.run_attempts < self.script.transient_failures_before_run {
            self.run_attempts += 1;
            return Err(EnvironmentError::Io(format!(
                "simulated transient failure ({}/{})",
                self.run_attempts, self.script.transient_failures_before_run
            )));
        }
        if !self.script.run_sleep.is_zero() {
            std::thread::sleep(self.script.run_sleep);
        }
        self.state.mark_ready_after_run();
        let metrics = if self.script.run_status.is_succeeded() {
            self.script.run_metrics.clone()
        } else {
            None
        };
        Ok((self.script.run_status, Utc::now(), metrics))
    }

    fn status(&mut self) -> EnvResult<(Status, DateTime<Utc>, Vec<(DateTime<Utc>, String, f64)>)> {
        if self.script.status_polls.is_empty() {
            return Ok((self.script.run_status, Utc::now(), Vec::new()));
        }
        let idx = self.poll_index.min(self.script.status_polls.len() - 1);
        let poll = &self.script.status_polls[idx];
        if self.poll_index < self.script.status_polls.len() {
            self.poll_index += 1;
        }
        let now = Utc::now();
        let triples = poll.metrics.iter().map(|(m, v)| (now, m.clone(), *v)).collect();
        Ok((poll.status, now, triples))
    }

    fn teardown(&mut self) -> EnvResult<()> {
        self.state.teardown();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ab_core::TunableGroups;

    #[test]
    fn setup_is_idempotent_for_identical_tunables() {
        let mut env = MockEnvironment::new("mock", MockScript::default());
        let tg = TunableGroups::new();
        env.enter_context().unwrap();
        assert!(env.setup(&tg, &GlobalConfig::new()).unwrap());
        assert!(env.setup(&tg, &GlobalConfig::new()).unwrap());
    }

    #[test]
    fn run_before_setup_is_invalid_state() {
        let mut env = MockEnvironment::new("mock", MockScript::default());
        env.enter_context().unwrap();
        let err = env.run();
        assert!(matches!(err, Err(EnvironmentError::InvalidState { .. })));
    }

    #[test]
    fn failed_setup_reports_false() {
        let script = MockScript {
            setup_succeeds: false,
            ..Default::default()
        };
        let mut env = MockEnvironment::new("mock", script);
        let tg = TunableGroups::new();
        env.enter_context().unwrap();
        assert!(!env.setup(&tg, &GlobalConfig::new()).unwrap());
    }

    #[test]
    fn run_returns_metrics_only_on_success() {
        let mut script = MockScript::default();
        script.run_status = Status::Failed;
        script.run_metrics = Some(ScoreMap::new());
        let mut env = MockEnvironment::new("mock", script);
        let tg = TunableGroups::new();
        env.enter_context().unwrap();
        env.setup(&tg, &GlobalConfig::new()).unwrap();
        let (status, _, metrics) = env.run().unwrap();
        assert_eq!(status, Status::Failed);
        assert!(metrics.is_none());
    }

    #[test]
    fn teardown_is_idempotent() {
        let mut env = MockEnvironment::new("mock", MockScript::default());
        env.enter_context().unwrap();
        env.teardown().unwrap();
        env.teardown().unwrap();
    }
}
