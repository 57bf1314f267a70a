use ab_storage::Trial;

/// Picks which configured trial runner (by index into the scheduler's
/// runner list) should execute the next pending trial (spec §4.6
/// `run_schedule`: "pick a runner via `assign_trial_runner`"). The
/// source lets a `Scheduler` subclass override this; re-architected per
/// spec §9 ("polymorphism over environments / optimizers / services")
/// as an injectable strategy object rather than inheritance.
pub trait RunnerAssignmentPolicy: Send {
    fn assign(&mut self, trial: &Trial, num_runners: usize) -> usize;
}

/// Default policy: round-robin across the configured runners, advancing
/// once per trial assigned regardless of which optimizer suggestion it
/// came from (spec §8 scenario 6).
#[derive(Debug, Default)]
pub struct RoundRobinAssignment {
    next: usize,
}

impl RoundRobinAssignment {
    pub fn new() -> Self {
        RoundRobinAssignment::default()
    }
}

impl RunnerAssignmentPolicy for RoundRobinAssignment {
    fn assign(&mut self, _trial: &Trial, num_runners: usize) -> usize {
        let idx = self.next % num_runners.max(1);
        self.next = self.next.wrapping_add(1);
        idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ab_core::Status;
    use std::collections::BTreeMap;

    fn trial(trial_id: i64) -> Trial {
        Trial {
            experiment_id: "E1".to_string(),
            trial_id,
            config_id: 1,
            trial_runner_id: None,
            status: Status::Pending,
            ts_start: None,
            ts_end: None,
            config_map: BTreeMap::new(),
            results: BTreeMap::new(),
            telemetry: Vec::new(),
        }
    }

    #[test]
    fn round_robin_cycles_across_runners() {
        let mut policy = RoundRobinAssignment::new();
        let assigned: Vec<usize> = (1..=5).map(|id| policy.assign(&trial(id), 3)).collect();
        assert_eq!(assigned, vec![0, 1, 2, 0, 1]);
    }
}
