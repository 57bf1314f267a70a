/// Scheduler configuration surface (SPEC_FULL §4.6), built with the
/// teacher's `OptimizationConfig::new().with_*()` idiom rather than a
/// struct literal with every field spelled out at each call site.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub experiment_id: String,
    pub description: String,
    pub root_env_config: String,
    pub start_trial_id: i64,
    pub trial_config_repeat_count: u32,
    /// `<= 0` means unbounded.
    pub max_trials: i64,
    pub do_teardown: bool,
}

impl SchedulerConfig {
    pub fn new(experiment_id: impl Into<String>, root_env_config: impl Into<String>) -> Self {
        SchedulerConfig {
            experiment_id: experiment_id.into(),
            description: String::new(),
            root_env_config: root_env_config.into(),
            start_trial_id: 1,
            trial_config_repeat_count: 1,
            max_trials: 0,
            do_teardown: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_start_trial_id(mut self, start_trial_id: i64) -> Self {
        self.start_trial_id = start_trial_id;
        self
    }

    pub fn with_trial_config_repeat_count(mut self, count: u32) -> Self {
        self.trial_config_repeat_count = count.max(1);
        self
    }

    pub fn with_max_trials(mut self, max_trials: i64) -> Self {
        self.max_trials = max_trials;
        self
    }

    pub fn with_do_teardown(mut self, do_teardown: bool) -> Self {
        self.do_teardown = do_teardown;
        self
    }
}
