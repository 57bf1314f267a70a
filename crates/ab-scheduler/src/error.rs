use ab_core::AbError;
use ab_environment::EnvironmentError;
use ab_optimizer::OptimizerError;
use ab_storage::StorageError;
use thiserror::Error;

/// Scheduler error kinds (spec §7). Storage and configuration errors
/// unwind past `Scheduler::run`; Environment- and Optimizer-level errors
/// never reach here (the Trial Runner and `schedule_new_suggestions`
/// convert them into trial statuses or a fallback suggestion first).
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    #[error(transparent)]
    Optimizer(#[from] OptimizerError),

    #[error("scheduler configuration error: {0}")]
    Config(String),

    #[error("no trial runners configured")]
    NoRunners,

    #[error("internal scheduler error: {0}")]
    Internal(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl From<SchedulerError> for AbError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::Storage(inner) => inner.into(),
            SchedulerError::Environment(inner) => inner.into(),
            SchedulerError::Optimizer(inner) => inner.into(),
            other => AbError::Internal(other.to_string()),
        }
    }
}
