use ab_core::AbError;
use thiserror::Error;

/// Environment/Trial-Runner error kinds. Transient errors (classified by
/// `is_transient`) are retried by `retry::with_backoff`; everything else
/// is permanent.
#[derive(Error, Debug)]
pub enum EnvironmentError {
    #[error("missing required parameter '{name}' for environment '{environment}'")]
    MissingRequiredParam { environment: String, name: String },

    #[error("environment setup failed: {0}")]
    SetupFailed(String),

    #[error("environment I/O failed: {0}")]
    Io(String),

    #[error("invalid environment state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("trial timed out after {timeout_secs}s")]
    TimedOut { timeout_secs: u64 },

    #[error("internal environment error: {0}")]
    Internal(String),
}

impl EnvironmentError {
    /// Whether this error should be retried with backoff (spec §5 Retry
    /// discipline) rather than surfaced as a permanent `Failed` trial.
    pub fn is_transient(&self) -> bool {
        matches!(self, EnvironmentError::Io(_))
    }
}

pub type EnvResult<T> = Result<T, EnvironmentError>;

impl From<EnvironmentError> for AbError {
    fn from(e: EnvironmentError) -> Self {
        match e {
            EnvironmentError::MissingRequiredParam { environment, name } => {
                AbError::MissingRequiredParam { environment, name }
            }
            EnvironmentError::SetupFailed(message) => AbError::EnvironmentSetupFailed { message },
            EnvironmentError::TimedOut { timeout_secs } => AbError::TrialTimedOut { timeout_secs },
            other => AbError::Internal(other.to_string()),
        }
    }
}
