use thiserror::Error;

/// Top-level error type for the autobench core.
#[derive(Error, Debug)]
pub enum AbError {
    #[error("invalid tunable '{tunable}': {reason}")]
    InvalidTunable { tunable: String, reason: String },

    #[error("resumed experiment '{experiment_id}' is incompatible with stored state: {reason}")]
    IncompatibleResume {
        experiment_id: String,
        reason: String,
    },

    #[error("missing required parameter '{name}' for environment '{environment}'")]
    MissingRequiredParam { environment: String, name: String },

    #[error("environment setup failed: {message}")]
    EnvironmentSetupFailed { message: String },

    #[error("trial timed out after {timeout_secs}s")]
    TrialTimedOut { timeout_secs: u64 },

    #[error("optimizer could not produce a guided suggestion: {reason}")]
    UnableToProduceGuidedSuggestion { reason: String },

    #[error("storage unavailable: {message}")]
    StorageUnavailable { message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for autobench core operations.
pub type AbResult<T> = Result<T, AbError>;

/// Helper trait for converting string errors, matching call sites that
/// bail out of a closure with a plain message.
pub trait IntoAbError {
    fn into_ab_error(self) -> AbError;
}

impl IntoAbError for String {
    fn into_ab_error(self) -> AbError {
        AbError::Internal(self)
    }
}

impl IntoAbError for &str {
    fn into_ab_error(self) -> AbError {
        AbError::Internal(self.to_string())
    }
}

#[macro_export]
macro_rules! invalid_tunable {
    ($tunable:expr, $($arg:tt)*) => {
        $crate::errors::AbError::InvalidTunable {
            tunable: $tunable.to_string(),
            reason: format!($($arg)*),
        }
    };
}

#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::errors::AbError::Internal(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = AbError::InvalidTunable {
            tunable: "max_connections".to_string(),
            reason: "default not in range".to_string(),
        };
        assert!(error.to_string().contains("max_connections"));
        assert!(error.to_string().contains("default not in range"));
    }

    #[test]
    fn test_macros() {
        let _err = invalid_tunable!("x", "value {} out of range", 42);
        let _internal = internal_error!("unexpected state");
    }
}
