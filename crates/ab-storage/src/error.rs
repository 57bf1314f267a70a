use ab_core::AbError;
use thiserror::Error;

/// Storage-layer error kinds. Converts into [`AbError`] at crate
/// boundaries via `#[from]`, matching the other `ab-*` crates.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("resumed experiment '{experiment_id}' is incompatible with stored state: {reason}")]
    IncompatibleResume {
        experiment_id: String,
        reason: String,
    },

    #[error("no such experiment '{0}'")]
    UnknownExperiment(String),

    #[error("no such trial {experiment_id}/{trial_id}")]
    UnknownTrial {
        experiment_id: String,
        trial_id: i64,
    },

    #[error("no such config {0}")]
    UnknownConfig(i64),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal storage error: {0}")]
    Internal(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for AbError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::IncompatibleResume {
                experiment_id,
                reason,
            } => AbError::IncompatibleResume {
                experiment_id,
                reason,
            },
            StorageError::Unavailable(message) => AbError::StorageUnavailable { message },
            other => AbError::StorageUnavailable {
                message: other.to_string(),
            },
        }
    }
}
