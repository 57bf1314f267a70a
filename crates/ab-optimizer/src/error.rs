use ab_core::AbError;
use thiserror::Error;

/// Optimizer error kinds (spec §7).
#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error("optimizer could not produce a guided suggestion: {0}")]
    UnableToProduceGuidedSuggestion(String),

    #[error("optimizer configuration error: {0}")]
    Config(String),

    #[error("internal optimizer error: {0}")]
    Internal(String),
}

pub type OptResult<T> = Result<T, OptimizerError>;

impl From<OptimizerError> for AbError {
    fn from(e: OptimizerError) -> Self {
        match e {
            OptimizerError::UnableToProduceGuidedSuggestion(reason) => {
                AbError::UnableToProduceGuidedSuggestion { reason }
            }
            OptimizerError::Config(message) => AbError::Config(message),
            OptimizerError::Internal(message) => AbError::Internal(message),
        }
    }
}
