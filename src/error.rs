//! Error handling for the saga orchestrator

use thiserror::Error;

/// Result type alias for saga operations
pub type Result<T> = std::result::Result<T, SagaError>;

/// Path of this module, recorded in wire error payloads as the origin namespace.
pub(crate) const ERROR_MODULE_PATH: &str = module_path!();

/// Main error type for the saga orchestrator
#[derive(Error, Debug)]
pub enum SagaError {
    #[error("invalid saga definition: {0}")]
    Definition(String),

    #[error("no step named \"{0}\"")]
    UnknownStep(String),

    #[error("step \"{0}\" is not a remote step")]
    NotRemote(String),

    #[error("no remote step matches reply task \"{0}\"")]
    UnroutableReply(String),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("handler already bound for task \"{0}\"")]
    HandlerAlreadyBound(String),

    #[error("repository error: {0}")]
    Repository(String),

    #[error("no saga state found for saga {0}")]
    StateNotFound(i64),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Action(#[from] anyhow::Error),
}

impl SagaError {
    /// Check if the error came out of the state repository rather than a step.
    ///
    /// Repository errors on the forward path propagate to the caller instead
    /// of starting a compensation cascade.
    pub fn is_repository(&self) -> bool {
        matches!(self, SagaError::Repository(_) | SagaError::StateNotFound(_))
    }

    /// Variant name, used as the `type` field of wire error payloads
    pub fn name(&self) -> &'static str {
        match self {
            SagaError::Definition(_) => "Definition",
            SagaError::UnknownStep(_) => "UnknownStep",
            SagaError::NotRemote(_) => "NotRemote",
            SagaError::UnroutableReply(_) => "UnroutableReply",
            SagaError::Broker(_) => "Broker",
            SagaError::HandlerAlreadyBound(_) => "HandlerAlreadyBound",
            SagaError::Repository(_) => "Repository",
            SagaError::StateNotFound(_) => "StateNotFound",
            SagaError::Serialization(_) => "Serialization",
            SagaError::Action(_) => "Action",
        }
    }

    /// Get error category for logging/metrics
    pub fn category(&self) -> &'static str {
        match self {
            SagaError::Definition(_) => "definition",
            SagaError::UnknownStep(_) => "unknown_step",
            SagaError::NotRemote(_) => "not_remote",
            SagaError::UnroutableReply(_) => "unroutable_reply",
            SagaError::Broker(_) => "broker",
            SagaError::HandlerAlreadyBound(_) => "broker",
            SagaError::Repository(_) => "repository",
            SagaError::StateNotFound(_) => "repository",
            SagaError::Serialization(_) => "serialization",
            SagaError::Action(_) => "action",
        }
    }
}
