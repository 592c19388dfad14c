use std::sync::Arc;

use phaseflow_core::CoreError;
use thiserror::Error;

/// Errors raised while registering phases or running them.
///
/// The type is `Clone` so a failure can be stored on the
/// [`ExecutionContext`](crate::ExecutionContext) and still be returned.
#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    #[error("Phase already exists: {0}")]
    DuplicatePhase(String),

    #[error("Phase not found: {0}")]
    PhaseNotFound(String),

    #[error("Phase id is reserved: {0}")]
    ReservedPhase(String),

    #[error("Chain already advanced: next() was called on a finished chain")]
    ChainAlreadyAdvanced,

    #[error("Ordering error: {0}")]
    Ordering(#[from] CoreError),

    #[error("Invalid run state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Handler failed: {0}")]
    Handler(Arc<dyn std::error::Error + Send + Sync>),
}

impl SchedulerError {
    /// Wrap an arbitrary handler failure.
    ///
    /// Accepts anything boxable as an error, including `&str` and `String`.
    pub fn handler(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Handler(Arc::from(error.into()))
    }

    /// Whether the error came from a handler rather than from the scheduler.
    pub fn is_handler_error(&self) -> bool {
        matches!(self, Self::Handler(_))
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
