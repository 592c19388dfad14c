use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Order conflict: '{value}' cannot be placed after '{prev}'")]
    OrderConflict { value: String, prev: String },

    #[error("Unknown sub-phase in handler name: {0}")]
    UnknownSubPhase(String),
}

impl CoreError {
    /// Create an order conflict error.
    pub fn conflict(value: impl Into<String>, prev: impl Into<String>) -> Self {
        Self::OrderConflict {
            value: value.into(),
            prev: prev.into(),
        }
    }
}
