//! Error types for rebal

use thiserror::Error;

/// Main error type for rebal
#[derive(Error, Debug)]
pub enum RebalError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The snapshot references something incomplete or self-contradictory
    #[error("Input inconsistency: {0}")]
    InputInconsistency(String),

    /// A committed assignment does not match its state model requirement
    #[error("State model violation: {0}")]
    StateModelViolation(String),

    /// A node ledger refused an assignment or release
    #[error("Capacity error: {0}")]
    Capacity(String),

    /// The computation was cancelled or ran past its deadline
    #[error("Rebalance cancelled: {0}")]
    Cancelled(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for rebal operations
pub type RebalResult<T> = Result<T, RebalError>;

impl From<serde_json::Error> for RebalError {
    fn from(err: serde_json::Error) -> Self {
        RebalError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for RebalError {
    fn from(err: toml::de::Error) -> Self {
        RebalError::Config(err.to_string())
    }
}
