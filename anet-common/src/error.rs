//! Common error types for ANET

use thiserror::Error;

/// Common result type for ANET operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the ANET engine
///
/// Authorization denials are not errors; they are returned as values by the
/// authorization engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed identifier read from storage or input
    #[error("Invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    /// Configuration error: missing default organization, unknown recurrence,
    /// malformed assessment link shape, empty mandatory approval chain
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transition attempted from a state the report is not in
    #[error("State conflict: {0}")]
    StateConflict(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Actor is not permitted to perform a lifecycle or item operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A bulk query partition failed; every caller waiting on it receives this
    #[error("Batch load failed in {loader}: {reason}")]
    BatchLoad {
        /// Loader name
        loader: &'static str,
        /// Underlying failure
        reason: String,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for the configuration class of errors
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// True when a transition lost against the current report state
    pub fn is_state_conflict(&self) -> bool {
        matches!(self, Error::StateConflict(_))
    }
}
