//! Common error types for caveat

use thiserror::Error;

/// Common result type for caveat operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the ingestion pipeline and its consumers
///
/// Hard pipeline failures map onto `Contract`, `Compat`, `Validation`,
/// `Promotion` and `LockHeld` so the operator can tell a bad input file from a
/// system fault. `Database`/`Io` wrap infrastructure errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Schema contract missing or unreadable
    #[error("Contract error: {0}")]
    Contract(String),

    /// Input file incompatible with the schema contract
    #[error("Schema compatibility error: {0}")]
    Compat(String),

    /// Hard validation failure; the batch must not be promoted
    #[error("Validation failure: {0}")]
    Validation(String),

    /// Promotion transaction failed and was rolled back
    #[error("Promotion error: {0}")]
    Promotion(String),

    /// Another pipeline run holds the run lock
    #[error("Run lock held: {0}")]
    LockHeld(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Pipeline stage to report for this error, for operator-facing messages
    pub fn stage(&self) -> &'static str {
        match self {
            Error::Contract(_) => "contract",
            Error::Compat(_) => "compatibility",
            Error::Validation(_) => "validation",
            Error::Promotion(_) => "promotion",
            Error::LockHeld(_) => "lock",
            Error::Config(_) => "config",
            Error::Database(_) | Error::Io(_) => "infrastructure",
            _ => "pipeline",
        }
    }
}
