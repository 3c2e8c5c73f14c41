//! Error types for Gatebench

use std::io;
use thiserror::Error;

/// Result type for Gatebench operations
pub type Result<T> = std::result::Result<T, BenchError>;

/// Errors that can occur in Gatebench
#[derive(Debug, Error)]
pub enum BenchError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid fixture file format
    #[error("Invalid fixture format: {0}")]
    InvalidFormat(String),

    /// Frame or payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Fixture file not found
    #[error("Fixture file not found: {0}")]
    FixtureNotFound(String),

    /// Fixture was captured with a different configuration than requested
    #[error("Fixture mismatch: {field} is {found}, run requested {expected}")]
    FixtureMismatch {
        /// Mismatched setting
        field: &'static str,
        /// Value requested by the run
        expected: String,
        /// Value recorded in the fixture
        found: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Optional capabilities do not match the requested run
    #[error("Environment mismatch: {0}")]
    Environment(String),

    /// WebSocket transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Replay did not reach the expected event count in time
    #[error("Replay stalled after {processed} of {expected} events")]
    Stalled {
        /// Events counted when the run gave up
        processed: u64,
        /// Events the run was waiting for
        expected: u64,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}
