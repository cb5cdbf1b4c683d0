//! Core error types for leapband-core.
//!
//! This module defines the error hierarchy using thiserror. Conditions the
//! caller is expected to handle as normal outcomes (same-day streak re-entry,
//! an already-assigned goal, an already-unlocked incentive) are not errors;
//! they are modeled as explicit result values on the component APIs.

use thiserror::Error;

use crate::model::{ActivityId, UserId};

/// Core error type for leapband-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Store-related errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Referenced user does not exist
    #[error("User {id} not found")]
    UserNotFound { id: UserId },

    /// Referenced activity does not exist
    #[error("Activity {id} not found")]
    ActivityNotFound { id: ActivityId },

    /// A mean score fell outside every configured adjustment range.
    ///
    /// The adjustment table must partition [0, 100], so this only occurs
    /// with a table that bypassed [`crate::config::EngineConfig::validate`].
    #[error("Score {score} matched no adjustment range")]
    AdjustmentTableGap { score: f64 },

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Store-specific errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A unique constraint was violated
    #[error("Constraint violated: {0}")]
    ConstraintViolated(String),

    /// Store backend is locked
    #[error("Store is locked")]
    Locked,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

/// Validation errors for public operation inputs.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Numeric value outside its permitted range
    #[error("Value {value} for '{field}' out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: &'static str, message: String },
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, msg) => match code.code {
                rusqlite::ErrorCode::DatabaseLocked => StoreError::Locked,
                rusqlite::ErrorCode::ConstraintViolation => StoreError::ConstraintViolated(
                    msg.clone().unwrap_or_else(|| code.to_string()),
                ),
                _ => StoreError::QueryFailed(err.to_string()),
            },
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
