//! Core error types for studytrack-core.
//!
//! This module defines the error hierarchy using thiserror. Timer
//! operations report [`TimerError`]; snapshot storage reports
//! [`PersistenceError`], which the engine logs and swallows; the session
//! gateway reports [`GatewayError`]. [`CoreError`] aggregates all of them
//! for callers that just want to bubble things up.

use std::path::PathBuf;
use thiserror::Error;

use crate::timer::TimerStatus;

/// Core error type for studytrack-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Timer state machine errors
    #[error("Timer error: {0}")]
    Timer(#[from] TimerError),

    /// Snapshot or history storage errors
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Remote session API errors
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors returned by timer operations.
#[derive(Error, Debug)]
pub enum TimerError {
    /// Invalid start configuration. Nothing changed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The remote session could not be opened. The engine is still idle.
    #[error("Could not open remote session: {0}")]
    Network(#[from] GatewayError),

    /// The remote session could not be closed. Local state has already
    /// been reset and the tracked duration was not recorded remotely.
    #[error("Session {remote_session_id} stopped locally but {duration_seconds}s were not saved remotely: {source}")]
    EndFailed {
        remote_session_id: i64,
        duration_seconds: u64,
        #[source]
        source: GatewayError,
    },

    /// Operation not allowed in the current status.
    #[error("Cannot {operation} while {status}")]
    InvalidTransition {
        operation: &'static str,
        status: TimerStatus,
    },

    /// A start request is already waiting on the session gateway.
    #[error("A session start is already in progress")]
    StartInFlight,

    /// The pending start was abandoned before the gateway answered.
    #[error("The session start was cancelled")]
    StartAbandoned,

    /// The driving service is gone.
    #[error("Timer service unavailable: {0}")]
    ServiceClosed(String),
}

/// Snapshot and history storage errors. Never fatal to a running timer.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    Database(#[from] rusqlite::Error),

    /// Snapshot could not be encoded or decoded
    #[error("Snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored snapshot violates an invariant
    #[error("Corrupt snapshot: {0}")]
    Corrupt(String),

    /// Storage backend is unavailable
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Remote session API errors.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Request never produced a response
    #[error("Request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },

    /// Server answered with a non-success status
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// Response body was not what the API promises
    #[error("Unexpected response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    /// Base URL could not be joined with an endpoint path
    #[error("Invalid API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Data directory could not be resolved or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Validation errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    /// Countdown target outside the accepted range
    #[error("Countdown target must be between {min_minutes} and {max_minutes} minutes, got {seconds}s")]
    TargetOutOfRange {
        seconds: u64,
        min_minutes: u64,
        max_minutes: u64,
    },

    /// Countdown started without a target
    #[error("Countdown requires a target duration")]
    MissingTarget,

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        let endpoint = err
            .url()
            .map(|u| u.path().to_string())
            .unwrap_or_default();
        if err.is_decode() {
            GatewayError::Decode {
                endpoint,
                message: err.to_string(),
            }
        } else {
            GatewayError::Transport {
                endpoint,
                message: err.to_string(),
            }
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
