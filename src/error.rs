//! Error types for docpool.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A job-level failure.
///
/// These are the errors a capability raises while validating or running a
/// job. They are serializable so a worker can report them over the control
/// channel and the parent can re-raise them unchanged: a caller sees the same
/// value whether the job ran in-process or in a worker.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobError {
    #[error("{component} does not accept {kind} documents")]
    UnsupportedInput { component: String, kind: String },

    #[error("Page range {begin}..={end} is outside the document (1..={pages})")]
    InvalidPageRange { begin: u32, end: u32, pages: u32 },

    #[error("Invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },

    #[error("{component} cannot {call}")]
    UnsupportedCall { component: String, call: String },

    #[error("Expected output of {bytes} bytes exceeds the {limit} byte limit")]
    OutputTooLarge { bytes: u64, limit: u64 },

    #[error("Engine failure: {message}")]
    Engine { message: String },
}

impl JobError {
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }

    pub fn invalid_setting(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Main error type for docpool.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error("{0} cannot run as a standalone worker process")]
    StandaloneUnsupported(String),

    #[error("No free port in {host}:{low}-{high}")]
    NoPortAvailable { host: String, low: u16, high: u16 },

    #[error("Worker at {host}:{port} did not start listening within {}ms", timeout.as_millis())]
    ConnectTimeout {
        host: String,
        port: u16,
        timeout: Duration,
    },

    #[error("Worker raised an error: {message}")]
    RemoteInvocation { message: String },

    #[error("Control channel failure: {0}")]
    Transport(String),

    #[error("Failed to launch worker: {0}")]
    Launch(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PoolError {
    /// The job error, if this failure came from the job itself rather than
    /// from the pool machinery.
    pub fn as_job(&self) -> Option<&JobError> {
        match self {
            Self::Job(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type alias for docpool operations.
pub type Result<T> = std::result::Result<T, PoolError>;
