//! Error types shared by transports and runtimes.

use thiserror::Error;

/// Failure of a single call to the proxy or an endpoint.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection to {target} failed: {message}")]
    Connection { target: String, message: String },

    #[error("{target} returned status {status}: {message}")]
    Status {
        target: String,
        status: u16,
        message: String,
    },

    #[error("Malformed reply from {target}: {message}")]
    Malformed { target: String, message: String },

    #[error("Request to {target} timed out")]
    Timeout { target: String },
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Failure reported by an on-device runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Model load failed: {0}")]
    LoadFailed(String),

    #[error("Model not loaded: {0}")]
    NotLoaded(String),

    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    #[error("Unsupported payload for {model}: {reason}")]
    UnsupportedPayload { model: String, reason: String },
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
