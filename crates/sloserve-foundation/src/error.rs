//! Error types of the execution layer.

use sloserve_kernel::{Application, ConfigError, TransportError};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// A remote call that did not produce a usable result.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Timeout, transport failure or unreadable reply
    #[error("Remote endpoint {endpoint} not responding: {reason}")]
    NotResponding { endpoint: String, reason: String },

    /// The payload kind does not match what the endpoint accepts
    #[error("Payload mismatch for {endpoint}: expected {expected} input")]
    PayloadMismatch {
        endpoint: String,
        expected: Application,
    },

    #[error("Remote client is shut down")]
    Closed,
}

impl RemoteError {
    pub(crate) fn not_responding(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Self::NotResponding {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Model-level failures.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("No variants available for application {0}")]
    NoVariants(Application),
}

pub type ModelResult<T> = Result<T, ModelError>;

/// Scheduler construction and admission failures.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Request queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Scheduler is shut down")]
    ShutDown,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport setup failed: {0}")]
    Transport(#[from] TransportError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
