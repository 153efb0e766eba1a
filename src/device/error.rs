//! Device error types.

use thiserror::Error;

/// Error type for device control-plane operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Transport-level failure (connection refused, timeout, TLS, ...).
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The device answered with a non-success HTTP status.
    #[error("Device returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The device answered but the body was not what we expected.
    #[error("Unexpected device response: {0}")]
    InvalidResponse(String),

    /// Anything else (used by test doubles for injected failures).
    #[error("{0}")]
    Other(String),
}
