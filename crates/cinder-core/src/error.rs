//! Error model for the driver core.
//!
//! Errors never cross the pump boundary as `Result`s: public driver
//! operations are infallible. A failure is reified into the terminal state
//! and delivered to the application through per-write failure callbacks,
//! each carrying one of these reasons.

use thiserror::Error;

/// Reason a driver became unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// The underlying byte transport failed or ended unexpectedly.
    #[error("transport error: {0}")]
    Transport(String),

    /// The state machine reported a fatal protocol condition.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The state machine does not implement the requested capability.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// The connection already closed; the event was never processed.
    #[error("connection is closed")]
    Closed,
}

impl DriverError {
    /// Transport-level failure with a human-readable cause.
    pub fn transport(cause: impl Into<String>) -> Self {
        DriverError::Transport(cause.into())
    }

    /// Protocol-level failure with a human-readable cause.
    pub fn protocol(cause: impl Into<String>) -> Self {
        DriverError::Protocol(cause.into())
    }
}
