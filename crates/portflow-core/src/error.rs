//! Error handling for Portflow
//!
//! Provides the error types shared across the workspace:
//! - Transport errors (opening and writing to a device port)
//! - Configuration errors
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for Portflow
///
/// Represents failures in the transport and configuration layers. The flow
/// coordinator itself degrades through events and diagnostics instead of
/// returning errors; this type is used by the serial adapter and by callers
/// wiring the pieces together.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Write to port failed
    #[error("Write to port {port} failed: {reason}")]
    WriteFailed {
        /// The name of the port the write was addressed to.
        port: String,
        /// The reason the write failed.
        reason: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// The reason the configuration is invalid.
        reason: String,
    },

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a transport-level error
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Error::FailedToOpen { .. } | Error::WriteFailed { .. } | Error::Io(_)
        )
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
