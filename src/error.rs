//! Error types for the memory monitor.
//!
//! Errors fall into two classes. Transient errors (a host counter could not
//! be read this tick) are absorbed by the loops, which keep the last good
//! value. Everything else is reported, either to the log or through a
//! [`ReclaimResult`](crate::types::ReclaimResult), and never stops monitoring.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Error type for monitor operations.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// A host counter could not be read this tick.
    #[error("transient read failure in '{source_name}': {message}")]
    TransientRead {
        /// The reader that failed.
        source_name: &'static str,
        /// Error message describing the failure.
        message: String,
    },

    /// The configuration file could not be read or written.
    #[error("configuration I/O error for {}: {source}", path.display())]
    ConfigIo {
        /// Path of the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Configuration parsing error with line number.
    #[error("configuration error at line {line}: {message}")]
    ConfigParse {
        /// Line number where the error occurred (1-indexed).
        line: usize,
        /// Error message describing the issue.
        message: String,
    },

    /// Invalid configuration value supplied through a user action.
    #[error("invalid configuration value for '{key}': {message}")]
    ConfigInvalid {
        /// The configuration key with invalid value.
        key: &'static str,
        /// Error message describing why the value is invalid.
        message: String,
    },

    /// A component was constructed with an unusable bound.
    #[error("invalid {what}: {value}")]
    InvalidBound {
        /// Which bound was rejected.
        what: &'static str,
        /// The rejected value, rendered.
        value: String,
    },

    /// The external reclaim action reported failure.
    #[error("reclaim failed: {0}")]
    ReclaimFailed(String),

    /// The external reclaim action did not finish in time.
    #[error("timeout")]
    ReclaimTimeout(Duration),

    /// Process vanished or could not be inspected.
    #[error("process {0} not found")]
    ProcessNotFound(u32),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl MonitorError {
    /// Returns true for errors the loops retry on the next tick.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientRead { .. } | Self::ProcessNotFound(_))
    }

    /// Returns true for reclaim failures, including timeouts.
    #[must_use]
    pub fn is_reclaim_failure(&self) -> bool {
        matches!(self, Self::ReclaimFailed(_) | Self::ReclaimTimeout(_))
    }
}

/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;
