//! Error types for slotsync.

use thiserror::Error;

/// Result type alias using slotsync's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for slotsync.
#[derive(Error, Debug)]
pub enum Error {
    // Driver errors
    #[error("Audio driver error during {operation}: {reason}")]
    Driver {
        operation: &'static str,
        reason: String,
    },

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Format mismatch: expected {expected}, got {actual}")]
    FormatMismatch { expected: String, actual: String },

    // Resource errors
    #[error("Allocation failed: {0}")]
    Allocation(String),

    // Caller errors
    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Stream is closed")]
    Closed,

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build a driver-contract error for the named operation.
    pub fn driver(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Driver {
            operation,
            reason: reason.into(),
        }
    }

    /// Returns true if the error came from the audio driver.
    pub const fn is_driver_failure(&self) -> bool {
        matches!(self, Self::Driver { .. })
    }

    /// Returns true if the stream cannot be used after this error.
    ///
    /// Caller mistakes (a short buffer, a bad offset, a foreign format) leave
    /// the stream usable; everything else should be treated as fatal.
    pub const fn is_fatal_to_stream(&self) -> bool {
        !matches!(
            self,
            Self::BufferTooSmall { .. } | Self::InvalidArgument(_) | Self::FormatMismatch { .. }
        )
    }
}
