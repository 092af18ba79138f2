//! Error types for awardsync.
//!
//! Library crates use [`AwardSyncError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all awardsync operations.
#[derive(Debug, thiserror::Error)]
pub enum AwardSyncError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// The search endpoint answered with a non-success status.
    #[error("search request failed with HTTP {status}: {body}")]
    Fetch { status: u16, body: String },

    /// Transport failure before any response status was received.
    #[error("network error: {0}")]
    Network(String),

    /// A response body could not be decoded.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Bearer token acquisition failed.
    #[error("auth error: {0}")]
    Auth(String),

    /// A sink rejected or failed to persist a batch.
    #[error("sink error ({sink}): {message}")]
    Sink { sink: String, message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad date window, empty filter set, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, AwardSyncError>;

impl AwardSyncError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an auth error from any displayable message.
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    /// Create a sink error tagged with the sink's name.
    pub fn sink(sink: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Sink {
            sink: sink.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
