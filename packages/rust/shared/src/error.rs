//! Error types for lineage.
//!
//! Library crates use [`LineageError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all lineage operations.
#[derive(Debug, thiserror::Error)]
pub enum LineageError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to an external paper source.
    #[error("network error: {0}")]
    Network(String),

    /// A paper could not be obtained from the ingest source.
    #[error("fetch error for {identity}: {message}")]
    Fetch { identity: String, message: String },

    /// The extraction producer failed (bridge, protocol, or response parsing).
    #[error("extraction error: {0}")]
    Extraction(String),

    /// Rendering a validated record into an artifact failed.
    #[error("render error: {0}")]
    Render(String),

    /// The recursion state file could not be read or written.
    #[error("state I/O error at {path:?}: {source}")]
    StateIo {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An external call exceeded its time budget.
    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: String, secs: u64 },

    /// The run was cancelled before the operation completed.
    #[error("cancelled")]
    Cancelled,

    /// A worker task panicked or was aborted.
    #[error("worker task failed: {0}")]
    Worker(String),

    /// Parsing of an identifier or external payload failed.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Data validation error outside the knowledge record validator.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LineageError>;

impl LineageError {
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

    /// Create a fetch error for the given identity.
    pub fn fetch(identity: impl std::fmt::Display, msg: impl Into<String>) -> Self {
        Self::Fetch {
            identity: identity.to_string(),
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

    /// Wrap a `std::io::Error` raised while persisting recursion state.
    pub fn state_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StateIo {
            path: path.into(),
            source,
        }
    }

    /// Errors that must abort a run instead of being recorded per paper.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StateIo { .. } | Self::Storage(_) | Self::Worker(_))
    }
}
