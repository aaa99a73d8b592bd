//! Error types for loadchain.
//!
//! Library crates use [`LoadchainError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all loadchain operations.
#[derive(Debug, thiserror::Error)]
pub enum LoadchainError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A handler tried to use the response sink where it is not allowed to.
    ///
    /// This is a programming error, not a runtime condition.
    #[error("misuse: {message}")]
    Misuse { message: String },

    /// One or more loader tasks failed. Carries the rendered load report.
    #[error("load failed:\n{report}")]
    LoadFailed { report: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LoadchainError>;

impl LoadchainError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a misuse error from any displayable message.
    pub fn misuse(msg: impl Into<String>) -> Self {
        Self::Misuse {
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

    /// True for errors that indicate a bug in the calling handler.
    pub fn is_misuse(&self) -> bool {
        matches!(self, Self::Misuse { .. })
    }
}
