//! Error types for the openness crawler.
//!
//! Library crates use [`OpennessError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Only [`OpennessError::Config`] and [`OpennessError::Catalog`] abort a run.
//! Every other variant is caught at its component boundary and recorded as a
//! status field on the data model.

use std::path::PathBuf;

/// Top-level error type for all pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum OpennessError {
    /// Invalid run parameters. Fatal before any crawling starts.
    #[error("config error: {message}")]
    Config { message: String },

    /// Catalog could not be loaded at all. Fatal.
    #[error("catalog error: {message}")]
    Catalog { message: String },

    /// Network/HTTP error during a fetch.
    #[error("network error: {0}")]
    Network(String),

    /// Page content could not be turned into text.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// The external adjudication call failed.
    #[error("evaluation error: {message}")]
    Evaluation { message: String, transient: bool },

    /// Malformed roster row or catalog entry.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The result set violates the exactly-once invariant.
    #[error("aggregation error: {message}")]
    Aggregation { message: String },

    /// CSV/JSON export failed.
    #[error("export error: {0}")]
    Export(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, OpennessError>;

impl OpennessError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a catalog error from any displayable message.
    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog {
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

    /// Create an aggregation error from any displayable message.
    pub fn aggregation(msg: impl Into<String>) -> Self {
        Self::Aggregation {
            message: msg.into(),
        }
    }

    /// An evaluation failure worth retrying (rate limit, 5xx, timeout).
    pub fn evaluation_transient(msg: impl Into<String>) -> Self {
        Self::Evaluation {
            message: msg.into(),
            transient: true,
        }
    }

    /// An evaluation failure that will not improve on retry.
    pub fn evaluation_permanent(msg: impl Into<String>) -> Self {
        Self::Evaluation {
            message: msg.into(),
            transient: false,
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a retry policy should try this operation again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Evaluation { transient, .. } => *transient,
            _ => false,
        }
    }

    /// Whether this error must abort the run.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::Catalog { .. })
    }
}
