//! Error types for the ckptstash core.
//!
//! One enum covers the whole library so callers can match on error kind
//! rather than string contents. Bulk operations additionally accumulate
//! per-item errors into their summaries instead of failing the call.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::config::Location;

/// Main error type for checkpoint management operations.
#[derive(Debug, Error)]
pub enum StashError {
    // Configuration errors
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    // File system errors
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("Read failed at {path:?}: {message}")]
    Read {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Write failed at {path:?}: {message}")]
    Write {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("File already exists at destination: {0}")]
    AlreadyExists(PathBuf),

    #[error("Insufficient disk space at {path}: need {needed} bytes, {available} available")]
    InsufficientSpace {
        path: PathBuf,
        needed: u64,
        available: u64,
    },

    // Listing errors
    #[error("Parse error at {path:?}: {message}")]
    Parse {
        message: String,
        path: Option<PathBuf>,
    },

    #[error("Invalid listing structure at {path}: {message}")]
    InvalidStructure { path: PathBuf, message: String },

    #[error("Listing for {0} is read-only; only the Mac listing may be written")]
    ReadOnlyTarget(Location),

    // Catalog errors
    #[error("Checkpoint not found: {0}")]
    RecordNotFound(String),

    #[error("{filename} is referenced by {} other checkpoint(s)", .parents.len())]
    DependencyExists {
        filename: String,
        parents: Vec<String>,
    },

    #[error("{0} has no Stash copy; the Mac copy is the only one")]
    OnlyCopyExists(String),

    // Operation guards
    #[error("Source and destination are the same location")]
    SameLocation,

    #[error("Operation cancelled")]
    Cancelled,

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for checkpoint management operations.
pub type Result<T> = std::result::Result<T, StashError>;

/// One failed item inside a bulk-operation summary.
///
/// Bulk loops keep going past individual failures; each failure lands here
/// with the item it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    pub filename: String,
    pub error: String,
}

impl ItemError {
    pub fn new(filename: impl Into<String>, error: &StashError) -> Self {
        Self {
            filename: filename.into(),
            error: error.to_string(),
        }
    }
}

// Conversion implementations for common error types

impl From<std::io::Error> for StashError {
    fn from(err: std::io::Error) -> Self {
        StashError::Read {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for StashError {
    fn from(err: serde_json::Error) -> Self {
        StashError::Parse {
            message: err.to_string(),
            path: None,
        }
    }
}

impl StashError {
    /// Classify an I/O error raised while reading `path`.
    ///
    /// Not-found and permission failures get their own variants so callers
    /// can branch on them (a missing listing is "zero entries", a missing
    /// copy source is a hard error).
    pub fn io_read(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match err.kind() {
            std::io::ErrorKind::NotFound => StashError::FileNotFound(path),
            std::io::ErrorKind::PermissionDenied => StashError::PermissionDenied(path),
            _ => StashError::Read {
                message: err.to_string(),
                path: Some(path),
                source: Some(err),
            },
        }
    }

    /// Classify an I/O error raised while writing `path`.
    pub fn io_write(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => StashError::PermissionDenied(path),
            _ => StashError::Write {
                message: err.to_string(),
                path: Some(path),
                source: Some(err),
            },
        }
    }

    /// Parse failure tied to a specific file.
    pub fn parse_at(err: serde_json::Error, path: impl Into<PathBuf>) -> Self {
        StashError::Parse {
            message: err.to_string(),
            path: Some(path.into()),
        }
    }

    /// True when the error is the specific file-not-found condition.
    ///
    /// Reconciliation treats a missing listing as an empty one; every other
    /// failure on the same read is fatal to the pass.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StashError::FileNotFound(_))
    }

    /// Number of blocking parents for a `DependencyExists` error, else 0.
    pub fn parent_count(&self) -> usize {
        match self {
            StashError::DependencyExists { parents, .. } => parents.len(),
            _ => 0,
        }
    }
}
