//! Error handling for batch processing.
//!
//! Two layers of errors live here. `BatchError` covers failures of a whole
//! call (bad configuration, empty batch) and is returned from the processor
//! API. `OperationError` describes a single item that did not succeed; it is
//! stored inside that item's result and never aborts the batch.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Main error type for processor construction and `run` calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    /// Invalid construction parameters or configuration values
    ConfigError { message: String },

    /// `run` was called with no work items
    EmptyBatch,

    /// Two work items in one batch share the same id
    DuplicateId { id: String },

    /// Config file I/O errors
    FileError { path: String, message: String },

    /// Generic internal errors that don't fit other categories
    Internal { message: String },
}

impl BatchError {
    /// Create a new configuration error.
    pub fn config<M: Into<String>>(message: M) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Create a new duplicate id error.
    pub fn duplicate_id<I: fmt::Debug>(id: &I) -> Self {
        Self::DuplicateId {
            id: format!("{:?}", id),
        }
    }

    /// Create a new file error.
    pub fn file_error<P: Into<String>, M: Into<String>>(path: P, message: M) -> Self {
        Self::FileError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new internal error.
    pub fn internal<M: Into<String>>(message: M) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error was caused by invalid configuration.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::ConfigError { .. })
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError { message } => write!(f, "Configuration error: {}", message),
            Self::EmptyBatch => write!(f, "Empty batch: at least one work item is required"),
            Self::DuplicateId { id } => write!(f, "Duplicate work item id {} in batch", id),
            Self::FileError { path, message } => write!(f, "File error at '{}': {}", path, message),
            Self::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for BatchError {}

impl From<toml::de::Error> for BatchError {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigError {
            message: format!("Failed to parse TOML configuration: {}", err),
        }
    }
}

/// Why a single work item did not produce a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationErrorKind {
    /// The operation returned an error
    Failed,
    /// The operation panicked
    Panicked,
    /// The per-item timeout elapsed before the operation finished
    TimedOut,
    /// The batch was cancelled before this item was dispatched
    Cancelled,
    /// The worker running this item went away without reporting
    Lost,
}

impl fmt::Display for OperationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Failed => "failed",
            Self::Panicked => "panicked",
            Self::TimedOut => "timed out",
            Self::Cancelled => "cancelled",
            Self::Lost => "lost",
        };
        f.write_str(name)
    }
}

/// Failure descriptor for one work item.
///
/// Carries the id of the item it belongs to so a failure can be reported
/// on its own, away from the surrounding `ItemResult`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationError<I> {
    pub id: I,
    pub kind: OperationErrorKind,
    pub message: String,
}

impl<I> OperationError<I> {
    /// The operation itself returned an error.
    pub fn failed<E: fmt::Display>(id: I, err: E) -> Self {
        Self {
            id,
            kind: OperationErrorKind::Failed,
            message: err.to_string(),
        }
    }

    pub fn panicked<M: Into<String>>(id: I, message: M) -> Self {
        Self {
            id,
            kind: OperationErrorKind::Panicked,
            message: message.into(),
        }
    }

    pub fn timed_out(id: I, after: Duration) -> Self {
        Self {
            id,
            kind: OperationErrorKind::TimedOut,
            message: format!("operation did not finish within {:?}", after),
        }
    }

    pub fn cancelled(id: I) -> Self {
        Self {
            id,
            kind: OperationErrorKind::Cancelled,
            message: "batch cancelled before dispatch".to_string(),
        }
    }

    pub fn lost(id: I) -> Self {
        Self {
            id,
            kind: OperationErrorKind::Lost,
            message: "worker exited without reporting a result".to_string(),
        }
    }
}

impl<I: fmt::Debug> fmt::Display for OperationError<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Item {:?} {}: {}", self.id, self.kind, self.message)
    }
}

impl<I: fmt::Debug> std::error::Error for OperationError<I> {}
