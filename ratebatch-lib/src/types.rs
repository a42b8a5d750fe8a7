//! Core data types for batch processing.
//!
//! This module defines the work items callers submit, the results they get
//! back, the processor configuration and the progress snapshots handed to
//! reporters.

use crate::error::{BatchError, OperationError, OperationErrorKind};
use serde::Serialize;
use std::time::Duration;

/// One unit of input for the external operation.
///
/// The id must be unique within a batch; it is how the matching
/// `ItemResult` is found again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem<I, P> {
    pub id: I,
    pub payload: P,
}

impl<I, P> WorkItem<I, P> {
    pub fn new(id: I, payload: P) -> Self {
        Self { id, payload }
    }
}

/// Glue code tends to produce `(payload, id)` pairs.
impl<I, P> From<(P, I)> for WorkItem<I, P> {
    fn from((payload, id): (P, I)) -> Self {
        Self { id, payload }
    }
}

/// Outcome of one work item.
///
/// Exactly one `ItemResult` is produced for every submitted `WorkItem`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemResult<I, T> {
    pub id: I,
    pub outcome: Result<T, OperationError<I>>,
}

impl<I, T> ItemResult<I, T> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The value produced by the operation, if it succeeded.
    pub fn value(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    /// The failure descriptor, if the item did not succeed.
    pub fn error(&self) -> Option<&OperationError<I>> {
        self.outcome.as_ref().err()
    }

    /// Terminal state of the item.
    pub fn state(&self) -> ItemState {
        match self.outcome {
            Ok(_) => ItemState::Succeeded,
            Err(_) => ItemState::Failed,
        }
    }
}

/// Lifecycle of a work item inside a batch.
///
/// `Queued -> InFlight -> Succeeded | Failed`. Items never re-enter
/// `InFlight`; retries are up to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Queued,
    InFlight,
    Succeeded,
    Failed,
}

/// Snapshot of batch progress handed to a `ProgressReporter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    /// Number of items submitted
    pub total: usize,
    /// Items not yet completed (queued or in flight)
    pub remaining: usize,
    /// Items dispatched but not yet completed
    pub in_flight: usize,
    pub succeeded: usize,
    /// Items whose operation ran and did not succeed
    pub failed: usize,
    /// Items never dispatched because the batch was cancelled
    pub cancelled: usize,
    /// Time since the batch started
    pub elapsed: Duration,
}

impl Progress {
    /// Items completed so far, successful or not.
    pub fn completed(&self) -> usize {
        self.total - self.remaining
    }
}

/// Aggregate counts over a finished batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    /// Items whose operation ran and did not succeed
    pub failed: usize,
    /// Items never dispatched because the batch was cancelled
    pub cancelled: usize,
}

impl BatchSummary {
    pub fn from_results<I, T>(results: &[ItemResult<I, T>]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Default::default()
        };
        for result in results {
            match &result.outcome {
                Ok(_) => summary.succeeded += 1,
                Err(e) if e.kind == OperationErrorKind::Cancelled => summary.cancelled += 1,
                Err(_) => summary.failed += 1,
            }
        }
        summary
    }

    pub fn all_succeeded(&self) -> bool {
        self.succeeded == self.total
    }
}

/// Configuration for a `BatchProcessor`.
///
/// Defaults follow a typical "500 calls per minute" quota: 250 concurrent
/// operations, 500 starts per 60 second window, progress every 60 seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Maximum number of operations executing at the same time
    pub concurrency: usize,

    /// Maximum number of operations allowed to start within any `window`
    pub rate_limit: usize,

    /// Length of the rate-limit window; each permit returns to the pool
    /// this long after it was consumed
    pub window: Duration,

    /// How often progress is reported while work remains
    pub progress_interval: Duration,

    /// Optional upper bound on a single operation's run time
    pub item_timeout: Option<Duration>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 250,
            rate_limit: 500,
            window: Duration::from_secs(60),
            progress_interval: Duration::from_secs(60),
            item_timeout: None,
        }
    }
}

impl BatchConfig {
    /// Create a configuration with the three scheduling limits set.
    pub fn new(concurrency: usize, rate_limit: usize, window: Duration) -> Self {
        Self {
            concurrency,
            rate_limit,
            window,
            ..Default::default()
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: usize, window: Duration) -> Self {
        self.rate_limit = rate_limit;
        self.window = window;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_item_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.item_timeout = timeout;
        self
    }

    /// Check that every limit is positive.
    pub fn validate(&self) -> Result<(), BatchError> {
        if self.concurrency == 0 {
            return Err(BatchError::config("concurrency must be positive"));
        }
        if self.rate_limit == 0 {
            return Err(BatchError::config("rate_limit must be positive"));
        }
        if self.window.is_zero() {
            return Err(BatchError::config("window must be positive"));
        }
        if self.progress_interval.is_zero() {
            return Err(BatchError::config("progress_interval must be positive"));
        }
        if matches!(self.item_timeout, Some(t) if t.is_zero()) {
            return Err(BatchError::config("item_timeout must be positive when set"));
        }
        Ok(())
    }
}
