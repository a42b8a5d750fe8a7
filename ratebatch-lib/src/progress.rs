//! Progress tracking and reporting.
//!
//! A batch keeps a set of atomic counters that workers update as items move
//! through their lifecycle. While the batch runs, a background ticker reads
//! those counters at a fixed interval and hands a `Progress` snapshot to the
//! injected `ProgressReporter`. Reporting never touches scheduling.

use crate::types::Progress;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Receives periodic progress snapshots from a running batch.
///
/// Implementations must be cheap and non-blocking; they are called from a
/// runtime task.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, progress: &Progress);
}

impl<F> ProgressReporter for F
where
    F: Fn(&Progress) + Send + Sync,
{
    fn report(&self, progress: &Progress) {
        self(progress)
    }
}

/// Default reporter: one `info` event per snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, progress: &Progress) {
        tracing::info!(
            target: "ratebatch",
            total = progress.total,
            remaining = progress.remaining,
            in_flight = progress.in_flight,
            succeeded = progress.succeeded,
            failed = progress.failed,
            cancelled = progress.cancelled,
            elapsed_secs = progress.elapsed.as_secs(),
            "Tasks remaining = {}",
            progress.remaining
        );
    }
}

/// Reporter that discards every snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {
    fn report(&self, _progress: &Progress) {}
}

/// Shared per-batch counters.
#[derive(Debug)]
pub(crate) struct BatchCounters {
    total: usize,
    remaining: AtomicUsize,
    in_flight: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    cancelled: AtomicUsize,
    started: Instant,
}

impl BatchCounters {
    pub(crate) fn new(total: usize) -> Self {
        Self {
            total,
            remaining: AtomicUsize::new(total),
            in_flight: AtomicUsize::new(0),
            succeeded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
            started: Instant::now(),
        }
    }

    /// Queued -> InFlight
    pub(crate) fn dispatched(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    /// InFlight -> Succeeded | Failed
    pub(crate) fn completed(&self, success: bool) {
        if success {
            self.succeeded.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.remaining.fetch_sub(1, Ordering::SeqCst);
    }

    /// Queued -> Failed (cancelled before dispatch)
    pub(crate) fn skipped(&self) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
        self.remaining.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn remaining(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }

    pub(crate) fn snapshot(&self) -> Progress {
        Progress {
            total: self.total,
            remaining: self.remaining.load(Ordering::SeqCst),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            cancelled: self.cancelled.load(Ordering::SeqCst),
            elapsed: self.started.elapsed(),
        }
    }
}

/// Background task that reports progress at a fixed interval.
///
/// The first snapshot goes out as soon as the task runs; it stops on its own
/// once nothing remains, or when `stop` is called.
pub(crate) struct ProgressTicker {
    handle: Option<JoinHandle<()>>,
}

impl ProgressTicker {
    pub(crate) fn start(
        counters: Arc<BatchCounters>,
        reporter: Arc<dyn ProgressReporter>,
        every: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if counters.remaining() == 0 {
                    break;
                }
                reporter.report(&counters.snapshot());
            }
        });

        Self {
            handle: Some(handle),
        }
    }

    pub(crate) fn stop(mut self) {
        if let Some(h) = self.handle.take() {
            h.abort();
        }
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        if let Some(h) = self.handle.take() {
            h.abort();
        }
    }
}
