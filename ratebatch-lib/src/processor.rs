//! The batch processor.
//!
//! `BatchProcessor` drives a caller-supplied async operation over a batch of
//! work items under two independent limits:
//!
//! - a concurrency cap, bounding how many operations run at the same time
//! - a sliding-window rate cap, bounding how many operations start within
//!   any trailing window
//!
//! Items are admitted in submission order. Each admitted item runs on its
//! own task; its concurrency slot is released when the operation finishes,
//! while its rate permit returns to the pool one window after dispatch.
//! Every submitted item produces exactly one `ItemResult`.

use crate::cancel::CancelToken;
use crate::error::{BatchError, OperationError};
use crate::limiter::RateLimiter;
use crate::progress::{BatchCounters, ProgressReporter, ProgressTicker, TracingReporter};
use crate::types::{BatchConfig, BatchSummary, ItemResult, WorkItem};
use crate::Result;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

/// Runs batches of work items against a slow, quota-limited service.
///
/// The processor only holds configuration; every `run` call builds its own
/// limiter, slots and counters, so independent batches may run concurrently
/// on one processor without sharing quota.
///
/// # Example
///
/// ```rust
/// use ratebatch_lib::{BatchProcessor, WorkItem};
/// use std::time::Duration;
///
/// # async fn demo() -> Result<(), ratebatch_lib::BatchError> {
/// let processor = BatchProcessor::with_limits(4, 100, Duration::from_secs(60))?;
/// let items = vec![WorkItem::new(1, 21u64), WorkItem::new(2, 50)];
///
/// let results = processor
///     .run(items, |n: u64| async move { Ok::<_, String>(n * 2) })
///     .await?;
/// assert_eq!(results.len(), 2);
/// # Ok(())
/// # }
/// ```
pub struct BatchProcessor {
    config: BatchConfig,
    reporter: Arc<dyn ProgressReporter>,
}

impl BatchProcessor {
    /// Create a processor from a full configuration.
    ///
    /// # Errors
    ///
    /// Returns `BatchError::ConfigError` if any limit is zero.
    pub fn new(config: BatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            reporter: Arc::new(TracingReporter),
        })
    }

    /// Create a processor with the three scheduling limits and default
    /// progress settings.
    pub fn with_limits(
        concurrency: usize,
        rate_limit: usize,
        window: Duration,
    ) -> Result<Self> {
        Self::new(BatchConfig::new(concurrency, rate_limit, window))
    }

    /// Replace the progress reporter (defaults to `TracingReporter`).
    pub fn with_reporter<R>(mut self, reporter: R) -> Self
    where
        R: ProgressReporter + 'static,
    {
        self.reporter = Arc::new(reporter);
        self
    }

    /// Get the configuration for this processor.
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Process every item and return one result per item.
    ///
    /// `operation` is called once per item with its payload, possibly from
    /// several tasks at once. An `Err` from the operation, a panic inside it,
    /// or an elapsed per-item timeout is recorded in that item's result and
    /// does not affect other items. Results come back in completion order.
    ///
    /// # Errors
    ///
    /// - `BatchError::EmptyBatch` if `items` is empty
    /// - `BatchError::DuplicateId` if two items share an id
    pub async fn run<I, P, T, E, F, Fut>(
        &self,
        items: Vec<WorkItem<I, P>>,
        operation: F,
    ) -> Result<Vec<ItemResult<I, T>>>
    where
        I: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
        P: Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        self.run_until(items, operation, CancelToken::new()).await
    }

    /// Like `run`, but stops dispatching once `cancel` fires.
    ///
    /// Operations already in flight are allowed to finish. Items that were
    /// never dispatched, including one waiting for a slot or permit at the
    /// moment of cancellation, get a `Cancelled` failure so the result set
    /// still covers every submitted id.
    pub async fn run_until<I, P, T, E, F, Fut>(
        &self,
        items: Vec<WorkItem<I, P>>,
        operation: F,
        cancel: CancelToken,
    ) -> Result<Vec<ItemResult<I, T>>>
    where
        I: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
        P: Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        if items.is_empty() {
            return Err(BatchError::EmptyBatch);
        }
        ensure_unique_ids(&items)?;

        let total = items.len();
        let operation = Arc::new(operation);
        let slots = Arc::new(Semaphore::new(self.config.concurrency));
        let limiter = RateLimiter::new(self.config.rate_limit, self.config.window);
        let counters = Arc::new(BatchCounters::new(total));
        let ticker = ProgressTicker::start(
            counters.clone(),
            self.reporter.clone(),
            self.config.progress_interval,
        );
        let (tx, mut rx) = mpsc::unbounded_channel::<ItemResult<I, T>>();

        let mut results = Vec::with_capacity(total);
        let mut outstanding: HashSet<I> = HashSet::with_capacity(total);

        debug!(
            target: "ratebatch",
            total,
            concurrency = self.config.concurrency,
            rate_limit = limiter.limit(),
            window_secs = limiter.window().as_secs_f64(),
            "Starting batch"
        );

        let mut queue = items.into_iter();
        for item in queue.by_ref() {
            let admitted = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                slot = admit(&slots, &limiter) => Some(slot?),
            };

            let Some(slot) = admitted else {
                counters.skipped();
                results.push(cancelled_result(item.id));
                break;
            };

            outstanding.insert(item.id.clone());
            counters.dispatched();
            tokio::spawn(run_item(
                item,
                operation.clone(),
                self.config.item_timeout,
                slot,
                counters.clone(),
                tx.clone(),
            ));
        }

        for item in queue {
            counters.skipped();
            results.push(cancelled_result(item.id));
        }
        drop(tx);

        while let Some(result) = rx.recv().await {
            outstanding.remove(&result.id);
            results.push(result);
        }

        // Only reachable if a worker task was torn down before reporting.
        for id in outstanding {
            counters.completed(false);
            results.push(ItemResult {
                outcome: Err(OperationError::lost(id.clone())),
                id,
            });
        }

        ticker.stop();

        let summary = BatchSummary::from_results(&results);
        info!(
            target: "ratebatch",
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "Batch finished"
        );

        Ok(results)
    }
}

impl fmt::Debug for BatchProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Wait for a free concurrency slot, then for a rate permit.
///
/// The rate permit is taken last so its timestamp is the dispatch instant.
/// Dropping this future before it resolves consumes no rate permit.
async fn admit(slots: &Arc<Semaphore>, limiter: &RateLimiter) -> Result<OwnedSemaphorePermit> {
    let slot = slots
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| BatchError::internal("concurrency slots closed while dispatching"))?;
    limiter.acquire().await;
    Ok(slot)
}

async fn run_item<I, P, T, E, F, Fut>(
    item: WorkItem<I, P>,
    operation: Arc<F>,
    timeout: Option<Duration>,
    _slot: OwnedSemaphorePermit,
    counters: Arc<BatchCounters>,
    tx: mpsc::UnboundedSender<ItemResult<I, T>>,
) where
    I: Clone + fmt::Debug,
    E: fmt::Display,
    F: Fn(P) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let WorkItem { id, payload } = item;
    let outcome = execute(operation.as_ref(), &id, payload, timeout).await;

    if let Err(e) = &outcome {
        debug!(target: "ratebatch", id = ?id, kind = %e.kind, error = %e.message, "Item failed");
    }
    counters.completed(outcome.is_ok());
    let _ = tx.send(ItemResult { id, outcome });
}

async fn execute<I, P, T, E, F, Fut>(
    operation: &F,
    id: &I,
    payload: P,
    timeout: Option<Duration>,
) -> std::result::Result<T, OperationError<I>>
where
    I: Clone,
    E: fmt::Display,
    F: Fn(P) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let call = AssertUnwindSafe(async move { operation(payload).await }).catch_unwind();

    let caught = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(caught) => caught,
            Err(_) => return Err(OperationError::timed_out(id.clone(), limit)),
        },
        None => call.await,
    };

    match caught {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(OperationError::failed(id.clone(), err)),
        Err(panic) => Err(OperationError::panicked(id.clone(), panic_message(panic))),
    }
}

fn cancelled_result<I: Clone, T>(id: I) -> ItemResult<I, T> {
    ItemResult {
        outcome: Err(OperationError::cancelled(id.clone())),
        id,
    }
}

fn ensure_unique_ids<I, P>(items: &[WorkItem<I, P>]) -> Result<()>
where
    I: Eq + Hash + fmt::Debug,
{
    let mut seen = HashSet::with_capacity(items.len());
    for item in items {
        if !seen.insert(&item.id) {
            return Err(BatchError::duplicate_id(&item.id));
        }
    }
    Ok(())
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "operation panicked".to_string()
    }
}
