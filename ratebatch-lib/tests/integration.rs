// ratebatch-lib/tests/integration.rs

//! Integration tests for the batch processor's scheduling contract.
//!
//! All timing tests run on tokio's paused clock, so windows and sleeps are
//! exact and the tests finish instantly.

use ratebatch_lib::{
    BatchConfig, BatchError, BatchProcessor, BatchSummary, CancelToken, ItemResult,
    OperationErrorKind, Progress, SilentReporter, WorkItem,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_test::{assert_err, assert_ok};

/// Records when operations start and how many run at once.
#[derive(Clone, Default)]
struct StartTracker {
    starts: Arc<Mutex<Vec<Instant>>>,
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl StartTracker {
    fn enter(&self) {
        self.starts.lock().unwrap().push(Instant::now());
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn sorted_starts(&self) -> Vec<Instant> {
        let mut starts = self.starts.lock().unwrap().clone();
        starts.sort();
        starts
    }

    /// Largest number of starts inside any half-open window `[t, t + window)`.
    fn max_starts_per_window(&self, window: Duration) -> usize {
        let starts = self.sorted_starts();
        starts
            .iter()
            .enumerate()
            .map(|(i, &from)| {
                starts[i..]
                    .iter()
                    .take_while(|&&t| t < from + window)
                    .count()
            })
            .max()
            .unwrap_or(0)
    }
}

fn silent(concurrency: usize, rate_limit: usize, window: Duration) -> BatchProcessor {
    assert_ok!(BatchProcessor::with_limits(concurrency, rate_limit, window)).with_reporter(SilentReporter)
}

fn ids<I: Clone + Eq + std::hash::Hash, T>(results: &[ItemResult<I, T>]) -> HashSet<I> {
    results.iter().map(|r| r.id.clone()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_doubling_scenario_respects_both_limits() {
    let window = Duration::from_secs(1);
    let processor = silent(2, 3, window);
    let tracker = StartTracker::default();

    let items: Vec<WorkItem<u32, u64>> = (0..10).map(|i| WorkItem::new(i, u64::from(i) + 1)).collect();
    let op_tracker = tracker.clone();
    let started = Instant::now();

    let results = processor
        .run(items, move |payload: u64| {
            let tracker = op_tracker.clone();
            async move {
                tracker.enter();
                sleep(Duration::from_millis(100)).await;
                tracker.exit();
                Ok::<_, String>(payload * 2)
            }
        })
        .await
        .unwrap();

    assert_eq!(results.len(), 10);
    assert_eq!(ids(&results), (0..10).collect::<HashSet<u32>>());
    for result in &results {
        assert_eq!(result.outcome, Ok((u64::from(result.id) + 1) * 2));
    }

    assert!(tracker.peak() <= 2, "peak concurrency was {}", tracker.peak());
    assert!(tracker.max_starts_per_window(window) <= 3);
    // 10 starts at 3 per second need at least three full windows.
    assert!(started.elapsed() >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_failure_mix_keeps_ids_straight() {
    let processor = silent(2, 10, Duration::from_secs(1));
    let items: Vec<WorkItem<u32, u32>> = (1..=5).map(|i| WorkItem::new(i, i)).collect();

    let results = processor
        .run(items, |n: u32| async move {
            if n % 2 == 1 {
                Err(format!("odd payload {}", n))
            } else {
                Ok(n)
            }
        })
        .await
        .unwrap();

    assert_eq!(results.len(), 5);
    let mut failed = Vec::new();
    let mut succeeded = Vec::new();
    for result in &results {
        match &result.outcome {
            Ok(value) => {
                assert_eq!(*value, result.id);
                succeeded.push(result.id);
            }
            Err(e) => {
                assert_eq!(e.id, result.id);
                assert_eq!(e.kind, OperationErrorKind::Failed);
                assert_eq!(e.message, format!("odd payload {}", result.id));
                failed.push(result.id);
            }
        }
    }
    failed.sort();
    succeeded.sort();
    assert_eq!(failed, vec![1, 3, 5]);
    assert_eq!(succeeded, vec![2, 4]);
}

#[tokio::test(start_paused = true)]
async fn test_always_failing_operation_does_not_fail_run() {
    let processor = silent(3, 3, Duration::from_secs(1));
    let items: Vec<WorkItem<String, ()>> = (0..7).map(|i| WorkItem::new(format!("item-{}", i), ())).collect();

    let results = assert_ok!(
        processor
            .run(items, |_: ()| async { Err::<(), _>("service unavailable") })
            .await
    );

    assert_eq!(results.len(), 7);
    for result in &results {
        let err = result.error().expect("every item should fail");
        assert_eq!(err.id, result.id);
        assert_eq!(err.message, "service unavailable");
    }
    let summary = BatchSummary::from_results(&results);
    assert_eq!(summary.failed, 7);
    assert_eq!(summary.succeeded, 0);
}

#[tokio::test(start_paused = true)]
async fn test_success_values_round_trip_per_id() {
    let processor = silent(4, 50, Duration::from_secs(1));
    let items: Vec<WorkItem<String, u32>> = (0..20)
        .map(|i| WorkItem::new(format!("c{}", i), i * 10))
        .collect();
    let expected: HashMap<String, String> = items
        .iter()
        .map(|item| (item.id.clone(), format!("value-{}", item.payload)))
        .collect();

    let results = processor
        .run(items, |payload: u32| async move {
            // Later items finish first, so completion order differs from submission.
            sleep(Duration::from_millis(u64::from(200 - payload))).await;
            Ok::<_, String>(format!("value-{}", payload))
        })
        .await
        .unwrap();

    assert_eq!(results.len(), expected.len());
    for result in results {
        assert_eq!(result.value(), expected.get(&result.id));
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_calls_do_not_hold_back_permits() {
    let window = Duration::from_secs(1);
    let processor = silent(10, 2, window);
    let tracker = StartTracker::default();
    let op_tracker = tracker.clone();

    let items: Vec<WorkItem<u32, u32>> = (0..6).map(|i| WorkItem::new(i, i)).collect();
    let started = Instant::now();

    processor
        .run(items, move |n: u32| {
            let tracker = op_tracker.clone();
            async move {
                tracker.enter();
                // The first item outlives several windows.
                let pause = if n == 0 { 10_000 } else { 10 };
                sleep(Duration::from_millis(pause)).await;
                tracker.exit();
                Ok::<_, String>(n)
            }
        })
        .await
        .unwrap();

    let offsets: Vec<Duration> = tracker
        .sorted_starts()
        .iter()
        .map(|&t| t - started)
        .collect();

    // Third start waits for the first permit to come back, not for the
    // first call to finish; fast calls do not return permits early either.
    assert!(offsets[2] >= window);
    assert!(offsets[2] < Duration::from_millis(1100));
    assert!(offsets[4] >= window * 2);
    assert!(offsets[4] < Duration::from_millis(2100));
    assert_eq!(tracker.max_starts_per_window(window), 2);
}

#[tokio::test]
async fn test_invalid_configuration_is_rejected() {
    let window = Duration::from_secs(1);
    assert!(assert_err!(BatchProcessor::with_limits(0, 3, window)).is_config());
    assert!(assert_err!(BatchProcessor::with_limits(2, 0, window)).is_config());
    assert!(assert_err!(BatchProcessor::with_limits(2, 3, Duration::ZERO)).is_config());
}

#[tokio::test]
async fn test_empty_batch_error() {
    let processor = silent(2, 3, Duration::from_secs(1));
    let items: Vec<WorkItem<u32, u32>> = Vec::new();
    let err = processor
        .run(items, |n: u32| async move { Ok::<_, String>(n) })
        .await
        .unwrap_err();
    assert_eq!(err, BatchError::EmptyBatch);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_drains_in_flight_and_marks_the_rest() {
    let processor = silent(1, 100, Duration::from_secs(1));
    let items: Vec<WorkItem<u32, u32>> = (1..=5).map(|i| WorkItem::new(i, i)).collect();
    let token = CancelToken::new();

    let trigger = token.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(1500)).await;
        trigger.cancel();
    });

    let results = processor
        .run_until(
            items,
            |n: u32| async move {
                sleep(Duration::from_secs(1)).await;
                Ok::<_, String>(n)
            },
            token,
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 5);
    assert_eq!(ids(&results), (1..=5).collect::<HashSet<u32>>());

    for result in &results {
        match result.id {
            // 1 finished before the cancel, 2 was in flight and drained
            1 | 2 => assert_eq!(result.outcome, Ok(result.id)),
            _ => assert_eq!(result.error().unwrap().kind, OperationErrorKind::Cancelled),
        }
    }

    let summary = BatchSummary::from_results(&results);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.cancelled, 3);
    assert_eq!(summary.failed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_progress_reports_remaining_work() {
    let seen: Arc<Mutex<Vec<Progress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    let config = BatchConfig::new(1, 10, Duration::from_secs(1))
        .with_progress_interval(Duration::from_secs(1));
    let processor = BatchProcessor::new(config)
        .unwrap()
        .with_reporter(move |p: &Progress| sink.lock().unwrap().push(*p));

    let items: Vec<WorkItem<u32, u32>> = (0..4).map(|i| WorkItem::new(i, i)).collect();
    processor
        .run(items, |n: u32| async move {
            sleep(Duration::from_millis(2500)).await;
            Ok::<_, String>(n)
        })
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert!(seen.len() >= 8, "only {} progress reports", seen.len());
    assert_eq!(seen[0].total, 4);
    assert_eq!(seen[0].remaining, 4);
    assert!(seen.windows(2).all(|w| w[1].remaining <= w[0].remaining));
    assert!(seen.iter().all(|p| p.remaining > 0 && p.in_flight <= 1));
    assert!(seen.iter().any(|p| p.succeeded > 0));
}

#[tokio::test(start_paused = true)]
async fn test_independent_batches_share_nothing() {
    let window = Duration::from_secs(1);
    let processor = silent(2, 2, window);
    let left_tracker = StartTracker::default();
    let right_tracker = StartTracker::default();

    let make_items = || -> Vec<WorkItem<u32, u32>> { (0..4).map(|i| WorkItem::new(i, i)).collect() };
    let left_op = left_tracker.clone();
    let right_op = right_tracker.clone();
    let started = Instant::now();

    let (left, right) = tokio::join!(
        processor.run(make_items(), move |n: u32| {
            let tracker = left_op.clone();
            async move {
                tracker.enter();
                tracker.exit();
                Ok::<_, String>(n)
            }
        }),
        processor.run(make_items(), move |n: u32| {
            let tracker = right_op.clone();
            async move {
                tracker.enter();
                tracker.exit();
                Ok::<_, String>(n)
            }
        }),
    );

    assert_eq!(left.unwrap().len(), 4);
    assert_eq!(right.unwrap().len(), 4);
    // Each batch owns its quota: 4 starts at 2 per second take one window each.
    assert_eq!(left_tracker.max_starts_per_window(window), 2);
    assert_eq!(right_tracker.max_starts_per_window(window), 2);
    assert!(started.elapsed() < window * 2);
}
