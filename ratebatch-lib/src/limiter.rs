//! Sliding-window rate limiter.
//!
//! Permits are time-released: a permit consumed at instant `t` becomes
//! available again at `t + window`, no matter how long the guarded
//! operation runs. The pool is a delay queue of consumption instants.
//! Because every permit has the same delay, release order equals
//! consumption order and the queue never holds more than `limit` entries.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Limits how many operations may start within any trailing window.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    /// Instants at which currently held permits were consumed, oldest first
    consumed: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter allowing `limit` starts per `window`.
    ///
    /// Callers validate both values; a zero limit would never grant a permit.
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            consumed: Mutex::new(VecDeque::with_capacity(limit)),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Wait until a permit is free and consume it.
    ///
    /// Waiters are served in the order they called `acquire`: the queue lock
    /// is fair and is held while sleeping for the oldest permit to expire.
    /// Returns the instant the permit was consumed.
    pub async fn acquire(&self) -> Instant {
        let mut consumed = self.consumed.lock().await;
        loop {
            let now = Instant::now();
            self.release_expired(&mut consumed, now);
            if consumed.len() < self.limit {
                consumed.push_back(now);
                return now;
            }
            if let Some(&oldest) = consumed.front() {
                sleep_until(oldest + self.window).await;
            }
        }
    }

    /// Consume a permit if one is free right now.
    ///
    /// Returns `false` when the pool is exhausted or another task is holding
    /// the queue (typically a waiter in `acquire`).
    pub fn try_acquire(&self) -> bool {
        let Ok(mut consumed) = self.consumed.try_lock() else {
            return false;
        };
        let now = Instant::now();
        self.release_expired(&mut consumed, now);
        if consumed.len() < self.limit {
            consumed.push_back(now);
            true
        } else {
            false
        }
    }

    /// Number of permits free right now.
    ///
    /// Reports 0 while a waiter holds the queue: it only holds it when the
    /// pool is exhausted or it is about to take the last free permit.
    pub fn available(&self) -> usize {
        let Ok(mut consumed) = self.consumed.try_lock() else {
            return 0;
        };
        self.release_expired(&mut consumed, Instant::now());
        self.limit - consumed.len()
    }

    fn release_expired(&self, consumed: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = consumed.front() {
            if oldest + self.window <= now {
                consumed.pop_front();
            } else {
                break;
            }
        }
    }
}
