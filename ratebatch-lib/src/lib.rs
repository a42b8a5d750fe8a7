//! # ratebatch
//!
//! A bounded-concurrency, rate-limited batch processor for driving many
//! independent calls against a slow, quota-limited external service.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ratebatch_lib::{BatchProcessor, WorkItem};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 250 calls at a time, at most 500 starts per minute
//!     let processor = BatchProcessor::with_limits(250, 500, Duration::from_secs(60))?;
//!
//!     let items: Vec<WorkItem<String, String>> = vec![
//!         ("What a match".to_string(), "c1".to_string()).into(),
//!         ("Awful refereeing".to_string(), "c2".to_string()).into(),
//!     ];
//!
//!     let results = processor
//!         .run(items, |text: String| async move {
//!             Ok::<_, std::io::Error>(text.len())
//!         })
//!         .await?;
//!
//!     for result in results {
//!         match &result.outcome {
//!             Ok(len) => println!("{}: {}", result.id, len),
//!             Err(e) => println!("{}: {}", result.id, e),
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Concurrency cap**: at most `concurrency` operations in flight
//! - **Sliding-window rate cap**: at most `rate_limit` starts per `window`,
//!   each permit time-released rather than released on completion
//! - **Failure isolation**: errors, panics and timeouts stay inside the
//!   item's result
//! - **Progress reporting**: periodic snapshots through an injected reporter
//! - **Cancellation**: stop dispatching and drain in-flight work

// Re-export main public API types and functions
pub use cancel::CancelToken;
pub use config::{
    load_env_config, parse_duration_string, ConfigManager, DefaultsConfig, EnvConfig, FileConfig,
    OutputConfig,
};
pub use error::{BatchError, OperationError, OperationErrorKind};
pub use limiter::RateLimiter;
pub use processor::BatchProcessor;
pub use progress::{ProgressReporter, SilentReporter, TracingReporter};
pub use types::{BatchConfig, BatchSummary, ItemResult, ItemState, Progress, WorkItem};

// Internal modules - their public items are re-exported above
mod cancel;
mod config;
mod error;
mod limiter;
mod processor;
mod progress;
mod types;

// Type alias for convenience
pub type Result<T> = std::result::Result<T, BatchError>;
