//! # tickhist-dl
//!
//! Resilient parallel downloader for tick-history market data.
//!
//! ## Design Philosophy
//!
//! tickhist-dl is designed to be:
//! - **Resilient** - Transient failures retry with bounded exponential backoff
//! - **Parallel** - A fixed worker pool drains a shared task queue
//! - **Sensible defaults** - Works out of the box with zero configuration
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//!
//! A run takes one instrument/report-type pair and an inclusive date range,
//! partitions the range into fixed-size tasks, and drives each task through
//! request, poll, download and split phases until every calendar date has
//! its own compressed daily file on disk.
//!
//! ## Quick Start
//!
//! ```no_run
//! use tickhist_dl::{Config, Credentials, Downloader, Instrument, InstrumentKind,
//!     ReportType, Subject};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         credentials: Credentials {
//!             username: "user".to_string(),
//!             password: "pass".to_string(),
//!         },
//!         ..Default::default()
//!     };
//!
//!     let downloader = Downloader::connect(config).await?;
//!     let subject = Subject::new(
//!         Instrument::new("ES", InstrumentKind::Futures),
//!         ReportType::EndOfDay,
//!     );
//!
//!     let summary = downloader
//!         .run_range(subject, "2023-01-01".parse()?, "2023-01-31".parse()?)
//!         .await?;
//!     println!("{} tasks succeeded, {} failed", summary.succeeded, summary.failures.len());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Extraction service trait and REST client
pub mod client;
/// Configuration types
pub mod config;
/// Free-space checks on the output device
pub mod disk;
/// Download pipeline (queue, worker pool, task state machine)
pub mod downloader;
/// Error types
pub mod error;
/// Date-range partitioning
pub mod partition;
/// Terminal progress rows
pub mod progress;
/// Retry logic with exponential backoff
pub mod retry;
/// Bulk-file splitting into daily files
pub mod split;
/// Core types: reports, instruments, tasks and outcomes
pub mod types;

// Re-export commonly used types
pub use client::{DataScopeClient, ExtractionService};
pub use config::{Config, Credentials, PollConfig, ProgressConfig, RetryConfig};
pub use downloader::{Downloader, RunSummary, TaskFailure};
pub use error::{Error, Result};
pub use partition::partition;
pub use types::{
    DownloadOutcome, Instrument, InstrumentKind, JobId, PollStatus, ReportType, Subject, Task,
};

use chrono::NaiveDate;

/// Helper function to run a download with graceful signal handling.
///
/// Cancels the run's token on the first termination signal; in-flight tasks
/// finish their current phase and the workers exit at the next task
/// boundary, returning [`Error::Cancelled`].
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal
///   registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use tickhist_dl::{Config, Downloader, Instrument, InstrumentKind, ReportType,
///     Subject, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = Downloader::connect(Config::default()).await?;
///     let subject = Subject::new(
///         Instrument::new("ES", InstrumentKind::Futures),
///         ReportType::Trades,
///     );
///     run_with_shutdown(&downloader, subject, "2023-01-01".parse()?, "2023-01-31".parse()?)
///         .await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(
    downloader: &Downloader,
    subject: Subject,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<RunSummary> {
    let cancel = downloader.cancellation_token();
    let watcher = tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("termination signal received, stopping at the next task boundary");
        cancel.cancel();
    });

    let result = downloader.run_range(subject, start, end).await;
    watcher.abort();
    result
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let sigterm = signal(SignalKind::terminate());
    let sigint = signal(SignalKind::interrupt());

    match (sigterm, sigint) {
        (Ok(mut term), Ok(mut int)) => {
            tokio::select! {
                _ = term.recv() => {}
                _ = int.recv() => {}
            }
        }
        // fall back to Ctrl+C when signal registration fails
        _ => {
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.ok();
}
