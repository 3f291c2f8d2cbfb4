//! Download pipeline: partitioning, queueing, the worker pool and the
//! per-task state machine.
//!
//! A run partitions the requested date range into fixed-size tasks, loads
//! them into a shared FIFO queue, spawns the configured number of workers
//! and waits for all of them to exit. Task outcomes are aggregated into a
//! [`RunSummary`]; one failed task never aborts the run.

mod pool;
mod queue;
mod task;

pub use pool::{RunSummary, TaskFailure};

use crate::client::{DataScopeClient, ExtractionService};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::partition::partition;
use crate::progress::ProgressMultiplexer;
use crate::types::{Subject, Task};
use chrono::NaiveDate;
use queue::TaskQueue;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Orchestrates download runs against an extraction service.
///
/// Holds the service connection, the configuration and a cancellation token;
/// a single `Downloader` can drive any number of sequential runs.
pub struct Downloader {
    service: Arc<dyn ExtractionService>,
    config: Arc<Config>,
    cancel: CancellationToken,
}

impl Downloader {
    /// Authenticate against the configured extraction endpoint and build a
    /// downloader backed by the live service
    pub async fn connect(config: Config) -> Result<Self> {
        config.validate()?;
        let client = DataScopeClient::connect(&config).await?;
        Ok(Self {
            service: Arc::new(client),
            config: Arc::new(config),
            cancel: CancellationToken::new(),
        })
    }

    /// Build a downloader over an existing service implementation.
    ///
    /// This is the seam for tests and for callers bringing their own
    /// transport.
    pub fn with_service(service: Arc<dyn ExtractionService>, config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            service,
            config: Arc::new(config),
            cancel: CancellationToken::new(),
        })
    }

    /// Token that stops the run at the next task boundary when cancelled.
    ///
    /// Clone it into a signal handler; in-flight tasks finish their current
    /// state machine pass before the workers exit.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Download one subject over an inclusive date range.
    ///
    /// The range is partitioned into sub-ranges of at most
    /// `config.chunk_days` dates, each processed independently by the worker
    /// pool. Returns the aggregated summary once every task has reached a
    /// terminal outcome, or [`Error::Cancelled`] if the run was stopped
    /// before the queue drained.
    pub async fn run_range(
        &self,
        subject: Subject,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RunSummary> {
        let subject = Arc::new(subject);
        let tasks: Vec<Task> = partition(start, end, self.config.chunk_days)
            .map(|(s, e)| Task::new(subject.clone(), s, e))
            .collect();

        tracing::info!(
            instrument = %subject.instrument.base_ric,
            report = %subject.report_type,
            %start,
            %end,
            tasks = tasks.len(),
            workers = self.config.workers,
            "starting download run"
        );

        let queue = Arc::new(TaskQueue::new(tasks));
        let multiplexer = ProgressMultiplexer::new(self.config.workers, &self.config.progress);

        let summary = pool::run_pool(
            Arc::clone(&self.service),
            Arc::clone(&self.config),
            Arc::clone(&queue),
            &multiplexer,
            self.cancel.clone(),
        )
        .await;

        // let the renderers clear their rows before the summary is printed
        multiplexer.shutdown().await;

        if self.cancel.is_cancelled() {
            tracing::warn!(
                completed = summary.total(),
                remaining = queue.len().await,
                "run cancelled before the queue drained"
            );
            return Err(Error::Cancelled);
        }

        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failures.len(),
            "download run finished"
        );
        Ok(summary)
    }
}
