//! Fixed-size worker pool.
//!
//! Exactly `P` long-lived workers are spawned, each bound to a worker slot
//! (and therefore a progress row) for the whole run. A worker loops popping
//! tasks and running the state machine to completion one task at a time; the
//! worker exits when the queue is drained or a cancellation is observed at a
//! task boundary. The pool's join returns only after every worker has exited.

use crate::client::ExtractionService;
use crate::config::Config;
use crate::progress::ProgressMultiplexer;
use crate::types::DownloadOutcome;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::queue::TaskQueue;
use super::task::run_task;

/// One task that ended in a terminal failure
#[derive(Debug, Clone)]
pub struct TaskFailure {
    /// Task description, e.g. `ES (EndOfDay) 2023-01-01-2023-01-03`
    pub task: String,
    /// The terminal failure kind
    pub outcome: DownloadOutcome,
}

/// Aggregate result of a pool run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Tasks that wrote their daily files
    pub succeeded: usize,
    /// Tasks that ended in a terminal failure, in completion order
    pub failures: Vec<TaskFailure>,
}

impl RunSummary {
    /// Total number of tasks that reached a terminal state
    pub fn total(&self) -> usize {
        self.succeeded + self.failures.len()
    }

    fn merge(&mut self, other: RunSummary) {
        self.succeeded += other.succeeded;
        self.failures.extend(other.failures);
    }
}

/// Spawn the workers and block until the queue is drained (or the run is
/// cancelled between tasks) and every worker has exited.
pub(crate) async fn run_pool(
    service: Arc<dyn ExtractionService>,
    config: Arc<Config>,
    queue: Arc<TaskQueue>,
    multiplexer: &ProgressMultiplexer,
    cancel: CancellationToken,
) -> RunSummary {
    let mut workers = Vec::with_capacity(config.workers);
    for slot in 1..=config.workers {
        let progress = multiplexer.handle(slot);
        let service = Arc::clone(&service);
        let config = Arc::clone(&config);
        let queue = Arc::clone(&queue);
        let cancel = cancel.clone();

        workers.push(tokio::spawn(async move {
            let mut summary = RunSummary::default();
            loop {
                // cancellation is honored between tasks, never mid-flight
                if cancel.is_cancelled() {
                    tracing::info!(worker = slot, "cancellation observed, worker exiting");
                    break;
                }
                let Some(task) = queue.try_pop().await else {
                    tracing::debug!(worker = slot, "queue exhausted, worker exiting");
                    break;
                };

                let desc = task.describe();
                tracing::info!(worker = slot, task = %desc, "task started");
                let outcome = run_task(service.as_ref(), &config, &progress, &task).await;
                if outcome.is_terminal_failure() {
                    summary.failures.push(TaskFailure {
                        task: desc,
                        outcome,
                    });
                } else {
                    summary.succeeded += 1;
                }
            }
            summary
        }));
    }

    let mut total = RunSummary::default();
    for worker in workers {
        match worker.await {
            Ok(summary) => total.merge(summary),
            // a panicked worker loses its slot but must not sink the run
            Err(e) => tracing::error!(error = %e, "worker task panicked"),
        }
    }
    total
}
