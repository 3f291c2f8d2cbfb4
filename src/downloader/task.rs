//! Per-task download state machine.
//!
//! One task moves through Requesting → Polling → Downloading → Splitting →
//! Done. Failure edges loop back: a rejected request re-enters Requesting,
//! a failed download or split re-enters Downloading, and poll exhaustion
//! re-enters Polling, each on its own bounded backoff schedule so a task
//! that cannot make progress eventually surfaces instead of spinning
//! forever. Only a full output device ends the task without retry.

use crate::client::ExtractionService;
use crate::config::Config;
use crate::disk::ensure_free_space;
use crate::error::Error;
use crate::progress::ProgressHandle;
use crate::retry::{Backoff, IsRetryable};
use crate::split::split_daily;
use crate::types::{DownloadOutcome, JobId, Task};
use std::path::PathBuf;

enum State {
    Requesting,
    Polling { job: JobId },
    Downloading { job: JobId },
    Splitting { job: JobId, bulk_path: PathBuf },
    Done,
    Failed { error: Error, outcome: DownloadOutcome },
}

/// Drive one task through the state machine to a terminal outcome.
///
/// All transient failures are absorbed here; the worker pool only ever
/// observes `Success` or a terminal failure kind.
pub(crate) async fn run_task(
    service: &dyn ExtractionService,
    config: &Config,
    progress: &ProgressHandle,
    task: &Task,
) -> DownloadOutcome {
    let desc = task.describe();
    let output_dir = task.subject.output_dir(&config.data_dir);
    let bulk_path = output_dir.join(task.bulk_filename());
    let date_column = task.subject.report_type.date_column();

    let mut request_backoff = Backoff::new(&config.retry);
    let mut download_backoff = Backoff::new(&config.retry);
    let mut state = State::Requesting;

    loop {
        state = match state {
            State::Requesting => {
                progress.begin(format!("Requesting {desc}"));
                match service.submit(&task.subject, task.start, task.end).await {
                    Ok(job) => State::Polling { job },
                    Err(error) => {
                        progress.end(format!("Request Failed {desc}"));
                        retry_or_fail(
                            error,
                            &mut request_backoff,
                            DownloadOutcome::RequestFailed,
                            || State::Requesting,
                            &desc,
                            "request",
                        )
                        .await
                    }
                }
            }

            State::Polling { job } => {
                progress.begin(format!("Requesting {desc}"));
                match service.poll_status(&job).await {
                    Ok(crate::types::PollStatus::Ready) => {
                        progress.end(format!("Requested {desc}"));
                        tokio::time::sleep(config.poll.ready_pause).await;
                        State::Downloading { job }
                    }
                    Ok(crate::types::PollStatus::Rejected(status)) => {
                        progress.end(format!("Request Failed {desc}"));
                        retry_or_fail(
                            Error::StatusRejected { status },
                            &mut request_backoff,
                            DownloadOutcome::RequestFailed,
                            || State::Requesting,
                            &desc,
                            "request",
                        )
                        .await
                    }
                    Err(error) => {
                        // poll exhaustion and transport errors consume the
                        // download retry budget and re-poll the same job
                        progress.end(format!("Request Failed {desc}"));
                        retry_or_fail(
                            error,
                            &mut download_backoff,
                            DownloadOutcome::DownloadFailed,
                            move || State::Polling { job },
                            &desc,
                            "poll",
                        )
                        .await
                    }
                }
            }

            State::Downloading { job } => {
                progress.begin(format!("Downloading {desc}"));

                let preflight = tokio::fs::create_dir_all(&output_dir)
                    .await
                    .map_err(Error::Io)
                    .and_then(|()| ensure_free_space(&output_dir, config.min_free_space));
                let result = match preflight {
                    Ok(()) => service.download(&job, &bulk_path).await.map(|_| ()),
                    Err(e) => Err(e),
                };

                match result {
                    Ok(()) => State::Splitting {
                        job,
                        bulk_path: bulk_path.clone(),
                    },
                    Err(error) if error.is_storage_exhausted() => {
                        progress.end(format!("Insufficient Disk Space {desc}"));
                        State::Failed {
                            error,
                            outcome: DownloadOutcome::StorageExhausted,
                        }
                    }
                    Err(error) => {
                        progress.end(format!("Download Failed {desc}"));
                        retry_or_fail(
                            error,
                            &mut download_backoff,
                            DownloadOutcome::DownloadFailed,
                            move || State::Downloading { job },
                            &desc,
                            "download",
                        )
                        .await
                    }
                }
            }

            State::Splitting { job, bulk_path } => {
                let (start, end) = (task.start, task.end);
                let split_path = bulk_path.clone();
                let result = tokio::task::spawn_blocking(move || {
                    split_daily(&split_path, start, end, date_column)
                })
                .await
                .map_err(|e| Error::Io(std::io::Error::other(e)))
                .and_then(|r| r);

                match result {
                    Ok(daily) => {
                        progress.end(format!("Downloaded {desc}"));
                        tracing::info!(task = %desc, files = daily.len(), "daily files written");
                        State::Done
                    }
                    Err(error) if error.is_storage_exhausted() => {
                        progress.end(format!("Insufficient Disk Space {desc}"));
                        State::Failed {
                            error,
                            outcome: DownloadOutcome::StorageExhausted,
                        }
                    }
                    Err(error) => {
                        // a fresh download replaces whatever the failed
                        // split left behind
                        progress.end(format!("Download Failed {desc}"));
                        retry_or_fail(
                            error,
                            &mut download_backoff,
                            DownloadOutcome::DownloadFailed,
                            move || State::Downloading { job },
                            &desc,
                            "split",
                        )
                        .await
                    }
                }
            }

            State::Done => return DownloadOutcome::Success,

            State::Failed { error, outcome } => {
                tracing::error!(task = %desc, error = %error, ?outcome, "task failed terminally");
                return outcome;
            }
        };
    }
}

/// Sleep out the next backoff delay and re-enter `retry_state`, or give the
/// task its terminal failure once the budget (or the error's nature) says
/// retrying is pointless.
async fn retry_or_fail(
    error: Error,
    backoff: &mut Backoff,
    outcome: DownloadOutcome,
    retry_state: impl FnOnce() -> State,
    desc: &str,
    phase: &str,
) -> State {
    if !error.is_retryable() {
        return State::Failed { error, outcome };
    }
    match backoff.next_delay() {
        Some(delay) => {
            tracing::warn!(
                task = %desc,
                phase,
                error = %error,
                attempt = backoff.attempts(),
                delay_ms = delay.as_millis(),
                "transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
            retry_state()
        }
        None => {
            tracing::error!(
                task = %desc,
                phase,
                error = %error,
                attempts = backoff.attempts(),
                "retry attempts exhausted"
            );
            State::Failed { error, outcome }
        }
    }
}
