//! Shared task queue drained by the worker pool.

use crate::types::Task;
use std::collections::VecDeque;
use tokio::sync::Mutex;

/// Process-shared FIFO of sub-range tasks.
///
/// Fully populated before workers start pulling; `try_pop` never blocks on
/// an empty queue. Exhaustion is an explicit signal, not an error, and is
/// how workers learn to exit.
pub(crate) struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
}

impl TaskQueue {
    /// Build a queue pre-loaded with every task of the run
    pub(crate) fn new(tasks: impl IntoIterator<Item = Task>) -> Self {
        Self {
            tasks: Mutex::new(tasks.into_iter().collect()),
        }
    }

    /// Pop the next task in FIFO order, or `None` once the queue is drained
    pub(crate) async fn try_pop(&self) -> Option<Task> {
        self.tasks.lock().await.pop_front()
    }

    /// Number of tasks still waiting
    pub(crate) async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Instrument, InstrumentKind, ReportType, Subject};
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn tasks(n: u64) -> Vec<Task> {
        let subject = Arc::new(Subject::new(
            Instrument::new("ES", InstrumentKind::Futures),
            ReportType::EndOfDay,
        ));
        let start: NaiveDate = "2023-01-01".parse().unwrap();
        (0..n)
            .map(|i| {
                let day = start.checked_add_days(chrono::Days::new(i)).unwrap();
                Task::new(subject.clone(), day, day)
            })
            .collect()
    }

    #[tokio::test]
    async fn pops_in_fifo_order_then_signals_exhaustion() {
        let queue = TaskQueue::new(tasks(3));
        assert_eq!(queue.len().await, 3);

        let first = queue.try_pop().await.unwrap();
        assert_eq!(first.start.to_string(), "2023-01-01");
        let second = queue.try_pop().await.unwrap();
        assert_eq!(second.start.to_string(), "2023-01-02");
        queue.try_pop().await.unwrap();

        assert!(queue.try_pop().await.is_none(), "empty queue is a signal, not an error");
        assert!(queue.try_pop().await.is_none(), "exhaustion is stable");
    }

    #[tokio::test]
    async fn concurrent_consumers_each_receive_unique_tasks() {
        let queue = Arc::new(TaskQueue::new(tasks(100)));

        let mut consumers = Vec::new();
        for _ in 0..8 {
            let queue = queue.clone();
            consumers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(task) = queue.try_pop().await {
                    seen.push(task.start);
                    tokio::task::yield_now().await;
                }
                seen
            }));
        }

        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.unwrap());
        }
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 100, "every task consumed exactly once");
    }
}
