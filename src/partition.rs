//! Calendar range partitioning.
//!
//! Turns an inclusive date range into disjoint, contiguous sub-ranges of
//! bounded size. The partitioner is the invariant that lets workers write
//! daily files without file-level locking: no two tasks ever cover the
//! same date.

use chrono::{Days, NaiveDate};

/// Lazy iterator over `(start, end)` sub-range boundaries
#[derive(Debug, Clone)]
pub struct DateChunks {
    next_start: Option<NaiveDate>,
    end: NaiveDate,
    chunk_days: u64,
}

impl Iterator for DateChunks {
    type Item = (NaiveDate, NaiveDate);

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next_start?;
        let chunk_end = start
            .checked_add_days(Days::new(self.chunk_days - 1))
            .unwrap_or(self.end)
            .min(self.end);

        self.next_start = if chunk_end < self.end {
            chunk_end.checked_add_days(Days::new(1))
        } else {
            None
        };

        Some((start, chunk_end))
    }
}

/// Partition the inclusive range `[start, end]` into chunks of at most
/// `chunk_days` calendar dates.
///
/// Pairs are emitted in order, are disjoint and contiguous, and their union
/// covers the input exactly once. The final pair's `end` always equals the
/// last date even when the final chunk is short. A range of one date (or a
/// reversed range, which is clamped) yields the single pair `(start, start)`.
///
/// `chunk_days` of zero is treated as one.
pub fn partition(start: NaiveDate, end: NaiveDate, chunk_days: u32) -> DateChunks {
    DateChunks {
        next_start: Some(start),
        end: end.max(start),
        chunk_days: chunk_days.max(1) as u64,
    }
}
