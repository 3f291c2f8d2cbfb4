//! Bulk-file splitting.
//!
//! A completed extraction covering several dates arrives as one gzip CSV.
//! Splitting partitions its rows by the report type's date column into one
//! compressed file per calendar date in the task's range. Every date gets a
//! file, including dates with no rows (header only), so calendar coverage
//! stays complete. The bulk file is deleted only after all daily files are
//! written.

use crate::error::{Error, Result};
use crate::types::daily_filename;
use chrono::{Days, NaiveDate};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Split the bulk file at `bulk_path` (spanning `[start, end]`) into daily
/// artifact files next to it.
///
/// Returns the daily file paths written. Idempotent behaviors:
/// - a zero-byte bulk file is deleted and no daily files are produced;
/// - a single-day bulk file is renamed to the canonical `YYYY-MM-DD.csv.gz`;
/// - a multi-day file is partitioned by `date_column`, one gzip CSV per date
///   (empty dates get a header-only file), then the bulk file is removed.
pub fn split_daily(
    bulk_path: &Path,
    start: NaiveDate,
    end: NaiveDate,
    date_column: &str,
) -> Result<Vec<PathBuf>> {
    let output_dir = bulk_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    if std::fs::metadata(bulk_path)?.len() == 0 {
        std::fs::remove_file(bulk_path)?;
        tracing::info!(file = %bulk_path.display(), "removed empty extract");
        return Ok(Vec::new());
    }

    if start == end {
        let dest = output_dir.join(daily_filename(start));
        std::fs::rename(bulk_path, &dest)?;
        return Ok(vec![dest]);
    }

    let daily_paths = write_daily_files(bulk_path, &output_dir, start, end, date_column)?;

    // all daily files are on disk; only now is the bulk file disposable
    std::fs::remove_file(bulk_path)?;
    Ok(daily_paths)
}

fn write_daily_files(
    bulk_path: &Path,
    output_dir: &Path,
    start: NaiveDate,
    end: NaiveDate,
    date_column: &str,
) -> Result<Vec<PathBuf>> {
    let bulk_file = File::open(bulk_path)?;
    let mut reader = csv::Reader::from_reader(GzDecoder::new(bulk_file));

    let headers = reader.headers().map_err(|e| classify_csv(e, bulk_path))?.clone();
    let date_index = headers
        .iter()
        .position(|h| h == date_column)
        .ok_or_else(|| {
            Error::MalformedResponse(format!(
                "bulk file {} has no '{date_column}' column",
                bulk_path.display()
            ))
        })?;

    // one writer per calendar date in the range, created up front so empty
    // dates still produce a (header-only) file
    let mut dates = Vec::new();
    let mut day = start;
    while day <= end {
        dates.push(day);
        match day.checked_add_days(Days::new(1)) {
            Some(next) => day = next,
            None => break,
        }
    }

    let mut paths = Vec::with_capacity(dates.len());
    let mut writers = Vec::with_capacity(dates.len());
    for date in &dates {
        let path = output_dir.join(daily_filename(*date));
        let file = File::create(&path).map_err(|e| Error::from_write_error(e, &path))?;
        let mut writer = csv::Writer::from_writer(GzEncoder::new(file, Compression::default()));
        writer
            .write_record(&headers)
            .map_err(|e| classify_csv(e, &path))?;
        paths.push(path);
        writers.push(writer);
    }

    let mut unmatched = 0usize;
    for record in reader.records() {
        let record = record.map_err(|e| classify_csv(e, bulk_path))?;
        let Some(bucket) = record
            .get(date_index)
            .and_then(|value| row_date(value))
            .and_then(|d| date_offset(d, start, end))
        else {
            unmatched += 1;
            continue;
        };
        writers[bucket]
            .write_record(&record)
            .map_err(|e| classify_csv(e, &paths[bucket]))?;
    }

    if unmatched > 0 {
        tracing::warn!(
            file = %bulk_path.display(),
            rows = unmatched,
            "rows outside the task's date range were dropped"
        );
    }

    for (writer, path) in writers.into_iter().zip(&paths) {
        finish_writer(writer, path)?;
    }

    Ok(paths)
}

/// Flush the CSV writer and finalize the gzip stream
fn finish_writer(writer: csv::Writer<GzEncoder<File>>, path: &Path) -> Result<()> {
    let encoder = writer
        .into_inner()
        .map_err(|e| Error::from_write_error(e.into_error(), path))?;
    encoder
        .finish()
        .map_err(|e| Error::from_write_error(e, path))?;
    Ok(())
}

/// Parse the calendar date out of a date or timestamp cell
/// (`2023-01-03` and `2023-01-03T09:30:00.000Z` both map to 2023-01-03)
fn row_date(value: &str) -> Option<NaiveDate> {
    value.get(0..10)?.parse().ok()
}

fn date_offset(date: NaiveDate, start: NaiveDate, end: NaiveDate) -> Option<usize> {
    if date < start || date > end {
        return None;
    }
    Some((date - start).num_days() as usize)
}

fn classify_csv(e: csv::Error, path: &Path) -> Error {
    if matches!(e.kind(), csv::ErrorKind::Io(io) if crate::error::is_storage_full(io)) {
        Error::StorageExhausted {
            path: path.to_path_buf(),
        }
    } else {
        Error::Csv(e)
    }
}
