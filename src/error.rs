//! Error types for tickhist-dl
//!
//! The error taxonomy mirrors the retry policy of the download pipeline:
//! - Transient failures (request rejection, transport errors) are retried
//!   inside the download state machine and rarely surface to callers.
//! - `StorageExhausted` and `Auth` are terminal: they stop the failing task
//!   (or the whole run, for authentication) without further retries.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for tickhist-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for tickhist-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Authentication with the extraction service failed.
    ///
    /// Carries the remote response body so operators can see why the
    /// credentials were refused. Never retried.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The remote rejected an extraction request payload.
    ///
    /// Carries the remote `error.message`. Usually transient (rate limiting),
    /// so the state machine retries it with backoff.
    #[error("extraction request rejected: {0}")]
    RequestRejected(String),

    /// The remote returned a response the client could not interpret
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// A job did not become ready within the allotted status checks
    #[error("poll budget exhausted after {checks} status checks")]
    PollExhausted {
        /// Number of status checks performed before giving up
        checks: u32,
    },

    /// Job status polling returned a non-success, non-pending status code
    #[error("job status check returned HTTP {status}")]
    StatusRejected {
        /// The HTTP status code returned by the status endpoint
        status: u16,
    },

    /// The storage device backing the output directory is full.
    ///
    /// Terminal: retrying cannot succeed until space is freed.
    #[error("insufficient disk space writing {path}")]
    StorageExhausted {
        /// The path whose write failed for lack of space
        path: PathBuf,
    },

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "workers")
        key: Option<String>,
    },

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV parsing error while splitting a bulk file
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Run cancelled before all tasks completed
    #[error("run cancelled")]
    Cancelled,
}

impl Error {
    /// Classify an I/O error raised while writing to `path`.
    ///
    /// An out-of-space condition (ENOSPC) becomes the terminal
    /// [`Error::StorageExhausted`]; every other I/O error stays transient
    /// and will be retried by the download state machine.
    pub fn from_write_error(e: std::io::Error, path: &Path) -> Self {
        if is_storage_full(&e) {
            Error::StorageExhausted {
                path: path.to_path_buf(),
            }
        } else {
            Error::Io(e)
        }
    }

    /// True for the terminal disk-full condition
    pub fn is_storage_exhausted(&self) -> bool {
        matches!(self, Error::StorageExhausted { .. })
    }
}

/// Check whether an I/O error means the device is out of space
pub(crate) fn is_storage_full(e: &std::io::Error) -> bool {
    #[cfg(unix)]
    {
        if e.raw_os_error() == Some(libc::ENOSPC) {
            return true;
        }
    }
    // StorageFull covers platforms where the raw errno is not ENOSPC
    matches!(e.kind(), std::io::ErrorKind::StorageFull)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn enospc_classifies_as_storage_exhausted() {
        let io = std::io::Error::from_raw_os_error(libc::ENOSPC);
        let err = Error::from_write_error(io, Path::new("/data/out.csv.gz"));
        assert!(err.is_storage_exhausted());
        assert!(err.to_string().contains("/data/out.csv.gz"));
    }

    #[test]
    fn other_io_errors_stay_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = Error::from_write_error(io, Path::new("/data/out.csv.gz"));
        assert!(!err.is_storage_exhausted());
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn request_rejected_carries_remote_message() {
        let err = Error::RequestRejected("Invalid Request: bad field list".to_string());
        assert!(err.to_string().contains("bad field list"));
    }

    #[test]
    fn poll_exhausted_reports_check_count() {
        let err = Error::PollExhausted { checks: 4 };
        assert!(err.to_string().contains('4'));
    }
}
