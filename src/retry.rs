//! Retry policy with exponential backoff.
//!
//! The download state machine re-enters its Requesting and Downloading
//! states on transient failures. [`Backoff`] supplies the delay schedule:
//! exponential growth capped at `max_delay`, optional jitter, and a hard
//! attempt limit so a permanently broken task surfaces instead of looping
//! forever.

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (request rejections, network timeouts, pending-job
/// exhaustion) should return `true`. Permanent failures (authentication,
/// disk full, malformed config) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // The remote throttles bursts of submissions; back off and resubmit
            Error::RequestRejected(_) => true,
            // A rejecting status code routes back to Requesting
            Error::StatusRejected { .. } => true,
            // Pending-checks budget exceeded; re-enter the download path
            Error::PollExhausted { .. } => true,
            // Network errors are transient by nature here: the remote holds
            // the completed job, so the same call can be repeated
            Error::Network(_) => true,
            // Disk full is terminal until space is freed
            Error::StorageExhausted { .. } => false,
            // I/O errors other than disk-full are retried (the bulk file is
            // rewritten from scratch on the next attempt)
            Error::Io(e) => !matches!(e.kind(), std::io::ErrorKind::PermissionDenied),
            // Credentials will not fix themselves
            Error::Auth(_) => false,
            // A response we cannot parse will not parse better next time
            Error::MalformedResponse(_) => false,
            Error::Csv(_) => false,
            Error::Serialization(_) => false,
            Error::Config { .. } => false,
            Error::Cancelled => false,
        }
    }
}

/// Bounded exponential-backoff delay schedule.
///
/// Each call to [`Backoff::next_delay`] consumes one attempt and returns the
/// delay to sleep before retrying, or `None` once `max_attempts` retries have
/// been handed out.
#[derive(Debug)]
pub struct Backoff {
    config: RetryConfig,
    attempt: u32,
    delay: Duration,
}

impl Backoff {
    /// Start a fresh schedule from a retry configuration
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            config: config.clone(),
            attempt: 0,
            delay: config.initial_delay,
        }
    }

    /// Number of retries handed out so far
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Consume one retry attempt.
    ///
    /// Returns the (possibly jittered) delay to wait before the next try, or
    /// `None` when the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_attempts {
            return None;
        }
        self.attempt += 1;

        let current = if self.config.jitter {
            add_jitter(self.delay)
        } else {
            self.delay
        };

        let next = Duration::from_secs_f64(self.delay.as_secs_f64() * self.config.backoff_multiplier);
        self.delay = next.min(self.config.max_delay);

        Some(current)
    }
}

/// Add random jitter to a delay to prevent thundering herd.
///
/// Uniformly distributed between 0% and 100% of the delay, so the result
/// lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn delays_grow_exponentially_until_capped() {
        let mut backoff = Backoff::new(&config(5));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(10)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(20)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(40)));
        // 80ms would exceed max_delay, so the cap kicks in
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(50)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(50)));
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn exhausted_schedule_returns_none() {
        let mut backoff = Backoff::new(&config(2));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert_eq!(backoff.attempts(), 2);
    }

    #[test]
    fn zero_max_attempts_never_retries() {
        let mut backoff = Backoff::new(&config(0));
        assert!(backoff.next_delay().is_none());
    }

    #[test]
    fn jittered_delays_stay_within_bounds() {
        let config = RetryConfig {
            jitter: true,
            ..config(1)
        };
        for _ in 0..200 {
            let mut backoff = Backoff::new(&config);
            let delay = backoff.next_delay().unwrap();
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(20));
        }
    }

    #[test]
    fn jitter_on_zero_delay_stays_zero() {
        assert_eq!(add_jitter(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(Error::RequestRejected("too many API calls".to_string()).is_retryable());
        assert!(Error::StatusRejected { status: 500 }.is_retryable());
        assert!(Error::PollExhausted { checks: 2 }.is_retryable());
        assert!(
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset"
            ))
            .is_retryable()
        );
    }

    #[test]
    fn terminal_errors_are_not_retryable() {
        assert!(
            !Error::StorageExhausted {
                path: PathBuf::from("data/x.csv.gz"),
            }
            .is_retryable()
        );
        assert!(!Error::Auth("bad credentials".to_string()).is_retryable());
        assert!(!Error::MalformedResponse("no token".to_string()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }
}
