//! Configuration types for tickhist-dl.
//!
//! Every field has a sensible default so `Config { credentials, ..Default::default() }`
//! works out of the box; serde defaults keep partially-specified config files valid.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for a download run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Extraction service credentials
    pub credentials: Credentials,

    /// Base URL of the extraction REST API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Root directory for daily artifact files
    /// (files land under `data_dir/<base_ric>/<report_type>/`)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Number of parallel workers draining the task queue (default: 8)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Maximum number of calendar dates per task (default: 2)
    #[serde(default = "default_chunk_days")]
    pub chunk_days: u32,

    /// Minimum free space required on the output device before a download
    /// is started, in bytes (default: 1 GiB)
    #[serde(default = "default_min_free_space")]
    pub min_free_space: u64,

    /// Retry behavior for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Job status polling behavior
    #[serde(default)]
    pub poll: PollConfig,

    /// Live terminal progress rendering
    #[serde(default)]
    pub progress: ProgressConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            base_url: default_base_url(),
            data_dir: default_data_dir(),
            workers: default_workers(),
            chunk_days: default_chunk_days(),
            min_free_space: default_min_free_space(),
            retry: RetryConfig::default(),
            poll: PollConfig::default(),
            progress: ProgressConfig::default(),
        }
    }
}

impl Config {
    /// Validate settings that have no sensible zero value
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.workers == 0 {
            return Err(crate::error::Error::Config {
                message: "worker count must be at least 1".to_string(),
                key: Some("workers".to_string()),
            });
        }
        if self.chunk_days == 0 {
            return Err(crate::error::Error::Config {
                message: "chunk size must be at least 1 date".to_string(),
                key: Some("chunk_days".to_string()),
            });
        }
        Ok(())
    }
}

/// Username and password for the extraction service
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Credentials {
    /// Account username
    pub username: String,
    /// Account password
    pub password: String,
}

/// Retry configuration for transient failures.
///
/// Replaces the unbounded retry-on-exception behavior with an explicit
/// bounded exponential-backoff loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts per phase (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 10 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 120 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(120),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Job status polling configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollConfig {
    /// Total budget for one polling pass (default: 60 seconds).
    ///
    /// Exceeding `timeout / interval` pending checks routes the task into
    /// the download retry path instead of hanging.
    #[serde(default = "default_poll_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Interval between status checks (default: 30 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub interval: Duration,

    /// Pause after a job becomes ready, before downloading (default: 2 seconds)
    #[serde(default = "default_ready_pause", with = "duration_serde")]
    pub ready_pause: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            interval: Duration::from_secs(30),
            ready_pause: Duration::from_secs(2),
        }
    }
}

impl PollConfig {
    /// Number of pending checks allowed before polling is considered exhausted
    pub fn max_checks(&self) -> u32 {
        let interval = self.interval.as_secs().max(1);
        (self.timeout.as_secs() / interval).max(1) as u32
    }
}

/// Live progress rendering configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Render live progress rows (default: true).
    ///
    /// Disable when stdout is not a terminal; phase transitions are still
    /// logged through `tracing` either way.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Redraw cadence for the elapsed-time counter (default: 100 ms)
    #[serde(default = "default_refresh_interval", with = "duration_millis_serde")]
    pub refresh_interval: Duration,

    /// How long a finished row keeps its closing label before being
    /// cleared (default: 3 seconds)
    #[serde(default = "default_hold", with = "duration_millis_serde")]
    pub hold: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_interval: Duration::from_millis(100),
            hold: Duration::from_secs(3),
        }
    }
}

fn default_base_url() -> String {
    "https://selectapi.datascope.refinitiv.com/RestApi/v1/".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_workers() -> usize {
    8
}

fn default_chunk_days() -> u32 {
    2
}

fn default_min_free_space() -> u64 {
    1024 * 1024 * 1024
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(120)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_poll_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_ready_pause() -> Duration {
    Duration::from_secs(2)
}

fn default_refresh_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_hold() -> Duration {
    Duration::from_secs(3)
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds, for sub-second settings)
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
