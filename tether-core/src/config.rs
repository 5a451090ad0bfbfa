//! Configuration model.
//!
//! Every field has a default, so an absent or partial `config.yaml` is valid:
//!
//! ```yaml
//! relay:
//!   start_paused: true
//! channel:
//!   on_parse_error: skip
//! queue:
//!   fsync: true
//!   write_timeout_ms: 5000
//!   on_write_failure: requeue
//!   retry:
//!     max_attempts: 5
//!     first_delay_ms: 50
//!     max_delay_ms: 2000
//!     factor: 2.0
//! ```
//!
//! # API pattern
//!
//! - `load_at(home)`: explicit home; used in tests with `TempDir`
//! - `load()`: derives home from `dirs::home_dir()`, delegates to `load_at`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::paths;

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub relay: RelayConfig,
    pub channel: ChannelConfig,
    pub queue: QueueConfig,
}

// ---------------------------------------------------------------------------
// Relay
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Create relays paused so nothing is emitted before a consumer attaches.
    pub start_paused: bool,
}

// ---------------------------------------------------------------------------
// Message channel
// ---------------------------------------------------------------------------

/// What the channel does with an inbound line that is not valid JSON.
///
/// The line is always consumed; the policy only decides whether the
/// failure is surfaced as an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorPolicy {
    #[default]
    Propagate,
    Skip,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub on_parse_error: ParseErrorPolicy,
}

// ---------------------------------------------------------------------------
// Durable file queue
// ---------------------------------------------------------------------------

/// What the file queue does with a snapshot whose write failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteFailurePolicy {
    /// Log, drop the snapshot, continue with the next one, report to drain waiters.
    #[default]
    Drop,
    /// Put the snapshot back at the head of the queue and retry with backoff.
    Requeue,
}

/// Backoff for [`WriteFailurePolicy::Requeue`].
///
/// The delay for retry `n` (0-indexed) is `first_delay_ms × factor^n`,
/// clamped to `max_delay_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per snapshot, the first write included.
    pub max_attempts: u32,
    pub first_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            first_delay_ms: 100,
            max_delay_ms: 5_000,
            factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (0-indexed).
    pub fn delay(&self, retry: u32) -> Duration {
        let max = Duration::from_millis(self.max_delay_ms);
        let exp = retry.min(i32::MAX as u32) as i32;
        let secs = Duration::from_millis(self.first_delay_ms).as_secs_f64() * self.factor.powi(exp);

        if !secs.is_finite() || secs < 0.0 || secs > max.as_secs_f64() {
            max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// `sync_data` after every snapshot write.
    pub fsync: bool,
    /// Upper bound for a single filesystem operation; `None` waits forever.
    pub write_timeout_ms: Option<u64>,
    pub on_write_failure: WriteFailurePolicy,
    pub retry: RetryConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            fsync: true,
            write_timeout_ms: None,
            on_write_failure: WriteFailurePolicy::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl QueueConfig {
    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.map(Duration::from_millis)
    }
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load `<home>/.tether/config.yaml`.
///
/// Returns [`TetherConfig::default`] if the file does not exist,
/// [`ConfigError::Parse`] (with path + line context) if it is malformed.
pub fn load_at(home: &Path) -> Result<TetherConfig, ConfigError> {
    load_from(&paths::config_path(home))
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<TetherConfig, ConfigError> {
    load_at(&paths::home()?)
}

/// Load a config file from an explicit path.
pub fn load_from(path: &Path) -> Result<TetherConfig, ConfigError> {
    if !path.exists() {
        return Ok(TetherConfig::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    if contents.trim().is_empty() {
        return Ok(TetherConfig::default());
    }
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Save `config` to `<home>/.tether/config.yaml` atomically.
///
/// Writes to `<path>.tmp` then renames to `<path>`.
pub fn save_at(home: &Path, config: &TetherConfig) -> Result<PathBuf, ConfigError> {
    let path = paths::config_path(home);
    let Some(dir) = path.parent() else {
        return Err(io_err(
            path,
            std::io::Error::other("invalid config path"),
        ));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let yaml = serde_yaml::to_string(config)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(path)
}
