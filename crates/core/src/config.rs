//! Watcher configuration
//!
//! Every field has a default, so a TOML file only needs the keys it
//! overrides:
//!
//! ```toml
//! queue_capacity = 1024
//! rename_pairing_window_ms = 250
//!
//! [ignore]
//! patterns = ["*.log", "target/"]
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Smallest usable queue: one overflow marker plus one event
pub const MIN_QUEUE_CAPACITY: usize = 2;

/// Configuration for a watcher instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatcherConfig {
    /// Maximum number of undrained events (default: 4096)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long a split rename half waits for its partner (default: 300ms)
    #[serde(default = "default_rename_pairing_window_ms")]
    pub rename_pairing_window_ms: u64,

    /// Upper bound on one blocking backend read (default: 50ms)
    ///
    /// Also bounds how long `register`, `unregister` and `stop` wait for the
    /// background thread.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// List new subdirectories after watching them and report their
    /// contents as created (default: true)
    #[serde(default = "default_true")]
    pub reconcile_new_directories: bool,

    /// Notification backend selection
    #[serde(default)]
    pub backend: BackendKind,

    /// Event filtering
    #[serde(default)]
    pub ignore: IgnoreConfig,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            rename_pairing_window_ms: default_rename_pairing_window_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            reconcile_new_directories: true,
            backend: BackendKind::default(),
            ignore: IgnoreConfig::default(),
        }
    }
}

impl WatcherConfig {
    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: WatcherConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file and validate it
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity < MIN_QUEUE_CAPACITY {
            return Err(ConfigError::Invalid {
                field: "queue_capacity",
                reason: format!(
                    "must be at least {} (got {})",
                    MIN_QUEUE_CAPACITY, self.queue_capacity
                ),
            });
        }

        if !(1..=10_000).contains(&self.poll_interval_ms) {
            return Err(ConfigError::Invalid {
                field: "poll_interval_ms",
                reason: format!("must be within 1-10000 (got {})", self.poll_interval_ms),
            });
        }

        if self.rename_pairing_window_ms > 60_000 {
            return Err(ConfigError::Invalid {
                field: "rename_pairing_window_ms",
                reason: format!(
                    "must be at most 60000 (got {})",
                    self.rename_pairing_window_ms
                ),
            });
        }

        if let Some(pattern) = self.ignore.patterns.iter().find(|p| p.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "ignore.patterns",
                reason: format!("empty pattern {:?}", pattern),
            });
        }

        Ok(())
    }

    /// Rename pairing window as a duration
    pub fn rename_pairing_window(&self) -> Duration {
        Duration::from_millis(self.rename_pairing_window_ms)
    }

    /// Backend poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Which notification facility to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// inotify on Linux, the portable backend elsewhere
    #[default]
    Auto,

    /// Linux inotify, one kernel watch per directory
    Inotify,

    /// notify-rs (FSEvents, ReadDirectoryChangesW, kqueue, inotify)
    Portable,
}

/// Event filter configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreConfig {
    /// Gitignore-style patterns; matching paths produce no events
    #[serde(default)]
    pub patterns: Vec<String>,

    /// Drop editor swap, backup and OS metadata files (default: false)
    #[serde(default)]
    pub editor_temp_files: bool,
}

impl IgnoreConfig {
    /// Whether any filtering is configured
    pub fn is_active(&self) -> bool {
        self.editor_temp_files || !self.patterns.is_empty()
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn default_queue_capacity() -> usize {
    4096
}

fn default_rename_pairing_window_ms() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_true() -> bool {
    true
}
