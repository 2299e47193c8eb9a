//! Configuration types for the deferred-task scheduler.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Lower bound applied to the fallback tick period.
const MIN_TICK_INTERVAL_MS: u64 = 10;

/// Top-level scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Period of the recurring time source driving the foreground fallback,
    /// in milliseconds.
    pub tick_interval_ms: u64,
    /// In-memory port settings (platforms without a native facility).
    pub memory_port: MemoryPortConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            memory_port: MemoryPortConfig::default(),
        }
    }
}

/// Settings for [`MemoryPort`](crate::platform::memory::MemoryPort).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryPortConfig {
    /// Maximum number of distinct identifiers with an outstanding request.
    ///
    /// Replacing an existing identifier's request never counts against it.
    pub max_pending_requests: usize,
}

impl Default for MemoryPortConfig {
    fn default() -> Self {
        Self {
            max_pending_requests: 10,
        }
    }
}

impl SchedulerConfig {
    /// Tick period as a [`Duration`], clamped to a sane minimum.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(MIN_TICK_INTERVAL_MS))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::TaskError::Config(e.to_string()))
    }

    /// Load configuration from `path` if it exists, otherwise defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default(path: &std::path::Path) -> crate::error::Result<Self> {
        match std::fs::metadata(path) {
            Ok(_) => Self::from_file(path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::TaskError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path.
    ///
    /// Resolves to `dirs::config_dir()/deferred-tasks/scheduler.toml`. Override
    /// the directory with the `DEFERRED_TASKS_CONFIG_DIR` environment variable.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        config_dir().join("scheduler.toml")
    }
}

/// Configuration directory for this crate.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("DEFERRED_TASKS_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("deferred-tasks"))
        .unwrap_or_else(|| PathBuf::from("/tmp/deferred-tasks-config"))
}
