//! Settings of the consumer-side configuration manager.
//!
//! ```bash
//! FARMCONF_APP_NAME=search-frontend
//! FARMCONF_CONFIG_PATH=/etc/farmconf
//! FARMCONF_LOAD_FROM=remote            # or filesystem
//! FARMCONF_MAX_CACHE_SIZE=10000
//! FARMCONF_LOADER_SYNC_INTERVAL="15 s"
//! ```

use crate::cache::MIN_CAPACITY;
use farmconf_common::TimeValue;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Where a manager gets its values from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadSource {
    /// Module files under `config_path`, reloaded when they change
    Filesystem,
    /// Pushed by the central loader
    Remote,
}

impl LoadSource {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filesystem" | "file" => Some(LoadSource::Filesystem),
            "remote" | "loader" => Some(LoadSource::Remote),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerSettings {
    /// Application name the manager answers to (default: "default")
    pub app_name: String,

    /// Directory holding module files (default: /etc/farmconf)
    pub config_path: PathBuf,

    /// Value source (default: filesystem)
    pub load_from: LoadSource,

    /// Maximum number of cached configuration objects (default: 10000)
    pub max_cache_size: usize,

    /// Expected period between loader pushes (default: 15s)
    pub loader_sync_interval_secs: u64,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            app_name: "default".to_string(),
            config_path: PathBuf::from("/etc/farmconf"),
            load_from: LoadSource::Filesystem,
            max_cache_size: 10_000,
            loader_sync_interval_secs: 15,
        }
    }
}

impl ManagerSettings {
    /// Load settings from environment variables
    ///
    /// Falls back to defaults if variables are not set or do not parse.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through `lookup`, one call per variable name
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            app_name: lookup("FARMCONF_APP_NAME")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.app_name),
            config_path: lookup("FARMCONF_CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.config_path),
            load_from: lookup("FARMCONF_LOAD_FROM")
                .and_then(|s| LoadSource::parse(&s))
                .unwrap_or(defaults.load_from),
            max_cache_size: lookup("FARMCONF_MAX_CACHE_SIZE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_cache_size)
                .max(MIN_CAPACITY),
            loader_sync_interval_secs: lookup("FARMCONF_LOADER_SYNC_INTERVAL")
                .and_then(|s| TimeValue::parse(&s).ok())
                .map(|t| t.to_secs())
                .unwrap_or(defaults.loader_sync_interval_secs),
        }
    }

    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = path.into();
        self
    }

    pub fn with_load_from(mut self, source: LoadSource) -> Self {
        self.load_from = source;
        self
    }

    pub fn with_max_cache_size(mut self, size: usize) -> Self {
        self.max_cache_size = size.max(MIN_CAPACITY);
        self
    }

    /// Get loader sync interval as Duration
    pub fn loader_sync_interval(&self) -> Duration {
        Duration::from_secs(self.loader_sync_interval_secs)
    }
}
