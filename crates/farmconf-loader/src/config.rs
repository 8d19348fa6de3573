//! Settings of the loader itself, read through the regular materializer from
//! `config_loader.json`.

use farmconf_common::{ConfigContext, Result, TimeUnit, TimeValue};
use farmconf_config::provider::{load_into, JsonFileProvider};
use farmconf_config::{
    manager::materialize, ConfigDescriptor, Configurable, FieldDescriptor, TypedValue,
    ValidationRule, ValueKind, ValueStore,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// File the loader reads its own settings from
pub const LOADER_CONFIG_FILE: &str = "config_loader.json";

#[derive(Debug, Clone, PartialEq)]
pub struct LoaderConfig {
    /// How often consumers are checked for pending pushes
    pub config_sync_interval: TimeValue,
    /// Consolidated document written by the merge pipeline
    pub config_file_name: PathBuf,
    /// How often the consumer inventory is refreshed
    pub discovery_interval: TimeValue,
    /// Where the consumer inventory is written
    pub inventory_file_name: PathBuf,
    pub config_server_url: String,
    /// How often sources are merged
    pub config_server_read_interval: TimeValue,
    pub max_worker_threads: i64,
    /// Fetch sources over HTTP instead of from `config_path`
    pub load_from_server: bool,
    pub config_path: PathBuf,
    pub fetch_timeout: TimeValue,
    /// Longest one application update may take before it is abandoned
    pub push_timeout: TimeValue,
    /// Consolidated-document section holding per-farm attributes
    pub farm_section: String,
}

static LOADER_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor::new("configSyncInterval", ValueKind::Time, "15 s")
        .rule(ValidationRule::TimeRange { min: "1 s", max: "60 m" })
        .describe("Consumer sync interval"),
    FieldDescriptor::new("configFileName", ValueKind::String, "/tmp/config_loader.json")
        .rule(ValidationRule::NotEmpty)
        .describe("Name of the generated merged file"),
    FieldDescriptor::new("discoveryInterval", ValueKind::Time, "60 s")
        .rule(ValidationRule::TimeRange { min: "1 s", max: "24 h" }),
    FieldDescriptor::new("inventoryFileName", ValueKind::String, "/tmp/farmconf_inventory.json")
        .rule(ValidationRule::NotEmpty),
    FieldDescriptor::new("configServerURL", ValueKind::String, "localhost")
        .rule(ValidationRule::NotEmpty)
        .describe("Base URL of the configuration server"),
    FieldDescriptor::new("configServerReadInterval", ValueKind::Time, "1 m")
        .rule(ValidationRule::TimeRange { min: "1 s", max: "24 h" }),
    FieldDescriptor::new("maxWorkerThreads", ValueKind::Integer, "2")
        .rule(ValidationRule::NumberRange { min: 1, max: 256 })
        .describe("Concurrent consumer pushes"),
    FieldDescriptor::new("loadFromServer", ValueKind::Boolean, "false"),
    FieldDescriptor::new("configPath", ValueKind::String, "")
        .describe("Directory holding source files when not loading from the server"),
    FieldDescriptor::new("fetchTimeout", ValueKind::Time, "5 s")
        .rule(ValidationRule::TimeRange { min: "1 ms", max: "5 m" }),
    FieldDescriptor::new("pushTimeout", ValueKind::Time, "30 s")
        .rule(ValidationRule::TimeRange { min: "1 ms", max: "10 m" })
        .describe("Bound on connecting to and updating one consumer"),
    FieldDescriptor::new("farmSection", ValueKind::String, "lsgclient"),
];

static LOADER: ConfigDescriptor = ConfigDescriptor::new("ConfigLoader", LOADER_FIELDS)
    .describe("Central configuration loader")
    .resource(LOADER_CONFIG_FILE);

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            config_sync_interval: TimeValue::new(15, TimeUnit::Seconds),
            config_file_name: PathBuf::from("/tmp/config_loader.json"),
            discovery_interval: TimeValue::new(60, TimeUnit::Seconds),
            inventory_file_name: PathBuf::from("/tmp/farmconf_inventory.json"),
            config_server_url: "localhost".to_string(),
            config_server_read_interval: TimeValue::new(1, TimeUnit::Minutes),
            max_worker_threads: 2,
            load_from_server: false,
            config_path: PathBuf::new(),
            fetch_timeout: TimeValue::new(5, TimeUnit::Seconds),
            push_timeout: TimeValue::new(30, TimeUnit::Seconds),
            farm_section: "lsgclient".to_string(),
        }
    }
}

impl Configurable for LoaderConfig {
    fn descriptor() -> &'static ConfigDescriptor {
        &LOADER
    }

    fn apply(&mut self, field: &str, value: TypedValue) -> farmconf_config::Result<()> {
        match (field, value) {
            ("configSyncInterval", TypedValue::Time(v)) => self.config_sync_interval = v,
            ("configFileName", TypedValue::String(v)) => self.config_file_name = v.into(),
            ("discoveryInterval", TypedValue::Time(v)) => self.discovery_interval = v,
            ("inventoryFileName", TypedValue::String(v)) => self.inventory_file_name = v.into(),
            ("configServerURL", TypedValue::String(v)) => self.config_server_url = v,
            ("configServerReadInterval", TypedValue::Time(v)) => {
                self.config_server_read_interval = v
            }
            ("maxWorkerThreads", TypedValue::Integer(v)) => self.max_worker_threads = v,
            ("loadFromServer", TypedValue::Boolean(v)) => self.load_from_server = v,
            ("configPath", TypedValue::String(v)) => self.config_path = v.into(),
            ("fetchTimeout", TypedValue::Time(v)) => self.fetch_timeout = v,
            ("pushTimeout", TypedValue::Time(v)) => self.push_timeout = v,
            ("farmSection", TypedValue::String(v)) => self.farm_section = v,
            (field, _) => return Err(LOADER.unknown_field(field)),
        }
        Ok(())
    }
}

impl LoaderConfig {
    /// Read `config_loader.json` from `dir`, falling back to defaults for
    /// everything it does not set. A missing file yields the defaults.
    pub async fn load(dir: &Path) -> Result<Self> {
        let store = ValueStore::new();
        let path = dir.join(LOADER_CONFIG_FILE);
        if path.exists() {
            load_into(&JsonFileProvider::new(&path), &store).await?;
            store.flip();
            info!("Loaded loader settings from {}", path.display());
        } else {
            info!("No {} in {}, using defaults", LOADER_CONFIG_FILE, dir.display());
        }
        let ctx = ConfigContext::new().with("TLD", "com");
        Ok(materialize::<Self>(&store.snapshot(), &ctx)?)
    }

    pub fn sync_interval(&self) -> Duration {
        self.config_sync_interval.to_duration()
    }

    pub fn discovery_interval(&self) -> Duration {
        self.discovery_interval.to_duration()
    }

    pub fn server_read_interval(&self) -> Duration {
        self.config_server_read_interval.to_duration()
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout.to_duration()
    }

    pub fn push_timeout(&self) -> Duration {
        self.push_timeout.to_duration()
    }

    pub fn worker_threads(&self) -> usize {
        usize::try_from(self.max_worker_threads).unwrap_or(1).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = LoaderConfig::load(dir.path()).await.unwrap();
        assert_eq!(config, LoaderConfig::default());
        assert_eq!(config.sync_interval(), Duration::from_secs(15));
        assert_eq!(config.server_read_interval(), Duration::from_secs(60));
        assert_eq!(config.worker_threads(), 2);
        assert_eq!(config.push_timeout(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_file_overrides_and_scoped_values() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(LOADER_CONFIG_FILE),
            r#"{"Modules": {"ConfigLoader": {
                "configServerURL": "http://conf.example.net/files",
                "loadFromServer": "true",
                "maxWorkerThreads": 8,
                "configSyncInterval": "2 h",
                "pushTimeout": "750 ms",
                "_Sets_Type_": "TLD",
                "_Sets_": [{"key": ["com"], "keyList": {"farmSection": "farms"}}]
            }}}"#,
        )
        .unwrap();

        let config = LoaderConfig::load(dir.path()).await.unwrap();
        assert_eq!(config.config_server_url, "http://conf.example.net/files");
        assert!(config.load_from_server);
        assert_eq!(config.worker_threads(), 8);
        assert_eq!(config.farm_section, "farms");
        assert_eq!(config.push_timeout(), Duration::from_millis(750));
        // Outside the allowed range, so the default applies.
        assert_eq!(config.sync_interval(), Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(LOADER_CONFIG_FILE), r#"{"NoModules": {}}"#).unwrap();
        assert!(LoaderConfig::load(dir.path()).await.is_err());
    }
}
