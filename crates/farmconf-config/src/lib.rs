//! Context-scoped configuration for farmconf consumers.
//!
//! This crate provides:
//! - A double-buffered value store with atomic publication
//! - Context-sensitive resolution of scoped overrides
//! - Typed configuration objects built from static descriptor tables
//! - An LRU cache of materialized objects, cleared on every publication
//! - File loading and watching for standalone consumers

pub mod cache;
pub mod descriptor;
pub mod manager;
pub mod provider;
pub mod settings;
pub mod store;
pub mod types;
pub mod validation;
pub mod watcher;

pub use cache::ObjectCache;
pub use descriptor::{ConfigDescriptor, Configurable, FieldDescriptor, LoaderAdapter};
pub use manager::{ConfigManager, ConfigUpdate};
pub use provider::{ConfigProvider, JsonFileProvider};
pub use settings::{LoadSource, ManagerSettings};
pub use store::{Generation, ModuleValues, SetEntry, ValueStore};
pub use types::{TypedValue, ValueKind};
pub use validation::{ValidationError, ValidationRule};
pub use watcher::ConfigWatcher;

pub use farmconf_common::{ConfigContext, TypeFormatError};

use thiserror::Error;

/// Why a value read from a source could not be used for a field.
#[derive(Debug, Error)]
pub enum FieldError {
    #[error(transparent)]
    TypeFormat(#[from] TypeFormatError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid format for module {module}: {reason}")]
    InvalidFormat { module: String, reason: String },

    #[error("Module {module} already declares set type {existing}, refusing {incoming}")]
    ConflictingSetsType {
        module: String,
        existing: String,
        incoming: String,
    },

    #[error("Key {key} is required but missing or invalid")]
    KeyNotFound {
        key: String,
        #[source]
        cause: Option<FieldError>,
    },

    #[error("Default value {value:?} of field {field} is invalid: {source}")]
    InvalidDefault {
        field: String,
        value: String,
        #[source]
        source: FieldError,
    },

    #[error("Descriptor error: {0}")]
    Descriptor(String),

    #[error("Timed out after {0:?} waiting for configuration to load")]
    LoadTimeout(std::time::Duration),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

impl From<ConfigError> for farmconf_common::Error {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::Io(io) => farmconf_common::Error::Io(io),
            other => farmconf_common::Error::Configuration(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
