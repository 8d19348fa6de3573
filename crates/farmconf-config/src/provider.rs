//! Sources of configuration documents.

use crate::store::ValueStore;
use crate::{ConfigError, Result};
use async_trait::async_trait;
use farmconf_common::format::MODULES;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Trait for configuration providers
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Load a configuration document from this provider
    async fn load(&self) -> Result<Value>;

    /// Human readable origin, for logs
    fn source(&self) -> String;
}

/// A JSON document on the local filesystem
pub struct JsonFileProvider {
    path: PathBuf,
}

impl JsonFileProvider {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigProvider for JsonFileProvider {
    async fn load(&self) -> Result<Value> {
        let content = fs::read_to_string(&self.path).await?;
        let value: Value = serde_json::from_str(&content)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", self.path.display(), e)))?;
        debug!("Read configuration document {:?}", self.path);
        Ok(value)
    }

    fn source(&self) -> String {
        self.path.display().to_string()
    }
}

/// Stage every module of `document` into the pending buffer of `store`.
///
/// The document must carry a `Modules` object whose members are objects.
/// Nothing is staged when the document is malformed. Returns the number of
/// modules staged.
pub fn stage_document(store: &ValueStore, document: &Value) -> Result<usize> {
    let modules = modules_of(document)?;
    for (module, payload) in modules {
        store.insert_value(module, payload)?;
    }
    Ok(modules.len())
}

fn modules_of(document: &Value) -> Result<&serde_json::Map<String, Value>> {
    let modules = document
        .get(MODULES)
        .and_then(Value::as_object)
        .ok_or_else(|| ConfigError::InvalidFormat {
            module: MODULES.to_string(),
            reason: format!("document has no '{}' object", MODULES),
        })?;
    if let Some((name, _)) = modules.iter().find(|(_, v)| !v.is_object()) {
        return Err(ConfigError::InvalidFormat {
            module: name.clone(),
            reason: "module is not an object".to_string(),
        });
    }
    Ok(modules)
}

/// Load `provider` and stage its modules into `store`
pub async fn load_into(provider: &dyn ConfigProvider, store: &ValueStore) -> Result<usize> {
    let document = provider.load().await?;
    let staged = stage_document(store, &document)?;
    info!("Staged {} modules from {}", staged, provider.source());
    Ok(staged)
}
