//! Module adapters: how the module a consumer unit reads is assembled from
//! the consolidated document.

use farmconf_common::format::{FARM_SETS_TYPE, MODULES, SETS, SETS_TYPE, SET_KEY, SET_KEY_LIST};
use farmconf_common::{Error, Result};
use farmconf_config::LoaderAdapter;
use serde_json::{json, Map, Value};
use std::path::Path;

/// The merged document written by the merge pipeline
#[derive(Debug, Clone, Default)]
pub struct ConsolidatedDocument {
    root: Map<String, Value>,
}

impl ConsolidatedDocument {
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_value(serde_json::from_str(&text)?)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(root) => Ok(Self { root }),
            _ => Err(Error::Serialization(
                "consolidated document is not a JSON object".to_string(),
            )),
        }
    }

    /// Top-level section, e.g. an application's own modules
    pub fn section(&self, name: &str) -> Option<&Value> {
        self.root.get(name)
    }

    pub fn shared_module(&self, module: &str) -> Option<&Value> {
        self.root.get(MODULES)?.get(module)
    }

    /// `module` inside the section named after `app`
    pub fn app_module(&self, app: &str, module: &str) -> Option<&Value> {
        if app == MODULES {
            return None;
        }
        self.root.get(app)?.get(module)
    }
}

/// Assembles the module node of one consumer unit
pub trait ModuleAdapter: Send + Sync {
    fn kind(&self) -> LoaderAdapter;

    fn module_node(&self, document: &ConsolidatedDocument, app: &str, module: &str) -> Option<Value>;
}

/// App-specific section first, then the shared `Modules`
pub struct StandardAdapter;

impl ModuleAdapter for StandardAdapter {
    fn kind(&self) -> LoaderAdapter {
        LoaderAdapter::Standard
    }

    fn module_node(&self, document: &ConsolidatedDocument, app: &str, module: &str) -> Option<Value> {
        document
            .app_module(app, module)
            .or_else(|| document.shared_module(module))
            .filter(|node| node.is_object())
            .cloned()
    }
}

/// Builds a farm-scoped module from a section of
/// `{farm_id: {attribute: value}}`, whatever the app or module.
pub struct FarmScopedAdapter {
    section: String,
}

impl FarmScopedAdapter {
    pub fn new(section: impl Into<String>) -> Self {
        Self {
            section: section.into(),
        }
    }
}

impl ModuleAdapter for FarmScopedAdapter {
    fn kind(&self) -> LoaderAdapter {
        LoaderAdapter::FarmScoped
    }

    fn module_node(&self, document: &ConsolidatedDocument, _app: &str, _module: &str) -> Option<Value> {
        let farms = document.section(&self.section)?.as_object()?;
        let sets: Vec<Value> = farms
            .iter()
            .filter_map(|(farm, attributes)| {
                let attributes = attributes.as_object()?;
                Some(json!({ SET_KEY: [farm], SET_KEY_LIST: attributes }))
            })
            .collect();
        Some(json!({ SETS_TYPE: FARM_SETS_TYPE, SETS: sets }))
    }
}

/// One adapter per [`LoaderAdapter`] kind
pub struct AdapterSet {
    standard: StandardAdapter,
    farm: FarmScopedAdapter,
}

impl AdapterSet {
    pub fn new(farm_section: impl Into<String>) -> Self {
        Self {
            standard: StandardAdapter,
            farm: FarmScopedAdapter::new(farm_section),
        }
    }

    pub fn get(&self, kind: LoaderAdapter) -> &dyn ModuleAdapter {
        match kind {
            LoaderAdapter::Standard => &self.standard,
            LoaderAdapter::FarmScoped => &self.farm,
        }
    }
}
