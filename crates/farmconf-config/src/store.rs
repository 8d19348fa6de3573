//! Double-buffered, context-scoped value store.
//!
//! Writers fill a pending buffer module by module; [`ValueStore::flip`]
//! publishes everything pending as a new immutable [`Generation`]. Readers
//! only ever see published generations, swapped in through an `ArcSwap`, so
//! a lookup never observes half of a reload.

use crate::{ConfigError, Result};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use farmconf_common::format::{DEFAULTS, SETS, SETS_TYPE, SET_KEY, SET_KEY_LIST};
use farmconf_common::ConfigContext;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One scoped override: applies when the context's set-type value is one of
/// `keys`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetEntry {
    keys: Vec<String>,
    values: BTreeMap<String, String>,
}

impl SetEntry {
    pub fn new(keys: Vec<String>, values: BTreeMap<String, String>) -> Self {
        Self { keys, values }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    pub fn applies_to(&self, id: &str) -> bool {
        self.keys.iter().any(|k| k == id)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Everything known about one module: unscoped defaults plus ordered
/// overrides of a single set type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleValues {
    sets_type: Option<String>,
    defaults: BTreeMap<String, String>,
    sets: Vec<SetEntry>,
}

impl ModuleValues {
    /// Parse a module payload such as
    /// `{"a": 1, "_Sets_Type_": "COLO", "_Sets_": [{"key": ["1"], "keyList": {"a": 2}}]}`.
    pub fn parse(module: &str, payload: &Value) -> Result<Self> {
        let object = payload.as_object().ok_or_else(|| invalid(module, "payload is not an object"))?;

        let sets_type = match object.get(SETS_TYPE) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                return Err(invalid(module, format!("{} must be a string, got {}", SETS_TYPE, other)))
            }
        };

        let mut values = ModuleValues {
            sets_type,
            ..Default::default()
        };

        for (key, value) in object {
            match key.as_str() {
                SETS_TYPE => {}
                SETS => values.sets = parse_sets(module, value)?,
                DEFAULTS => {
                    let defs = value
                        .as_object()
                        .ok_or_else(|| invalid(module, format!("{} must be an object", DEFAULTS)))?;
                    values.defaults.extend(render_map(defs));
                }
                _ => {
                    if let Some(rendered) = render(value) {
                        values.defaults.insert(key.clone(), rendered);
                    }
                }
            }
        }

        if !values.sets.is_empty() && values.sets_type.is_none() {
            return Err(invalid(module, format!("{} declared without {}", SETS, SETS_TYPE)));
        }

        Ok(values)
    }

    /// Fold a later payload for the same module into this one. Fails without
    /// touching `self` when the set types disagree.
    pub fn merge(&mut self, module: &str, incoming: ModuleValues) -> Result<()> {
        match (&self.sets_type, &incoming.sets_type) {
            (Some(existing), Some(new)) if existing != new => {
                return Err(ConfigError::ConflictingSetsType {
                    module: module.to_string(),
                    existing: existing.clone(),
                    incoming: new.clone(),
                });
            }
            (None, Some(new)) => self.sets_type = Some(new.clone()),
            _ => {}
        }
        self.defaults.extend(incoming.defaults);
        self.sets.extend(incoming.sets);
        Ok(())
    }

    /// Value of `key` for `ctx`: the first matching override, then the
    /// unscoped default.
    pub fn resolve(&self, ctx: &ConfigContext, key: &str) -> Option<&str> {
        if let Some(id) = self.sets_type.as_deref().and_then(|t| ctx.get(t)) {
            let scoped = self
                .sets
                .iter()
                .filter(|entry| entry.applies_to(id))
                .find_map(|entry| entry.get(key));
            if scoped.is_some() {
                return scoped;
            }
        }
        self.defaults.get(key).map(String::as_str)
    }

    pub fn sets_type(&self) -> Option<&str> {
        self.sets_type.as_deref()
    }

    pub fn defaults(&self) -> &BTreeMap<String, String> {
        &self.defaults
    }

    pub fn sets(&self) -> &[SetEntry] {
        &self.sets
    }

    /// Every attribute defined anywhere in the module
    pub fn attribute_names(&self) -> BTreeSet<&str> {
        self.defaults
            .keys()
            .chain(self.sets.iter().flat_map(|s| s.values.keys()))
            .map(String::as_str)
            .collect()
    }
}

fn parse_sets(module: &str, value: &Value) -> Result<Vec<SetEntry>> {
    let items = value
        .as_array()
        .ok_or_else(|| invalid(module, format!("{} must be an array", SETS)))?;

    let mut sets = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let keys = item.get(SET_KEY).map(|k| match k {
            Value::Array(ids) => ids.iter().filter_map(render).collect(),
            scalar => render(scalar).into_iter().collect::<Vec<_>>(),
        });
        let values = item.get(SET_KEY_LIST).and_then(Value::as_object);
        match (keys, values) {
            (Some(keys), Some(values)) => sets.push(SetEntry::new(keys, render_map(values).collect())),
            _ => warn!(
                "Skipping set entry {} of module {}: needs '{}' and '{}'",
                idx, module, SET_KEY, SET_KEY_LIST
            ),
        }
    }
    Ok(sets)
}

fn render_map(map: &Map<String, Value>) -> impl Iterator<Item = (String, String)> + '_ {
    map.iter()
        .filter_map(|(k, v)| render(v).map(|rendered| (k.clone(), rendered)))
}

/// Strings as-is, other non-null values as their JSON text.
fn render(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn invalid(module: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidFormat {
        module: module.to_string(),
        reason: reason.into(),
    }
}

/// An immutable, published set of modules
#[derive(Debug, Clone)]
pub struct Generation {
    id: u64,
    modules: HashMap<String, Arc<ModuleValues>>,
    published_at: DateTime<Utc>,
}

impl Generation {
    fn empty() -> Self {
        Self {
            id: 0,
            modules: HashMap::new(),
            published_at: Utc::now(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    pub fn module(&self, name: &str) -> Option<&ModuleValues> {
        self.modules.get(name).map(Arc::as_ref)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn lookup(&self, module: &str, ctx: &ConfigContext, key: &str) -> Option<&str> {
        self.module(module)?.resolve(ctx, key)
    }
}

/// The double-buffered store
pub struct ValueStore {
    published: ArcSwap<Generation>,
    pending: Mutex<HashMap<String, ModuleValues>>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self {
            published: ArcSwap::from_pointee(Generation::empty()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Parse `raw` JSON and stage it for `module`.
    pub fn insert(&self, module: &str, raw: &str) -> Result<()> {
        let payload: Value = serde_json::from_str(raw)
            .map_err(|e| invalid(module, format!("malformed JSON: {}", e)))?;
        self.insert_value(module, &payload)
    }

    /// Stage an already parsed payload for `module`. Payloads for the same
    /// module accumulate until the next flip.
    pub fn insert_value(&self, module: &str, payload: &Value) -> Result<()> {
        let incoming = ModuleValues::parse(module, payload)?;
        let mut pending = self.pending.lock();
        match pending.get_mut(module) {
            Some(existing) => existing.merge(module, incoming)?,
            None => {
                pending.insert(module.to_string(), incoming);
            }
        }
        debug!("Staged values for module {}", module);
        Ok(())
    }

    /// Publish the pending buffer. Pending modules replace their published
    /// counterparts wholesale; modules not touched since the last flip carry
    /// over. Returns the new generation id.
    pub fn flip(&self) -> u64 {
        // Holding the pending lock for the whole flip keeps flips ordered.
        let mut pending = self.pending.lock();
        let current = self.published.load_full();

        let staged = pending.len();
        let mut modules = current.modules.clone();
        for (name, values) in pending.drain() {
            modules.insert(name, Arc::new(values));
        }

        let id = current.id + 1;
        self.published.store(Arc::new(Generation {
            id,
            modules,
            published_at: Utc::now(),
        }));
        info!("Published configuration generation {} ({} modules staged)", id, staged);
        id
    }

    /// Drop whatever is staged for `module`. Returns true if anything was.
    pub fn discard_pending(&self, module: &str) -> bool {
        self.pending.lock().remove(module).is_some()
    }

    /// Number of modules waiting for the next flip
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// The current published generation
    pub fn snapshot(&self) -> Arc<Generation> {
        self.published.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.published.load().id
    }

    pub fn is_loaded(&self, module: &str) -> bool {
        self.published.load().contains(module)
    }

    /// Set types the published `module` is scoped by
    pub fn context_types(&self, module: &str) -> BTreeSet<String> {
        self.published
            .load()
            .module(module)
            .and_then(ModuleValues::sets_type)
            .map(str::to_string)
            .into_iter()
            .collect()
    }

    pub fn get(&self, module: &str, ctx: &ConfigContext, key: &str) -> Option<String> {
        self.published.load().lookup(module, ctx, key).map(str::to_string)
    }

    /// Like [`ValueStore::get`], returning `default` verbatim when nothing
    /// resolves.
    pub fn get_or(&self, module: &str, ctx: &ConfigContext, key: &str, default: &str) -> String {
        self.get(module, ctx, key).unwrap_or_else(|| default.to_string())
    }
}

impl Default for ValueStore {
    fn default() -> Self {
        Self::new()
    }
}
