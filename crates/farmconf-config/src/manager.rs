//! Configuration manager: the consumer-side service object.
//!
//! The manager owns a [`ValueStore`] and an [`ObjectCache`] and turns
//! published values into typed configuration objects.

use crate::{
    cache::ObjectCache,
    descriptor::{ConfigDescriptor, Configurable, FieldDescriptor},
    provider::{load_into, JsonFileProvider},
    settings::{LoadSource, ManagerSettings},
    store::{Generation, ModuleValues, ValueStore},
    types::TypedValue,
    watcher::ConfigWatcher,
    ConfigError, FieldError, Result,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use farmconf_common::ConfigContext;
use std::{sync::Arc, time::Duration};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

/// Publication notification
#[derive(Debug, Clone)]
pub struct ConfigUpdate {
    /// Generation that was published
    pub generation: u64,
    /// Update timestamp
    pub timestamp: DateTime<Utc>,
}

/// Dynamic configuration manager
pub struct ConfigManager {
    settings: ManagerSettings,
    store: Arc<ValueStore>,
    cache: ObjectCache,
    /// Configuration types known to this process, by module
    registry: DashMap<&'static str, &'static ConfigDescriptor>,
    update_tx: broadcast::Sender<ConfigUpdate>,
    /// Flips to true after the first publication
    loaded_tx: watch::Sender<bool>,
}

impl ConfigManager {
    /// Create a new configuration manager
    pub fn new(settings: ManagerSettings) -> Self {
        let (update_tx, _) = broadcast::channel(64);
        let (loaded_tx, _) = watch::channel(false);

        Self {
            cache: ObjectCache::new(settings.max_cache_size),
            settings,
            store: Arc::new(ValueStore::new()),
            registry: DashMap::new(),
            update_tx,
            loaded_tx,
        }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub fn app_name(&self) -> &str {
        &self.settings.app_name
    }

    pub fn store(&self) -> &Arc<ValueStore> {
        &self.store
    }

    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    /// Make `T` known to the loader and to file loading
    pub fn register<T: Configurable>(&self) {
        let descriptor = T::descriptor();
        if self.registry.insert(descriptor.module, descriptor).is_none() {
            debug!("Registered configuration module {}", descriptor.module);
        }
    }

    /// Registered descriptors, ordered by module name
    pub fn registered(&self) -> Vec<&'static ConfigDescriptor> {
        let mut descriptors: Vec<_> = self.registry.iter().map(|e| *e.value()).collect();
        descriptors.sort_by_key(|d| d.module);
        descriptors
    }

    pub fn descriptor(&self, module: &str) -> Option<&'static ConfigDescriptor> {
        self.registry.get(module).map(|e| *e.value())
    }

    /// Subscribe to publication notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigUpdate> {
        self.update_tx.subscribe()
    }

    /// Resolved raw value of `key` in the published `module`
    pub fn get_value(&self, module: &str, ctx: &ConfigContext, key: &str) -> Option<String> {
        self.store.get(module, ctx, key)
    }

    /// Shared configuration object of type `T` for `ctx`.
    ///
    /// Contexts that agree on the set types the module is scoped by share one
    /// instance until the next publication.
    pub fn get_config<T: Configurable>(&self, ctx: &ConfigContext) -> Result<Arc<T>> {
        let snapshot = self.store.snapshot();
        let key = cache_key::<T>(ctx, &snapshot);

        if let Some(object) = self.cache.get::<T>(&key) {
            return Ok(object);
        }

        let object = Arc::new(materialize::<T>(&snapshot, ctx)?);
        self.cache.put(key, object.clone());
        Ok(object)
    }

    /// Build a fresh `T` against the current generation, bypassing the cache
    pub fn build_config<T: Configurable>(&self, ctx: &ConfigContext) -> Result<T> {
        materialize::<T>(&self.store.snapshot(), ctx)
    }

    /// Publish pending values and drop every cached object
    pub fn reset_and_flip(&self) -> u64 {
        let generation = self.store.flip();
        self.cache.clear();
        self.loaded_tx.send_replace(true);

        // No subscribers is fine.
        let _ = self.update_tx.send(ConfigUpdate {
            generation,
            timestamp: Utc::now(),
        });
        info!(
            "Configuration for {} reset to generation {}",
            self.settings.app_name, generation
        );
        generation
    }

    pub fn is_loaded(&self) -> bool {
        *self.loaded_tx.borrow()
    }

    /// Wait until the first publication, at most `timeout`
    pub async fn wait_for_load(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.loaded_tx.subscribe();
        let loaded = tokio::time::timeout(timeout, rx.wait_for(|loaded| *loaded))
            .await
            .map(|waited| waited.is_ok());
        // The sender lives in self, so the channel cannot close here.
        match loaded {
            Ok(true) => Ok(()),
            Ok(false) | Err(_) => Err(ConfigError::LoadTimeout(timeout)),
        }
    }

    /// Stage every registered module file found under `config_path` and
    /// publish. Unreadable files are logged and skipped.
    pub async fn load_resources(&self) -> Result<usize> {
        let mut staged = 0;
        for descriptor in self.registered() {
            let Some(resource) = descriptor.resource else {
                continue;
            };
            let provider = JsonFileProvider::new(self.settings.config_path.join(resource));
            match load_into(&provider, &self.store).await {
                Ok(n) => staged += n,
                Err(e) => error!(
                    "Failed to load {} for module {}: {}",
                    provider.path().display(),
                    descriptor.module,
                    e
                ),
            }
        }

        if staged > 0 {
            self.reset_and_flip();
        }
        Ok(staged)
    }

    /// Start the manager according to its load source.
    ///
    /// Filesystem managers load their module files and keep watching
    /// `config_path`; the returned watcher must be kept alive. Remote
    /// managers wait for the loader to push values.
    pub async fn initialize(self: &Arc<Self>) -> Result<Option<ConfigWatcher>> {
        match self.settings.load_from {
            LoadSource::Remote => {
                info!(
                    "Configuration for {} will be pushed by the loader every {:?}",
                    self.settings.app_name,
                    self.settings.loader_sync_interval()
                );
                Ok(None)
            }
            LoadSource::Filesystem => {
                self.load_resources().await?;
                let manager = Arc::clone(self);
                let watcher = ConfigWatcher::watch(&self.settings.config_path, move || {
                    let manager = manager.clone();
                    async move {
                        if let Err(e) = manager.load_resources().await {
                            error!("Failed to reload configuration: {}", e);
                        }
                    }
                })?;
                Ok(Some(watcher))
            }
        }
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new(ManagerSettings::default())
    }
}

fn cache_key<T: Configurable>(ctx: &ConfigContext, generation: &Generation) -> String {
    let module = T::descriptor().module;
    let scope = generation
        .module(module)
        .and_then(ModuleValues::sets_type)
        .map(|sets_type| ctx.unique_id_for([sets_type]))
        .unwrap_or_default();
    // The generation keeps objects built just before a flip out of the next one.
    format!("{}@{}#{}", std::any::type_name::<T>(), generation.id(), scope)
}

/// Build a `T` from one published generation.
pub fn materialize<T: Configurable>(generation: &Generation, ctx: &ConfigContext) -> Result<T> {
    let descriptor = T::descriptor();
    let module = generation.module(descriptor.module);
    if module.is_none() {
        warn!(
            "Module {} has no loaded values, using declared defaults",
            descriptor.module
        );
    }

    let mut object = T::default();
    for field in descriptor.fields {
        let value = resolve_field(descriptor, field, module, ctx)?;
        object.apply(field.name, value)?;
    }
    object.touch(Utc::now());
    Ok(object)
}

fn resolve_field(
    descriptor: &ConfigDescriptor,
    field: &FieldDescriptor,
    module: Option<&ModuleValues>,
    ctx: &ConfigContext,
) -> Result<TypedValue> {
    let raw = module.and_then(|m| {
        field
            .candidate_keys(descriptor.module)
            .iter()
            .find_map(|key| m.resolve(ctx, key))
            .map(str::to_string)
    });
    let qualified = || format!("{}.{}", descriptor.module, field.name);

    let Some(raw) = raw else {
        if field.required {
            return Err(ConfigError::KeyNotFound {
                key: qualified(),
                cause: None,
            });
        }
        debug!("{} not configured, using default {:?}", qualified(), field.default);
        return field.default_value();
    };

    match convert(field, &raw) {
        Ok(value) => Ok(value),
        Err(cause) if field.required => Err(ConfigError::KeyNotFound {
            key: qualified(),
            cause: Some(cause),
        }),
        Err(cause) => {
            warn!(
                "Ignoring value {:?} of {}: {}; using default {:?}",
                raw,
                qualified(),
                cause,
                field.default
            );
            field.default_value()
        }
    }
}

fn convert(field: &FieldDescriptor, raw: &str) -> std::result::Result<TypedValue, FieldError> {
    let value = field.kind.convert(raw)?;
    if let Some(rule) = &field.rule {
        rule.validate(field.name, &value)?;
    }
    Ok(value)
}
