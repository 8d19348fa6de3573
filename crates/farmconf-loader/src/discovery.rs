//! Discovery of consumer applications and their configuration units.
//!
//! The transport that reaches a consumer process lives behind
//! [`ConsumerDiscovery`] and [`ConsumerConnection`]. [`LocalRegistry`] is the
//! in-process implementation: every registered [`ConfigManager`] is one
//! application and every configuration type it registered is one unit.

use crate::events::LoadEvent;
use async_trait::async_trait;
use dashmap::DashMap;
use farmconf_common::{ConfigContext, Error, Result};
use farmconf_config::{ConfigManager, LoaderAdapter};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One attribute of a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitAttribute {
    pub name: String,
    pub writable: bool,
    /// Current unscoped value, if the consumer reports one
    pub value: Option<String>,
}

/// A module a consumer application reads configuration for
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigUnit {
    pub module: String,
    pub adapter: LoaderAdapter,
    pub attributes: Vec<UnitAttribute>,
}

impl ConfigUnit {
    pub fn writable_attributes(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .iter()
            .filter(|a| a.writable)
            .map(|a| a.name.as_str())
    }
}

#[async_trait]
pub trait ConsumerDiscovery: Send + Sync {
    /// Names of the applications currently reachable
    async fn applications(&self) -> Result<Vec<String>>;

    async fn connect(&self, app: &str) -> Result<Arc<dyn ConsumerConnection>>;
}

#[async_trait]
pub trait ConsumerConnection: Send + Sync {
    fn app(&self) -> &str;

    async fn list_units(&self) -> Result<Vec<ConfigUnit>>;

    /// Called once per changed module before its attributes are delivered,
    /// so values staged by an earlier unpublished load can be dropped.
    async fn begin_module(&self, _module: &str) -> Result<()> {
        Ok(())
    }

    /// Deliver `payload`, the JSON of a single attribute, to `module`
    async fn set_attribute(&self, module: &str, attribute: &str, payload: &str) -> Result<()>;
}

/// A consumer living in this process
pub struct LocalConsumer {
    manager: Arc<ConfigManager>,
}

impl LocalConsumer {
    pub fn new(manager: Arc<ConfigManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<ConfigManager> {
        &self.manager
    }

    /// Publish pushed values whenever the loader reports a successful load of
    /// this application.
    pub fn follow(self: &Arc<Self>, mut events: broadcast::Receiver<LoadEvent>) -> JoinHandle<()> {
        let consumer = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(LoadEvent::AppLoaded { app, success, .. }) if app == consumer.app() => {
                        if success {
                            consumer.manager.reset_and_flip();
                        } else {
                            error!("Loader reported a failed load for {}", app);
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("{} missed {} load events", consumer.app(), n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Stopped following load events for {}", consumer.app());
        })
    }
}

#[async_trait]
impl ConsumerConnection for LocalConsumer {
    fn app(&self) -> &str {
        self.manager.app_name()
    }

    async fn list_units(&self) -> Result<Vec<ConfigUnit>> {
        let ctx = ConfigContext::new();
        let store = self.manager.store();
        Ok(self
            .manager
            .registered()
            .into_iter()
            .map(|descriptor| ConfigUnit {
                module: descriptor.module.to_string(),
                adapter: descriptor.adapter,
                attributes: descriptor
                    .fields
                    .iter()
                    .map(|field| UnitAttribute {
                        name: field.attribute_name().to_string(),
                        writable: true,
                        value: store.get(descriptor.module, &ctx, field.attribute_name()),
                    })
                    .collect(),
            })
            .collect())
    }

    async fn begin_module(&self, module: &str) -> Result<()> {
        if self.manager.store().discard_pending(module) {
            debug!("Dropped unpublished values of {} in {}", module, self.app());
        }
        Ok(())
    }

    async fn set_attribute(&self, module: &str, attribute: &str, payload: &str) -> Result<()> {
        if self.manager.descriptor(module).is_none() {
            return Err(Error::NotFound(format!(
                "{} has no configuration module {}",
                self.app(),
                module
            )));
        }
        self.manager
            .store()
            .insert(module, payload)
            .map_err(|e| Error::discovery(self.app(), format!("{}.{}: {}", module, attribute, e)))
    }
}

/// In-process [`ConsumerDiscovery`]
#[derive(Default)]
pub struct LocalRegistry {
    consumers: DashMap<String, Arc<LocalConsumer>>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, manager: Arc<ConfigManager>) -> Arc<LocalConsumer> {
        let consumer = Arc::new(LocalConsumer::new(manager));
        let app = consumer.app().to_string();
        info!("Registered local consumer {}", app);
        self.consumers.insert(app, consumer.clone());
        consumer
    }

    pub fn deregister(&self, app: &str) -> bool {
        self.consumers.remove(app).is_some()
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }
}

#[async_trait]
impl ConsumerDiscovery for LocalRegistry {
    async fn applications(&self) -> Result<Vec<String>> {
        let mut apps: Vec<String> = self.consumers.iter().map(|e| e.key().clone()).collect();
        apps.sort();
        Ok(apps)
    }

    async fn connect(&self, app: &str) -> Result<Arc<dyn ConsumerConnection>> {
        let consumer = self
            .consumers
            .get(app)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::discovery(app, "not registered"))?;
        Ok(consumer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use farmconf_config::{
        ConfigDescriptor, Configurable, FieldDescriptor, ManagerSettings, TypedValue, ValueKind,
    };
    use std::time::Duration;

    #[derive(Default)]
    struct Mailer;

    static MAILER_FIELDS: &[FieldDescriptor] = &[
        FieldDescriptor::new("host", ValueKind::String, "localhost"),
        FieldDescriptor::new("port", ValueKind::Integer, "25").resource_id("SmtpPort"),
    ];
    static MAILER: ConfigDescriptor = ConfigDescriptor::new("Mailer", MAILER_FIELDS);

    impl Configurable for Mailer {
        fn descriptor() -> &'static ConfigDescriptor {
            &MAILER
        }
        fn apply(&mut self, _field: &str, _value: TypedValue) -> farmconf_config::Result<()> {
            Ok(())
        }
    }

    fn manager(app: &str) -> Arc<ConfigManager> {
        let manager = Arc::new(ConfigManager::new(ManagerSettings::default().with_app_name(app)));
        manager.register::<Mailer>();
        manager
    }

    #[tokio::test]
    async fn test_units_reflect_registered_types() {
        let registry = LocalRegistry::new();
        let consumer = registry.register(manager("mail"));
        consumer.manager().store().insert("Mailer", r#"{"host": "smtp"}"#).unwrap();
        consumer.manager().reset_and_flip();

        let units = consumer.list_units().await.unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].module, "Mailer");
        assert_eq!(units[0].adapter, LoaderAdapter::Standard);
        assert_eq!(units[0].writable_attributes().collect::<Vec<_>>(), vec!["host", "SmtpPort"]);
        assert_eq!(units[0].attributes[0].value.as_deref(), Some("smtp"));
        assert_eq!(units[0].attributes[1].value, None);
    }

    #[tokio::test]
    async fn test_registry_applications_and_connect() {
        let registry = LocalRegistry::new();
        registry.register(manager("search"));
        registry.register(manager("mail"));
        assert_eq!(registry.applications().await.unwrap(), vec!["mail", "search"]);
        assert_eq!(registry.connect("mail").await.unwrap().app(), "mail");
        assert!(matches!(registry.connect("gone").await, Err(Error::Discovery { .. })));
        assert!(registry.deregister("mail"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_set_attribute_stages_until_flip() {
        let consumer = LocalConsumer::new(manager("mail"));
        consumer.set_attribute("Mailer", "host", r#"{"host": "smtp2"}"#).await.unwrap();
        assert_eq!(consumer.manager().store().pending_len(), 1);
        assert_eq!(consumer.manager().get_value("Mailer", &ConfigContext::new(), "host"), None);

        assert!(matches!(
            consumer.set_attribute("Unknown", "x", "{}").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            consumer.set_attribute("Mailer", "host", "[]").await,
            Err(Error::Discovery { .. })
        ));
    }

    #[tokio::test]
    async fn test_follow_flips_on_successful_app_load() {
        let (tx, _) = broadcast::channel(16);
        let consumer = Arc::new(LocalConsumer::new(manager("mail")));
        let task = consumer.follow(tx.subscribe());

        consumer.set_attribute("Mailer", "host", r#"{"host": "smtp2"}"#).await.unwrap();
        tx.send(LoadEvent::AppLoaded { app: "other".into(), success: true, at: Utc::now() }).unwrap();
        tx.send(LoadEvent::AppLoaded { app: "mail".into(), success: false, at: Utc::now() }).unwrap();
        tx.send(LoadEvent::AppLoaded { app: "mail".into(), success: true, at: Utc::now() }).unwrap();

        consumer.manager().wait_for_load(Duration::from_secs(5)).await.unwrap();
        assert_eq!(consumer.manager().store().generation(), 1);
        assert_eq!(
            consumer.manager().get_value("Mailer", &ConfigContext::new(), "host").as_deref(),
            Some("smtp2")
        );

        drop(tx);
        task.await.unwrap();
    }
}
