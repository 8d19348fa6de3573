//! Distribution pipeline: push changed modules to one consumer application.

use crate::adapters::{AdapterSet, ConsolidatedDocument};
use crate::discovery::{ConfigUnit, ConsumerConnection};
use crate::events::{LoadEvent, ModuleOutcome};
use crate::ledger::ChecksumLedger;
use chrono::Utc;
use farmconf_common::format::{
    content_hash, is_reserved, DEFAULTS, SETS, SETS_TYPE, SET_KEY, SET_KEY_LIST,
};
use farmconf_common::{Error, Result};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

/// Default bound on one application update
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one application load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppReport {
    pub app: String,
    pub modules: Vec<(String, ModuleOutcome)>,
    /// The application was reached and exposes at least one unit
    pub success: bool,
}

impl AppReport {
    pub fn outcome(&self, module: &str) -> Option<&ModuleOutcome> {
        self.modules.iter().find(|(m, _)| m == module).map(|(_, o)| o)
    }

    /// Modules whose push failed this cycle
    pub fn failures(&self) -> impl Iterator<Item = &str> {
        self.modules
            .iter()
            .filter(|(_, o)| o.is_failure())
            .map(|(m, _)| m.as_str())
    }
}

pub struct ConfigDistributor {
    document_path: PathBuf,
    adapters: AdapterSet,
    ledger: ChecksumLedger,
    events: broadcast::Sender<LoadEvent>,
    push_timeout: Duration,
}

impl ConfigDistributor {
    pub fn new(document_path: impl Into<PathBuf>, adapters: AdapterSet) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            document_path: document_path.into(),
            adapters,
            ledger: ChecksumLedger::new(),
            events,
            push_timeout: DEFAULT_PUSH_TIMEOUT,
        }
    }

    pub fn with_push_timeout(mut self, timeout: Duration) -> Self {
        self.push_timeout = timeout;
        self
    }

    pub fn push_timeout(&self) -> Duration {
        self.push_timeout
    }

    pub fn ledger(&self) -> &ChecksumLedger {
        &self.ledger
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoadEvent> {
        self.events.subscribe()
    }

    /// Push every changed module to the application behind `connection`.
    ///
    /// One `AppLoaded` event is sent whatever happens. A consumer that does
    /// not answer within the push timeout fails the load; modules it had
    /// already accepted stay recorded in the ledger.
    pub async fn load_app_configs(
        &self,
        connection: &dyn ConsumerConnection,
        force: bool,
    ) -> Result<AppReport> {
        let app = connection.app().to_string();
        let result = tokio::time::timeout(self.push_timeout, self.distribute(connection, &app, force))
            .await
            .unwrap_or_else(|_| {
                Err(Error::discovery(
                    &app,
                    format!("no answer within {:?}", self.push_timeout),
                ))
            });

        let success = matches!(&result, Ok(report) if report.success);
        if let Err(e) = &result {
            error!("Failed to load configuration into {}: {}", app, e);
        }
        self.emit(LoadEvent::AppLoaded {
            app,
            success,
            at: Utc::now(),
        });
        result
    }

    async fn distribute(
        &self,
        connection: &dyn ConsumerConnection,
        app: &str,
        force: bool,
    ) -> Result<AppReport> {
        let units = connection.list_units().await?;
        if units.is_empty() {
            warn!("{} exposes no configuration units", app);
            return Ok(AppReport {
                app: app.to_string(),
                modules: Vec::new(),
                success: false,
            });
        }

        let document = ConsolidatedDocument::load(&self.document_path).await?;

        let mut modules = Vec::with_capacity(units.len());
        for unit in &units {
            let outcome = self.load_module(connection, app, &document, unit, force).await;
            if outcome != ModuleOutcome::Unchanged {
                self.emit(LoadEvent::ModuleLoaded {
                    app: app.to_string(),
                    module: unit.module.clone(),
                    outcome: outcome.clone(),
                    at: Utc::now(),
                });
            }
            modules.push((unit.module.clone(), outcome));
        }

        // Refused modules are reported through their own events; the
        // application still publishes whatever did arrive.
        let failures = modules.iter().filter(|(_, o)| o.is_failure()).count();
        if failures > 0 {
            warn!("Loaded {} modules into {}, {} failed", modules.len(), app, failures);
        } else {
            info!("Loaded {} modules into {}", modules.len(), app);
        }
        Ok(AppReport {
            app: app.to_string(),
            modules,
            success: true,
        })
    }

    async fn load_module(
        &self,
        connection: &dyn ConsumerConnection,
        app: &str,
        document: &ConsolidatedDocument,
        unit: &ConfigUnit,
        force: bool,
    ) -> ModuleOutcome {
        let adapter = self.adapters.get(unit.adapter);
        let Some(node) = adapter.module_node(document, app, &unit.module) else {
            info!("Module {} of {} not found in the consolidated document", unit.module, app);
            return ModuleOutcome::Missing;
        };

        let hash = content_hash(&node);
        if !force && self.ledger.is_current(app, &unit.module, &hash) {
            debug!("Module {} of {} unchanged", unit.module, app);
            return ModuleOutcome::Unchanged;
        }

        if let Err(e) = connection.begin_module(&unit.module).await {
            error!("{} refused a new load of {}: {}", app, unit.module, e);
            return ModuleOutcome::Failed(e.to_string());
        }

        let mut pushed = 0;
        let mut failed = 0;
        for attribute in unit.writable_attributes() {
            let Some(payload) = attribute_payload(&node, attribute) else {
                continue;
            };
            match connection
                .set_attribute(&unit.module, attribute, &payload.to_string())
                .await
            {
                Ok(()) => pushed += 1,
                Err(e) => {
                    error!("Failed to set {}.{} on {}: {}", unit.module, attribute, app, e);
                    failed += 1;
                }
            }
        }

        if failed > 0 && pushed == 0 {
            return ModuleOutcome::Failed(format!("all {} attribute pushes failed", failed));
        }
        self.ledger.record(app, &unit.module, hash);
        ModuleOutcome::Updated { pushed, failed }
    }

    fn emit(&self, event: LoadEvent) {
        if let Err(broadcast::error::SendError(event)) = self.events.send(event) {
            trace!("No subscriber for load event of {}", event.app());
        }
    }
}

/// The part of `node` that concerns `attribute`:
/// `{attribute: default?, _Sets_Type_?, _Sets_: [entries restricted to attribute]}`.
/// `None` when the module defines nothing for it or `attribute` is one of the
/// reserved module keys.
pub fn attribute_payload(node: &Value, attribute: &str) -> Option<Value> {
    if is_reserved(attribute) {
        return None;
    }
    let object = node.as_object()?;
    let mut payload = Map::new();

    let default = object
        .get(attribute)
        .or_else(|| object.get(DEFAULTS).and_then(|d| d.get(attribute)));
    if let Some(value) = default {
        payload.insert(attribute.to_string(), value.clone());
    }

    let sets: Vec<Value> = object
        .get(SETS)
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let value = entry.get(SET_KEY_LIST)?.get(attribute)?;
                    let keys = entry.get(SET_KEY)?;
                    Some(json!({ SET_KEY: keys, SET_KEY_LIST: { attribute: value } }))
                })
                .collect()
        })
        .unwrap_or_default();

    if payload.is_empty() && sets.is_empty() {
        return None;
    }
    if let Some(sets_type) = object.get(SETS_TYPE) {
        payload.insert(SETS_TYPE.to_string(), sets_type.clone());
        payload.insert(SETS.to_string(), Value::Array(sets));
    }
    Some(Value::Object(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::UnitAttribute;
    use async_trait::async_trait;
    use farmconf_config::LoaderAdapter;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingConnection {
        units: Vec<ConfigUnit>,
        pushes: Mutex<Vec<(String, String, Value)>>,
        refuse: HashSet<String>,
    }

    #[async_trait]
    impl ConsumerConnection for RecordingConnection {
        fn app(&self) -> &str {
            "mail"
        }

        async fn list_units(&self) -> Result<Vec<ConfigUnit>> {
            Ok(self.units.clone())
        }

        async fn set_attribute(&self, module: &str, attribute: &str, payload: &str) -> Result<()> {
            if self.refuse.contains(attribute) {
                return Err(Error::discovery("mail", "refused"));
            }
            self.pushes.lock().push((
                module.to_string(),
                attribute.to_string(),
                serde_json::from_str(payload).unwrap(),
            ));
            Ok(())
        }
    }

    fn unit(module: &str, attributes: &[(&str, bool)]) -> ConfigUnit {
        ConfigUnit {
            module: module.to_string(),
            adapter: LoaderAdapter::Standard,
            attributes: attributes
                .iter()
                .map(|(name, writable)| UnitAttribute {
                    name: name.to_string(),
                    writable: *writable,
                    value: None,
                })
                .collect(),
        }
    }

    fn write_document(dir: &TempDir, document: Value) -> PathBuf {
        let path = dir.path().join("merged.json");
        std::fs::write(&path, document.to_string()).unwrap();
        path
    }

    fn document(timeout: &str) -> Value {
        json!({
            "Modules": {
                "HttpClient": {
                    "timeout": timeout,
                    "retries": 3,
                    "_Sets_Type_": "COLO",
                    "_Sets_": [
                        {"key": ["323"], "keyList": {"timeout": "1 s", "proxy": "p323"}},
                        {"key": ["324"], "keyList": {"retries": 5}}
                    ]
                }
            }
        })
    }

    #[test]
    fn test_attribute_payload() {
        let node = &document("15 s")["Modules"]["HttpClient"];
        assert_eq!(
            attribute_payload(node, "timeout").unwrap(),
            json!({
                "timeout": "15 s",
                "_Sets_Type_": "COLO",
                "_Sets_": [{"key": ["323"], "keyList": {"timeout": "1 s"}}]
            })
        );
        assert_eq!(
            attribute_payload(node, "proxy").unwrap(),
            json!({"_Sets_Type_": "COLO", "_Sets_": [{"key": ["323"], "keyList": {"proxy": "p323"}}]})
        );
        assert!(attribute_payload(node, "unknown").is_none());

        let plain = json!({"host": "smtp", "_Defs_": {"port": 25}});
        assert_eq!(attribute_payload(&plain, "host").unwrap(), json!({"host": "smtp"}));
        assert_eq!(attribute_payload(&plain, "port").unwrap(), json!({"port": 25}));
    }

    #[tokio::test]
    async fn test_push_is_gated_by_checksum() {
        let dir = TempDir::new().unwrap();
        let path = write_document(&dir, document("15 s"));
        let distributor = ConfigDistributor::new(&path, AdapterSet::new("lsgclient"));
        let connection = RecordingConnection {
            units: vec![unit("HttpClient", &[("timeout", true), ("retries", true), ("proxy", false)])],
            ..Default::default()
        };

        let report = distributor.load_app_configs(&connection, false).await.unwrap();
        assert!(report.success);
        assert_eq!(
            report.outcome("HttpClient"),
            Some(&ModuleOutcome::Updated { pushed: 2, failed: 0 })
        );
        assert_eq!(connection.pushes.lock().len(), 2);

        let report = distributor.load_app_configs(&connection, false).await.unwrap();
        assert_eq!(report.outcome("HttpClient"), Some(&ModuleOutcome::Unchanged));
        assert_eq!(connection.pushes.lock().len(), 2);

        // Forced loads push regardless.
        distributor.load_app_configs(&connection, true).await.unwrap();
        assert_eq!(connection.pushes.lock().len(), 4);

        write_document(&dir, document("20 s"));
        let report = distributor.load_app_configs(&connection, false).await.unwrap();
        assert!(matches!(report.outcome("HttpClient"), Some(ModuleOutcome::Updated { .. })));
        let pushes = connection.pushes.lock();
        assert_eq!(pushes.len(), 6);
        let (_, attribute, payload) = &pushes[4];
        assert_eq!(attribute, "timeout");
        assert_eq!(payload["timeout"], "20 s");
    }

    #[tokio::test]
    async fn test_missing_module_and_events() {
        let dir = TempDir::new().unwrap();
        let path = write_document(&dir, document("15 s"));
        let distributor = ConfigDistributor::new(&path, AdapterSet::new("lsgclient"));
        let mut events = distributor.subscribe();
        let connection = RecordingConnection {
            units: vec![unit("Absent", &[("x", true)]), unit("HttpClient", &[("retries", true)])],
            ..Default::default()
        };

        let report = distributor.load_app_configs(&connection, false).await.unwrap();
        assert!(report.success);
        assert_eq!(report.outcome("Absent"), Some(&ModuleOutcome::Missing));

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(seen.len(), 3);
        assert!(matches!(&seen[0], LoadEvent::ModuleLoaded { module, outcome: ModuleOutcome::Missing, .. } if module == "Absent"));
        assert!(matches!(&seen[2], LoadEvent::AppLoaded { success: true, .. }));
    }

    #[tokio::test]
    async fn test_refused_pushes_leave_ledger_untouched() {
        let dir = TempDir::new().unwrap();
        let path = write_document(&dir, document("15 s"));
        let distributor = ConfigDistributor::new(&path, AdapterSet::new("lsgclient"));
        let connection = RecordingConnection {
            units: vec![unit("HttpClient", &[("timeout", true)])],
            refuse: HashSet::from(["timeout".to_string()]),
            ..Default::default()
        };

        let report = distributor.load_app_configs(&connection, false).await.unwrap();
        assert!(report.success);
        assert!(report.outcome("HttpClient").unwrap().is_failure());
        assert_eq!(report.failures().collect::<Vec<_>>(), vec!["HttpClient"]);
        assert!(distributor.ledger().get("mail", "HttpClient").is_none());
    }

    struct SilentConnection;

    #[async_trait]
    impl ConsumerConnection for SilentConnection {
        fn app(&self) -> &str {
            "mail"
        }

        async fn list_units(&self) -> Result<Vec<ConfigUnit>> {
            std::future::pending().await
        }

        async fn set_attribute(&self, _module: &str, _attribute: &str, _payload: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_silent_consumer_times_out() {
        let dir = TempDir::new().unwrap();
        let path = write_document(&dir, document("15 s"));
        let distributor = ConfigDistributor::new(&path, AdapterSet::new("lsgclient"))
            .with_push_timeout(Duration::from_millis(50));
        let mut events = distributor.subscribe();

        let result = distributor.load_app_configs(&SilentConnection, false).await;
        assert!(matches!(result, Err(Error::Discovery { .. })));
        assert!(matches!(events.try_recv().unwrap(), LoadEvent::AppLoaded { success: false, .. }));
    }

    #[test]
    fn test_reserved_attributes_carry_no_payload() {
        let node = &document("15 s")["Modules"]["HttpClient"];
        assert!(attribute_payload(node, SETS).is_none());
        assert!(attribute_payload(node, SETS_TYPE).is_none());
    }

    #[tokio::test]
    async fn test_zero_units_and_missing_document() {
        let dir = TempDir::new().unwrap();
        let distributor =
            ConfigDistributor::new(dir.path().join("absent.json"), AdapterSet::new("lsgclient"));
        let mut events = distributor.subscribe();

        let report = distributor
            .load_app_configs(&RecordingConnection::default(), false)
            .await
            .unwrap();
        assert!(report.modules.is_empty());
        assert!(matches!(events.try_recv().unwrap(), LoadEvent::AppLoaded { success: false, .. }));

        let connection = RecordingConnection {
            units: vec![unit("HttpClient", &[("timeout", true)])],
            ..Default::default()
        };
        assert!(distributor.load_app_configs(&connection, false).await.is_err());
        assert!(matches!(events.try_recv().unwrap(), LoadEvent::AppLoaded { success: false, .. }));
    }
}
