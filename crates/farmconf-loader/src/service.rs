//! The loader service: merge scheduler, inventory scheduler and dispatch.

use crate::adapters::AdapterSet;
use crate::config::LoaderConfig;
use crate::discovery::ConsumerDiscovery;
use crate::dispatch::{DispatchWorker, UpdateAppWorker};
use crate::distributor::{AppReport, ConfigDistributor};
use crate::events::LoadEvent;
use crate::merger::{write_json_atomically, ConfigMerger, MergeReport};
use crate::source::{fetcher_for, SourceFetcher};
use crate::worker::{WorkerExecutor, SHUTDOWN_FORCE, SHUTDOWN_GRACE};
use chrono::Utc;
use farmconf_common::{Error, Result};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant};
use tracing::{debug, error, info, warn};

pub struct ConfigLoaderService {
    config: LoaderConfig,
    discovery: Arc<dyn ConsumerDiscovery>,
    merger: ConfigMerger,
    distributor: Arc<ConfigDistributor>,
    /// Runs the single dispatch worker
    dispatchers: WorkerExecutor,
    /// Runs per-application updates, `max_worker_threads` at a time
    updaters: Arc<WorkerExecutor>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConfigLoaderService {
    /// Service reading sources from wherever `config` points
    pub fn new(config: LoaderConfig, discovery: Arc<dyn ConsumerDiscovery>) -> Result<Self> {
        let fetcher = fetcher_for(&config)?;
        Ok(Self::with_fetcher(config, discovery, fetcher))
    }

    pub fn with_fetcher(
        config: LoaderConfig,
        discovery: Arc<dyn ConsumerDiscovery>,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> Self {
        info!(
            "Loader reads sources from {} and writes {}",
            fetcher.describe(),
            config.config_file_name.display()
        );
        let merger = ConfigMerger::new(fetcher, config.config_file_name.clone());
        let distributor = Arc::new(
            ConfigDistributor::new(
                config.config_file_name.clone(),
                AdapterSet::new(config.farm_section.clone()),
            )
            .with_push_timeout(config.push_timeout()),
        );
        let updaters = Arc::new(WorkerExecutor::new("updater", config.worker_threads()));
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            discovery,
            merger,
            distributor,
            dispatchers: WorkerExecutor::new("dispatcher", 1),
            updaters,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn distributor(&self) -> &Arc<ConfigDistributor> {
        &self.distributor
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoadEvent> {
        self.distributor.subscribe()
    }

    /// Merge once, then start both schedulers and the dispatch worker.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if let Err(e) = self.merge_now().await {
            error!("Initial merge failed: {}", e);
        }

        let merge = self.spawn_merge_scheduler();
        let inventory = self.spawn_inventory_scheduler();
        self.tasks.lock().extend([merge, inventory]);

        let dispatcher = DispatchWorker::new(
            self.discovery.clone(),
            self.distributor.clone(),
            self.updaters.clone(),
            self.config.sync_interval(),
        );
        // Dropping the handle detaches the worker; shutdown stops it.
        self.dispatchers.submit("dispatch", dispatcher)?;

        info!(
            "Loader started: merge every {:?}, sync every {:?}, discovery every {:?}",
            self.config.server_read_interval(),
            self.config.sync_interval(),
            self.config.discovery_interval()
        );
        Ok(())
    }

    fn spawn_merge_scheduler(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        let period = self.config.server_read_interval();
        tokio::spawn(async move {
            // The first merge already ran in `start`.
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = service.merge_now().await {
                            error!("Merge cycle failed: {}", e);
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
            debug!("Stopped merge scheduler");
        })
    }

    fn spawn_inventory_scheduler(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        let period = self.config.discovery_interval();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = service.write_inventory().await {
                            error!("Inventory refresh failed: {}", e);
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
            debug!("Stopped inventory scheduler");
        })
    }

    pub async fn merge_now(&self) -> Result<MergeReport> {
        self.merger.merge().await
    }

    /// Load configuration into `app` right away, bypassing the dispatch
    /// interval. With `force` unchanged modules are pushed again.
    pub async fn sync_app(&self, app: &str, force: bool) -> Result<AppReport> {
        let worker = UpdateAppWorker::new(app, self.discovery.clone(), self.distributor.clone(), force);
        self.updaters
            .submit(app, worker)?
            .join()
            .await?
            .ok_or_else(|| Error::Internal(format!("update of {} stopped by shutdown", app)))
    }

    /// [`Self::sync_app`] for every discovered application. One application
    /// failing does not affect the others.
    pub async fn sync_all(&self, force: bool) -> Result<Vec<(String, Result<AppReport>)>> {
        let apps = self.discovery.applications().await?;
        let mut handles = Vec::with_capacity(apps.len());
        for app in apps {
            let worker =
                UpdateAppWorker::new(app.clone(), self.discovery.clone(), self.distributor.clone(), force);
            handles.push((app.clone(), self.updaters.submit(&app, worker)?));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (app, handle) in handles {
            let result = handle.join().await.and_then(|report| {
                report.ok_or_else(|| Error::Internal(format!("update of {} stopped by shutdown", app)))
            });
            if let Err(e) = &result {
                warn!("Sync of {} failed: {}", app, e);
            }
            results.push((app, result));
        }
        Ok(results)
    }

    /// Write a snapshot of every application and its units to the inventory
    /// file. Returns how many applications answered.
    pub async fn write_inventory(&self) -> Result<usize> {
        let apps = self.discovery.applications().await?;
        let mut entries = Map::new();
        let mut reachable = 0;

        for app in apps {
            let entry = match self.discovery.connect(&app).await {
                Ok(connection) => connection.list_units().await.map(|units| json!({ "units": units })),
                Err(e) => Err(e),
            };
            let entry = match entry {
                Ok(entry) => {
                    reachable += 1;
                    entry
                }
                Err(e) => {
                    warn!("No inventory for {}: {}", app, e);
                    json!({ "error": e.to_string() })
                }
            };
            entries.insert(app, entry);
        }

        let inventory = json!({
            "generatedAt": Utc::now().to_rfc3339(),
            "applications": Value::Object(entries),
        });
        write_json_atomically(&self.config.inventory_file_name, &inventory).await?;
        debug!(
            "Wrote inventory of {} applications to {}",
            reachable,
            self.config.inventory_file_name.display()
        );
        Ok(reachable)
    }

    /// Stop the schedulers, then the dispatch worker, then pending updates.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down loader");
        let _ = self.shutdown_tx.send(());

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Scheduler task ended abnormally: {}", e);
            }
        }

        let dispatch = self.dispatchers.shutdown(SHUTDOWN_GRACE, SHUTDOWN_FORCE).await;
        let updates = self.updaters.shutdown(SHUTDOWN_GRACE, SHUTDOWN_FORCE).await;
        dispatch.and(updates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{LocalConsumer, LocalRegistry};
    use crate::source::MemoryFetcher;
    use farmconf_common::format::INDEX_FILE;
    use farmconf_common::{ConfigContext, TimeUnit, TimeValue};
    use farmconf_config::{
        ConfigDescriptor, ConfigManager, Configurable, FieldDescriptor, ManagerSettings,
        TypedValue, ValueKind,
    };
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Mailer;

    static MAILER_FIELDS: &[FieldDescriptor] =
        &[FieldDescriptor::new("host", ValueKind::String, "localhost")];
    static MAILER: ConfigDescriptor = ConfigDescriptor::new("Mailer", MAILER_FIELDS);

    impl Configurable for Mailer {
        fn descriptor() -> &'static ConfigDescriptor {
            &MAILER
        }
        fn apply(&mut self, _field: &str, _value: TypedValue) -> farmconf_config::Result<()> {
            Ok(())
        }
    }

    fn setup(dir: &TempDir) -> (Arc<ConfigLoaderService>, Arc<LocalRegistry>, Arc<MemoryFetcher>) {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.put(INDEX_FILE, r#"{"files": ["mail.json"]}"#);
        fetcher.put("mail.json", r#"{"Modules": {"Mailer": {"host": "smtp"}}}"#);

        let config = LoaderConfig {
            config_file_name: dir.path().join("merged.json"),
            inventory_file_name: dir.path().join("inventory.json"),
            config_sync_interval: TimeValue::new(100, TimeUnit::Milliseconds),
            ..Default::default()
        };
        let registry = Arc::new(LocalRegistry::new());
        let service = Arc::new(ConfigLoaderService::with_fetcher(
            config,
            registry.clone(),
            fetcher.clone(),
        ));
        (service, registry, fetcher)
    }

    fn consumer(registry: &LocalRegistry, app: &str) -> Arc<LocalConsumer> {
        let manager = Arc::new(ConfigManager::new(ManagerSettings::default().with_app_name(app)));
        manager.register::<Mailer>();
        registry.register(manager)
    }

    #[tokio::test]
    async fn test_started_service_reaches_consumers() {
        let dir = TempDir::new().unwrap();
        let (service, registry, _) = setup(&dir);
        let consumer = consumer(&registry, "mail");
        let follow = consumer.follow(service.subscribe());

        service.start().await.unwrap();
        consumer.manager().wait_for_load(Duration::from_secs(5)).await.unwrap();
        assert_eq!(
            consumer.manager().get_value("Mailer", &ConfigContext::new(), "host").as_deref(),
            Some("smtp")
        );
        assert!(dir.path().join("merged.json").exists());

        service.shutdown().await.unwrap();
        follow.abort();
    }

    #[tokio::test]
    async fn test_sync_all_isolates_failures() {
        let dir = TempDir::new().unwrap();
        let (service, registry, _) = setup(&dir);
        consumer(&registry, "mail");
        consumer(&registry, "search");
        service.merge_now().await.unwrap();

        let results = service.sync_all(false).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.as_ref().unwrap().success));

        assert!(matches!(
            service.sync_app("ghost", false).await,
            Err(Error::Discovery { .. })
        ));
        let report = service.sync_app("mail", true).await.unwrap();
        assert!(report.success);
    }

    #[tokio::test]
    async fn test_write_inventory() {
        let dir = TempDir::new().unwrap();
        let (service, registry, _) = setup(&dir);
        consumer(&registry, "mail");

        assert_eq!(service.write_inventory().await.unwrap(), 1);
        let inventory: Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("inventory.json")).unwrap(),
        )
        .unwrap();
        let units = &inventory["applications"]["mail"]["units"];
        assert_eq!(units[0]["module"], "Mailer");
        assert_eq!(units[0]["adapter"], "standard");
        assert_eq!(units[0]["attributes"][0]["name"], "host");
    }
}
