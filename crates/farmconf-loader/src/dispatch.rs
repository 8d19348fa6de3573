//! Fan-out of distribution work over the worker executor.

use crate::discovery::ConsumerDiscovery;
use crate::distributor::{AppReport, ConfigDistributor};
use crate::worker::{Worker, WorkerExecutor, WorkerHandle};
use async_trait::async_trait;
use farmconf_common::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Longest a dispatcher sleeps before rechecking for shutdown
const IDLE_TICK: Duration = Duration::from_secs(1);

/// Loads configuration into one application
pub struct UpdateAppWorker {
    app: String,
    discovery: Arc<dyn ConsumerDiscovery>,
    distributor: Arc<ConfigDistributor>,
    force: bool,
    failure: Option<Error>,
    output: Option<AppReport>,
}

impl UpdateAppWorker {
    pub fn new(
        app: impl Into<String>,
        discovery: Arc<dyn ConsumerDiscovery>,
        distributor: Arc<ConfigDistributor>,
        force: bool,
    ) -> Self {
        Self {
            app: app.into(),
            discovery,
            distributor,
            force,
            failure: None,
            output: None,
        }
    }
}

#[async_trait]
impl Worker for UpdateAppWorker {
    type Output = AppReport;

    async fn execute(&mut self) -> bool {
        // An unreachable or hung application fails this cycle only; the
        // next dispatch tick tries again.
        let timeout = self.distributor.push_timeout();
        let connection = match tokio::time::timeout(timeout, self.discovery.connect(&self.app)).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                error!("Cannot reach {}: {}", self.app, e);
                self.failure = Some(e);
                return true;
            }
            Err(_) => {
                error!("Connecting to {} timed out after {:?}", self.app, timeout);
                self.failure = Some(Error::discovery(
                    &self.app,
                    format!("connect timed out after {:?}", timeout),
                ));
                return true;
            }
        };
        match self.distributor.load_app_configs(&*connection, self.force).await {
            Ok(report) => self.output = Some(report),
            Err(e) => self.failure = Some(e),
        }
        true
    }

    fn failure(&mut self) -> Option<Error> {
        self.failure.take()
    }

    fn output(&mut self) -> Option<AppReport> {
        self.output.take()
    }
}

/// Long-running worker that submits an [`UpdateAppWorker`] per discovered
/// application every sync interval. It never finishes on its own.
pub struct DispatchWorker {
    discovery: Arc<dyn ConsumerDiscovery>,
    distributor: Arc<ConfigDistributor>,
    updaters: Arc<WorkerExecutor>,
    interval: Duration,
    next_due: Instant,
    handles: HashMap<String, WorkerHandle<AppReport>>,
    known: HashSet<String>,
}

impl DispatchWorker {
    pub fn new(
        discovery: Arc<dyn ConsumerDiscovery>,
        distributor: Arc<ConfigDistributor>,
        updaters: Arc<WorkerExecutor>,
        interval: Duration,
    ) -> Self {
        Self {
            discovery,
            distributor,
            updaters,
            interval,
            next_due: Instant::now(),
            handles: HashMap::new(),
            known: HashSet::new(),
        }
    }

    /// Applications with an update still queued or running
    pub fn in_flight(&self) -> usize {
        self.handles.len()
    }

    /// One dispatch cycle. Returns how many updates were submitted.
    pub async fn run_cycle(&mut self) -> Result<usize> {
        self.reap().await;

        let apps = self.discovery.applications().await?;
        let current: HashSet<String> = apps.iter().cloned().collect();
        for gone in self.known.difference(&current) {
            let forgotten = self.distributor.ledger().forget_app(gone);
            info!("{} disappeared, forgot {} module checksums", gone, forgotten);
        }
        self.known = current;

        let mut submitted = 0;
        for app in apps {
            if self.handles.contains_key(&app) {
                debug!("Update of {} still in flight", app);
                continue;
            }
            let worker = UpdateAppWorker::new(
                app.clone(),
                self.discovery.clone(),
                self.distributor.clone(),
                false,
            );
            match self.updaters.submit(&app, worker) {
                Ok(handle) => {
                    self.handles.insert(app, handle);
                    submitted += 1;
                }
                Err(e) => {
                    warn!("Stopped dispatching: {}", e);
                    break;
                }
            }
        }

        debug!("Dispatched {} updates, {} in flight", submitted, self.handles.len());
        Ok(submitted)
    }

    async fn reap(&mut self) {
        let finished: Vec<String> = self
            .handles
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(app, _)| app.clone())
            .collect();

        for app in finished {
            let Some(handle) = self.handles.remove(&app) else {
                continue;
            };
            match handle.join().await {
                Ok(Some(report)) if !report.success => {
                    warn!("Update of {} found nothing to configure", app)
                }
                Ok(Some(report)) if report.failures().next().is_some() => {
                    let failed: Vec<&str> = report.failures().collect();
                    warn!("Update of {} finished, failed modules: {}", app, failed.join(", "))
                }
                Ok(_) => debug!("Update of {} finished", app),
                Err(e) => error!("Update of {} failed: {}", app, e),
            }
        }
    }
}

#[async_trait]
impl Worker for DispatchWorker {
    type Output = ();

    async fn execute(&mut self) -> bool {
        let now = Instant::now();
        if now < self.next_due {
            tokio::time::sleep((self.next_due - now).min(IDLE_TICK)).await;
            return false;
        }

        self.next_due = now + self.interval;
        if let Err(e) = self.run_cycle().await {
            error!("Dispatch cycle failed: {}", e);
        }
        false
    }
}
