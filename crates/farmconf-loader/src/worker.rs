//! Retry-worker executor.
//!
//! A [`Worker`] is executed again and again until it reports that it is done
//! or the executor shuts down. Concurrency is bounded by a semaphore.

use async_trait::async_trait;
use farmconf_common::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

/// Grace period given to running workers on shutdown
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Extra wait after aborting workers that outlived the grace period
pub const SHUTDOWN_FORCE: Duration = Duration::from_secs(5);

#[async_trait]
pub trait Worker: Send + 'static {
    type Output: Send + 'static;

    /// Run one attempt; true when the worker is finished
    async fn execute(&mut self) -> bool;

    /// Why the worker failed, once it is finished
    fn failure(&mut self) -> Option<Error> {
        None
    }

    /// What the worker produced, once it is finished
    fn output(&mut self) -> Option<Self::Output> {
        None
    }
}

/// Handle to a submitted worker
pub struct WorkerHandle<T> {
    name: String,
    task: JoinHandle<Result<Option<T>>>,
}

impl<T> WorkerHandle<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Wait for the worker. `Ok(None)` means it was stopped by shutdown
    /// before finishing or produced no output.
    pub async fn join(self) -> Result<Option<T>> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => {
                Err(Error::Internal(format!("worker {} was cancelled", self.name)))
            }
            Err(e) => Err(Error::Internal(format!("worker {} panicked: {}", self.name, e))),
        }
    }
}

/// Decrements the active count when a worker task ends, aborted or not
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct WorkerExecutor {
    name: String,
    permits: Arc<Semaphore>,
    shutting_down: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    tasks: Mutex<Vec<AbortHandle>>,
    next_id: AtomicU64,
}

impl WorkerExecutor {
    /// Executor running at most `max_workers` workers at a time
    pub fn new(name: impl Into<String>, max_workers: usize) -> Self {
        Self {
            name: name.into(),
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
            shutting_down: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicUsize::new(0)),
            tasks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Submitted workers that have not ended yet, queued ones included
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Queue `worker`; it starts once a slot is free.
    pub fn submit<W: Worker>(&self, label: &str, mut worker: W) -> Result<WorkerHandle<W::Output>> {
        if self.is_shutting_down() {
            return Err(Error::Internal(format!("executor {} is shutting down", self.name)));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}-{}", self.name, label, id);
        let permits = self.permits.clone();
        let shutting_down = self.shutting_down.clone();
        self.active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard(self.active.clone());
        let task_name = name.clone();

        let task = tokio::spawn(async move {
            let _guard = guard;
            // A closed semaphore means shutdown began while queued.
            let Ok(_permit) = permits.acquire_owned().await else {
                return Ok(None);
            };

            let mut attempts: u64 = 0;
            loop {
                if shutting_down.load(Ordering::SeqCst) {
                    debug!("Worker {} stopped by shutdown after {} attempts", task_name, attempts);
                    return Ok(None);
                }
                attempts += 1;
                if worker.execute().await {
                    break;
                }
                tokio::task::yield_now().await;
            }

            debug!("Worker {} finished after {} attempts", task_name, attempts);
            match worker.failure() {
                Some(e) => Err(e),
                None => Ok(worker.output()),
            }
        });

        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task.abort_handle());

        Ok(WorkerHandle { name, task })
    }

    /// Stop accepting work, let running workers finish within `grace`, then
    /// abort the rest and wait up to `force` more.
    pub async fn shutdown(&self, grace: Duration, force: Duration) -> Result<()> {
        info!("Shutting down executor {} ({} active workers)", self.name, self.active());
        self.shutting_down.store(true, Ordering::SeqCst);
        self.permits.close();

        if self.wait_idle(grace).await {
            info!("Executor {} stopped gracefully", self.name);
            return Ok(());
        }

        warn!(
            "Executor {} still has {} workers after {:?}, aborting",
            self.name,
            self.active(),
            grace
        );
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        if self.wait_idle(force).await {
            Ok(())
        } else {
            Err(Error::Internal(format!(
                "executor {} failed to terminate: {} workers still running",
                self.name,
                self.active()
            )))
        }
    }

    async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.active() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}
