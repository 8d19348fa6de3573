//! File watcher for automatic configuration reloading.

use crate::Result;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEBOUNCE: Duration = Duration::from_millis(500);

/// Watches a file or directory and runs a reload callback on change.
///
/// Watching stops when the watcher is dropped.
pub struct ConfigWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl ConfigWatcher {
    /// Start watching `path`; `reload` runs after every debounced change.
    pub fn watch<F, Fut>(path: impl AsRef<Path>, mut reload: F) -> Result<Self>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let path = path.as_ref().to_path_buf();
        let (tx, mut rx) = mpsc::channel::<Event>(100);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                // A full channel already has a reload queued.
                let _ = tx.try_send(event);
            }
            Err(e) => warn!("Watch error: {}", e),
        })?;
        watcher.watch(&path, RecursiveMode::NonRecursive)?;
        info!("Started watching {:?}", path);

        let task = tokio::spawn(async move {
            let mut last_reload: Option<Instant> = None;
            while let Some(event) = rx.recv().await {
                if !matches!(
                    event.kind,
                    EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                ) {
                    continue;
                }
                let now = Instant::now();
                if last_reload.is_some_and(|last| now.duration_since(last) < DEBOUNCE) {
                    continue;
                }
                debug!("File change detected: {:?}", event.paths);
                // Let writers finish before reading.
                tokio::time::sleep(DEBOUNCE).await;
                while rx.try_recv().is_ok() {}
                reload().await;
                last_reload = Some(Instant::now());
            }
        });

        Ok(Self {
            path,
            _watcher: watcher,
            task,
        })
    }

    /// Get the watched path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reload_runs_on_change() {
        let dir = TempDir::new().unwrap();
        let reloads = Arc::new(AtomicUsize::new(0));

        let counter = reloads.clone();
        let watcher = ConfigWatcher::watch(dir.path(), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();
        assert_eq!(watcher.path(), dir.path());

        std::fs::write(dir.path().join("module.json"), "{}").unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while reloads.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(reloads.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_watching_missing_path_fails() {
        let dir = TempDir::new().unwrap();
        let result = ConfigWatcher::watch(dir.path().join("absent"), || async {});
        assert!(result.is_err());
    }
}
