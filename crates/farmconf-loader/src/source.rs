//! Fetchers for source documents.

use crate::config::LoaderConfig;
use async_trait::async_trait;
use farmconf_common::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Something that returns the text of a named source document
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, name: &str) -> Result<String>;

    /// Human readable origin, for logs
    fn describe(&self) -> String;
}

/// Fetches documents relative to a base URL
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFetcher {
    /// `base_url` without a scheme is treated as plain HTTP.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: normalize_base(base_url),
        })
    }

    pub fn url_for(&self, name: &str) -> String {
        format!("{}{}", self.base_url, name.trim_start_matches('/'))
    }
}

fn normalize_base(base_url: &str) -> String {
    let mut base = if base_url.contains("://") {
        base_url.to_string()
    } else {
        format!("http://{}", base_url)
    };
    if !base.ends_with('/') {
        base.push('/');
    }
    base
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, name: &str) -> Result<String> {
        let url = self.url_for(name);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Network(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Network(format!("GET {} returned {}", url, status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(format!("Failed to read body of {}: {}", url, e)))?;
        if body.trim().is_empty() {
            return Err(Error::NotFound(format!("{} returned an empty body", url)));
        }
        debug!("Fetched {} ({} bytes)", url, body.len());
        Ok(body)
    }

    fn describe(&self) -> String {
        self.base_url.clone()
    }
}

/// Reads documents from a local directory
pub struct DirectoryFetcher {
    root: PathBuf,
}

impl DirectoryFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SourceFetcher for DirectoryFetcher {
    async fn fetch(&self, name: &str) -> Result<String> {
        let relative = Path::new(name);
        if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(Error::InvalidInput(format!(
                "Source name {:?} must stay inside {}",
                name,
                self.root.display()
            )));
        }
        let path = self.root.join(relative);
        let content = tokio::fs::read_to_string(&path).await?;
        if content.trim().is_empty() {
            return Err(Error::NotFound(format!("{} is empty", path.display())));
        }
        Ok(content)
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

/// Serves documents held in memory, for embedding and tests
#[derive(Default)]
pub struct MemoryFetcher {
    documents: RwLock<HashMap<String, String>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, name: impl Into<String>, content: impl Into<String>) {
        self.documents.write().insert(name.into(), content.into());
    }

    pub fn remove(&self, name: &str) {
        self.documents.write().remove(name);
    }
}

#[async_trait]
impl SourceFetcher for MemoryFetcher {
    async fn fetch(&self, name: &str) -> Result<String> {
        self.documents
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("No document named {}", name)))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// The fetcher `config` asks for
pub fn fetcher_for(config: &LoaderConfig) -> Result<Arc<dyn SourceFetcher>> {
    if config.load_from_server {
        Ok(Arc::new(HttpFetcher::new(&config.config_server_url, config.fetch_timeout())?))
    } else {
        Ok(Arc::new(DirectoryFetcher::new(config.config_path.clone())))
    }
}
