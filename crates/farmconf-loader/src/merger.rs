//! Source merge pipeline.
//!
//! Every cycle fetches the index, folds the `Modules` section of every listed
//! file into one module set, passes all other sections through and rewrites
//! the consolidated document only when some module's content changed.

use crate::source::SourceFetcher;
use farmconf_common::format::{content_hash, INDEX_FILE, INDEX_FILES, MODULES};
use farmconf_common::{Error, Result};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What one merge cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub files_merged: usize,
    pub files_skipped: usize,
    pub modules: usize,
    /// Modules that are new or whose content hash changed, sorted
    pub changed_modules: Vec<String>,
    /// Whether the consolidated document was rewritten
    pub written: bool,
}

/// Merges source files into the consolidated document
pub struct ConfigMerger {
    fetcher: Arc<dyn SourceFetcher>,
    output: PathBuf,
    /// Content hash of every module as of the last successful write
    hashes: Mutex<HashMap<String, String>>,
}

impl ConfigMerger {
    pub fn new(fetcher: Arc<dyn SourceFetcher>, output: impl Into<PathBuf>) -> Self {
        Self {
            fetcher,
            output: output.into(),
            hashes: Mutex::new(HashMap::new()),
        }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Run one merge cycle. Only an unusable index fails the cycle; broken
    /// source files are logged and skipped.
    pub async fn merge(&self) -> Result<MergeReport> {
        let index = self.fetcher.fetch(INDEX_FILE).await?;
        let files = parse_index(&index)?;

        let mut report = MergeReport::default();
        let mut modules = Map::new();
        let mut passthrough = Map::new();

        for file in &files {
            let document = match self.fetch_document(file).await {
                Ok(document) => document,
                Err(e) => {
                    error!("Skipping source {} from {}: {}", file, self.fetcher.describe(), e);
                    report.files_skipped += 1;
                    continue;
                }
            };

            for (section, value) in document {
                if section != MODULES {
                    passthrough.insert(section, value);
                    continue;
                }
                if let Value::Object(found) = value {
                    for (name, module) in found {
                        if module.is_object() {
                            modules.insert(name, module);
                        } else {
                            warn!("Ignoring module {} in {}: not an object", name, file);
                        }
                    }
                }
            }
            report.files_merged += 1;
        }

        let hashes: HashMap<String, String> = modules
            .iter()
            .map(|(name, module)| (name.clone(), content_hash(module)))
            .collect();
        report.modules = hashes.len();
        report.changed_modules = self.changed(&hashes);

        if report.changed_modules.is_empty() {
            debug!("No module changed across {} sources", report.files_merged);
            return Ok(report);
        }

        let mut consolidated = passthrough;
        consolidated.insert(MODULES.to_string(), Value::Object(modules));
        write_json_atomically(&self.output, &Value::Object(consolidated)).await?;

        // Committed only once written, so a failed write is retried next cycle.
        *self.hashes.lock() = hashes;
        report.written = true;
        info!(
            "Wrote {} with {} modules ({} changed)",
            self.output.display(),
            report.modules,
            report.changed_modules.len()
        );
        Ok(report)
    }

    async fn fetch_document(&self, file: &str) -> Result<Map<String, Value>> {
        let text = self.fetcher.fetch(file).await?;
        let document: Value = serde_json::from_str(&text)?;
        let Value::Object(document) = document else {
            return Err(Error::Serialization(format!("{} is not a JSON object", file)));
        };
        if let Some(modules) = document.get(MODULES) {
            if !modules.is_object() {
                return Err(Error::Serialization(format!("{} of {} is not an object", MODULES, file)));
            }
        }
        Ok(document)
    }

    /// Modules whose hash is new or differs. A module that disappeared is not
    /// a change on its own.
    fn changed(&self, current: &HashMap<String, String>) -> Vec<String> {
        let previous = self.hashes.lock();
        let mut changed: Vec<String> = current
            .iter()
            .filter(|(name, hash)| previous.get(*name) != Some(*hash))
            .map(|(name, _)| name.clone())
            .collect();
        changed.sort();
        changed
    }
}

fn parse_index(text: &str) -> Result<Vec<String>> {
    let index: Value = serde_json::from_str(text)?;
    let files = index
        .get(INDEX_FILES)
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Serialization(format!("{} has no '{}' array", INDEX_FILE, INDEX_FILES)))?;

    Ok(files
        .iter()
        .filter_map(|entry| match entry.as_str() {
            Some(name) if !name.trim().is_empty() => Some(name.to_string()),
            _ => {
                warn!("Ignoring index entry {}", entry);
                None
            }
        })
        .collect())
}

/// Write `value` as pretty JSON to a temporary file next to `path`, then
/// rename it over `path`. Readers see either the old or the new document.
pub async fn write_json_atomically(path: &Path, value: &Value) -> Result<()> {
    let path = path.to_path_buf();
    let contents = serde_json::to_vec_pretty(value)?;
    tokio::task::spawn_blocking(move || -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
        temp.write_all(&contents)?;
        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| Error::Internal(format!("Write task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryFetcher;
    use serde_json::json;
    use tempfile::TempDir;

    fn sources() -> Arc<MemoryFetcher> {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.put(INDEX_FILE, r#"{"files": ["common.json", "mail.json"]}"#);
        fetcher.put(
            "common.json",
            r#"{"Modules": {"HttpClient": {"timeout": "15 s"}, "Cache": {"size": "1 MiB"}}}"#,
        );
        fetcher.put(
            "mail.json",
            r#"{"Modules": {"Mailer": {"host": "smtp"}}, "lsgclient": {"323": {"region": "east"}}}"#,
        );
        fetcher
    }

    fn read(path: &Path) -> Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_merge_writes_consolidated_document() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("merged.json");
        let merger = ConfigMerger::new(sources(), &output);

        let report = merger.merge().await.unwrap();
        assert!(report.written);
        assert_eq!(report.files_merged, 2);
        assert_eq!(report.changed_modules, vec!["Cache", "HttpClient", "Mailer"]);

        let document = read(&output);
        assert_eq!(document["Modules"]["HttpClient"]["timeout"], "15 s");
        assert_eq!(document["Modules"]["Mailer"]["host"], "smtp");
        assert_eq!(document["lsgclient"], json!({"323": {"region": "east"}}));
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("merged.json");
        let fetcher = sources();
        let merger = ConfigMerger::new(fetcher.clone(), &output);

        assert!(merger.merge().await.unwrap().written);
        let first = std::fs::read(&output).unwrap();
        // A reader-visible marker: an unchanged cycle must not touch the file.
        std::fs::write(&output, b"untouched").unwrap();

        let again = merger.merge().await.unwrap();
        assert!(!again.written);
        assert!(again.changed_modules.is_empty());
        assert_eq!(std::fs::read(&output).unwrap(), b"untouched");

        // Reordering keys is not a change either.
        fetcher.put(
            "common.json",
            r#"{"Modules": {"Cache": {"size": "1 MiB"}, "HttpClient": {"timeout": "15 s"}}}"#,
        );
        assert!(!merger.merge().await.unwrap().written);

        fetcher.put(
            "common.json",
            r#"{"Modules": {"HttpClient": {"timeout": "20 s"}, "Cache": {"size": "1 MiB"}}}"#,
        );
        let changed = merger.merge().await.unwrap();
        assert!(changed.written);
        assert_eq!(changed.changed_modules, vec!["HttpClient"]);
        assert_ne!(std::fs::read(&output).unwrap(), first);
        assert_eq!(read(&output)["Modules"]["HttpClient"]["timeout"], "20 s");
    }

    #[tokio::test]
    async fn test_broken_sources_are_skipped() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("merged.json");
        let fetcher = sources();
        fetcher.put(INDEX_FILE, r#"{"files": ["common.json", "broken.json", "missing.json", "flat.json", 7]}"#);
        fetcher.put("broken.json", "{ not json");
        fetcher.put("flat.json", r#"{"Modules": ["HttpClient"]}"#);

        let report = merger_with(fetcher, &output).merge().await.unwrap();
        assert_eq!(report.files_merged, 1);
        assert_eq!(report.files_skipped, 3);
        assert!(report.written);
        assert_eq!(read(&output)["Modules"]["Cache"]["size"], "1 MiB");
    }

    fn merger_with(fetcher: Arc<MemoryFetcher>, output: &Path) -> ConfigMerger {
        ConfigMerger::new(fetcher, output)
    }

    #[tokio::test]
    async fn test_unusable_index_fails_the_cycle() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("merged.json");

        let fetcher = Arc::new(MemoryFetcher::new());
        assert!(merger_with(fetcher.clone(), &output).merge().await.is_err());

        fetcher.put(INDEX_FILE, r#"{"documents": []}"#);
        assert!(merger_with(fetcher, &output).merge().await.is_err());
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_removed_module_alone_is_not_a_change() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("merged.json");
        let fetcher = sources();
        let merger = ConfigMerger::new(fetcher.clone(), &output);
        merger.merge().await.unwrap();

        fetcher.put(INDEX_FILE, r#"{"files": ["common.json"]}"#);
        let report = merger.merge().await.unwrap();
        assert!(!report.written);
        assert!(read(&output)["Modules"].get("Mailer").is_some());
    }

    #[tokio::test]
    async fn test_failed_write_is_retried() {
        let dir = TempDir::new().unwrap();
        // The output path is a directory, so persisting over it fails.
        let output = dir.path().join("merged.json");
        std::fs::create_dir(&output).unwrap();
        let merger = ConfigMerger::new(sources(), &output);
        assert!(merger.merge().await.is_err());

        std::fs::remove_dir(&output).unwrap();
        let report = merger.merge().await.unwrap();
        assert!(report.written);
        assert_eq!(report.changed_modules.len(), 3);
    }

    #[tokio::test]
    async fn test_write_json_atomically_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("out.json");
        write_json_atomically(&path, &json!({"a": 1})).await.unwrap();
        assert_eq!(read(&path), json!({"a": 1}));
        let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
