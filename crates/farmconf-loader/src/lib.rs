//! Central configuration loader.
//!
//! The loader periodically merges remote source documents into one
//! consolidated document and pushes each consumer application the modules
//! that changed since its last push.

pub mod adapters;
pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod distributor;
pub mod events;
pub mod ledger;
pub mod merger;
pub mod service;
pub mod source;
pub mod worker;

pub use adapters::{AdapterSet, ConsolidatedDocument, FarmScopedAdapter, ModuleAdapter, StandardAdapter};
pub use config::LoaderConfig;
pub use discovery::{ConfigUnit, ConsumerConnection, ConsumerDiscovery, LocalConsumer, LocalRegistry, UnitAttribute};
pub use dispatch::{DispatchWorker, UpdateAppWorker};
pub use distributor::{AppReport, ConfigDistributor};
pub use events::{LoadEvent, ModuleOutcome};
pub use ledger::ChecksumLedger;
pub use merger::{ConfigMerger, MergeReport};
pub use service::ConfigLoaderService;
pub use source::{DirectoryFetcher, HttpFetcher, MemoryFetcher, SourceFetcher};
pub use worker::{Worker, WorkerExecutor, WorkerHandle};

pub use farmconf_common::{Error, Result};
