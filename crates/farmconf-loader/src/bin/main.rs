//! farmconf loader
//!
//! Merges configuration sources into one consolidated document and keeps the
//! consumer applications it discovers up to date.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use farmconf_config::{ConfigManager, LoaderAdapter, ManagerSettings};
use farmconf_loader::source::fetcher_for;
use farmconf_loader::{
    AdapterSet, ConfigLoaderService, ConfigMerger, ConsolidatedDocument, LoaderConfig,
    LocalRegistry,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "farmconf-loader",
    about = "Central configuration loader",
    version,
    long_about = "Merges configuration sources and pushes changed modules to consumer applications"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Directory holding config_loader.json
    #[arg(short = 'c', long, env = "FARMCONF_CONFIG_DIR", default_value = "/etc/farmconf")]
    config_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, env = "RUST_LOG", default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the loader until interrupted (default)
    Serve,
    /// Run one merge cycle and exit
    Merge,
    /// Print the module an application would be sent
    Show {
        app: String,
        module: String,
        /// Assemble the module from the per-farm section
        #[arg(long)]
        farm: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = LoaderConfig::load(&cli.config_dir)
        .await
        .with_context(|| format!("reading loader settings from {}", cli.config_dir.display()))?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Merge => {
            let merger = ConfigMerger::new(fetcher_for(&config)?, &config.config_file_name);
            let report = merger.merge().await?;
            println!(
                "merged {} files ({} skipped), {} modules, {} changed, written: {}",
                report.files_merged,
                report.files_skipped,
                report.modules,
                report.changed_modules.len(),
                report.written
            );
            Ok(())
        }
        Commands::Show { app, module, farm } => {
            let document = ConsolidatedDocument::load(&config.config_file_name).await?;
            let kind = if farm { LoaderAdapter::FarmScoped } else { LoaderAdapter::Standard };
            let adapters = AdapterSet::new(config.farm_section.clone());
            let Some(node) = adapters.get(kind).module_node(&document, &app, &module) else {
                bail!("{} has no module {}", app, module);
            };
            println!("{}", serde_json::to_string_pretty(&node)?);
            Ok(())
        }
    }
}

async fn serve(config: LoaderConfig) -> Result<()> {
    info!("Starting farmconf loader v{}", env!("CARGO_PKG_VERSION"));

    // The loader consumes its own settings like any other application.
    let registry = Arc::new(LocalRegistry::new());
    let settings = ManagerSettings::from_env().with_app_name("ConfigLoader");
    let manager = Arc::new(ConfigManager::new(settings));
    manager.register::<LoaderConfig>();
    let own = registry.register(manager);

    let service = Arc::new(ConfigLoaderService::new(config, registry)?);
    let follow = own.follow(service.subscribe());
    service.start().await?;

    wait_for_signal().await?;

    follow.abort();
    if let Err(e) = service.shutdown().await {
        warn!("Loader did not shut down cleanly: {}", e);
        return Err(e.into());
    }
    info!("Loader stopped");
    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down");
    }

    Ok(())
}
