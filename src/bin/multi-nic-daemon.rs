use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use multinic::config::DaemonConfig;
use multinic::inventory::{FileSource, InventorySource, Snapshot, SnapshotProvider};
use multinic::service::{http, Pipeline};
use multinic::topology::Topology;

/// Multi-NIC config daemon serving generate/cleanup requests
#[derive(Parser)]
#[clap(name = "multi-nic-daemon", author, version, about)]
struct Cli {
    /// Path to the daemon configuration file
    #[clap(long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the configuration file
    #[clap(long)]
    listen: Option<String>,

    /// Inventory snapshot file, overrides the configuration file
    #[clap(long)]
    inventory: Option<PathBuf>,

    /// NUMA topology file, overrides the configuration file
    #[clap(long)]
    topology: Option<PathBuf>,

    /// Enable verbose output
    #[clap(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up tracing
    let level = if cli.verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);

    if let Err(err) = run(cli).await {
        error!("daemon error: {:#}", err);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(inventory) = cli.inventory {
        config.inventory_path = inventory;
    }
    if let Some(topology) = cli.topology {
        config.topology_path = Some(topology);
    }

    let topology = match &config.topology_path {
        Some(path) => Topology::load(path)?,
        None => Topology::default(),
    };

    let source: Arc<dyn InventorySource> =
        Arc::new(FileSource::new(config.inventory_path.clone()));
    let initial = source.fetch().unwrap_or_else(|e| {
        warn!("starting with an empty inventory: {:#}", e);
        Snapshot::default()
    });
    let inventory = Arc::new(SnapshotProvider::new(initial));
    let refresh = inventory
        .clone()
        .spawn_refresh(source, config.refresh_interval());

    // SIGHUP forces an inventory reload
    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    let on_hangup = inventory.clone();
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            info!("SIGHUP received, reloading inventory");
            on_hangup.request_refresh();
        }
    });

    let pipeline = Arc::new(Pipeline::from_config(&config, inventory, Arc::new(topology))?);
    info!(
        "address pools: {:?}",
        pipeline.allocator().address_spaces()
    );

    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("Failed to listen on {}", config.listen))?;
    info!("listening on {}", config.listen);

    http::serve(listener, pipeline, shutdown_signal())
        .await
        .context("RPC server failed")?;

    refresh.abort();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to wait for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
