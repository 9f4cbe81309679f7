use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use multinic::allocator::Pool;
use multinic::config::{AttachmentTemplate, DaemonConfig, PoolConfig};
use multinic::inventory::{FileSource, InventorySource, SnapshotProvider};
use multinic::service::{ConfigRequest, ConfigResponse, Pipeline};
use multinic::topology::Topology;

/// Operator tool for multi-NIC attachment templates and address pools
#[derive(Parser)]
#[clap(name = "multi-nic-ctl", author, version, about)]
struct Cli {
    /// Enable verbose output
    #[clap(short, long)]
    verbose: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse an attachment template and show how it is classified
    Validate {
        /// Attachment template file
        #[clap(long)]
        template: PathBuf,
    },

    /// Render the per-interface configs a pod would receive
    Render {
        /// Attachment template file
        #[clap(long)]
        template: PathBuf,

        /// Inventory snapshot file
        #[clap(long)]
        inventory: PathBuf,

        /// Daemon configuration file with the address pools
        #[clap(long)]
        config: Option<PathBuf>,

        /// Pod as namespace/name
        #[clap(long)]
        pod: String,

        /// Host the pod runs on
        #[clap(long)]
        host: String,
    },

    /// Show the host and interface blocks of an address pool
    Layout {
        /// Daemon configuration file with the address pools
        #[clap(long)]
        config: PathBuf,

        /// Address space of the pool
        #[clap(long)]
        address_space: String,

        /// Host slot to expand
        #[clap(long, default_value_t = 0)]
        host_slot: u32,
    },
}

fn read_template(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .with_context(|| format!("Failed to read template {}", path.display()))
}

fn run_validate(path: &Path) -> Result<()> {
    let template = AttachmentTemplate::parse(read_template(path)?.as_bytes())
        .with_context(|| format!("Invalid template {}", path.display()))?;

    println!("Attachment {}:", template.name);
    println!("  Plugin: {}", template.plugin.describe());
    println!("  Address spaces: {}", template.master_nets.join(", "));
    if template.multi_nic_ipam {
        println!("  IPAM: per-interface leases (subnet {})", template.subnet);
    } else {
        println!("  IPAM: {}", template.ipam_type().unwrap_or("none"));
    }
    if template.args.num_of_interfaces > 0 {
        println!("  Interfaces requested: {}", template.args.num_of_interfaces);
    }
    Ok(())
}

async fn run_render(
    template: &Path,
    inventory: &Path,
    config: Option<&Path>,
    pod: &str,
    host: &str,
) -> Result<()> {
    let (namespace, name) = pod
        .split_once('/')
        .with_context(|| format!("Pod {} is not namespace/name", pod))?;

    let config = match config {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };
    let topology = match &config.topology_path {
        Some(path) => Topology::load(path)?,
        None => Topology::default(),
    };
    let snapshot = FileSource::new(inventory.to_path_buf()).fetch()?;
    let provider = Arc::new(SnapshotProvider::new(snapshot));
    let pipeline = Pipeline::from_config(&config, provider, Arc::new(topology))?;

    let req = ConfigRequest {
        pod_name: name.to_string(),
        pod_namespace: namespace.to_string(),
        host_name: host.to_string(),
        data: read_template(template)?,
        timeout_ms: None,
    };
    let response = ConfigResponse::from(pipeline.generate(&req).await);
    if !response.success {
        anyhow::bail!("Render failed: {}", response.message);
    }

    info!("rendered {} configs", response.conf_list.len());
    for (index, conf) in response.conf_list.iter().enumerate() {
        let value: serde_json::Value = serde_json::from_str(conf)?;
        println!("# interface {}", index);
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}

fn find_pool<'a>(config: &'a DaemonConfig, address_space: &str) -> Result<&'a PoolConfig> {
    config
        .pools
        .iter()
        .find(|pool| pool.address_space == address_space)
        .with_context(|| format!("No pool for address space {}", address_space))
}

fn run_layout(config: &Path, address_space: &str, host_slot: u32) -> Result<()> {
    let config = DaemonConfig::load(config)?;
    let pool_config = find_pool(&config, address_space)?;
    let pool = Pool::new(pool_config)?;

    let partition = pool
        .host_partition(host_slot)
        .with_context(|| format!("Host slot {} is outside {}", host_slot, pool_config.subnet))?;

    println!("Pool {} ({}):", pool.address_space(), pool_config.subnet);
    println!("  Host slot {}: {}", host_slot, partition);
    for interface_slot in 0..(1u32 << pool_config.interface_block) {
        if let Some(block) = pool.interface_block(host_slot, interface_slot) {
            println!("    Interface slot {}: {}", interface_slot, block);
        }
    }
    if !pool_config.excludes.is_empty() {
        println!("  Excluded: {}", pool_config.excludes.join(", "));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr, rendered configs to stdout
    let level = if cli.verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set default subscriber")?;

    match cli.command {
        Commands::Validate { template } => run_validate(&template)?,

        Commands::Render {
            template,
            inventory,
            config,
            pod,
            host,
        } => run_render(&template, &inventory, config.as_deref(), &pod, &host).await?,

        Commands::Layout {
            config,
            address_space,
            host_slot,
        } => run_layout(&config, &address_space, host_slot)?,
    }

    Ok(())
}
