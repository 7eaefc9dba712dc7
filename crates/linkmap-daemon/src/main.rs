//! Linkmap - Main entry point
//!
//! Loads a testbed, discovers CDP/LLDP neighbors starting from its devices
//! and writes the testbed back with the devices, interfaces and links found.

mod config;
mod snapshot;

use anyhow::{Context, Result};
use clap::Parser;
use linkmap_core::TestbedDocument;
use linkmap_discovery::{DeviceAgent, DiscoveryReport, DiscoveryScanner, ScannerConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::Config;
use crate::snapshot::SnapshotAgent;

#[derive(Parser, Debug)]
#[command(name = "linkmap")]
#[command(about = "Discover network topology from CDP/LLDP neighbors and write it into a testbed")]
#[command(version)]
struct Args {
    /// Testbed YAML to start from
    #[arg(short, long, required_unless_present = "init_config")]
    testbed: Option<PathBuf>,

    /// Directory of per-device JSON snapshots to replay
    #[arg(short, long, required_unless_present = "init_config")]
    snapshots: Option<PathBuf>,

    /// Path to configuration file
    #[arg(short, long, default_value = "linkmap.toml")]
    config: PathBuf,

    /// Where to write the enriched testbed (stdout when unset)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Enable CDP/LLDP on devices before discovery and restore afterwards
    #[arg(long)]
    config_discovery: bool,

    /// Add every interface of a known device, not only connected ones
    #[arg(long)]
    add_unconnected_interfaces: bool,

    /// Space-separated IPv4 ranges whose neighbors are ignored
    #[arg(long)]
    exclude_network: Option<String>,

    /// Space-separated interface names whose connections are ignored
    #[arg(long)]
    exclude_interfaces: Option<String>,

    /// Only find links between devices already in the testbed
    #[arg(long)]
    only_links: bool,

    /// Space-separated device:alias connection preferences
    #[arg(long)]
    alias: Option<String>,

    /// Only connect over SSH
    #[arg(long)]
    ssh_only: bool,

    /// Per-device operation timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Write an example configuration file to --config and exit
    #[arg(long)]
    init_config: bool,
}

/// Command-line flags take precedence over the configuration file
fn apply_overrides(config: &mut Config, args: &Args) {
    let discovery = &mut config.discovery;
    discovery.config_discovery |= args.config_discovery;
    discovery.add_unconnected_interfaces |= args.add_unconnected_interfaces;
    discovery.only_links |= args.only_links;
    if let Some(networks) = &args.exclude_network {
        discovery.exclude_networks = networks.clone();
    }
    if let Some(interfaces) = &args.exclude_interfaces {
        discovery.exclude_interfaces = interfaces.clone();
    }
    if let Some(aliases) = &args.alias {
        discovery.aliases = aliases.clone();
    }
    if args.ssh_only {
        discovery.connection_protocol = Some("ssh".to_string());
    }
    if let Some(timeout) = args.timeout {
        discovery.timeout_secs = timeout;
    }
    if let Some(output) = &args.output {
        config.output.path = Some(output.clone());
    }
}

/// Load the testbed, run discovery against the snapshots and merge the result back
async fn discover(
    scanner_config: ScannerConfig,
    testbed: &Path,
    snapshots: &Path,
) -> Result<(TestbedDocument, DiscoveryReport)> {
    let mut document = TestbedDocument::from_file(testbed)
        .with_context(|| format!("Failed to load testbed {}", testbed.display()))?;
    let mut topology = document.to_topology()?;

    let agent = SnapshotAgent::new(snapshots);
    info!(
        devices = topology.device_count(),
        links = topology.link_count(),
        snapshots = %agent.dir().display(),
        "Testbed loaded"
    );
    let agent: Arc<dyn DeviceAgent> = Arc::new(agent);
    let scanner = DiscoveryScanner::new(scanner_config, agent);
    let report = scanner.run(&mut topology).await?;

    document.merge_topology(&topology);
    Ok((document, report))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // stdout may carry the testbed
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Linkmap v{}", env!("CARGO_PKG_VERSION"));

    if args.init_config {
        config::save_default_config(&args.config)?;
        info!(path = %args.config.display(), "Example configuration written");
        return Ok(());
    }

    let mut config = config::load_config(&args.config)?;
    apply_overrides(&mut config, &args);
    let scanner_config = config
        .to_scanner_config()
        .context("Invalid discovery configuration")?;

    let testbed = args.testbed.context("--testbed is required")?;
    let snapshots = args.snapshots.context("--snapshots is required")?;
    let (document, report) = discover(scanner_config, &testbed, &snapshots).await?;

    match &config.output.path {
        Some(path) => {
            document.to_file(path)?;
            println!(
                "Discovered {} new devices and {} new links in {} rounds; testbed written to {}",
                report.devices_added.len(),
                report.links_created,
                report.rounds,
                path.display()
            );
            for device in &report.devices_added {
                println!("  - {}", device);
            }
        }
        None => print!("{}", document.to_yaml()?),
    }

    Ok(())
}
