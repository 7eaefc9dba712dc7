//! Configuration loading and validation

use anyhow::Result;
use linkmap_discovery::{
    parse_aliases, ConfigError, ExclusionPolicy, ScannerConfig, DEFAULT_TIMEOUT_SECS,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Enable CDP/LLDP before discovery and restore afterwards
    #[serde(default)]
    pub config_discovery: bool,
    /// Add every interface of a known device, not only connected ones
    #[serde(default)]
    pub add_unconnected_interfaces: bool,
    /// Space-separated IPv4 ranges whose neighbors are ignored
    #[serde(default)]
    pub exclude_networks: String,
    /// Space-separated interface names whose connections are ignored
    #[serde(default)]
    pub exclude_interfaces: String,
    /// Only find links between devices already in the testbed
    #[serde(default)]
    pub only_links: bool,
    /// Space-separated `device:alias` connection preferences
    #[serde(default)]
    pub aliases: String,
    /// Only connect with this protocol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_protocol: Option<String>,
    /// Per-device operation timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            config_discovery: false,
            add_unconnected_interfaces: false,
            exclude_networks: String::new(),
            exclude_interfaces: String::new(),
            only_links: false,
            aliases: String::new(),
            connection_protocol: None,
            timeout_secs: default_timeout(),
        }
    }
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Where to write the enriched testbed (stdout when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Config {
    /// Validate and convert to ScannerConfig
    pub fn to_scanner_config(&self) -> Result<ScannerConfig, ConfigError> {
        let discovery = &self.discovery;
        ScannerConfig {
            config_discovery: discovery.config_discovery,
            add_unconnected_interfaces: discovery.add_unconnected_interfaces,
            exclusions: ExclusionPolicy::parse(
                &discovery.exclude_networks,
                &discovery.exclude_interfaces,
            )?,
            only_links: discovery.only_links,
            aliases: parse_aliases(&discovery.aliases)?,
            connection_protocol: discovery.connection_protocol.clone(),
            ..Default::default()
        }
        .with_timeout_secs(discovery.timeout_secs)
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save an example configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let config = Config {
        discovery: DiscoveryConfig {
            exclude_networks: "192.0.2.0/24".to_string(),
            exclude_interfaces: "mgmt0".to_string(),
            connection_protocol: Some("ssh".to_string()),
            ..Default::default()
        },
        output: OutputConfig {
            path: Some(PathBuf::from("testbed-discovered.yaml")),
        },
    };

    let content = toml::to_string_pretty(&config)?;
    std::fs::write(path, content)?;
    Ok(())
}
