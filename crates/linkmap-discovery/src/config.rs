//! Scanner configuration

use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::filter::ExclusionPolicy;

/// Default per-operation timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("IP range given {0} is not valid")]
    InvalidNetwork(String),
    #[error("{0} is not a valid device:alias entry")]
    InvalidAlias(String),
    #[error("Timeout must be greater than zero")]
    ZeroTimeout,
}

/// Parse a space-separated `device:alias` list
pub fn parse_aliases(list: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    list.split_whitespace()
        .map(|entry| {
            let parts: Vec<&str> = entry.split(':').collect();
            match parts.as_slice() {
                [device, alias] if !device.is_empty() && !alias.is_empty() => {
                    Ok((device.to_string(), alias.to_string()))
                }
                _ => Err(ConfigError::InvalidAlias(entry.to_string())),
            }
        })
        .collect()
}

/// Validated configuration for a discovery run
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Enable CDP/LLDP on devices before discovery and restore afterwards
    pub config_discovery: bool,
    /// Add every interface present on a known device, not only connected ones
    pub add_unconnected_interfaces: bool,
    /// Networks and interfaces whose connections are ignored
    pub exclusions: ExclusionPolicy,
    /// Only find links between devices already in the graph
    pub only_links: bool,
    /// Preferred connection alias per device
    pub aliases: BTreeMap<String, String>,
    /// Restrict connections to one protocol (e.g. `ssh`)
    pub connection_protocol: Option<String>,
    /// Bound on every per-device operation
    pub timeout: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            config_discovery: false,
            add_unconnected_interfaces: false,
            exclusions: ExclusionPolicy::default(),
            only_links: false,
            aliases: BTreeMap::new(),
            connection_protocol: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl ScannerConfig {
    pub fn with_timeout_secs(mut self, secs: u64) -> Result<Self, ConfigError> {
        if secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        self.timeout = Duration::from_secs(secs);
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        let aliases = parse_aliases("r1:mgmt  r2:console").unwrap();
        assert_eq!(aliases.len(), 2);
        assert_eq!(aliases["r1"], "mgmt");
        assert_eq!(aliases["r2"], "console");
        assert!(parse_aliases("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_aliases_rejects_malformed() {
        assert_eq!(
            parse_aliases("r1:mgmt r2"),
            Err(ConfigError::InvalidAlias("r2".to_string()))
        );
        assert!(parse_aliases("r1:a:b").is_err());
        assert!(parse_aliases("r1:").is_err());
    }

    #[test]
    fn test_timeout() {
        let config = ScannerConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(
            ScannerConfig::default().with_timeout_secs(0).unwrap_err(),
            ConfigError::ZeroTimeout
        );
        assert_eq!(
            config.with_timeout_secs(3).unwrap().timeout,
            Duration::from_secs(3)
        );
    }
}
