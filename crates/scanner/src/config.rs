//! Scanner service configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const ENV_PREFIX: &str = "SCANNER";

/// Service configuration, read from `SCANNER_`-prefixed environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct ScannerConfig {
    /// Name reported in structured logs
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health, metrics and reports
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Pricing catalog document
    #[serde(default = "default_pricing_path")]
    pub pricing_path: PathBuf,

    /// Resource and metric snapshot exported from the cloud account
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,

    /// Optional engine configuration file (rule overrides, scan settings)
    #[serde(default)]
    pub engine_config_path: Option<PathBuf>,

    /// Seconds between scans
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
}

fn default_node_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "local".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_pricing_path() -> PathBuf {
    PathBuf::from("pricing.json")
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("snapshot.json")
}

fn default_scan_interval() -> u64 {
    3600
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            api_port: default_api_port(),
            pricing_path: default_pricing_path(),
            snapshot_path: default_snapshot_path(),
            engine_config_path: None,
            scan_interval_secs: default_scan_interval(),
        }
    }
}

impl ScannerConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        Self::load_with_prefix(ENV_PREFIX)
    }

    fn load_with_prefix(prefix: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(prefix).try_parsing(true))
            .build()
            .context("Failed to read scanner configuration")?;

        let config: ScannerConfig = config
            .try_deserialize()
            .context("Invalid scanner configuration")?;
        if config.scan_interval_secs == 0 {
            anyhow::bail!("scan_interval_secs must be at least 1");
        }
        Ok(config)
    }

    /// Interval between scans, never shorter than one second
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }
}
