//! Engine configuration
//!
//! Loaded with the `config` crate from an optional file layered under
//! environment variables prefixed `WASTE` (nested keys separated by `__`,
//! e.g. `WASTE__SCAN__FETCH_CONCURRENCY=8`). Every option has a documented
//! default; nothing falls back to zero.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::confidence::ConfidenceScale;
use crate::models::ResourceKind;
use crate::rules::Rule;

const ENV_PREFIX: &str = "WASTE";

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub scan: ScanSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    /// Per-rule overrides keyed by rule id
    #[serde(default)]
    pub rules: BTreeMap<String, RuleOverride>,

    /// Deployment-specific rules added next to the built-in ones
    #[serde(default)]
    pub custom_rules: Vec<Rule>,
}

/// Scan orchestration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Maximum concurrent metric fetches
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    /// Time bound for a single metric fetch in milliseconds
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Requested sample granularity in seconds
    #[serde(default = "default_granularity_secs")]
    pub granularity_secs: u64,

    /// Restrict the scan to these kinds
    #[serde(default)]
    pub kinds: Option<Vec<ResourceKind>>,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            fetch_concurrency: default_fetch_concurrency(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            granularity_secs: default_granularity_secs(),
            kinds: None,
        }
    }
}

/// Backoff for provider calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Deployment override for one rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOverride {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub lookback_days: Option<u32>,

    /// Threshold values replacing the rule's defaults
    #[serde(default)]
    pub thresholds: BTreeMap<String, f64>,

    #[serde(default)]
    pub required_labels: Option<Vec<String>>,

    /// Replacement breakpoints; validated on load
    #[serde(default)]
    pub confidence: Option<ConfidenceScale>,
}

impl Default for RuleOverride {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            lookback_days: None,
            thresholds: BTreeMap::new(),
            required_labels: None,
            confidence: None,
        }
    }
}

fn default_fetch_concurrency() -> usize {
    16
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

fn default_granularity_secs() -> u64 {
    3600
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_enabled() -> bool {
    true
}

impl EngineConfig {
    /// Load from an optional file and `WASTE`-prefixed environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read engine configuration")?;

        let config: EngineConfig = settings
            .try_deserialize()
            .context("Invalid engine configuration")?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        if self.scan.fetch_concurrency == 0 {
            anyhow::bail!("scan.fetch_concurrency must be at least 1");
        }
        if self.scan.fetch_timeout_ms == 0 {
            anyhow::bail!("scan.fetch_timeout_ms must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        Ok(())
    }
}
