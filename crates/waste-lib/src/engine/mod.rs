//! Scan orchestration
//!
//! A scan runs in two phases:
//! 1. fetch: every metric series any applicable rule or billing model needs
//!    is requested concurrently and cached
//! 2. evaluate: every applicable (resource, rule) pair runs against the
//!    frozen cache in parallel
//!
//! Only a pricing catalog that fails to load aborts a scan. Everything else
//! degrades to a skip or a diagnostic in the report.

pub mod cache;
mod cancel;
mod evaluate;
mod fetch;

#[cfg(test)]
mod tests;

pub use cache::{MetricsCache, MetricsSnapshot, MetricsView, SeriesState, UnknownReason};
pub use cancel::{cancellation, CancelHandle, CancelToken};

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::ScanSettings;
use crate::error::ScanError;
use crate::health::{components, HealthRegistry};
use crate::models::{Diagnostic, DiagnosticReason, Resource, ResourceKind};
use crate::observability::{ScanLogger, ScanMetrics};
use crate::pricing::{PricingCatalog, PricingSource};
use crate::providers::{InventoryProvider, MetricsProvider};
use crate::report::{ReportMeta, ScanReport};
use crate::rules::RuleRegistry;
use fetch::FetchRequest;

/// Configuration for a scan
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Maximum concurrent metric fetches (default: 16)
    pub fetch_concurrency: usize,
    /// Time bound for a single fetch (default: 10 seconds)
    pub fetch_timeout: Duration,
    /// Requested sample granularity (default: 1 hour)
    pub granularity: Duration,
    /// Restrict the inventory to these kinds (default: all)
    pub kinds: Option<Vec<ResourceKind>>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: 16,
            fetch_timeout: Duration::from_secs(10),
            granularity: Duration::from_secs(3600),
            kinds: None,
        }
    }
}

impl From<&ScanSettings> for ScanConfig {
    fn from(settings: &ScanSettings) -> Self {
        Self {
            fetch_concurrency: settings.fetch_concurrency.max(1),
            fetch_timeout: Duration::from_millis(settings.fetch_timeout_ms),
            granularity: Duration::from_secs(settings.granularity_secs),
            kinds: settings.kinds.clone(),
        }
    }
}

/// Runs scans against injected collaborators
pub struct Scanner {
    inventory: Arc<dyn InventoryProvider>,
    metrics_provider: Arc<dyn MetricsProvider>,
    pricing: Arc<dyn PricingSource>,
    registry: Arc<RuleRegistry>,
    config: ScanConfig,
    metrics: ScanMetrics,
    logger: ScanLogger,
    health: Option<HealthRegistry>,
}

impl Scanner {
    pub fn builder() -> ScannerBuilder {
        ScannerBuilder::new()
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Run one scan as of `as_of`.
    ///
    /// Fails only when the pricing catalog cannot be loaded; no partial
    /// report is produced in that case.
    pub async fn scan(&self, as_of: DateTime<Utc>, cancel: CancelToken) -> Result<ScanReport, ScanError> {
        let started = Instant::now();

        let catalog = match self.pricing.load().await {
            Ok(catalog) => catalog,
            Err(e) => {
                self.metrics.inc_scans_aborted();
                self.logger.log_scan_aborted(&e.to_string());
                self.set_health(components::PRICING, Err(e.to_string())).await;
                return Err(ScanError::PricingUnavailable(e));
            }
        };
        self.set_health(components::PRICING, Ok(0)).await;

        let mut diagnostics = Vec::new();
        let resources = self.list_resources(&mut diagnostics).await;
        self.logger.log_scan_started(resources.len(), catalog.version());

        let requests = self.fetch_plan(&resources, &catalog, as_of);
        debug!(requests = requests.len(), "Planned metric fetches");
        let fetched = fetch::fetch_all(
            self.metrics_provider.clone(),
            requests,
            &self.config,
            as_of,
            &cancel,
            &self.metrics,
        )
        .await;
        self.set_health(components::METRICS_PROVIDER, Ok(fetched.failures))
            .await;
        diagnostics.extend(fetched.diagnostics);

        let cancelled = cancel.is_cancelled();
        if cancelled {
            warn!("Scan cancelled during fetch phase, evaluating fetched data");
        }

        let evaluated = evaluate::evaluate_all(
            &resources,
            &self.registry,
            catalog.clone(),
            Arc::new(fetched.snapshot),
            as_of,
        )
        .await;
        self.set_health(components::EVALUATOR, Ok(evaluated.computation_errors))
            .await;
        diagnostics.extend(evaluated.diagnostics);

        if cancelled {
            diagnostics.push(Diagnostic::for_scan(
                DiagnosticReason::Cancelled,
                "scan cancelled; unfetched metrics treated as unknown",
            ));
        }

        for finding in &evaluated.findings {
            self.logger.log_finding(finding);
        }
        for diagnostic in &diagnostics {
            self.metrics.inc_diagnostic(diagnostic.reason.as_str());
            self.logger.log_diagnostic(diagnostic);
        }

        let report = ScanReport::build(
            ReportMeta {
                generated_at: as_of,
                pricing_version: catalog.version().to_string(),
                resources_scanned: resources.len(),
                cancelled,
            },
            evaluated.findings,
            diagnostics,
        );

        let elapsed = started.elapsed().as_secs_f64();
        self.metrics.observe_scan_duration(elapsed);
        self.metrics.record_report(
            report.resources_scanned,
            report.summary.finding_count,
            report.summary.total_monthly_waste,
        );
        self.logger.log_scan_completed(
            report.summary.finding_count,
            report.diagnostics.len(),
            report.summary.total_monthly_waste,
            report.cancelled,
            elapsed,
        );
        Ok(report)
    }

    /// List the inventory, dropping repeated ids. A failed listing yields an
    /// empty inventory and a diagnostic.
    async fn list_resources(&self, diagnostics: &mut Vec<Diagnostic>) -> Vec<Arc<Resource>> {
        let listed = match self.inventory.list_resources(self.config.kinds.as_deref()).await {
            Ok(listed) => listed,
            Err(e) => {
                warn!(error = %e, "Inventory listing failed");
                diagnostics.push(Diagnostic::for_scan(
                    DiagnosticReason::TransientProviderError,
                    format!("inventory listing failed: {:#}", e),
                ));
                self.set_health(components::INVENTORY, Ok(1)).await;
                return Vec::new();
            }
        };
        self.set_health(components::INVENTORY, Ok(0)).await;

        let mut seen = HashSet::new();
        let mut resources = Vec::with_capacity(listed.len());
        for resource in listed {
            if !seen.insert(resource.id.clone()) {
                diagnostics.push(Diagnostic::for_resource(
                    &resource.id,
                    DiagnosticReason::ConfigurationError,
                    "duplicate resource id in inventory; later entry ignored",
                ));
                continue;
            }
            resources.push(Arc::new(resource));
        }
        info!(resources = resources.len(), "Listed inventory");
        resources
    }

    fn fetch_plan(
        &self,
        resources: &[Arc<Resource>],
        catalog: &PricingCatalog,
        as_of: DateTime<Utc>,
    ) -> Vec<FetchRequest> {
        resources
            .iter()
            .flat_map(|resource| {
                self.registry
                    .fetch_plan(resource, catalog, as_of)
                    .into_iter()
                    .map(move |(metric, lookback_days)| FetchRequest {
                        resource_id: resource.id.clone(),
                        metric,
                        lookback_days,
                    })
            })
            .collect()
    }

    /// `Ok(n)`: healthy when n is zero, degraded otherwise; `Err`: unhealthy
    async fn set_health(&self, component: &str, state: Result<usize, String>) {
        let Some(health) = &self.health else {
            return;
        };
        match state {
            Ok(failures) => health.record_failures(component, failures, "failures").await,
            Err(message) => health.set_unhealthy(component, message).await,
        }
    }
}

/// Builder for [`Scanner`]
pub struct ScannerBuilder {
    inventory: Option<Arc<dyn InventoryProvider>>,
    metrics_provider: Option<Arc<dyn MetricsProvider>>,
    pricing: Option<Arc<dyn PricingSource>>,
    registry: Option<RuleRegistry>,
    config: ScanConfig,
    logger: ScanLogger,
    health: Option<HealthRegistry>,
}

impl ScannerBuilder {
    pub fn new() -> Self {
        Self {
            inventory: None,
            metrics_provider: None,
            pricing: None,
            registry: None,
            config: ScanConfig::default(),
            logger: ScanLogger::default(),
            health: None,
        }
    }

    pub fn inventory(mut self, inventory: Arc<dyn InventoryProvider>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    pub fn metrics_provider(mut self, provider: Arc<dyn MetricsProvider>) -> Self {
        self.metrics_provider = Some(provider);
        self
    }

    pub fn pricing(mut self, pricing: Arc<dyn PricingSource>) -> Self {
        self.pricing = Some(pricing);
        self
    }

    /// Rule set to evaluate (default: the built-in rules)
    pub fn registry(mut self, registry: RuleRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    pub fn fetch_concurrency(mut self, limit: usize) -> Self {
        self.config.fetch_concurrency = limit;
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.config.fetch_timeout = timeout;
        self
    }

    pub fn logger(mut self, logger: ScanLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Report component health here after every scan
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> anyhow::Result<Scanner> {
        let inventory = self
            .inventory
            .ok_or_else(|| anyhow::anyhow!("Inventory provider is required"))?;
        let metrics_provider = self
            .metrics_provider
            .ok_or_else(|| anyhow::anyhow!("Metrics provider is required"))?;
        let pricing = self
            .pricing
            .ok_or_else(|| anyhow::anyhow!("Pricing source is required"))?;
        if self.config.fetch_concurrency == 0 {
            anyhow::bail!("Fetch concurrency must be at least 1");
        }

        Ok(Scanner {
            inventory,
            metrics_provider,
            pricing,
            registry: Arc::new(self.registry.unwrap_or_else(RuleRegistry::with_builtin_rules)),
            config: self.config,
            metrics: ScanMetrics::new(),
            logger: self.logger,
            health: self.health,
        })
    }
}

impl Default for ScannerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
