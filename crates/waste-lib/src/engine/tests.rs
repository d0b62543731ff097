//! Scan pipeline tests against mock collaborators

use super::*;
use crate::error::{PricingError, RuleError};
use crate::health::{ComponentStatus, HealthRegistry};
use crate::models::{
    Attributes, Confidence, Finding, MetricPoint, MetricSeries, Provenance, Resource,
};
use crate::pricing::StaticPricingSource;
use crate::providers::MetricWindow;
use crate::rules::{Outcome, Rule};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

const CATALOG: &str = r#"{
    "version": "2024-06-test",
    "rates": [
        {"provider": "gcp", "kind": "static_address", "dimension": "address", "tier": "reserved", "unit_price": 2.88},
        {"provider": "gcp", "kind": "compute_instance", "dimension": "vcpu", "tier": "standard", "unit_price": 25.0},
        {"provider": "gcp", "kind": "dataset_table", "dimension": "storage", "tier": "active", "unit_price": 0.02},
        {"provider": "gcp", "kind": "dataset_table", "dimension": "storage", "tier": "long_term", "unit_price": 0.01},
        {"provider": "gcp", "kind": "storage_bucket", "dimension": "storage", "tier": "standard", "unit_price": 0.02}
    ],
    "billing": [
        {"provider": "gcp", "kind": "static_address", "dimensions": [
            {"dimension": "address", "quantity": {"source": "fixed", "units": 1}, "tier": {"source": "fixed", "tier": "reserved"}}
        ]},
        {"provider": "gcp", "kind": "compute_instance", "dimensions": [
            {"dimension": "vcpu", "quantity": {"source": "attribute", "key": "vcpu"}, "tier": {"source": "fixed", "tier": "standard"}}
        ]},
        {"provider": "gcp", "kind": "dataset_table", "dimensions": [
            {"dimension": "storage", "quantity": {"source": "attribute", "key": "size_gb"}, "tier": {"source": "fixed", "tier": "active"}}
        ]},
        {"provider": "gcp", "kind": "storage_bucket", "dimensions": [
            {"dimension": "storage", "quantity": {"source": "attribute", "key": "size_gb"}, "tier": {"source": "attribute", "key": "storage_class"}}
        ]}
    ],
    "tier_transitions": [
        {"provider": "gcp", "kind": "dataset_table", "dimension": "storage", "from": "active", "to": "long_term",
         "after_days": 90, "since": {"attribute": "last_modified_at"}}
    ]
}"#;

fn as_of() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 30, 0, 0, 0).unwrap()
}

fn days_ago(days: i64) -> DateTime<Utc> {
    as_of() - ChronoDuration::days(days)
}

fn resource(id: &str, kind: ResourceKind, age_days: i64, attributes: Attributes) -> Resource {
    Resource {
        id: id.to_string(),
        provider: "gcp".to_string(),
        kind,
        region: "us-central1".to_string(),
        created_at: days_ago(age_days),
        labels: [
            ("owner", "platform"),
            ("cost_center", "cc-42"),
            ("environment", "prod"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect(),
        attributes,
    }
}

fn address(id: &str) -> Resource {
    resource(
        id,
        ResourceKind::StaticAddress,
        180,
        [("attached", false)].into_iter().collect(),
    )
}

fn instance(id: &str, vcpu: f64) -> Resource {
    let mut attributes: Attributes = [("vcpu", vcpu)].into_iter().collect();
    attributes.insert("status", "RUNNING");
    resource(id, ResourceKind::ComputeInstance, 60, attributes)
}

fn empty_bucket() -> Resource {
    let mut attributes: Attributes = [
        ("object_count", 0.0),
        ("incomplete_upload_count", 0.0),
        ("size_gb", 0.0),
    ]
    .into_iter()
    .collect();
    attributes.insert("storage_class", "standard");
    resource("bucket-empty", ResourceKind::StorageBucket, 290, attributes)
}

fn unused_table() -> Resource {
    let mut attributes: Attributes = [("size_gb", 10_000.0)].into_iter().collect();
    attributes.insert("last_modified_at", days_ago(120));
    resource("table-1", ResourceKind::DatasetTable, 180, attributes)
}

fn series(value: f64, days: i64) -> Vec<MetricPoint> {
    (1..=days)
        .map(|d| MetricPoint {
            timestamp: days_ago(d),
            value,
        })
        .collect()
}

enum Behavior {
    Hang,
    Fail,
    Panic,
}

#[derive(Default)]
struct MockMetrics {
    series: HashMap<(String, String), Vec<MetricPoint>>,
    behavior: HashMap<String, Behavior>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockMetrics {
    fn with_series(mut self, resource_id: &str, metric: &str, points: Vec<MetricPoint>) -> Self {
        self.series
            .insert((resource_id.to_string(), metric.to_string()), points);
        self
    }

    fn with_behavior(mut self, metric: &str, behavior: Behavior) -> Self {
        self.behavior.insert(metric.to_string(), behavior);
        self
    }
}

#[async_trait]
impl MetricsProvider for MockMetrics {
    async fn fetch_series(
        &self,
        resource_id: &str,
        metric: &str,
        _window: &MetricWindow,
    ) -> anyhow::Result<Option<MetricSeries>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = match self.behavior.get(metric) {
            Some(Behavior::Hang) => std::future::pending().await,
            Some(Behavior::Fail) => Err(anyhow::anyhow!("quota exceeded")),
            Some(Behavior::Panic) => panic!("metrics backend exploded"),
            None => Ok(self
                .series
                .get(&(resource_id.to_string(), metric.to_string()))
                .map(|points| MetricSeries::new(resource_id, metric, points.clone()))),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

struct MockInventory {
    resources: Vec<Resource>,
    fail: bool,
    calls: AtomicUsize,
}

impl MockInventory {
    fn new(resources: Vec<Resource>) -> Self {
        Self {
            resources,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(vec![])
        }
    }
}

#[async_trait]
impl InventoryProvider for MockInventory {
    async fn list_resources(
        &self,
        kinds: Option<&[ResourceKind]>,
    ) -> anyhow::Result<Vec<Resource>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("inventory API throttled");
        }
        Ok(self
            .resources
            .iter()
            .filter(|r| kinds.map_or(true, |k| k.contains(&r.kind)))
            .cloned()
            .collect())
    }
}

struct FailingPricing;

#[async_trait]
impl PricingSource for FailingPricing {
    async fn load(&self) -> std::result::Result<Arc<PricingCatalog>, PricingError> {
        Err(PricingError::LoadFailed("pricing bucket unreachable".to_string()))
    }
}

fn pricing() -> Arc<dyn PricingSource> {
    Arc::new(StaticPricingSource::from_json(CATALOG).unwrap())
}

fn scanner(inventory: Arc<MockInventory>, metrics: Arc<MockMetrics>) -> ScannerBuilder {
    Scanner::builder()
        .inventory(inventory)
        .metrics_provider(metrics)
        .pricing(pricing())
}

fn finding<'a>(report: &'a ScanReport, resource_id: &str, rule_id: &str) -> &'a Finding {
    report
        .findings
        .iter()
        .find(|f| f.resource_id == resource_id && f.rule_id == rule_id)
        .unwrap_or_else(|| panic!("no finding for {}/{}", resource_id, rule_id))
}

fn diagnostics_with(report: &ScanReport, reason: DiagnosticReason) -> Vec<&Diagnostic> {
    report
        .diagnostics
        .iter()
        .filter(|d| d.reason == reason)
        .collect()
}

#[tokio::test]
async fn test_unattached_address_finding() {
    let inventory = Arc::new(MockInventory::new(vec![address("addr-1")]));
    let metrics = Arc::new(MockMetrics::default());
    let scanner = scanner(inventory, metrics.clone()).build().unwrap();

    let report = scanner.scan(as_of(), CancelToken::never()).await.unwrap();
    assert_eq!(report.findings.len(), 1);
    assert!(report.diagnostics.is_empty());

    let f = finding(&report, "addr-1", "unattached-static-address");
    assert!((f.monthly_waste - 2.88).abs() < 1e-9);
    assert!((f.already_wasted - 17.28).abs() < 1e-9);
    assert_eq!(f.confidence, Confidence::Critical);
    assert_eq!(f.provenance, Provenance::Measured);
    // Nothing about an address needs metrics
    assert_eq!(metrics.calls.load(Ordering::SeqCst), 0);
    report.verify().unwrap();
}

#[tokio::test]
async fn test_overprovisioned_instance_rightsized() {
    let inventory = Arc::new(MockInventory::new(vec![instance("vm-1", 4.0)]));
    let metrics = Arc::new(MockMetrics::default().with_series(
        "vm-1",
        "cpu_utilization",
        series(0.125, 14),
    ));
    let scanner = scanner(inventory, metrics.clone()).build().unwrap();

    let report = scanner.scan(as_of(), CancelToken::never()).await.unwrap();
    // cpu_utilization is fetched once even though two rules read it
    assert_eq!(metrics.calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.findings.len(), 1);

    let f = finding(&report, "vm-1", "overprovisioned-compute-instance");
    assert_eq!(f.evidence["current_vcpu"], 4.0);
    assert_eq!(f.evidence["optimal_vcpu"], 2.0);
    assert!((f.monthly_cost - 100.0).abs() < 1e-9);
    assert!((f.monthly_waste - 50.0).abs() < 1e-9);
    assert!(f.monthly_waste > 0.0);
    assert_eq!(f.confidence, Confidence::Medium);
    assert_eq!(f.recommendation, "Resize vm-1 from 4 to 2 vCPUs to save $50.00/month");
}

#[tokio::test]
async fn test_empty_bucket_estimated_waste() {
    let inventory = Arc::new(MockInventory::new(vec![empty_bucket()]));
    let scanner = scanner(inventory, Arc::new(MockMetrics::default()))
        .build()
        .unwrap();

    let report = scanner.scan(as_of(), CancelToken::never()).await.unwrap();
    assert_eq!(report.findings.len(), 1);
    let f = finding(&report, "bucket-empty", "empty-storage-bucket");
    assert!((f.annual_waste - 12.0).abs() < 1e-9);
    assert_eq!(f.provenance, Provenance::Estimated);
    assert_eq!(f.confidence, Confidence::Critical);
}

#[tokio::test]
async fn test_unused_table_long_term_tier() {
    let inventory = Arc::new(MockInventory::new(vec![unused_table()]));
    let metrics = Arc::new(MockMetrics::default().with_series(
        "table-1",
        "query_count",
        series(0.0, 90),
    ));
    let scanner = scanner(inventory, metrics).build().unwrap();

    let report = scanner.scan(as_of(), CancelToken::never()).await.unwrap();
    let f = finding(&report, "table-1", "unused-dataset-table");
    assert!((f.monthly_cost - 100.0).abs() < 1e-9);
    assert!((f.monthly_waste - 100.0).abs() < 1e-9);
    assert!((f.already_wasted - 600.0).abs() < 1e-9);
    assert_eq!(f.confidence, Confidence::Critical);
}

#[tokio::test]
async fn test_unknown_metric_skips_with_informational_diagnostic() {
    let rule: Rule = serde_json::from_str(
        r#"{
            "id": "low-utilization-database",
            "scenario_name": "Database with low utilization",
            "category": "database",
            "applies_to": {"kinds": ["managed_database"]},
            "condition": {"type": "metric", "metric": "utilization", "aggregation": "average", "op": "lt", "value": 0.1},
            "waste": {"type": "full_cost"},
            "severity": {"type": "age_days"},
            "recommendation": "Downsize {resource_id}"
        }"#,
    )
    .unwrap();
    let db = resource("db-1", ResourceKind::ManagedDatabase, 30, Attributes::new());
    let inventory = Arc::new(MockInventory::new(vec![db]));
    let scanner = scanner(inventory, Arc::new(MockMetrics::default()))
        .registry(RuleRegistry::new(vec![rule]).unwrap())
        .build()
        .unwrap();

    let report = scanner.scan(as_of(), CancelToken::never()).await.unwrap();
    assert!(report.findings.is_empty());
    assert!(!report.cancelled);
    assert_eq!(report.diagnostics.len(), 1);
    let d = &report.diagnostics[0];
    assert_eq!(d.reason, DiagnosticReason::DataUnavailable);
    assert!(d.reason.is_informational());
    assert_eq!(d.rule_id.as_deref(), Some("low-utilization-database"));
    assert!(d.detail.contains("utilization"));
}

#[tokio::test]
async fn test_age_filtered_rule_fires_on_old_resources() {
    let rule: Rule = serde_json::from_str(
        r#"{
            "id": "long-idle-address",
            "scenario_name": "Address idle for a quarter",
            "category": "network",
            "applies_to": {
                "kinds": ["static_address"],
                "when": {"type": "age", "op": "ge", "value": 90}
            },
            "condition": {"type": "metric", "metric": "packets_in", "aggregation": "sum", "op": "le", "value": 0},
            "waste": {"type": "full_cost"},
            "severity": {"type": "age_days"},
            "recommendation": "Release {resource_id}"
        }"#,
    )
    .unwrap();
    let fresh = resource(
        "addr-fresh",
        ResourceKind::StaticAddress,
        10,
        [("attached", false)].into_iter().collect(),
    );
    let inventory = Arc::new(MockInventory::new(vec![address("addr-old"), fresh]));
    let metrics = Arc::new(
        MockMetrics::default()
            .with_series("addr-old", "packets_in", series(0.0, 7))
            .with_series("addr-fresh", "packets_in", series(0.0, 7)),
    );
    let scanner = scanner(inventory, metrics.clone())
        .registry(RuleRegistry::new(vec![rule]).unwrap())
        .build()
        .unwrap();

    let report = scanner.scan(as_of(), CancelToken::never()).await.unwrap();
    assert_eq!(report.findings.len(), 1);
    let f = finding(&report, "addr-old", "long-idle-address");
    assert!((f.monthly_waste - 2.88).abs() < 1e-9);
    // Only the old address is planned for a fetch
    assert_eq!(metrics.calls.load(Ordering::SeqCst), 1);
    assert!(report.diagnostics.is_empty());
}

#[tokio::test]
async fn test_missing_rate_isolated_to_pair() {
    let mut attributes: Attributes = [
        ("object_count", 10.0),
        ("incomplete_upload_count", 50.0),
        ("size_gb", 500.0),
    ]
    .into_iter()
    .collect();
    attributes.insert("storage_class", "glacier");
    let bucket = resource("bucket-cold", ResourceKind::StorageBucket, 100, attributes);

    let inventory = Arc::new(MockInventory::new(vec![bucket, address("addr-1")]));
    let scanner = scanner(inventory, Arc::new(MockMetrics::default()))
        .build()
        .unwrap();

    let report = scanner.scan(as_of(), CancelToken::never()).await.unwrap();
    let config_errors = diagnostics_with(&report, DiagnosticReason::ConfigurationError);
    assert_eq!(config_errors.len(), 1);
    assert_eq!(config_errors[0].resource_id.as_deref(), Some("bucket-cold"));
    assert_eq!(
        config_errors[0].rule_id.as_deref(),
        Some("incomplete-multipart-uploads")
    );
    assert!(config_errors[0].detail.contains("glacier"));

    assert_eq!(report.findings.len(), 1);
    finding(&report, "addr-1", "unattached-static-address");
}

#[tokio::test]
async fn test_scan_is_deterministic() {
    let inventory = Arc::new(MockInventory::new(vec![
        address("addr-1"),
        address("addr-2"),
        instance("vm-1", 4.0),
        empty_bucket(),
        unused_table(),
    ]));
    let metrics = Arc::new(
        MockMetrics::default()
            .with_series("vm-1", "cpu_utilization", series(0.125, 14))
            .with_series("table-1", "query_count", series(0.0, 90)),
    );
    let scanner = scanner(inventory, metrics).build().unwrap();

    let first = scanner.scan(as_of(), CancelToken::never()).await.unwrap();
    let second = scanner.scan(as_of(), CancelToken::never()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.findings.len(), 5);
    assert_eq!(first.resources_scanned, 5);
    assert_eq!(first.pricing_version, "2024-06-test");
    first.verify().unwrap();
}

#[tokio::test]
async fn test_governance_finding_without_labels() {
    let mut unlabeled = address("addr-bare");
    unlabeled.labels.clear();
    unlabeled.labels.insert("owner".to_string(), "web".to_string());

    let inventory = Arc::new(MockInventory::new(vec![unlabeled]));
    let scanner = scanner(inventory, Arc::new(MockMetrics::default()))
        .build()
        .unwrap();
    let report = scanner.scan(as_of(), CancelToken::never()).await.unwrap();

    assert_eq!(report.findings.len(), 2);
    let f = finding(&report, "addr-bare", "missing-governance-labels");
    assert_eq!(f.provenance, Provenance::Estimated);
    // Two of three required labels missing
    assert_eq!(f.confidence, Confidence::High);
    assert!((f.monthly_waste - 0.288).abs() < 1e-9);
}

#[tokio::test]
async fn test_fetch_timeout_marks_metric_unknown() {
    let inventory = Arc::new(MockInventory::new(vec![instance("vm-1", 4.0), address("addr-1")]));
    let metrics = Arc::new(MockMetrics::default().with_behavior("cpu_utilization", Behavior::Hang));
    let health = HealthRegistry::new();
    let scanner = scanner(inventory, metrics)
        .fetch_timeout(Duration::from_millis(50))
        .health(health.clone())
        .build()
        .unwrap();

    let report = scanner.scan(as_of(), CancelToken::never()).await.unwrap();
    let transient = diagnostics_with(&report, DiagnosticReason::TransientProviderError);
    assert_eq!(transient.len(), 1);
    assert!(transient[0].detail.contains("timed out"));

    // Both cpu rules skip instead of treating the gap as zero utilization
    let unavailable = diagnostics_with(&report, DiagnosticReason::DataUnavailable);
    assert_eq!(unavailable.len(), 2);
    assert!(unavailable.iter().all(|d| d.detail.contains("timed out")));

    assert_eq!(report.findings.len(), 1);
    finding(&report, "addr-1", "unattached-static-address");

    let status = health.health().await;
    assert_eq!(
        status.components[components::METRICS_PROVIDER].status,
        ComponentStatus::Degraded
    );
    assert_eq!(
        status.components[components::PRICING].status,
        ComponentStatus::Healthy
    );
}

#[tokio::test]
async fn test_provider_error_and_panic_are_contained() {
    let inventory = Arc::new(MockInventory::new(vec![instance("vm-1", 4.0), unused_table()]));
    let metrics = Arc::new(
        MockMetrics::default()
            .with_behavior("cpu_utilization", Behavior::Fail)
            .with_behavior("query_count", Behavior::Panic),
    );
    let scanner = scanner(inventory, metrics).build().unwrap();

    let report = scanner.scan(as_of(), CancelToken::never()).await.unwrap();
    let transient = diagnostics_with(&report, DiagnosticReason::TransientProviderError);
    assert_eq!(transient.len(), 2);
    assert!(transient.iter().any(|d| d.detail.contains("quota exceeded")));
    assert!(transient
        .iter()
        .any(|d| d.resource_id.as_deref() == Some("table-1")));
    assert!(report.findings.is_empty());
    assert_eq!(
        diagnostics_with(&report, DiagnosticReason::DataUnavailable).len(),
        3
    );
}

#[tokio::test]
async fn test_cancellation_returns_partial_report() {
    let inventory = Arc::new(MockInventory::new(vec![instance("vm-1", 4.0), address("addr-1")]));
    let metrics = Arc::new(MockMetrics::default().with_behavior("cpu_utilization", Behavior::Hang));
    let scanner = Arc::new(scanner(inventory, metrics.clone()).build().unwrap());

    let (handle, token) = cancellation();
    let running = {
        let scanner = scanner.clone();
        tokio::spawn(async move { scanner.scan(as_of(), token).await })
    };

    while metrics.calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    handle.cancel();

    let report = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("scan did not stop after cancellation")
        .unwrap()
        .unwrap();

    assert!(report.cancelled);
    let cancelled = diagnostics_with(&report, DiagnosticReason::Cancelled);
    assert_eq!(cancelled.len(), 1);
    assert!(cancelled[0].resource_id.is_none());

    // Abandoned fetches are unknown, not zero; the address needed no metrics
    assert_eq!(report.findings.len(), 1);
    finding(&report, "addr-1", "unattached-static-address");
    let unavailable = diagnostics_with(&report, DiagnosticReason::DataUnavailable);
    assert_eq!(unavailable.len(), 2);
    assert!(unavailable.iter().all(|d| d.detail.contains("cancelled")));
}

#[tokio::test]
async fn test_cancel_before_scan_fetches_nothing() {
    let inventory = Arc::new(MockInventory::new(vec![instance("vm-1", 4.0)]));
    let metrics = Arc::new(MockMetrics::default().with_series(
        "vm-1",
        "cpu_utilization",
        series(0.01, 14),
    ));
    let scanner = scanner(inventory, metrics.clone()).build().unwrap();

    let (handle, token) = cancellation();
    handle.cancel();
    let report = scanner.scan(as_of(), token).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(metrics.calls.load(Ordering::SeqCst), 0);
    assert!(report.findings.is_empty());
}

#[tokio::test]
async fn test_fetch_concurrency_bounded() {
    let resources: Vec<Resource> = (0..12).map(|i| instance(&format!("vm-{}", i), 4.0)).collect();
    let inventory = Arc::new(MockInventory::new(resources));
    let metrics = Arc::new(MockMetrics {
        delay: Some(Duration::from_millis(10)),
        ..Default::default()
    });
    let scanner = scanner(inventory, metrics.clone())
        .fetch_concurrency(2)
        .build()
        .unwrap();

    scanner.scan(as_of(), CancelToken::never()).await.unwrap();
    assert_eq!(metrics.calls.load(Ordering::SeqCst), 12);
    assert!(metrics.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_pricing_failure_aborts_scan() {
    let inventory = Arc::new(MockInventory::new(vec![address("addr-1")]));
    let health = HealthRegistry::new();
    let scanner = Scanner::builder()
        .inventory(inventory.clone())
        .metrics_provider(Arc::new(MockMetrics::default()))
        .pricing(Arc::new(FailingPricing))
        .health(health.clone())
        .build()
        .unwrap();

    let err = scanner.scan(as_of(), CancelToken::never()).await.unwrap_err();
    assert!(matches!(err, ScanError::PricingUnavailable(PricingError::LoadFailed(_))));
    assert_eq!(inventory.calls.load(Ordering::SeqCst), 0);

    health.set_ready(true).await;
    assert!(!health.readiness().await.ready);
}

#[tokio::test]
async fn test_inventory_failure_yields_empty_report() {
    let inventory = Arc::new(MockInventory::failing());
    let scanner = scanner(inventory, Arc::new(MockMetrics::default()))
        .build()
        .unwrap();

    let report = scanner.scan(as_of(), CancelToken::never()).await.unwrap();
    assert_eq!(report.resources_scanned, 0);
    assert!(report.findings.is_empty());
    let transient = diagnostics_with(&report, DiagnosticReason::TransientProviderError);
    assert_eq!(transient.len(), 1);
    assert!(transient[0].detail.contains("throttled"));
}

#[tokio::test]
async fn test_duplicate_resource_ids_dropped() {
    let inventory = Arc::new(MockInventory::new(vec![address("addr-1"), address("addr-1")]));
    let scanner = scanner(inventory, Arc::new(MockMetrics::default()))
        .build()
        .unwrap();

    let report = scanner.scan(as_of(), CancelToken::never()).await.unwrap();
    assert_eq!(report.resources_scanned, 1);
    assert_eq!(report.findings.len(), 1);
    assert_eq!(
        diagnostics_with(&report, DiagnosticReason::ConfigurationError).len(),
        1
    );
    report.verify().unwrap();
}

#[tokio::test]
async fn test_kind_filter_passed_to_inventory() {
    let inventory = Arc::new(MockInventory::new(vec![address("addr-1"), empty_bucket()]));
    let scanner = scanner(inventory, Arc::new(MockMetrics::default()))
        .config(ScanConfig {
            kinds: Some(vec![ResourceKind::StorageBucket]),
            ..Default::default()
        })
        .build()
        .unwrap();

    let report = scanner.scan(as_of(), CancelToken::never()).await.unwrap();
    assert_eq!(report.resources_scanned, 1);
    assert_eq!(report.findings[0].resource_id, "bucket-empty");
}

fn panicking_for_addresses(
    rule: &Rule,
    resource: &Resource,
    snapshot: &MetricsSnapshot,
    catalog: &PricingCatalog,
    as_of: DateTime<Utc>,
) -> std::result::Result<Outcome, RuleError> {
    if resource.id == "addr-boom" {
        panic!("rule math blew up");
    }
    rule.evaluate(resource, snapshot.view(&resource.id), catalog, as_of)
}

#[tokio::test]
async fn test_evaluation_panic_becomes_computation_error() {
    let resources = vec![Arc::new(address("addr-boom")), Arc::new(address("addr-1"))];
    let registry = RuleRegistry::with_builtin_rules();
    let catalog = Arc::new(PricingCatalog::from_json(CATALOG).unwrap());

    let evaluated = evaluate::evaluate_with(
        &resources,
        &registry,
        catalog,
        Arc::new(MetricsSnapshot::new()),
        as_of(),
        panicking_for_addresses,
    )
    .await;

    assert_eq!(evaluated.findings.len(), 1);
    assert_eq!(evaluated.findings[0].resource_id, "addr-1");
    assert!(evaluated.computation_errors >= 1);
    assert!(evaluated.diagnostics.iter().all(|d| {
        d.reason == DiagnosticReason::ComputationError && d.resource_id.as_deref() == Some("addr-boom")
    }));
}

#[test]
fn test_scan_config_from_settings() {
    let settings = crate::config::ScanSettings {
        fetch_concurrency: 4,
        fetch_timeout_ms: 2500,
        granularity_secs: 300,
        kinds: None,
    };
    let config = ScanConfig::from(&settings);
    assert_eq!(config.fetch_concurrency, 4);
    assert_eq!(config.fetch_timeout, Duration::from_millis(2500));
    assert_eq!(config.granularity, Duration::from_secs(300));
}

#[test]
fn test_builder_requires_collaborators() {
    assert!(Scanner::builder().build().is_err());
    let missing_pricing = Scanner::builder()
        .inventory(Arc::new(MockInventory::new(vec![])))
        .metrics_provider(Arc::new(MockMetrics::default()))
        .build();
    assert!(missing_pricing.is_err());
}
