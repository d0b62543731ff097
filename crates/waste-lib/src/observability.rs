//! Observability infrastructure for the waste scanner
//!
//! Provides:
//! - Prometheus metrics (scan duration, fetch latency, findings, waste totals, diagnostics)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, Gauge, Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{debug, error, info, warn};

use crate::models::{Diagnostic, Finding};

/// Buckets for single metric fetches (in seconds)
const FETCH_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Buckets for whole scans (in seconds)
const SCAN_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0];

static GLOBAL_METRICS: OnceLock<ScanMetricsInner> = OnceLock::new();

struct ScanMetricsInner {
    scan_duration_seconds: Histogram,
    fetch_latency_seconds: Histogram,
    resources_scanned: IntGauge,
    findings: IntGauge,
    monthly_waste: Gauge,
    diagnostics: IntCounterVec,
    fetch_timeouts: IntCounter,
    scans_completed: IntCounter,
    scans_aborted: IntCounter,
}

impl ScanMetricsInner {
    fn new() -> Self {
        Self {
            scan_duration_seconds: register_histogram!(
                "waste_scanner_scan_duration_seconds",
                "Wall time of a complete scan",
                SCAN_BUCKETS.to_vec()
            )
            .expect("Failed to register scan_duration_seconds"),

            fetch_latency_seconds: register_histogram!(
                "waste_scanner_fetch_latency_seconds",
                "Time spent fetching one metric series",
                FETCH_BUCKETS.to_vec()
            )
            .expect("Failed to register fetch_latency_seconds"),

            resources_scanned: register_int_gauge!(
                "waste_scanner_resources_scanned",
                "Resources inspected by the last scan"
            )
            .expect("Failed to register resources_scanned"),

            findings: register_int_gauge!(
                "waste_scanner_findings",
                "Findings in the last scan report"
            )
            .expect("Failed to register findings"),

            monthly_waste: register_gauge!(
                "waste_scanner_monthly_waste",
                "Total monthly waste in the last scan report"
            )
            .expect("Failed to register monthly_waste"),

            diagnostics: register_int_counter_vec!(
                "waste_scanner_diagnostics_total",
                "Diagnostics recorded, by reason",
                &["reason"]
            )
            .expect("Failed to register diagnostics"),

            fetch_timeouts: register_int_counter!(
                "waste_scanner_fetch_timeouts_total",
                "Metric fetches abandoned after their time bound"
            )
            .expect("Failed to register fetch_timeouts"),

            scans_completed: register_int_counter!(
                "waste_scanner_scans_completed_total",
                "Scans that produced a report"
            )
            .expect("Failed to register scans_completed"),

            scans_aborted: register_int_counter!(
                "waste_scanner_scans_aborted_total",
                "Scans aborted before evaluation"
            )
            .expect("Failed to register scans_aborted"),
        }
    }
}

/// Scanner metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct ScanMetrics {
    _private: (),
}

impl Default for ScanMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ScanMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ScanMetricsInner {
        GLOBAL_METRICS.get_or_init(ScanMetricsInner::new)
    }

    pub fn observe_scan_duration(&self, duration_secs: f64) {
        self.inner().scan_duration_seconds.observe(duration_secs);
    }

    pub fn observe_fetch_latency(&self, duration_secs: f64) {
        self.inner().fetch_latency_seconds.observe(duration_secs);
    }

    /// Publish the headline numbers of a finished scan
    pub fn record_report(&self, resources: usize, findings: usize, monthly_waste: f64) {
        let inner = self.inner();
        inner.resources_scanned.set(resources as i64);
        inner.findings.set(findings as i64);
        inner.monthly_waste.set(monthly_waste);
        inner.scans_completed.inc();
    }

    pub fn inc_diagnostic(&self, reason: &str) {
        self.inner().diagnostics.with_label_values(&[reason]).inc();
    }

    pub fn inc_fetch_timeouts(&self) {
        self.inner().fetch_timeouts.inc();
    }

    pub fn inc_scans_aborted(&self) {
        self.inner().scans_aborted.inc();
    }
}

/// Structured logger for scan events
#[derive(Debug, Clone)]
pub struct ScanLogger {
    node_name: String,
}

impl Default for ScanLogger {
    fn default() -> Self {
        Self::new("local")
    }
}

impl ScanLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn log_startup(&self, version: &str, rule_count: usize) {
        info!(
            event = "scanner_started",
            node = %self.node_name,
            scanner_version = %version,
            rules = rule_count,
            "Waste scanner started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "scanner_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Waste scanner shutting down"
        );
    }

    pub fn log_scan_started(&self, resources: usize, pricing_version: &str) {
        info!(
            event = "scan_started",
            node = %self.node_name,
            resources = resources,
            pricing_version = %pricing_version,
            "Scan started"
        );
    }

    pub fn log_finding(&self, finding: &Finding) {
        debug!(
            event = "finding_detected",
            node = %self.node_name,
            resource_id = %finding.resource_id,
            rule_id = %finding.rule_id,
            category = %finding.category,
            monthly_waste = finding.monthly_waste,
            already_wasted = finding.already_wasted,
            confidence = %finding.confidence,
            "Waste finding detected"
        );
    }

    /// Informational diagnostics log at debug; faults at warn
    pub fn log_diagnostic(&self, diagnostic: &Diagnostic) {
        let resource_id = diagnostic.resource_id.as_deref().unwrap_or("-");
        let rule_id = diagnostic.rule_id.as_deref().unwrap_or("-");
        if diagnostic.reason.is_informational() {
            debug!(
                event = "diagnostic_recorded",
                node = %self.node_name,
                resource_id = %resource_id,
                rule_id = %rule_id,
                reason = %diagnostic.reason,
                detail = %diagnostic.detail,
                "Evaluation skipped"
            );
        } else {
            warn!(
                event = "diagnostic_recorded",
                node = %self.node_name,
                resource_id = %resource_id,
                rule_id = %rule_id,
                reason = %diagnostic.reason,
                detail = %diagnostic.detail,
                "Evaluation degraded"
            );
        }
    }

    pub fn log_scan_completed(
        &self,
        findings: usize,
        diagnostics: usize,
        monthly_waste: f64,
        cancelled: bool,
        duration_secs: f64,
    ) {
        if cancelled {
            warn!(
                event = "scan_completed",
                node = %self.node_name,
                findings = findings,
                diagnostics = diagnostics,
                monthly_waste = monthly_waste,
                cancelled = true,
                duration_secs = duration_secs,
                "Scan cancelled, partial report produced"
            );
        } else {
            info!(
                event = "scan_completed",
                node = %self.node_name,
                findings = findings,
                diagnostics = diagnostics,
                monthly_waste = monthly_waste,
                cancelled = false,
                duration_secs = duration_secs,
                "Scan completed"
            );
        }
    }

    pub fn log_scan_aborted(&self, reason: &str) {
        error!(
            event = "scan_aborted",
            node = %self.node_name,
            reason = %reason,
            "Scan aborted before evaluation"
        );
    }
}
