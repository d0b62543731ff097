//! HTTP API for health checks, Prometheus metrics and scan reports

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};
use waste_lib::{
    health::{ComponentStatus, HealthRegistry},
    report::{GroupTotals, Summary},
    ScanReport,
};

/// Most recent completed scan, shared with the scan loop
pub type LatestReport = Arc<RwLock<Option<ScanReport>>>;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub latest: LatestReport,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, latest: LatestReport) -> Self {
        Self {
            health_registry,
            latest,
        }
    }
}

/// Headline numbers of the latest report without the finding list
#[derive(Debug, Serialize)]
pub struct ReportSummary {
    pub generated_at: DateTime<Utc>,
    pub pricing_version: String,
    pub resources_scanned: usize,
    pub cancelled: bool,
    pub summary: Summary,
    pub by_category: Vec<GroupTotals>,
    pub by_rule: Vec<GroupTotals>,
}

impl From<&ScanReport> for ReportSummary {
    fn from(report: &ScanReport) -> Self {
        Self {
            generated_at: report.generated_at,
            pricing_version: report.pricing_version.clone(),
            resources_scanned: report.resources_scanned,
            cancelled: report.cancelled,
            summary: report.summary.clone(),
            by_category: report.by_category(),
            by_rule: report.by_rule(),
        }
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Last scan still produced a report
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 once a scan has completed
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

fn no_report() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "no scan has completed yet" })),
    )
        .into_response()
}

/// Full latest report
async fn report(State(state): State<Arc<AppState>>) -> Response {
    match state.latest.read().await.as_ref() {
        Some(report) => Json(report.clone()).into_response(),
        None => no_report(),
    }
}

/// Totals and group breakdowns of the latest report
async fn report_summary(State(state): State<Arc<AppState>>) -> Response {
    match state.latest.read().await.as_ref() {
        Some(report) => Json(ReportSummary::from(report)).into_response(),
        None => no_report(),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/report", get(report))
        .route("/report/summary", get(report_summary))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
