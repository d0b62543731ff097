//! Fetch phase: populate the metrics cache
//!
//! One task per (resource, metric) request, bounded by a semaphore. Every
//! request ends in the cache as either a known series or an unknown state;
//! nothing a rule reads is ever defaulted to zero.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::cache::{MetricsCache, MetricsSnapshot, SeriesState, UnknownReason};
use super::cancel::CancelToken;
use super::ScanConfig;
use crate::models::{Diagnostic, DiagnosticReason, MetricSeries};
use crate::observability::ScanMetrics;
use crate::providers::{MetricWindow, MetricsProvider};

/// One series to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FetchRequest {
    pub resource_id: String,
    pub metric: String,
    pub lookback_days: u32,
}

/// Result of the fetch phase
pub(crate) struct FetchOutcome {
    pub snapshot: MetricsSnapshot,
    pub diagnostics: Vec<Diagnostic>,
    /// Requests that ended in a timeout or provider error
    pub failures: usize,
}

pub(crate) async fn fetch_all(
    provider: Arc<dyn MetricsProvider>,
    requests: Vec<FetchRequest>,
    config: &ScanConfig,
    as_of: DateTime<Utc>,
    cancel: &CancelToken,
    metrics: &ScanMetrics,
) -> FetchOutcome {
    let cache = Arc::new(MetricsCache::new());
    let semaphore = Arc::new(Semaphore::new(config.fetch_concurrency.max(1)));
    let mut handles = Vec::with_capacity(requests.len());

    for request in requests {
        let provider = provider.clone();
        let cache = cache.clone();
        let semaphore = semaphore.clone();
        let mut cancel = cancel.clone();
        let metrics = metrics.clone();
        let timeout = config.fetch_timeout;
        let window = MetricWindow::lookback(as_of, request.lookback_days, config.granularity);
        let key = (request.resource_id.clone(), request.metric.clone());

        let handle = tokio::spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.acquire_owned() => permit.ok(),
            };
            let Some(_permit) = permit else {
                cache.record(
                    &request.resource_id,
                    &request.metric,
                    SeriesState::Unknown(UnknownReason::Cancelled),
                );
                return None;
            };

            let started = Instant::now();
            let state = tokio::select! {
                biased;
                _ = cancel.cancelled() => SeriesState::Unknown(UnknownReason::Cancelled),
                result = tokio::time::timeout(
                    timeout,
                    provider.fetch_series(&request.resource_id, &request.metric, &window),
                ) => match result {
                    Ok(Ok(Some(series))) => SeriesState::Known(MetricSeries::new(
                        request.resource_id.clone(),
                        request.metric.clone(),
                        series.points,
                    )),
                    Ok(Ok(None)) => SeriesState::Unknown(UnknownReason::NotReturned),
                    Ok(Err(e)) => SeriesState::Unknown(UnknownReason::ProviderError(format!("{:#}", e))),
                    Err(_) => SeriesState::Unknown(UnknownReason::TimedOut),
                },
            };
            metrics.observe_fetch_latency(started.elapsed().as_secs_f64());

            let diagnostic = match &state {
                SeriesState::Unknown(UnknownReason::TimedOut) => {
                    metrics.inc_fetch_timeouts();
                    Some(Diagnostic::for_resource(
                        &request.resource_id,
                        DiagnosticReason::TransientProviderError,
                        format!(
                            "metric `{}` fetch timed out after {} ms",
                            request.metric,
                            timeout.as_millis()
                        ),
                    ))
                }
                SeriesState::Unknown(UnknownReason::ProviderError(e)) => {
                    Some(Diagnostic::for_resource(
                        &request.resource_id,
                        DiagnosticReason::TransientProviderError,
                        format!("metric `{}` fetch failed: {}", request.metric, e),
                    ))
                }
                _ => None,
            };
            cache.record(&request.resource_id, &request.metric, state);
            diagnostic
        });
        handles.push((key, handle));
    }

    let mut diagnostics = Vec::new();
    for ((resource_id, metric), handle) in handles {
        match handle.await {
            Ok(Some(diagnostic)) => diagnostics.push(diagnostic),
            Ok(None) => {}
            Err(e) => {
                warn!(resource_id = %resource_id, metric = %metric, error = %e, "Fetch task failed");
                let detail = format!("metric `{}` fetch task failed: {}", metric, e);
                cache.record(
                    &resource_id,
                    &metric,
                    SeriesState::Unknown(UnknownReason::ProviderError(detail.clone())),
                );
                diagnostics.push(Diagnostic::for_resource(
                    &resource_id,
                    DiagnosticReason::TransientProviderError,
                    detail,
                ));
            }
        }
    }

    let failures = diagnostics.len();
    // Every task has finished, so this is normally the last reference
    let snapshot = Arc::try_unwrap(cache)
        .map(MetricsCache::freeze)
        .unwrap_or_else(|shared| shared.snapshot());
    debug!(
        known = snapshot.known_count(),
        unknown = snapshot.unknown_count(),
        failures = failures,
        "Fetch phase finished"
    );

    FetchOutcome {
        snapshot,
        diagnostics,
        failures,
    }
}
