//! Periodic scan loop
//!
//! Runs a scan on every tick and publishes the report to the API. A
//! shutdown signal cancels the scan in progress; its partial report is
//! still published before the loop exits.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};
use waste_lib::{
    cancellation,
    health::HealthRegistry,
    providers::SnapshotProvider,
    report::{count_by_status, diff, FindingStatus},
    CancelToken, ScanError, ScanReport, Scanner,
};

use crate::api::LatestReport;

const MIN_INTERVAL: Duration = Duration::from_secs(1);

pub struct ScanLoop {
    scanner: Arc<Scanner>,
    /// Re-read before every scan when present
    snapshot: Option<Arc<SnapshotProvider>>,
    latest: LatestReport,
    health: HealthRegistry,
    interval: Duration,
}

impl ScanLoop {
    pub fn new(
        scanner: Arc<Scanner>,
        latest: LatestReport,
        health: HealthRegistry,
        interval: Duration,
    ) -> Self {
        Self {
            scanner,
            snapshot: None,
            latest,
            health,
            // tokio's interval rejects a zero period
            interval: interval.max(MIN_INTERVAL),
        }
    }

    pub fn with_snapshot(mut self, snapshot: Arc<SnapshotProvider>) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Scan on every tick until shutdown. The first scan starts immediately.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(interval_secs = self.interval.as_secs(), "Starting scan loop");

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let (handle, token) = cancellation();
                    let scan = self.run_once(token);
                    tokio::pin!(scan);

                    let finished = tokio::select! {
                        result = &mut scan => Some(result),
                        _ = shutdown.recv() => None,
                    };
                    if finished.is_none() {
                        info!("Shutdown requested, cancelling scan in progress");
                        handle.cancel();
                        let _ = scan.await;
                        break;
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down scan loop");
                    break;
                }
            }
        }
    }

    /// Run one scan and publish its report
    pub async fn run_once(&self, cancel: CancelToken) -> Result<ScanReport, ScanError> {
        if let Some(snapshot) = &self.snapshot {
            if let Err(e) = snapshot.reload().await {
                warn!(error = %e, "Snapshot reload failed, scanning previous contents");
            }
        }

        let report = match self.scanner.scan(Utc::now(), cancel).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Scan aborted");
                return Err(e);
            }
        };

        if let Some(previous) = self.latest.read().await.as_ref() {
            let counts = count_by_status(&diff(previous, &report));
            let count = |status: FindingStatus| counts.get(&status).copied().unwrap_or(0);
            info!(
                new = count(FindingStatus::New),
                persisting = count(FindingStatus::Persisting),
                resolved = count(FindingStatus::Resolved),
                "Finding lifecycle since previous scan"
            );
        }

        *self.latest.write().await = Some(report.clone());
        self.health.set_ready(true).await;
        Ok(report)
    }
}
