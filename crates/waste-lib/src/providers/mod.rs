//! Collaborator boundaries
//!
//! The engine reads resources and metric series through these traits.
//! Discovery, transport and authentication live in the implementations;
//! retries with backoff wrap them at this boundary.

mod retry;
mod snapshot;

pub use retry::{RetryPolicy, RetryingInventory, RetryingMetricsProvider};
pub use snapshot::{SnapshotDocument, SnapshotProvider};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::models::{MetricSeries, Resource, ResourceKind};

/// Time range and sample granularity of a metric request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub granularity: Duration,
}

impl MetricWindow {
    /// Window covering the `days` before `end`
    pub fn lookback(end: DateTime<Utc>, days: u32, granularity: Duration) -> Self {
        Self {
            start: end - ChronoDuration::days(i64::from(days)),
            end,
            granularity,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// Source of the resources to scan.
///
/// Attributes the provider does not know must be left absent, never
/// filled with defaults.
#[async_trait]
pub trait InventoryProvider: Send + Sync {
    async fn list_resources(&self, kinds: Option<&[ResourceKind]>) -> Result<Vec<Resource>>;
}

/// Source of metric series.
///
/// `Ok(None)` means the provider has no series for the pair, which is not
/// the same as a series of zeros.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    async fn fetch_series(
        &self,
        resource_id: &str,
        metric: &str,
        window: &MetricWindow,
    ) -> Result<Option<MetricSeries>>;
}

#[async_trait]
impl<T: InventoryProvider + ?Sized> InventoryProvider for Arc<T> {
    async fn list_resources(&self, kinds: Option<&[ResourceKind]>) -> Result<Vec<Resource>> {
        (**self).list_resources(kinds).await
    }
}

#[async_trait]
impl<T: MetricsProvider + ?Sized> MetricsProvider for Arc<T> {
    async fn fetch_series(
        &self,
        resource_id: &str,
        metric: &str,
        window: &MetricWindow,
    ) -> Result<Option<MetricSeries>> {
        (**self).fetch_series(resource_id, metric, window).await
    }
}
