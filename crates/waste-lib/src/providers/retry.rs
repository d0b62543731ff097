//! Retry with exponential backoff at the provider boundary

use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use super::{InventoryProvider, MetricWindow, MetricsProvider};
use crate::config::RetrySettings;
use crate::models::{MetricSeries, Resource, ResourceKind};

/// Exponential backoff: initial delay, doubling, capped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            max_attempts: settings.max_attempts.max(1),
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_backoff;
        for _ in 1..attempt {
            if delay >= self.max_backoff {
                break;
            }
            delay = delay
                .checked_mul(2)
                .map_or(self.max_backoff, |d| std::cmp::min(d, self.max_backoff));
        }
        std::cmp::min(delay, self.max_backoff)
    }

    /// Run `op` until it succeeds or attempts run out; the last error is returned
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    let delay = self.backoff(attempt);
                    warn!(
                        operation = %operation,
                        attempt = attempt,
                        next_backoff_ms = delay.as_millis() as u64,
                        error = %e,
                        "Provider call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Metrics provider wrapper that retries failed fetches
pub struct RetryingMetricsProvider<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: MetricsProvider> RetryingMetricsProvider<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<P: MetricsProvider> MetricsProvider for RetryingMetricsProvider<P> {
    async fn fetch_series(
        &self,
        resource_id: &str,
        metric: &str,
        window: &MetricWindow,
    ) -> Result<Option<MetricSeries>> {
        let inner = &self.inner;
        self.policy
            .run("fetch_series", move || {
                inner.fetch_series(resource_id, metric, window)
            })
            .await
    }
}

/// Inventory wrapper that retries failed listings
pub struct RetryingInventory<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: InventoryProvider> RetryingInventory<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<P: InventoryProvider> InventoryProvider for RetryingInventory<P> {
    async fn list_resources(&self, kinds: Option<&[ResourceKind]>) -> Result<Vec<Resource>> {
        let inner = &self.inner;
        self.policy
            .run("list_resources", move || inner.list_resources(kinds))
            .await
    }
}
