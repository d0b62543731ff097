//! Pre-fetched metric series for one scan
//!
//! The fetch phase writes into a [`MetricsCache`] from many tasks at once.
//! Once fetching ends the cache is frozen into an immutable
//! [`MetricsSnapshot`] that evaluation tasks share without locking.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::MetricUnavailable;
use crate::models::{Aggregation, MetricSeries};

/// Why a series is unknown (as opposed to measured)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownReason {
    /// Provider answered but had no series
    NotReturned,
    /// Fetch exceeded its time bound
    TimedOut,
    /// Provider failed after retries
    ProviderError(String),
    /// Scan was cancelled before the fetch finished
    Cancelled,
    /// No rule asked for this series
    NotRequested,
    /// Series exists but holds no samples in the rule's window
    EmptyWindow,
}

impl fmt::Display for UnknownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnknownReason::NotReturned => write!(f, "no series returned"),
            UnknownReason::TimedOut => write!(f, "fetch timed out"),
            UnknownReason::ProviderError(e) => write!(f, "provider error: {}", e),
            UnknownReason::Cancelled => write!(f, "fetch cancelled"),
            UnknownReason::NotRequested => write!(f, "series not requested"),
            UnknownReason::EmptyWindow => write!(f, "no samples in window"),
        }
    }
}

/// Cached state of one (resource, metric) series
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesState {
    Known(MetricSeries),
    Unknown(UnknownReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    resource_id: String,
    metric: String,
}

impl SeriesKey {
    fn new(resource_id: &str, metric: &str) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            metric: metric.to_string(),
        }
    }
}

/// Concurrent, write-phase cache
#[derive(Debug, Default)]
pub struct MetricsCache {
    entries: DashMap<SeriesKey, SeriesState>,
}

impl MetricsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one fetch
    pub fn record(&self, resource_id: &str, metric: &str, state: SeriesState) {
        self.entries.insert(SeriesKey::new(resource_id, metric), state);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of the current entries, leaving the cache writable
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            entries: self
                .entries
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        }
    }

    /// Freeze into a read-only snapshot
    pub fn freeze(self) -> MetricsSnapshot {
        MetricsSnapshot {
            entries: self.entries.into_iter().collect(),
        }
    }
}

/// Read-only metric data shared by all evaluation tasks
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    entries: HashMap<SeriesKey, SeriesState>,
}

impl MetricsSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, series: MetricSeries) -> Self {
        let key = SeriesKey::new(&series.resource_id, &series.metric_name);
        self.entries.insert(key, SeriesState::Known(series));
        self
    }

    pub fn with_unknown(mut self, resource_id: &str, metric: &str, reason: UnknownReason) -> Self {
        self.entries
            .insert(SeriesKey::new(resource_id, metric), SeriesState::Unknown(reason));
        self
    }

    pub fn state(&self, resource_id: &str, metric: &str) -> Option<&SeriesState> {
        self.entries.get(&SeriesKey::new(resource_id, metric))
    }

    pub fn view<'a>(&'a self, resource_id: &'a str) -> MetricsView<'a> {
        MetricsView {
            resource_id,
            snapshot: self,
        }
    }

    pub fn known_count(&self) -> usize {
        self.entries
            .values()
            .filter(|s| matches!(s, SeriesState::Known(_)))
            .count()
    }

    pub fn unknown_count(&self) -> usize {
        self.entries.len() - self.known_count()
    }
}

/// Per-resource view handed to rules and pricing
#[derive(Debug, Clone, Copy)]
pub struct MetricsView<'a> {
    resource_id: &'a str,
    snapshot: &'a MetricsSnapshot,
}

impl<'a> MetricsView<'a> {
    pub fn resource_id(&self) -> &str {
        self.resource_id
    }

    /// The measured series, or why it is unknown
    pub fn series(&self, metric: &str) -> Result<&'a MetricSeries, MetricUnavailable> {
        match self.snapshot.state(self.resource_id, metric) {
            Some(SeriesState::Known(series)) => Ok(series),
            Some(SeriesState::Unknown(reason)) => Err(self.unavailable(metric, reason.clone())),
            None => Err(self.unavailable(metric, UnknownReason::NotRequested)),
        }
    }

    /// Aggregate of the samples since `cutoff`
    pub fn aggregate(
        &self,
        metric: &str,
        aggregation: Aggregation,
        cutoff: DateTime<Utc>,
    ) -> Result<f64, MetricUnavailable> {
        self.series(metric)?
            .aggregate(aggregation, cutoff)
            .ok_or_else(|| self.unavailable(metric, UnknownReason::EmptyWindow))
    }

    fn unavailable(&self, metric: &str, reason: UnknownReason) -> MetricUnavailable {
        MetricUnavailable {
            resource_id: self.resource_id.to_string(),
            metric: metric.to_string(),
            reason,
        }
    }
}
