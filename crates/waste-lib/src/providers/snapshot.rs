//! File-backed inventory and metrics
//!
//! Serves a JSON document of resources and metric series exported from a
//! cloud account. The document can be reloaded between scans.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::info;

use super::{InventoryProvider, MetricWindow, MetricsProvider};
use crate::models::{MetricSeries, Resource, ResourceKind};

/// Serialized snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub series: Vec<MetricSeries>,
}

#[derive(Debug, Default)]
struct SnapshotData {
    resources: Vec<Resource>,
    series: HashMap<(String, String), MetricSeries>,
}

impl From<SnapshotDocument> for SnapshotData {
    fn from(doc: SnapshotDocument) -> Self {
        let series = doc
            .series
            .into_iter()
            .map(|s| {
                let s = MetricSeries::new(s.resource_id, s.metric_name, s.points);
                ((s.resource_id.clone(), s.metric_name.clone()), s)
            })
            .collect();
        Self {
            resources: doc.resources,
            series,
        }
    }
}

/// Inventory and metrics provider over a snapshot document
pub struct SnapshotProvider {
    path: Option<PathBuf>,
    data: RwLock<SnapshotData>,
}

impl SnapshotProvider {
    pub fn new(doc: SnapshotDocument) -> Self {
        Self {
            path: None,
            data: RwLock::new(doc.into()),
        }
    }

    /// Read a snapshot file; later calls to [`reload`](Self::reload) re-read it
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let doc = read_document(&path).await?;
        Ok(Self {
            path: Some(path),
            data: RwLock::new(doc.into()),
        })
    }

    /// Re-read the backing file, if any
    pub async fn reload(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let doc = read_document(path).await?;
        *self.data.write().await = doc.into();
        Ok(())
    }

    pub async fn resource_count(&self) -> usize {
        self.data.read().await.resources.len()
    }
}

async fn read_document(path: &Path) -> Result<SnapshotDocument> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    let doc: SnapshotDocument = serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse snapshot {}", path.display()))?;
    info!(
        path = %path.display(),
        resources = doc.resources.len(),
        series = doc.series.len(),
        "Loaded resource snapshot"
    );
    Ok(doc)
}

#[async_trait]
impl InventoryProvider for SnapshotProvider {
    async fn list_resources(&self, kinds: Option<&[ResourceKind]>) -> Result<Vec<Resource>> {
        let data = self.data.read().await;
        Ok(data
            .resources
            .iter()
            .filter(|r| kinds.map_or(true, |k| k.contains(&r.kind)))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MetricsProvider for SnapshotProvider {
    async fn fetch_series(
        &self,
        resource_id: &str,
        metric: &str,
        window: &MetricWindow,
    ) -> Result<Option<MetricSeries>> {
        let data = self.data.read().await;
        let key = (resource_id.to_string(), metric.to_string());
        Ok(data.series.get(&key).map(|series| MetricSeries {
            resource_id: series.resource_id.clone(),
            metric_name: series.metric_name.clone(),
            points: series
                .points
                .iter()
                .filter(|p| window.contains(p.timestamp))
                .copied()
                .collect(),
        }))
    }
}
