//! Pricing catalog loaders

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::catalog::{CatalogDocument, PricingCatalog};
use super::compute_digest;
use crate::error::PricingError;

/// Loads the catalog once at the start of each scan
#[async_trait]
pub trait PricingSource: Send + Sync {
    async fn load(&self) -> Result<Arc<PricingCatalog>, PricingError>;
}

/// JSON catalog read from disk on every load
#[derive(Debug, Clone)]
pub struct FilePricingSource {
    path: PathBuf,
}

impl FilePricingSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PricingSource for FilePricingSource {
    async fn load(&self) -> Result<Arc<PricingCatalog>, PricingError> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            PricingError::LoadFailed(format!("{}: {}", self.path.display(), e))
        })?;

        let digest = compute_digest(&bytes);
        let doc: CatalogDocument = serde_json::from_slice(&bytes).map_err(|e| {
            PricingError::LoadFailed(format!("{}: {}", self.path.display(), e))
        })?;

        let catalog = PricingCatalog::from_document(doc, digest)?;
        info!(
            path = %self.path.display(),
            version = %catalog.version(),
            digest = %catalog.digest(),
            "Loaded pricing catalog"
        );
        Ok(Arc::new(catalog))
    }
}

/// Pre-built catalog, handy for tests and embedded deployments
#[derive(Debug, Clone)]
pub struct StaticPricingSource {
    catalog: Arc<PricingCatalog>,
}

impl StaticPricingSource {
    pub fn new(catalog: PricingCatalog) -> Self {
        Self {
            catalog: Arc::new(catalog),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, PricingError> {
        Ok(Self::new(PricingCatalog::from_json(json)?))
    }
}

#[async_trait]
impl PricingSource for StaticPricingSource {
    async fn load(&self) -> Result<Arc<PricingCatalog>, PricingError> {
        debug!(version = %self.catalog.version(), "Using static pricing catalog");
        Ok(self.catalog.clone())
    }
}
