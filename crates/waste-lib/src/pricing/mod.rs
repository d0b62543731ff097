//! Pricing catalog and loaders
//!
//! This module provides:
//! - A versioned, immutable rate table with billing models, tier transitions
//!   and region multipliers
//! - Loaders for file-backed and in-memory catalogs
//! - The already-wasted identity shared by every rule

mod catalog;
mod source;

pub use catalog::{
    BillingModel, CatalogDocument, DimensionBinding, PricingCatalog, PricingRate, Quantity,
    TierSource, TierTransition, TransitionClock, Usage, UsageLine,
};
pub use source::{FilePricingSource, PricingSource, StaticPricingSource};

use sha2::{Digest, Sha256};

/// Days per billing month
pub const DAYS_PER_MONTH: f64 = 30.0;

/// Waste already incurred: `monthly_waste * age_days / 30`, zero for
/// non-positive ages
pub fn already_wasted(monthly_waste: f64, age_days: f64) -> f64 {
    if age_days <= 0.0 || !age_days.is_finite() {
        return 0.0;
    }
    (monthly_waste * age_days / DAYS_PER_MONTH).max(0.0)
}

/// SHA-256 hex digest of a catalog document
pub fn compute_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_wasted_identity() {
        assert!((already_wasted(2.88, 180.0) - 17.28).abs() < 1e-9);
        assert!((already_wasted(100.0, 180.0) - 600.0).abs() < 1e-9);
        assert!((already_wasted(10.0, 45.0) - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_already_wasted_non_positive_age() {
        assert_eq!(already_wasted(10.0, 0.0), 0.0);
        assert_eq!(already_wasted(10.0, -3.5), 0.0);
    }

    #[test]
    fn test_digest_is_stable() {
        let a = compute_digest(b"{\"version\":\"1\"}");
        let b = compute_digest(b"{\"version\":\"1\"}");
        let c = compute_digest(b"{\"version\":\"2\"}");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
