//! Error types for the waste scanner engine
//!
//! Recoverable errors never escape a single (resource, rule) evaluation:
//! they are converted into skips or diagnostics by the engine. Only
//! [`ScanError`] aborts a scan.

use thiserror::Error;

use crate::engine::cache::UnknownReason;
use crate::models::ResourceKind;

/// Attribute lookup failure on a resource's attribute bag
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AttributeError {
    #[error("attribute `{key}` is absent")]
    Missing { key: String },

    #[error("attribute `{key}` is a {found}, expected a {expected}")]
    WrongType {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// A metric series needed by a rule or billing model is not measured
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("metric `{metric}` for `{resource_id}` unavailable: {reason}")]
pub struct MetricUnavailable {
    pub resource_id: String,
    pub metric: String,
    pub reason: UnknownReason,
}

/// Pricing catalog failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PricingError {
    #[error("no rate for {provider}/{kind}/{dimension}/{tier}")]
    RateNotFound {
        provider: String,
        kind: ResourceKind,
        dimension: String,
        tier: String,
    },

    #[error("no billing model for {provider}/{kind}")]
    NoBillingModel { provider: String, kind: ResourceKind },

    #[error("no billing dimension `{dimension}` for {provider}/{kind}")]
    UnknownDimension {
        provider: String,
        kind: ResourceKind,
        dimension: String,
    },

    #[error("usage data unavailable: {0}")]
    MissingData(String),

    #[error("invalid pricing catalog: {0}")]
    InvalidCatalog(String),

    #[error("failed to load pricing catalog: {0}")]
    LoadFailed(String),
}

impl From<AttributeError> for PricingError {
    fn from(err: AttributeError) -> Self {
        PricingError::MissingData(err.to_string())
    }
}

impl From<MetricUnavailable> for PricingError {
    fn from(err: MetricUnavailable) -> Self {
        PricingError::MissingData(err.to_string())
    }
}

/// Failure of a single rule evaluation
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuleError {
    /// Required input is absent; the engine turns this into a skip
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    /// The rule cannot run for this resource with the current configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The cost or severity math produced an unusable result
    #[error("computation error: {0}")]
    Computation(String),
}

impl From<AttributeError> for RuleError {
    fn from(err: AttributeError) -> Self {
        RuleError::DataUnavailable(err.to_string())
    }
}

impl From<MetricUnavailable> for RuleError {
    fn from(err: MetricUnavailable) -> Self {
        RuleError::DataUnavailable(err.to_string())
    }
}

impl From<PricingError> for RuleError {
    fn from(err: PricingError) -> Self {
        match err {
            PricingError::MissingData(detail) => RuleError::DataUnavailable(detail),
            other => RuleError::Configuration(other.to_string()),
        }
    }
}

/// Rule registry construction failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    #[error("duplicate rule id `{0}`")]
    DuplicateRule(String),

    #[error("rule `{rule_id}` is invalid: {reason}")]
    InvalidRule { rule_id: String, reason: String },
}

/// Errors that abort a whole scan
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("pricing catalog unavailable: {0}")]
    PricingUnavailable(#[from] PricingError),
}

/// Violation of a report's aggregation invariants
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AggregationError {
    #[error("duplicate finding for resource `{resource_id}` and rule `{rule_id}`")]
    DuplicateFinding { resource_id: String, rule_id: String },

    #[error("{field} total is {reported} but findings sum to {expected}")]
    TotalMismatch {
        field: &'static str,
        reported: f64,
        expected: f64,
    },

    #[error("group `{group}` {field} is {reported} but its findings sum to {expected}")]
    GroupMismatch {
        group: String,
        field: &'static str,
        reported: f64,
        expected: f64,
    },

    #[error("confidence counts sum to {counted} but report holds {findings} findings")]
    CountMismatch { counted: usize, findings: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_usage_maps_to_data_unavailable() {
        let err: RuleError = PricingError::MissingData("size_gb".to_string()).into();
        assert!(matches!(err, RuleError::DataUnavailable(_)));
    }

    #[test]
    fn test_rate_not_found_maps_to_configuration() {
        let err: RuleError = PricingError::RateNotFound {
            provider: "gcp".to_string(),
            kind: ResourceKind::StorageBucket,
            dimension: "storage".to_string(),
            tier: "glacier".to_string(),
        }
        .into();
        match err {
            RuleError::Configuration(msg) => {
                assert!(msg.contains("gcp/storage_bucket/storage/glacier"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
