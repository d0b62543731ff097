//! Core data models for the waste scanner
//!
//! Resources and metric series are read-only scan inputs. Findings and
//! diagnostics are produced fresh on every scan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::AttributeError;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Kind of cloud resource a scan can inspect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    ComputeInstance,
    StorageBucket,
    ManagedDatabase,
    StaticAddress,
    NatGateway,
    DatasetTable,
    ServerlessService,
    Disk,
    Snapshot,
    LoadBalancer,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 10] = [
        ResourceKind::ComputeInstance,
        ResourceKind::StorageBucket,
        ResourceKind::ManagedDatabase,
        ResourceKind::StaticAddress,
        ResourceKind::NatGateway,
        ResourceKind::DatasetTable,
        ResourceKind::ServerlessService,
        ResourceKind::Disk,
        ResourceKind::Snapshot,
        ResourceKind::LoadBalancer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::ComputeInstance => "compute_instance",
            ResourceKind::StorageBucket => "storage_bucket",
            ResourceKind::ManagedDatabase => "managed_database",
            ResourceKind::StaticAddress => "static_address",
            ResourceKind::NatGateway => "nat_gateway",
            ResourceKind::DatasetTable => "dataset_table",
            ResourceKind::ServerlessService => "serverless_service",
            ResourceKind::Disk => "disk",
            ResourceKind::Snapshot => "snapshot",
            ResourceKind::LoadBalancer => "load_balancer",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single kind-specific attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Flag(bool),
    Number(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl AttributeValue {
    fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::Flag(_) => "flag",
            AttributeValue::Number(_) => "number",
            AttributeValue::Timestamp(_) => "timestamp",
            AttributeValue::Text(_) => "text",
        }
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Number(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Flag(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<DateTime<Utc>> for AttributeValue {
    fn from(value: DateTime<Utc>) -> Self {
        AttributeValue::Timestamp(value)
    }
}

/// Kind-specific attribute bag.
///
/// Every accessor reports an absent key as [`AttributeError::Missing`] so a
/// missing field can never be mistaken for a zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, AttributeValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    fn require(&self, key: &str) -> Result<&AttributeValue, AttributeError> {
        self.0.get(key).ok_or_else(|| AttributeError::Missing {
            key: key.to_string(),
        })
    }

    fn wrong_type(key: &str, expected: &'static str, found: &AttributeValue) -> AttributeError {
        AttributeError::WrongType {
            key: key.to_string(),
            expected,
            found: found.type_name(),
        }
    }

    pub fn number(&self, key: &str) -> Result<f64, AttributeError> {
        match self.require(key)? {
            AttributeValue::Number(n) => Ok(*n),
            other => Err(Self::wrong_type(key, "number", other)),
        }
    }

    pub fn flag(&self, key: &str) -> Result<bool, AttributeError> {
        match self.require(key)? {
            AttributeValue::Flag(b) => Ok(*b),
            other => Err(Self::wrong_type(key, "flag", other)),
        }
    }

    pub fn text(&self, key: &str) -> Result<&str, AttributeError> {
        match self.require(key)? {
            AttributeValue::Text(s) => Ok(s),
            other => Err(Self::wrong_type(key, "text", other)),
        }
    }

    pub fn timestamp(&self, key: &str) -> Result<DateTime<Utc>, AttributeError> {
        match self.require(key)? {
            AttributeValue::Timestamp(t) => Ok(*t),
            other => Err(Self::wrong_type(key, "timestamp", other)),
        }
    }
}

impl<K: Into<String>, V: Into<AttributeValue>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Immutable snapshot of a cloud resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub provider: String,
    pub kind: ResourceKind,
    pub region: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Resource {
    /// Fractional age in days at `as_of`; negative when created after `as_of`
    pub fn age_days(&self, as_of: DateTime<Utc>) -> f64 {
        days_between(self.created_at, as_of)
    }

    /// Clone with one attribute replaced, used for what-if pricing
    pub fn with_attribute(&self, key: &str, value: impl Into<AttributeValue>) -> Self {
        let mut copy = self.clone();
        copy.attributes.insert(key, value);
        copy
    }
}

/// Fractional days elapsed from `from` to `to`
pub fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_seconds() as f64 / SECONDS_PER_DAY
}

/// A single time-series sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// How a window of samples is reduced to one number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Average,
    Maximum,
    Minimum,
    Sum,
    Latest,
    Count,
}

/// Time series returned by the metrics provider for one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub resource_id: String,
    pub metric_name: String,
    #[serde(default)]
    pub points: Vec<MetricPoint>,
}

impl MetricSeries {
    pub fn new(
        resource_id: impl Into<String>,
        metric_name: impl Into<String>,
        points: Vec<MetricPoint>,
    ) -> Self {
        let mut points = points;
        points.sort_by_key(|p| p.timestamp);
        Self {
            resource_id: resource_id.into(),
            metric_name: metric_name.into(),
            points,
        }
    }

    /// Samples taken at or after `cutoff`
    pub fn since(&self, cutoff: DateTime<Utc>) -> impl Iterator<Item = &MetricPoint> {
        self.points.iter().filter(move |p| p.timestamp >= cutoff)
    }

    /// Reduce the samples since `cutoff`.
    ///
    /// Returns `None` when the window holds no samples: nothing was measured,
    /// which is different from a measured zero.
    pub fn aggregate(&self, aggregation: Aggregation, cutoff: DateTime<Utc>) -> Option<f64> {
        let values: Vec<f64> = self
            .since(cutoff)
            .map(|p| p.value)
            .filter(|v| v.is_finite())
            .collect();
        if values.is_empty() {
            return None;
        }

        let result = match aggregation {
            Aggregation::Average => values.iter().sum::<f64>() / values.len() as f64,
            Aggregation::Maximum => values.iter().copied().fold(f64::MIN, f64::max),
            Aggregation::Minimum => values.iter().copied().fold(f64::MAX, f64::min),
            Aggregation::Sum => values.iter().sum(),
            Aggregation::Latest => *values.last()?,
            Aggregation::Count => values.len() as f64,
        };
        Some(result)
    }
}

/// Ordinal trust level of a finding
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::Low => write!(f, "LOW"),
            Confidence::Medium => write!(f, "MEDIUM"),
            Confidence::High => write!(f, "HIGH"),
            Confidence::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Whether waste was derived from measurements or from a heuristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Measured,
    Estimated,
}

/// Uniqueness key of a finding within one scan
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FindingKey {
    pub resource_id: String,
    pub rule_id: String,
}

/// A detected instance of cost waste for one (resource, rule) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub resource_id: String,
    pub rule_id: String,
    pub category: String,
    pub monthly_cost: f64,
    pub monthly_waste: f64,
    pub annual_waste: f64,
    pub already_wasted: f64,
    pub confidence: Confidence,
    pub provenance: Provenance,
    pub recommendation: String,
    #[serde(default)]
    pub evidence: BTreeMap<String, f64>,
    pub detected_at: DateTime<Utc>,
}

impl Finding {
    pub fn key(&self) -> FindingKey {
        FindingKey {
            resource_id: self.resource_id.clone(),
            rule_id: self.rule_id.clone(),
        }
    }
}

/// Why an evaluation produced a diagnostic instead of (or besides) a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticReason {
    DataUnavailable,
    ConfigurationError,
    TransientProviderError,
    ComputationError,
    Cancelled,
}

impl DiagnosticReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticReason::DataUnavailable => "data_unavailable",
            DiagnosticReason::ConfigurationError => "configuration_error",
            DiagnosticReason::TransientProviderError => "transient_provider_error",
            DiagnosticReason::ComputationError => "computation_error",
            DiagnosticReason::Cancelled => "cancelled",
        }
    }

    /// Informational diagnostics record expected gaps, not faults
    pub fn is_informational(&self) -> bool {
        matches!(self, DiagnosticReason::DataUnavailable)
    }
}

impl fmt::Display for DiagnosticReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Auditable record of a skipped or degraded evaluation
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Diagnostic {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    pub reason: DiagnosticReason,
    pub detail: String,
}

impl Diagnostic {
    /// Diagnostic for a single (resource, rule) evaluation
    pub fn for_pair(
        resource_id: &str,
        rule_id: &str,
        reason: DiagnosticReason,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            resource_id: Some(resource_id.to_string()),
            rule_id: Some(rule_id.to_string()),
            reason,
            detail: detail.into(),
        }
    }

    /// Diagnostic about a resource regardless of rule (e.g. a failed fetch)
    pub fn for_resource(
        resource_id: &str,
        reason: DiagnosticReason,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            resource_id: Some(resource_id.to_string()),
            rule_id: None,
            reason,
            detail: detail.into(),
        }
    }

    /// Scan-level diagnostic
    pub fn for_scan(reason: DiagnosticReason, detail: impl Into<String>) -> Self {
        Self {
            resource_id: None,
            rule_id: None,
            reason,
            detail: detail.into(),
        }
    }
}
