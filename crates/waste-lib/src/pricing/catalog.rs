//! Rate table and cost composition
//!
//! A catalog holds unit rates keyed by (provider, kind, dimension, tier),
//! billing models describing how a resource's attributes and metrics map
//! onto billable units, age-driven tier transitions, and region multipliers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::PricingError;
use crate::engine::cache::MetricsView;
use crate::models::{days_between, Aggregation, Resource, ResourceKind};

/// Default window for metric-driven billable quantities
const DEFAULT_METRIC_LOOKBACK_DAYS: u32 = 30;

fn default_currency() -> String {
    "USD".to_string()
}

fn default_metric_lookback() -> u32 {
    DEFAULT_METRIC_LOOKBACK_DAYS
}

/// Unit price for one billing dimension and tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingRate {
    pub provider: String,
    pub kind: ResourceKind,
    pub dimension: String,
    pub tier: String,
    /// Price per billable unit per month
    pub unit_price: f64,
    /// Units included at no charge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_quota: Option<f64>,
    /// Maximum billable units
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cap: Option<f64>,
}

impl PricingRate {
    /// Monthly charge for `units` after free quota and cap
    pub fn charge(&self, units: f64) -> f64 {
        let mut billable = (units - self.free_quota.unwrap_or(0.0)).max(0.0);
        if let Some(cap) = self.cap {
            billable = billable.min(cap);
        }
        billable * self.unit_price
    }

    fn validate(&self) -> Result<(), String> {
        let key = format!(
            "{}/{}/{}/{}",
            self.provider, self.kind, self.dimension, self.tier
        );
        if !self.unit_price.is_finite() || self.unit_price < 0.0 {
            return Err(format!("{}: unit_price {} is invalid", key, self.unit_price));
        }
        for (name, value) in [("free_quota", self.free_quota), ("cap", self.cap)] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(format!("{}: {} {} is invalid", key, name, v));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RateKey {
    provider: String,
    kind: ResourceKind,
    dimension: String,
    tier: String,
}

/// Where a dimension's billable units come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Quantity {
    Attribute {
        key: String,
    },
    Fixed {
        units: f64,
    },
    Metric {
        metric: String,
        aggregation: Aggregation,
        #[serde(default = "default_metric_lookback")]
        lookback_days: u32,
    },
}

/// Where a dimension's base tier comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum TierSource {
    Fixed { tier: String },
    Attribute { key: String },
}

/// One billed dimension of a resource kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionBinding {
    pub dimension: String,
    pub quantity: Quantity,
    pub tier: TierSource,
}

/// How one (provider, kind) is billed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingModel {
    pub provider: String,
    pub kind: ResourceKind,
    pub dimensions: Vec<DimensionBinding>,
}

/// Clock an age-driven tier transition is measured against
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionClock {
    #[default]
    CreatedAt,
    /// Timestamp attribute, e.g. `last_modified_at`
    Attribute(String),
}

/// Automatic reclassification, e.g. storage moving to a long-term tier
/// after 90 days without modification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierTransition {
    pub provider: String,
    pub kind: ResourceKind,
    pub dimension: String,
    pub from: String,
    pub to: String,
    pub after_days: f64,
    #[serde(default)]
    pub since: TransitionClock,
}

/// Serialized form of a catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub version: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub rates: Vec<PricingRate>,
    #[serde(default)]
    pub billing: Vec<BillingModel>,
    #[serde(default)]
    pub tier_transitions: Vec<TierTransition>,
    #[serde(default)]
    pub region_multipliers: BTreeMap<String, f64>,
}

/// Billable units for one dimension at a resolved tier
#[derive(Debug, Clone, PartialEq)]
pub struct UsageLine {
    pub dimension: String,
    pub tier: String,
    pub units: f64,
}

/// Resolved billable usage of a resource
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Usage {
    pub lines: Vec<UsageLine>,
}

impl Usage {
    pub fn new(lines: Vec<UsageLine>) -> Self {
        Self { lines }
    }

    pub fn units(&self, dimension: &str) -> Option<f64> {
        self.lines
            .iter()
            .find(|l| l.dimension == dimension)
            .map(|l| l.units)
    }
}

/// Immutable, versioned pricing catalog shared across a scan
#[derive(Debug, Clone)]
pub struct PricingCatalog {
    version: String,
    currency: String,
    digest: String,
    rates: HashMap<RateKey, PricingRate>,
    billing: HashMap<(String, ResourceKind), Vec<DimensionBinding>>,
    transitions: Vec<TierTransition>,
    region_multipliers: BTreeMap<String, f64>,
}

impl PricingCatalog {
    /// Index and validate a catalog document
    pub fn from_document(
        doc: CatalogDocument,
        digest: impl Into<String>,
    ) -> Result<Self, PricingError> {
        let mut rates = HashMap::with_capacity(doc.rates.len());
        for rate in doc.rates {
            rate.validate().map_err(PricingError::InvalidCatalog)?;
            let key = RateKey {
                provider: rate.provider.clone(),
                kind: rate.kind,
                dimension: rate.dimension.clone(),
                tier: rate.tier.clone(),
            };
            if rates.contains_key(&key) {
                return Err(PricingError::InvalidCatalog(format!(
                    "duplicate rate {}/{}/{}/{}",
                    key.provider, key.kind, key.dimension, key.tier
                )));
            }
            rates.insert(key, rate);
        }

        let mut billing = HashMap::new();
        for model in doc.billing {
            let key = (model.provider.clone(), model.kind);
            if billing.insert(key, model.dimensions).is_some() {
                return Err(PricingError::InvalidCatalog(format!(
                    "duplicate billing model {}/{}",
                    model.provider, model.kind
                )));
            }
        }

        for transition in &doc.tier_transitions {
            if !transition.after_days.is_finite() || transition.after_days < 0.0 {
                return Err(PricingError::InvalidCatalog(format!(
                    "tier transition {} -> {} has invalid after_days {}",
                    transition.from, transition.to, transition.after_days
                )));
            }
        }

        for (region, multiplier) in &doc.region_multipliers {
            if !multiplier.is_finite() || *multiplier < 0.0 {
                return Err(PricingError::InvalidCatalog(format!(
                    "region {} has invalid multiplier {}",
                    region, multiplier
                )));
            }
        }

        Ok(Self {
            version: doc.version,
            currency: doc.currency,
            digest: digest.into(),
            rates,
            billing,
            transitions: doc.tier_transitions,
            region_multipliers: doc.region_multipliers,
        })
    }

    /// Parse a JSON catalog, deriving the digest from its bytes
    pub fn from_json(json: &str) -> Result<Self, PricingError> {
        let doc: CatalogDocument = serde_json::from_str(json)
            .map_err(|e| PricingError::LoadFailed(e.to_string()))?;
        Self::from_document(doc, super::compute_digest(json.as_bytes()))
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Look up a unit rate
    pub fn rate(
        &self,
        provider: &str,
        kind: ResourceKind,
        dimension: &str,
        tier: &str,
    ) -> Result<&PricingRate, PricingError> {
        let key = RateKey {
            provider: provider.to_string(),
            kind,
            dimension: dimension.to_string(),
            tier: tier.to_string(),
        };
        self.rates.get(&key).ok_or_else(|| PricingError::RateNotFound {
            provider: provider.to_string(),
            kind,
            dimension: dimension.to_string(),
            tier: tier.to_string(),
        })
    }

    /// Billing dimensions for a resource's provider and kind
    pub fn billing_model(
        &self,
        provider: &str,
        kind: ResourceKind,
    ) -> Result<&[DimensionBinding], PricingError> {
        self.billing
            .get(&(provider.to_string(), kind))
            .map(Vec::as_slice)
            .ok_or_else(|| PricingError::NoBillingModel {
                provider: provider.to_string(),
                kind,
            })
    }

    /// Metric series the billing model of (provider, kind) reads, with lookback
    pub fn metrics_for(&self, provider: &str, kind: ResourceKind) -> Vec<(String, u32)> {
        self.billing
            .get(&(provider.to_string(), kind))
            .map(|dims| {
                dims.iter()
                    .filter_map(|d| match &d.quantity {
                        Quantity::Metric {
                            metric,
                            lookback_days,
                            ..
                        } => Some((metric.clone(), *lookback_days)),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Tier a dimension is billed at on `as_of`.
    ///
    /// Starts from the binding's base tier and follows matching transitions
    /// until none applies. Pure: the resource is never reclassified in place.
    pub fn effective_tier(
        &self,
        resource: &Resource,
        dimension: &str,
        as_of: DateTime<Utc>,
    ) -> Result<String, PricingError> {
        let binding = self
            .billing_model(&resource.provider, resource.kind)?
            .iter()
            .find(|b| b.dimension == dimension)
            .ok_or_else(|| PricingError::UnknownDimension {
                provider: resource.provider.clone(),
                kind: resource.kind,
                dimension: dimension.to_string(),
            })?;
        self.resolve_tier(resource, binding, as_of)
    }

    fn resolve_tier(
        &self,
        resource: &Resource,
        binding: &DimensionBinding,
        as_of: DateTime<Utc>,
    ) -> Result<String, PricingError> {
        let mut tier = match &binding.tier {
            TierSource::Fixed { tier } => tier.clone(),
            TierSource::Attribute { key } => resource.attributes.text(key)?.to_string(),
        };

        // Bounded so a cyclic table cannot loop forever
        for _ in 0..self.transitions.len() {
            // Of the transitions out of this tier, the elapsed one with the
            // longest wait wins
            let mut next: Option<&TierTransition> = None;
            for transition in self.transitions.iter().filter(|t| {
                t.provider == resource.provider
                    && t.kind == resource.kind
                    && t.dimension == binding.dimension
                    && t.from == tier
            }) {
                let since = match &transition.since {
                    TransitionClock::CreatedAt => resource.created_at,
                    TransitionClock::Attribute(key) => resource.attributes.timestamp(key)?,
                };
                if days_between(since, as_of) < transition.after_days {
                    continue;
                }
                if next.map_or(true, |n| transition.after_days > n.after_days) {
                    next = Some(transition);
                }
            }
            let Some(transition) = next else { break };
            tier = transition.to.clone();
        }

        Ok(tier)
    }

    /// Resolve billable units and tiers for every billed dimension
    pub fn usage_for(
        &self,
        resource: &Resource,
        metrics: Option<&MetricsView<'_>>,
        as_of: DateTime<Utc>,
    ) -> Result<Usage, PricingError> {
        let bindings = self.billing_model(&resource.provider, resource.kind)?;
        self.resolve_usage(resource, bindings.iter(), metrics, as_of)
    }

    /// Resolve usage for the named dimensions only
    pub fn usage_for_dimensions(
        &self,
        resource: &Resource,
        dimensions: &[String],
        metrics: Option<&MetricsView<'_>>,
        as_of: DateTime<Utc>,
    ) -> Result<Usage, PricingError> {
        let bindings = self.billing_model(&resource.provider, resource.kind)?;
        let mut selected = Vec::with_capacity(dimensions.len());
        for dimension in dimensions {
            let binding = bindings
                .iter()
                .find(|b| &b.dimension == dimension)
                .ok_or_else(|| PricingError::UnknownDimension {
                    provider: resource.provider.clone(),
                    kind: resource.kind,
                    dimension: dimension.clone(),
                })?;
            selected.push(binding);
        }
        self.resolve_usage(resource, selected.into_iter(), metrics, as_of)
    }

    fn resolve_usage<'b>(
        &self,
        resource: &Resource,
        bindings: impl Iterator<Item = &'b DimensionBinding>,
        metrics: Option<&MetricsView<'_>>,
        as_of: DateTime<Utc>,
    ) -> Result<Usage, PricingError> {
        let mut lines = Vec::new();

        for binding in bindings {
            let units = match &binding.quantity {
                Quantity::Attribute { key } => resource.attributes.number(key)?,
                Quantity::Fixed { units } => *units,
                Quantity::Metric {
                    metric,
                    aggregation,
                    lookback_days,
                } => {
                    let view = metrics.ok_or_else(|| {
                        PricingError::MissingData(format!(
                            "metric `{}` needed for {} billing",
                            metric, binding.dimension
                        ))
                    })?;
                    let cutoff = as_of - chrono::Duration::days(i64::from(*lookback_days));
                    view.aggregate(metric, *aggregation, cutoff)?
                }
            };
            if !units.is_finite() {
                return Err(PricingError::MissingData(format!(
                    "non-finite usage for dimension {}",
                    binding.dimension
                )));
            }

            lines.push(UsageLine {
                dimension: binding.dimension.clone(),
                tier: self.resolve_tier(resource, binding, as_of)?,
                units,
            });
        }

        Ok(Usage { lines })
    }

    /// Monthly cost of `usage` for `resource`.
    ///
    /// Sums `min(cap, max(0, units - free_quota)) * unit_price` over the
    /// usage lines and applies the region multiplier.
    pub fn cost(&self, resource: &Resource, usage: &Usage) -> Result<f64, PricingError> {
        let mut total = 0.0;
        for line in &usage.lines {
            let rate = self.rate(&resource.provider, resource.kind, &line.dimension, &line.tier)?;
            total += rate.charge(line.units);
        }
        Ok(total * self.region_multiplier(&resource.region))
    }

    /// Full monthly cost of a resource as configured on `as_of`
    pub fn monthly_cost(
        &self,
        resource: &Resource,
        metrics: Option<&MetricsView<'_>>,
        as_of: DateTime<Utc>,
    ) -> Result<f64, PricingError> {
        let usage = self.usage_for(resource, metrics, as_of)?;
        self.cost(resource, &usage)
    }

    pub fn region_multiplier(&self, region: &str) -> f64 {
        self.region_multipliers.get(region).copied().unwrap_or(1.0)
    }
}
