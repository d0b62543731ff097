//! Waste formulas
//!
//! A formula turns a resource and its pricing into a monthly cost basis and
//! the part of it that is waste. Measured formulas price real usage;
//! estimated formulas apply a heuristic and say so through [`Provenance`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::condition::Operand;
use super::EvalContext;
use crate::error::RuleError;
use crate::models::{Aggregation, Provenance};
use crate::pricing::PricingCatalog;

/// Months per year, for annual estimates
const MONTHS_PER_YEAR: f64 = 12.0;

/// How a rule quantifies waste
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WasteFormula {
    /// The whole resource is waste
    FullCost,
    /// Only the named billing dimensions are waste
    Dimensions { dimensions: Vec<String> },
    /// Difference between the current size and the smallest size that keeps
    /// projected utilization under the target
    Rightsize {
        attribute: String,
        metric: String,
        aggregation: Aggregation,
        target_utilization: Operand,
        min_units: f64,
    },
    /// Heuristic share of the resource's cost
    FractionOfCost { fraction: Operand },
    /// Heuristic flat yearly amount
    FixedAnnual { amount: Operand },
}

/// Cost basis and waste produced by a formula
#[derive(Debug, Clone, PartialEq)]
pub struct WasteEstimate {
    pub monthly_cost: f64,
    pub monthly_waste: f64,
    pub provenance: Provenance,
    pub evidence: BTreeMap<String, f64>,
}

impl WasteFormula {
    pub fn provenance(&self) -> Provenance {
        match self {
            WasteFormula::FullCost
            | WasteFormula::Dimensions { .. }
            | WasteFormula::Rightsize { .. } => Provenance::Measured,
            WasteFormula::FractionOfCost { .. } | WasteFormula::FixedAnnual { .. } => {
                Provenance::Estimated
            }
        }
    }

    pub fn estimate(
        &self,
        ctx: &EvalContext<'_>,
        catalog: &PricingCatalog,
    ) -> Result<WasteEstimate, RuleError> {
        let resource = ctx.resource;
        let metrics = ctx.metrics.as_ref();
        let mut evidence = BTreeMap::new();

        let (monthly_cost, raw_waste) = match self {
            WasteFormula::FullCost => {
                let cost = catalog.monthly_cost(resource, metrics, ctx.as_of)?;
                (cost, cost)
            }
            WasteFormula::Dimensions { dimensions } => {
                let usage =
                    catalog.usage_for_dimensions(resource, dimensions, metrics, ctx.as_of)?;
                let cost = catalog.cost(resource, &usage)?;
                for line in &usage.lines {
                    evidence.insert(format!("{}_units", line.dimension), line.units);
                }
                (cost, cost)
            }
            WasteFormula::Rightsize {
                attribute,
                metric,
                aggregation,
                target_utilization,
                min_units,
            } => {
                let target = target_utilization.resolve(ctx.thresholds)?;
                if target <= 0.0 {
                    return Err(RuleError::Configuration(format!(
                        "target utilization must be positive, got {}",
                        target
                    )));
                }
                let current = resource.attributes.number(attribute)?;
                let view = metrics.ok_or_else(|| {
                    RuleError::DataUnavailable(format!("metric `{}` not fetched", metric))
                })?;
                let utilization = view.aggregate(metric, *aggregation, ctx.cutoff())?;
                let optimal = rightsize(current, utilization, target, *min_units);

                let cost = catalog.monthly_cost(resource, metrics, ctx.as_of)?;
                let resized = resource.with_attribute(attribute, optimal);
                let optimized = catalog.monthly_cost(&resized, metrics, ctx.as_of)?;

                evidence.insert(format!("current_{}", attribute), current);
                evidence.insert(format!("optimal_{}", attribute), optimal);
                evidence.insert("utilization".to_string(), utilization);
                evidence.insert("optimized_monthly_cost".to_string(), optimized);
                (cost, cost - optimized)
            }
            WasteFormula::FractionOfCost { fraction } => {
                let fraction = fraction.resolve(ctx.thresholds)?;
                if fraction > 1.0 {
                    return Err(RuleError::Configuration(format!(
                        "waste fraction {} exceeds 1",
                        fraction
                    )));
                }
                let cost = catalog.monthly_cost(resource, metrics, ctx.as_of)?;
                evidence.insert("waste_fraction".to_string(), fraction);
                (cost, cost * fraction)
            }
            WasteFormula::FixedAnnual { amount } => {
                let monthly = amount.resolve(ctx.thresholds)? / MONTHS_PER_YEAR;
                (monthly, monthly)
            }
        };

        if !monthly_cost.is_finite() || !raw_waste.is_finite() {
            return Err(RuleError::Computation(format!(
                "non-finite cost {} or waste {}",
                monthly_cost, raw_waste
            )));
        }

        evidence.insert("monthly_cost".to_string(), monthly_cost);
        Ok(WasteEstimate {
            monthly_cost,
            monthly_waste: raw_waste.clamp(0.0, monthly_cost.max(0.0)),
            provenance: self.provenance(),
            evidence,
        })
    }

    pub fn metrics(&self, out: &mut BTreeSet<String>) {
        if let WasteFormula::Rightsize { metric, .. } = self {
            out.insert(metric.clone());
        }
    }

    pub(crate) fn threshold_refs<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            WasteFormula::Rightsize {
                target_utilization, ..
            } => out.extend(target_utilization.threshold_name()),
            WasteFormula::FractionOfCost { fraction } => out.extend(fraction.threshold_name()),
            WasteFormula::FixedAnnual { amount } => out.extend(amount.threshold_name()),
            WasteFormula::FullCost | WasteFormula::Dimensions { .. } => {}
        }
    }
}

/// Halve `current` while the projected utilization stays strictly below
/// `target` and the candidate does not drop under `min_units`
pub fn rightsize(current: f64, utilization: f64, target: f64, min_units: f64) -> f64 {
    let mut optimal = current;
    if !current.is_finite() || !utilization.is_finite() {
        return optimal;
    }
    loop {
        let candidate = optimal / 2.0;
        if candidate < min_units || candidate <= 0.0 {
            break;
        }
        if utilization * current / candidate >= target {
            break;
        }
        optimal = candidate;
    }
    optimal
}
