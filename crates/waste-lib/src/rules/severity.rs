//! Severity variables fed to the confidence scale

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::EvalContext;
use crate::error::RuleError;
use crate::models::{days_between, Aggregation};

/// The number a rule's confidence scale is applied to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Severity {
    AgeDays,
    DaysSince {
        attribute: String,
    },
    Attribute {
        key: String,
    },
    /// Metric aggregate; `invert` maps a utilization `u` to `1 - u`
    Metric {
        metric: String,
        aggregation: Aggregation,
        #[serde(default)]
        invert: bool,
    },
    MonthlyWaste,
    MissingLabelCount,
}

impl Severity {
    pub fn value(&self, ctx: &EvalContext<'_>, monthly_waste: f64) -> Result<f64, RuleError> {
        let value = match self {
            Severity::AgeDays => ctx.resource.age_days(ctx.as_of),
            Severity::DaysSince { attribute } => {
                days_between(ctx.resource.attributes.timestamp(attribute)?, ctx.as_of)
            }
            Severity::Attribute { key } => ctx.resource.attributes.number(key)?,
            Severity::Metric {
                metric,
                aggregation,
                invert,
            } => {
                let view = ctx.metrics.ok_or_else(|| {
                    RuleError::DataUnavailable(format!("metric `{}` not fetched", metric))
                })?;
                let measured = view.aggregate(metric, *aggregation, ctx.cutoff())?;
                if *invert {
                    1.0 - measured
                } else {
                    measured
                }
            }
            Severity::MonthlyWaste => monthly_waste,
            Severity::MissingLabelCount => ctx.missing_label_count() as f64,
        };
        if !value.is_finite() {
            return Err(RuleError::Computation(format!(
                "severity {:?} is not finite",
                self
            )));
        }
        Ok(value)
    }

    pub fn metrics(&self, out: &mut BTreeSet<String>) {
        if let Severity::Metric { metric, .. } = self {
            out.insert(metric.clone());
        }
    }
}
