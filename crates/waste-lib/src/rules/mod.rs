//! Declarative waste rules
//!
//! This module provides:
//! - One parametrized [`Rule`] type driven by data: applicability filter,
//!   thresholds, condition tree, waste formula, severity and confidence scale
//! - A registry of built-in rules with per-deployment overrides
//!
//! Rule evaluation is a pure function of the resource, its metrics view, the
//! pricing catalog and the scan time.

mod builtin;
mod condition;
mod formula;
mod registry;
mod severity;
mod template;
mod thresholds;

pub use builtin::builtin_rules;
pub use condition::{Comparison, Condition, Operand, Truth};
pub use formula::{rightsize, WasteEstimate, WasteFormula};
pub use registry::RuleRegistry;
pub use severity::Severity;
pub use template::render;
pub use thresholds::Thresholds;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::confidence::ConfidenceScale;
use crate::error::{RegistryError, RuleError};
use crate::engine::cache::MetricsView;
use crate::models::{Finding, Resource, ResourceKind};
use crate::pricing::{already_wasted, PricingCatalog};
use template::{format_money, format_number};

fn default_lookback_days() -> u32 {
    30
}

/// Which resources a rule is considered for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Applicability {
    pub kinds: Vec<ResourceKind>,
    /// Attribute-only pre-filter, e.g. `min_instances > 0`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Condition>,
}

/// A single declarative waste detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub scenario_name: String,
    pub category: String,
    pub applies_to: Applicability,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    #[serde(default)]
    pub required_labels: Vec<String>,
    #[serde(default)]
    pub thresholds: Thresholds,
    pub condition: Condition,
    pub waste: WasteFormula,
    pub severity: Severity,
    #[serde(default)]
    pub confidence: ConfidenceScale,
    pub recommendation: String,
}

/// Why a rule produced no finding
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    NotApplicable,
    ConditionNotMet,
    NoWaste,
    /// Required input unknown; carries what was missing
    DataUnavailable(String),
}

/// Result of one (resource, rule) evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Finding(Finding),
    Skip(SkipReason),
}

/// Inputs shared by conditions, formulas and severities
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub resource: &'a Resource,
    pub metrics: Option<MetricsView<'a>>,
    pub thresholds: &'a Thresholds,
    pub required_labels: &'a [String],
    pub lookback_days: u32,
    pub as_of: DateTime<Utc>,
}

impl EvalContext<'_> {
    /// Start of the rule's metric window
    pub fn cutoff(&self) -> DateTime<Utc> {
        self.as_of - Duration::days(i64::from(self.lookback_days))
    }

    pub fn missing_label_count(&self) -> usize {
        self.required_labels
            .iter()
            .filter(|l| !self.resource.labels.contains_key(l.as_str()))
            .count()
    }
}

impl Rule {
    fn context<'a>(
        &'a self,
        resource: &'a Resource,
        metrics: Option<MetricsView<'a>>,
        as_of: DateTime<Utc>,
    ) -> EvalContext<'a> {
        EvalContext {
            resource,
            metrics,
            thresholds: &self.thresholds,
            required_labels: &self.required_labels,
            lookback_days: self.lookback_days,
            as_of,
        }
    }

    /// Kind filter plus the metric-free `when` pre-filter, judged at the
    /// scan's `as_of` so age and days-since leaves see the real age.
    ///
    /// An unknown `when` counts as applicable so the gap surfaces as a
    /// data-unavailable skip during evaluation.
    pub fn applies_to(&self, resource: &Resource, as_of: DateTime<Utc>) -> bool {
        if !self.applies_to.kinds.contains(&resource.kind) {
            return false;
        }
        match &self.applies_to.when {
            None => true,
            Some(when) => {
                let ctx = self.context(resource, None, as_of);
                !matches!(when.evaluate(&ctx), Ok(Truth::False))
            }
        }
    }

    /// Metric names read by any part of the rule
    pub fn required_metrics(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.condition.metrics(&mut out);
        if let Some(when) = &self.applies_to.when {
            when.metrics(&mut out);
        }
        self.waste.metrics(&mut out);
        self.severity.metrics(&mut out);
        out
    }

    /// Structural checks run when a rule enters a registry
    pub fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |reason: String| RegistryError::InvalidRule {
            rule_id: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("empty rule id".to_string()));
        }
        if self.applies_to.kinds.is_empty() {
            return Err(invalid("applies to no resource kinds".to_string()));
        }
        if self.lookback_days == 0 {
            return Err(invalid("lookback_days must be at least 1".to_string()));
        }

        let mut refs = Vec::new();
        self.condition.threshold_refs(&mut refs);
        if let Some(when) = &self.applies_to.when {
            when.threshold_refs(&mut refs);
        }
        self.waste.threshold_refs(&mut refs);
        for name in refs {
            if !self.thresholds.contains(name) {
                return Err(invalid(format!("references undefined threshold `{}`", name)));
            }
        }
        Ok(())
    }

    /// Evaluate this rule for one resource.
    ///
    /// Missing inputs become `Skip(DataUnavailable)`; pricing and threshold
    /// problems are `RuleError::Configuration`; non-finite math is
    /// `RuleError::Computation`.
    pub fn evaluate(
        &self,
        resource: &Resource,
        metrics: MetricsView<'_>,
        catalog: &PricingCatalog,
        as_of: DateTime<Utc>,
    ) -> Result<Outcome, RuleError> {
        if !self.applies_to.kinds.contains(&resource.kind) {
            return Ok(Outcome::Skip(SkipReason::NotApplicable));
        }
        let ctx = self.context(resource, Some(metrics), as_of);

        if let Some(when) = &self.applies_to.when {
            match when.evaluate(&ctx)? {
                Truth::True => {}
                Truth::False => return Ok(Outcome::Skip(SkipReason::NotApplicable)),
                Truth::Unknown(why) => return Ok(Outcome::Skip(SkipReason::DataUnavailable(why))),
            }
        }

        match self.condition.evaluate(&ctx)? {
            Truth::True => {}
            Truth::False => return Ok(Outcome::Skip(SkipReason::ConditionNotMet)),
            Truth::Unknown(why) => return Ok(Outcome::Skip(SkipReason::DataUnavailable(why))),
        }

        let estimate = match self.waste.estimate(&ctx, catalog) {
            Ok(estimate) => estimate,
            Err(RuleError::DataUnavailable(why)) => {
                return Ok(Outcome::Skip(SkipReason::DataUnavailable(why)))
            }
            Err(e) => return Err(e),
        };
        if estimate.monthly_waste <= 0.0 {
            return Ok(Outcome::Skip(SkipReason::NoWaste));
        }

        let severity = match self.severity.value(&ctx, estimate.monthly_waste) {
            Ok(v) => v,
            Err(RuleError::DataUnavailable(why)) => {
                return Ok(Outcome::Skip(SkipReason::DataUnavailable(why)))
            }
            Err(e) => return Err(e),
        };

        let age_days = resource.age_days(as_of);
        let monthly_waste = estimate.monthly_waste;
        let annual_waste = monthly_waste * 12.0;
        let wasted = already_wasted(monthly_waste, age_days);
        if !annual_waste.is_finite() || !wasted.is_finite() {
            return Err(RuleError::Computation(format!(
                "non-finite waste totals for {}",
                resource.id
            )));
        }

        let mut evidence = estimate.evidence;
        evidence.insert("age_days".to_string(), age_days);
        evidence.insert("severity".to_string(), severity);

        let recommendation = render(
            &self.recommendation,
            &self.template_vars(resource, monthly_waste, annual_waste, wasted, age_days, &evidence),
        );

        Ok(Outcome::Finding(Finding {
            resource_id: resource.id.clone(),
            rule_id: self.id.clone(),
            category: self.category.clone(),
            monthly_cost: estimate.monthly_cost,
            monthly_waste,
            annual_waste,
            already_wasted: wasted,
            confidence: self.confidence.score(severity),
            provenance: estimate.provenance,
            recommendation,
            evidence,
            detected_at: as_of,
        }))
    }

    fn template_vars(
        &self,
        resource: &Resource,
        monthly_waste: f64,
        annual_waste: f64,
        wasted: f64,
        age_days: f64,
        evidence: &BTreeMap<String, f64>,
    ) -> BTreeMap<String, String> {
        let mut vars: BTreeMap<String, String> = evidence
            .iter()
            .map(|(k, v)| (k.clone(), format_number(*v)))
            .collect();
        vars.insert("resource_id".to_string(), resource.id.clone());
        vars.insert("region".to_string(), resource.region.clone());
        vars.insert("kind".to_string(), resource.kind.to_string());
        vars.insert("monthly_waste".to_string(), format_money(monthly_waste));
        vars.insert("annual_waste".to_string(), format_money(annual_waste));
        vars.insert("already_wasted".to_string(), format_money(wasted));
        vars.insert("age_days".to_string(), format!("{:.0}", age_days.max(0.0)));
        vars
    }
}
