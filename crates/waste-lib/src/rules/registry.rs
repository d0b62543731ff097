//! Rule registry
//!
//! An immutable set of rules shared by `Arc` across evaluation tasks.
//! Rules are independent of each other, so the registry imposes no order
//! on evaluation.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{builtin_rules, Rule};
use crate::config::EngineConfig;
use crate::error::RegistryError;
use crate::models::Resource;
use crate::pricing::PricingCatalog;

#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    rules: Vec<Arc<Rule>>,
}

impl RuleRegistry {
    /// Build from rules, rejecting duplicate ids and invalid rules
    pub fn new(rules: Vec<Rule>) -> Result<Self, RegistryError> {
        let mut seen = HashSet::new();
        for rule in &rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(RegistryError::DuplicateRule(rule.id.clone()));
            }
            rule.validate()?;
        }
        Ok(Self {
            rules: rules.into_iter().map(Arc::new).collect(),
        })
    }

    /// Registry holding the built-in rule catalog
    pub fn with_builtin_rules() -> Self {
        Self {
            rules: builtin_rules().into_iter().map(Arc::new).collect(),
        }
    }

    /// New registry with deployment overrides and custom rules applied.
    ///
    /// Overrides naming unknown rules are logged and ignored. Threshold
    /// values are checked when a rule runs, so an invalid one disables the
    /// rule per resource with a configuration diagnostic.
    pub fn apply_overrides(&self, config: &EngineConfig) -> Result<Self, RegistryError> {
        let known: HashSet<&str> = self.rules.iter().map(|r| r.id.as_str()).collect();
        for id in config.rules.keys() {
            if !known.contains(id.as_str()) {
                warn!(rule_id = %id, "Override for unknown rule ignored");
            }
        }

        let mut rules = Vec::with_capacity(self.rules.len() + config.custom_rules.len());
        for rule in &self.rules {
            let Some(ovr) = config.rules.get(&rule.id) else {
                rules.push(rule.as_ref().clone());
                continue;
            };
            if !ovr.enabled {
                info!(rule_id = %rule.id, "Rule disabled by configuration");
                continue;
            }

            let mut rule = rule.as_ref().clone();
            if let Some(days) = ovr.lookback_days {
                rule.lookback_days = days;
            }
            for (name, value) in &ovr.thresholds {
                if !rule.thresholds.contains(name) {
                    warn!(rule_id = %rule.id, threshold = %name, "Override sets an unused threshold");
                }
                rule.thresholds.set(name, *value);
            }
            if let Some(labels) = &ovr.required_labels {
                rule.required_labels = labels.clone();
            }
            if let Some(scale) = &ovr.confidence {
                rule.confidence = scale.clone();
            }
            debug!(rule_id = %rule.id, "Applied rule override");
            rules.push(rule);
        }

        rules.extend(config.custom_rules.iter().cloned());
        Self::new(rules)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Rule>> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Rule>> {
        self.rules.iter()
    }

    /// Rules whose kind and attribute filter admit `resource`
    pub fn applicable(&self, resource: &Resource, as_of: DateTime<Utc>) -> Vec<Arc<Rule>> {
        self.rules
            .iter()
            .filter(|r| r.applies_to(resource, as_of))
            .cloned()
            .collect()
    }

    /// Metric series to fetch for `resource`, with the longest lookback any
    /// applicable rule or the resource's billing model needs
    pub fn fetch_plan(
        &self,
        resource: &Resource,
        catalog: &PricingCatalog,
        as_of: DateTime<Utc>,
    ) -> BTreeMap<String, u32> {
        let mut plan = BTreeMap::new();
        let mut add = |metric: String, days: u32| {
            let entry = plan.entry(metric).or_insert(days);
            *entry = (*entry).max(days);
        };

        let applicable = self.applicable(resource, as_of);
        for rule in &applicable {
            for metric in rule.required_metrics() {
                add(metric, rule.lookback_days);
            }
        }
        // Billing metrics only matter when some rule will price the resource
        if !applicable.is_empty() {
            for (metric, days) in catalog.metrics_for(&resource.provider, resource.kind) {
                add(metric, days);
            }
        }
        plan
    }
}
