//! Named numeric rule parameters

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::RuleError;

/// Named thresholds with per-rule defaults, overridable per deployment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Thresholds(BTreeMap<String, f64>);

impl Thresholds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.0.insert(name.to_string(), value);
        self
    }

    pub fn set(&mut self, name: &str, value: f64) {
        self.0.insert(name.to_string(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Validated value of a threshold.
    ///
    /// Absent, negative and non-finite values are configuration errors,
    /// never a silent zero.
    pub fn get(&self, name: &str) -> Result<f64, RuleError> {
        let value = self
            .0
            .get(name)
            .copied()
            .ok_or_else(|| RuleError::Configuration(format!("threshold `{}` is not set", name)))?;
        if !value.is_finite() || value < 0.0 {
            return Err(RuleError::Configuration(format!(
                "threshold `{}` has invalid value {}",
                name, value
            )));
        }
        Ok(value)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for Thresholds {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}
