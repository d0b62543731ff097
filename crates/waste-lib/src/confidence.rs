//! Confidence scoring
//!
//! Maps a rule-specific severity value (age in days, idle ratio, count)
//! onto an ordinal [`Confidence`] tier through ordered breakpoints.

use serde::{Deserialize, Serialize};

use crate::models::Confidence;

/// Lower bound at which a tier starts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub lower_bound: f64,
    pub tier: Confidence,
}

impl Breakpoint {
    pub const fn new(lower_bound: f64, tier: Confidence) -> Self {
        Self { lower_bound, tier }
    }
}

/// Ordered breakpoints; monotonic by construction.
///
/// Bounds must be finite and strictly ascending and tiers may never
/// decrease, so `a < b` always implies `score(a) <= score(b)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Breakpoint>", into = "Vec<Breakpoint>")]
pub struct ConfidenceScale {
    breakpoints: Vec<Breakpoint>,
}

impl ConfidenceScale {
    pub fn new(breakpoints: Vec<Breakpoint>) -> Result<Self, String> {
        for bp in &breakpoints {
            if !bp.lower_bound.is_finite() {
                return Err(format!("breakpoint bound {} is not finite", bp.lower_bound));
            }
        }
        for pair in breakpoints.windows(2) {
            if pair[1].lower_bound <= pair[0].lower_bound {
                return Err(format!(
                    "breakpoint bounds must ascend: {} follows {}",
                    pair[1].lower_bound, pair[0].lower_bound
                ));
            }
            if pair[1].tier < pair[0].tier {
                return Err(format!(
                    "tier {} at {} is below tier {} at {}",
                    pair[1].tier, pair[1].lower_bound, pair[0].tier, pair[0].lower_bound
                ));
            }
        }
        Ok(Self { breakpoints })
    }

    /// Age scale: >=7d MEDIUM, >=30d HIGH, >=90d CRITICAL
    pub fn age_days() -> Self {
        Self {
            breakpoints: vec![
                Breakpoint::new(7.0, Confidence::Medium),
                Breakpoint::new(30.0, Confidence::High),
                Breakpoint::new(90.0, Confidence::Critical),
            ],
        }
    }

    /// Scale for long-lived storage: >=30d MEDIUM, >=90d HIGH, >=180d CRITICAL
    pub fn storage_age_days() -> Self {
        Self {
            breakpoints: vec![
                Breakpoint::new(30.0, Confidence::Medium),
                Breakpoint::new(90.0, Confidence::High),
                Breakpoint::new(180.0, Confidence::Critical),
            ],
        }
    }

    /// Scale over an idle ratio in [0, 1]
    pub fn idle_ratio() -> Self {
        Self {
            breakpoints: vec![
                Breakpoint::new(0.80, Confidence::Medium),
                Breakpoint::new(0.90, Confidence::High),
                Breakpoint::new(0.98, Confidence::Critical),
            ],
        }
    }

    /// Built-in scales; checked by the registry tests instead of at runtime
    pub(crate) fn preset(breakpoints: &[(f64, Confidence)]) -> Self {
        Self {
            breakpoints: breakpoints
                .iter()
                .map(|(bound, tier)| Breakpoint::new(*bound, *tier))
                .collect(),
        }
    }

    /// Single-tier scale, for rules whose evidence is binary
    pub fn constant(tier: Confidence) -> Self {
        Self {
            breakpoints: vec![Breakpoint::new(f64::MIN, tier)],
        }
    }

    /// Tier of the highest breakpoint at or below `value`, else LOW.
    /// NaN scores LOW.
    pub fn score(&self, value: f64) -> Confidence {
        self.breakpoints
            .iter()
            .rev()
            .find(|bp| value >= bp.lower_bound)
            .map(|bp| bp.tier)
            .unwrap_or(Confidence::Low)
    }

    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }
}

impl Default for ConfidenceScale {
    fn default() -> Self {
        Self::age_days()
    }
}

impl TryFrom<Vec<Breakpoint>> for ConfidenceScale {
    type Error = String;

    fn try_from(breakpoints: Vec<Breakpoint>) -> Result<Self, Self::Error> {
        Self::new(breakpoints)
    }
}

impl From<ConfidenceScale> for Vec<Breakpoint> {
    fn from(scale: ConfidenceScale) -> Self {
        scale.breakpoints
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_age_scale() {
        let scale = ConfidenceScale::age_days();
        assert_eq!(scale.score(0.0), Confidence::Low);
        assert_eq!(scale.score(6.9), Confidence::Low);
        assert_eq!(scale.score(7.0), Confidence::Medium);
        assert_eq!(scale.score(30.0), Confidence::High);
        assert_eq!(scale.score(89.0), Confidence::High);
        assert_eq!(scale.score(90.0), Confidence::Critical);
        assert_eq!(scale.score(180.0), Confidence::Critical);
    }

    #[test]
    fn test_storage_scale_breakpoint() {
        let scale = ConfidenceScale::storage_age_days();
        assert_eq!(scale.score(179.0), Confidence::High);
        assert_eq!(scale.score(290.0), Confidence::Critical);
    }

    #[test]
    fn test_scale_is_monotonic() {
        for scale in [
            ConfidenceScale::age_days(),
            ConfidenceScale::storage_age_days(),
            ConfidenceScale::idle_ratio(),
        ] {
            let mut previous = Confidence::Low;
            let mut value = -10.0;
            while value < 400.0 {
                let tier = scale.score(value);
                assert!(tier >= previous, "score({value}) dropped to {tier}");
                previous = tier;
                value += 0.25;
            }
        }
    }

    #[test]
    fn test_rejects_descending_bounds() {
        let result = ConfidenceScale::new(vec![
            Breakpoint::new(30.0, Confidence::Medium),
            Breakpoint::new(7.0, Confidence::High),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_decreasing_tiers() {
        let result = ConfidenceScale::new(vec![
            Breakpoint::new(7.0, Confidence::High),
            Breakpoint::new(30.0, Confidence::Medium),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: ConfidenceScale = serde_json::from_str(
            r#"[{"lower_bound": 14, "tier": "MEDIUM"}, {"lower_bound": 60, "tier": "CRITICAL"}]"#,
        )
        .unwrap();
        assert_eq!(ok.score(20.0), Confidence::Medium);
        assert_eq!(ok.score(60.0), Confidence::Critical);

        let bad = serde_json::from_str::<ConfidenceScale>(
            r#"[{"lower_bound": 60, "tier": "MEDIUM"}, {"lower_bound": 14, "tier": "HIGH"}]"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_constant_scale() {
        let scale = ConfidenceScale::constant(Confidence::High);
        assert_eq!(scale.score(-1e12), Confidence::High);
        assert_eq!(scale.score(f64::NAN), Confidence::Low);
    }
}
