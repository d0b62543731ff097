//! Condition trees with three-valued logic
//!
//! Leaves compare resource attributes, ages, labels and metric aggregates
//! against literals or named thresholds. A leaf whose input is absent is
//! `Unknown`, never false, so missing data cannot be read as "no waste" or
//! as waste.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{EvalContext, Thresholds};
use crate::error::{AttributeError, RuleError};
use crate::models::{days_between, Aggregation};

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    pub fn apply(&self, left: f64, right: f64) -> bool {
        match self {
            Comparison::Lt => left < right,
            Comparison::Le => left <= right,
            Comparison::Gt => left > right,
            Comparison::Ge => left >= right,
            Comparison::Eq => left == right,
            Comparison::Ne => left != right,
        }
    }
}

/// Right-hand side of a comparison: a literal or a threshold name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Value(f64),
    Threshold(String),
}

impl Operand {
    pub fn threshold(name: &str) -> Self {
        Operand::Threshold(name.to_string())
    }

    pub fn resolve(&self, thresholds: &Thresholds) -> Result<f64, RuleError> {
        match self {
            Operand::Value(v) if v.is_finite() => Ok(*v),
            Operand::Value(v) => Err(RuleError::Configuration(format!(
                "literal operand {} is not finite",
                v
            ))),
            Operand::Threshold(name) => thresholds.get(name),
        }
    }

    pub(crate) fn threshold_name(&self) -> Option<&str> {
        match self {
            Operand::Threshold(name) => Some(name),
            Operand::Value(_) => None,
        }
    }
}

impl From<f64> for Operand {
    fn from(value: f64) -> Self {
        Operand::Value(value)
    }
}

/// Result of evaluating a condition
#[derive(Debug, Clone, PartialEq)]
pub enum Truth {
    True,
    False,
    /// Input missing; carries what was missing
    Unknown(String),
}

impl Truth {
    fn from_bool(value: bool) -> Self {
        if value {
            Truth::True
        } else {
            Truth::False
        }
    }

    fn negate(self) -> Self {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            unknown => unknown,
        }
    }
}

/// Declarative predicate over a resource and its metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    All {
        conditions: Vec<Condition>,
    },
    Any {
        conditions: Vec<Condition>,
    },
    Not {
        condition: Box<Condition>,
    },
    /// Numeric attribute comparison
    Attribute {
        key: String,
        op: Comparison,
        value: Operand,
    },
    Flag {
        key: String,
        expected: bool,
    },
    /// Text attribute equality, e.g. instance status
    Text {
        key: String,
        equals: String,
    },
    /// Aggregate of a metric over the rule's lookback window
    Metric {
        metric: String,
        aggregation: Aggregation,
        op: Comparison,
        value: Operand,
    },
    /// Resource age in days
    Age {
        op: Comparison,
        value: Operand,
    },
    /// Days elapsed since a timestamp attribute
    DaysSince {
        attribute: String,
        op: Comparison,
        value: Operand,
    },
    LabelPresent {
        key: String,
    },
    /// True when any of the rule's required labels is absent
    MissingLabels,
    Always,
}

impl Condition {
    pub fn all(conditions: Vec<Condition>) -> Self {
        Condition::All { conditions }
    }

    pub fn any(conditions: Vec<Condition>) -> Self {
        Condition::Any { conditions }
    }

    pub fn not(condition: Condition) -> Self {
        Condition::Not {
            condition: Box::new(condition),
        }
    }

    /// Evaluate against `ctx`.
    ///
    /// `all` is false if any child is false, unknown if any child is
    /// unknown, else true; `any` is the dual. Errors are reserved for
    /// invalid thresholds.
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<Truth, RuleError> {
        match self {
            Condition::All { conditions } => {
                let mut unknown = None;
                for c in conditions {
                    match c.evaluate(ctx)? {
                        Truth::False => return Ok(Truth::False),
                        Truth::Unknown(why) => {
                            unknown.get_or_insert(why);
                        }
                        Truth::True => {}
                    }
                }
                Ok(unknown.map_or(Truth::True, Truth::Unknown))
            }
            Condition::Any { conditions } => {
                let mut unknown = None;
                for c in conditions {
                    match c.evaluate(ctx)? {
                        Truth::True => return Ok(Truth::True),
                        Truth::Unknown(why) => {
                            unknown.get_or_insert(why);
                        }
                        Truth::False => {}
                    }
                }
                Ok(unknown.map_or(Truth::False, Truth::Unknown))
            }
            Condition::Not { condition } => Ok(condition.evaluate(ctx)?.negate()),
            Condition::Attribute { key, op, value } => {
                let threshold = value.resolve(ctx.thresholds)?;
                Ok(match ctx.resource.attributes.number(key) {
                    Ok(n) => Truth::from_bool(op.apply(n, threshold)),
                    Err(e) => unknown_attribute(e),
                })
            }
            Condition::Flag { key, expected } => Ok(match ctx.resource.attributes.flag(key) {
                Ok(b) => Truth::from_bool(b == *expected),
                Err(e) => unknown_attribute(e),
            }),
            Condition::Text { key, equals } => Ok(match ctx.resource.attributes.text(key) {
                Ok(s) => Truth::from_bool(s == equals),
                Err(e) => unknown_attribute(e),
            }),
            Condition::Metric {
                metric,
                aggregation,
                op,
                value,
            } => {
                let threshold = value.resolve(ctx.thresholds)?;
                let Some(view) = ctx.metrics else {
                    return Ok(Truth::Unknown(format!("metric `{}` not fetched", metric)));
                };
                Ok(match view.aggregate(metric, *aggregation, ctx.cutoff()) {
                    Ok(measured) => Truth::from_bool(op.apply(measured, threshold)),
                    Err(e) => Truth::Unknown(e.to_string()),
                })
            }
            Condition::Age { op, value } => {
                let threshold = value.resolve(ctx.thresholds)?;
                Ok(Truth::from_bool(
                    op.apply(ctx.resource.age_days(ctx.as_of), threshold),
                ))
            }
            Condition::DaysSince {
                attribute,
                op,
                value,
            } => {
                let threshold = value.resolve(ctx.thresholds)?;
                Ok(match ctx.resource.attributes.timestamp(attribute) {
                    Ok(since) => Truth::from_bool(op.apply(days_between(since, ctx.as_of), threshold)),
                    Err(e) => unknown_attribute(e),
                })
            }
            Condition::LabelPresent { key } => {
                Ok(Truth::from_bool(ctx.resource.labels.contains_key(key)))
            }
            Condition::MissingLabels => Ok(Truth::from_bool(ctx.missing_label_count() > 0)),
            Condition::Always => Ok(Truth::True),
        }
    }

    /// Metric names any leaf reads
    pub fn metrics(&self, out: &mut BTreeSet<String>) {
        match self {
            Condition::All { conditions } | Condition::Any { conditions } => {
                conditions.iter().for_each(|c| c.metrics(out));
            }
            Condition::Not { condition } => condition.metrics(out),
            Condition::Metric { metric, .. } => {
                out.insert(metric.clone());
            }
            _ => {}
        }
    }

    /// Threshold names any leaf references
    pub(crate) fn threshold_refs<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Condition::All { conditions } | Condition::Any { conditions } => {
                conditions.iter().for_each(|c| c.threshold_refs(out));
            }
            Condition::Not { condition } => condition.threshold_refs(out),
            Condition::Attribute { value, .. }
            | Condition::Metric { value, .. }
            | Condition::Age { value, .. }
            | Condition::DaysSince { value, .. } => out.extend(value.threshold_name()),
            _ => {}
        }
    }
}

fn unknown_attribute(err: AttributeError) -> Truth {
    Truth::Unknown(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cache::{MetricsSnapshot, UnknownReason};
    use crate::models::{Attributes, MetricPoint, MetricSeries, Resource, ResourceKind};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::collections::BTreeMap;

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 30, 0, 0, 0).unwrap()
    }

    fn instance() -> Resource {
        let mut attributes: Attributes = [("vcpu", 4.0)].into_iter().collect();
        attributes.insert("status", "RUNNING");
        attributes.insert("preemptible", false);
        Resource {
            id: "vm-1".to_string(),
            provider: "gcp".to_string(),
            kind: ResourceKind::ComputeInstance,
            region: "us-central1".to_string(),
            created_at: as_of() - Duration::days(40),
            labels: BTreeMap::from([("owner".to_string(), "data".to_string())]),
            attributes,
        }
    }

    fn snapshot() -> MetricsSnapshot {
        MetricsSnapshot::new()
            .with_series(MetricSeries::new(
                "vm-1",
                "cpu_utilization",
                vec![
                    MetricPoint { timestamp: as_of() - Duration::days(2), value: 0.10 },
                    MetricPoint { timestamp: as_of() - Duration::days(1), value: 0.15 },
                ],
            ))
            .with_unknown("vm-1", "network_gb", UnknownReason::TimedOut)
    }

    fn eval(condition: &Condition, thresholds: &Thresholds) -> Truth {
        let resource = instance();
        let snapshot = snapshot();
        let labels = vec!["owner".to_string(), "team".to_string()];
        let ctx = EvalContext {
            resource: &resource,
            metrics: Some(snapshot.view("vm-1")),
            thresholds,
            required_labels: &labels,
            lookback_days: 14,
            as_of: as_of(),
        };
        condition.evaluate(&ctx).unwrap()
    }

    fn cpu_below(value: Operand) -> Condition {
        Condition::Metric {
            metric: "cpu_utilization".to_string(),
            aggregation: Aggregation::Average,
            op: Comparison::Lt,
            value,
        }
    }

    fn network_below(value: f64) -> Condition {
        Condition::Metric {
            metric: "network_gb".to_string(),
            aggregation: Aggregation::Sum,
            op: Comparison::Lt,
            value: Operand::Value(value),
        }
    }

    #[test]
    fn test_leaves() {
        let t = Thresholds::new().with("underused", 0.20);
        assert_eq!(eval(&cpu_below(Operand::threshold("underused")), &t), Truth::True);
        assert_eq!(eval(&cpu_below(Operand::Value(0.05)), &t), Truth::False);
        assert_eq!(
            eval(&Condition::Text { key: "status".into(), equals: "RUNNING".into() }, &t),
            Truth::True
        );
        assert_eq!(
            eval(&Condition::Flag { key: "preemptible".into(), expected: true }, &t),
            Truth::False
        );
        assert_eq!(
            eval(&Condition::Age { op: Comparison::Ge, value: 30.0.into() }, &t),
            Truth::True
        );
        assert_eq!(eval(&Condition::MissingLabels, &t), Truth::True);
        assert_eq!(eval(&Condition::LabelPresent { key: "owner".into() }, &t), Truth::True);
    }

    #[test]
    fn test_unknown_metric_is_not_false() {
        let t = Thresholds::new();
        assert!(matches!(eval(&network_below(1.0), &t), Truth::Unknown(_)));
        assert!(matches!(
            eval(&Condition::not(network_below(1.0)), &t),
            Truth::Unknown(_)
        ));
    }

    #[test]
    fn test_missing_attribute_is_unknown() {
        let t = Thresholds::new();
        let c = Condition::Attribute {
            key: "memory_gb".into(),
            op: Comparison::Gt,
            value: 0.0.into(),
        };
        assert!(matches!(eval(&c, &t), Truth::Unknown(_)));
    }

    #[test]
    fn test_three_valued_combinators() {
        let t = Thresholds::new();
        let yes = Condition::Always;
        let no = cpu_below(Operand::Value(0.01));
        let unknown = network_below(1.0);

        assert_eq!(eval(&Condition::all(vec![yes.clone(), no.clone(), unknown.clone()]), &t), Truth::False);
        assert!(matches!(eval(&Condition::all(vec![yes.clone(), unknown.clone()]), &t), Truth::Unknown(_)));
        assert_eq!(eval(&Condition::any(vec![no.clone(), yes.clone(), unknown.clone()]), &t), Truth::True);
        assert!(matches!(eval(&Condition::any(vec![no.clone(), unknown]), &t), Truth::Unknown(_)));
        assert_eq!(eval(&Condition::any(vec![no]), &t), Truth::False);
    }

    #[test]
    fn test_invalid_threshold_is_error() {
        let resource = instance();
        let thresholds = Thresholds::new().with("underused", -0.2);
        let ctx = EvalContext {
            resource: &resource,
            metrics: None,
            thresholds: &thresholds,
            required_labels: &[],
            lookback_days: 14,
            as_of: as_of(),
        };
        let result = cpu_below(Operand::threshold("underused")).evaluate(&ctx);
        assert!(matches!(result, Err(RuleError::Configuration(_))));
    }

    #[test]
    fn test_deserialize_operands() {
        let c: Condition = serde_json::from_str(
            r#"{"type": "metric", "metric": "cpu_utilization", "aggregation": "average",
                "op": "lt", "value": "idle_cpu"}"#,
        )
        .unwrap();
        let mut refs = Vec::new();
        c.threshold_refs(&mut refs);
        assert_eq!(refs, vec!["idle_cpu"]);

        let mut metrics = BTreeSet::new();
        c.metrics(&mut metrics);
        assert!(metrics.contains("cpu_utilization"));
    }
}
