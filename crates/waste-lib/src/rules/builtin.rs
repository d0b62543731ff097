//! Built-in rule catalog
//!
//! Every detector is data: the same [`Rule`] type parametrized with a
//! condition, formula, severity and scale. Deployments override thresholds
//! and scales through configuration or add rules of their own.

use super::{
    Applicability, Comparison, Condition, Operand, Rule, Severity, Thresholds, WasteFormula,
};
use crate::confidence::ConfidenceScale;
use crate::models::{Aggregation, Confidence, ResourceKind};

const RUNNING: &str = "RUNNING";
const TERMINATED: &str = "TERMINATED";

/// All built-in rules
pub fn builtin_rules() -> Vec<Rule> {
    vec![
        unattached_static_address(),
        idle_compute_instance(),
        overprovisioned_compute_instance(),
        stopped_instance_with_disks(),
        unattached_disk(),
        old_snapshot(),
        empty_storage_bucket(),
        incomplete_multipart_uploads(),
        unused_dataset_table(),
        idle_nat_gateway(),
        idle_managed_database(),
        idle_serverless_min_instances(),
        load_balancer_without_backends(),
        missing_governance_labels(),
    ]
}

struct RuleDef {
    id: &'static str,
    name: &'static str,
    category: &'static str,
    kinds: Vec<ResourceKind>,
    lookback_days: u32,
    condition: Condition,
    waste: WasteFormula,
    severity: Severity,
    confidence: ConfidenceScale,
    recommendation: &'static str,
}

impl RuleDef {
    fn build(self) -> Rule {
        Rule {
            id: self.id.to_string(),
            scenario_name: self.name.to_string(),
            category: self.category.to_string(),
            applies_to: Applicability {
                kinds: self.kinds,
                when: None,
            },
            lookback_days: self.lookback_days,
            required_labels: Vec::new(),
            thresholds: Thresholds::new(),
            condition: self.condition,
            waste: self.waste,
            severity: self.severity,
            confidence: self.confidence,
            recommendation: self.recommendation.to_string(),
        }
    }
}

fn when(mut rule: Rule, condition: Condition) -> Rule {
    rule.applies_to.when = Some(condition);
    rule
}

fn with_thresholds(mut rule: Rule, thresholds: &[(&str, f64)]) -> Rule {
    rule.thresholds = thresholds.iter().map(|(k, v)| (*k, *v)).collect();
    rule
}

fn status_is(status: &str) -> Condition {
    Condition::Text {
        key: "status".to_string(),
        equals: status.to_string(),
    }
}

fn flag(key: &str, expected: bool) -> Condition {
    Condition::Flag {
        key: key.to_string(),
        expected,
    }
}

fn attribute(key: &str, op: Comparison, value: impl Into<Operand>) -> Condition {
    Condition::Attribute {
        key: key.to_string(),
        op,
        value: value.into(),
    }
}

fn metric(metric: &str, aggregation: Aggregation, op: Comparison, threshold: &str) -> Condition {
    Condition::Metric {
        metric: metric.to_string(),
        aggregation,
        op,
        value: Operand::threshold(threshold),
    }
}

fn idle_cpu_severity() -> Severity {
    Severity::Metric {
        metric: "cpu_utilization".to_string(),
        aggregation: Aggregation::Average,
        invert: true,
    }
}

fn unattached_static_address() -> Rule {
    RuleDef {
        id: "unattached-static-address",
        name: "Reserved static address not attached to any resource",
        category: "network",
        kinds: vec![ResourceKind::StaticAddress],
        lookback_days: 7,
        condition: flag("attached", false),
        waste: WasteFormula::FullCost,
        severity: Severity::AgeDays,
        confidence: ConfidenceScale::age_days(),
        recommendation: "Release static address {resource_id} in {region}; it has been reserved \
                         for {age_days} days without use (${monthly_waste}/month, \
                         ${already_wasted} so far)",
    }
    .build()
}

fn idle_compute_instance() -> Rule {
    let rule = RuleDef {
        id: "idle-compute-instance",
        name: "Running compute instance with near-zero CPU",
        category: "compute",
        kinds: vec![ResourceKind::ComputeInstance],
        lookback_days: 14,
        condition: Condition::all(vec![
            metric("cpu_utilization", Aggregation::Average, Comparison::Lt, "idle_cpu"),
            metric("cpu_utilization", Aggregation::Maximum, Comparison::Lt, "idle_cpu_peak"),
        ]),
        waste: WasteFormula::FullCost,
        severity: idle_cpu_severity(),
        confidence: ConfidenceScale::idle_ratio(),
        recommendation: "Stop or delete idle instance {resource_id}; average CPU stayed below \
                         5% for 14 days (${monthly_waste}/month)",
    }
    .build();
    with_thresholds(
        when(rule, status_is(RUNNING)),
        &[("idle_cpu", 0.05), ("idle_cpu_peak", 0.10)],
    )
}

fn overprovisioned_compute_instance() -> Rule {
    let rule = RuleDef {
        id: "overprovisioned-compute-instance",
        name: "Compute instance larger than its workload",
        category: "compute",
        kinds: vec![ResourceKind::ComputeInstance],
        lookback_days: 14,
        condition: metric(
            "cpu_utilization",
            Aggregation::Average,
            Comparison::Lt,
            "underutilized_cpu",
        ),
        waste: WasteFormula::Rightsize {
            attribute: "vcpu".to_string(),
            metric: "cpu_utilization".to_string(),
            aggregation: Aggregation::Average,
            target_utilization: Operand::threshold("target_cpu"),
            min_units: 1.0,
        },
        severity: idle_cpu_severity(),
        confidence: ConfidenceScale::idle_ratio(),
        recommendation: "Resize {resource_id} from {current_vcpu} to {optimal_vcpu} vCPUs to \
                         save ${monthly_waste}/month",
    }
    .build();
    with_thresholds(
        when(rule, status_is(RUNNING)),
        &[("underutilized_cpu", 0.20), ("target_cpu", 0.50)],
    )
}

fn stopped_instance_with_disks() -> Rule {
    let rule = RuleDef {
        id: "stopped-instance-with-disks",
        name: "Stopped instance still paying for attached disks",
        category: "compute",
        kinds: vec![ResourceKind::ComputeInstance],
        lookback_days: 7,
        condition: Condition::DaysSince {
            attribute: "stopped_at".to_string(),
            op: Comparison::Ge,
            value: Operand::threshold("min_stopped_days"),
        },
        waste: WasteFormula::Dimensions {
            dimensions: vec!["disk".to_string()],
        },
        severity: Severity::DaysSince {
            attribute: "stopped_at".to_string(),
        },
        confidence: ConfidenceScale::age_days(),
        recommendation: "Snapshot and delete the {disk_units} GB of disks attached to stopped \
                         instance {resource_id} (${monthly_waste}/month)",
    }
    .build();
    with_thresholds(when(rule, status_is(TERMINATED)), &[("min_stopped_days", 7.0)])
}

fn unattached_disk() -> Rule {
    RuleDef {
        id: "unattached-disk",
        name: "Persistent disk not attached to any instance",
        category: "storage",
        kinds: vec![ResourceKind::Disk],
        lookback_days: 7,
        condition: flag("attached", false),
        waste: WasteFormula::FullCost,
        severity: Severity::AgeDays,
        confidence: ConfidenceScale::age_days(),
        recommendation: "Snapshot and delete unattached disk {resource_id} \
                         (${monthly_waste}/month)",
    }
    .build()
}

fn old_snapshot() -> Rule {
    let rule = RuleDef {
        id: "old-snapshot",
        name: "Old snapshot whose source disk is gone",
        category: "storage",
        kinds: vec![ResourceKind::Snapshot],
        lookback_days: 7,
        condition: Condition::all(vec![
            Condition::Age {
                op: Comparison::Ge,
                value: Operand::threshold("max_snapshot_age_days"),
            },
            flag("source_disk_exists", false),
        ]),
        waste: WasteFormula::FullCost,
        severity: Severity::AgeDays,
        confidence: ConfidenceScale::storage_age_days(),
        recommendation: "Delete snapshot {resource_id}; it is {age_days} days old and its \
                         source disk no longer exists",
    }
    .build();
    with_thresholds(rule, &[("max_snapshot_age_days", 90.0)])
}

fn empty_storage_bucket() -> Rule {
    let rule = RuleDef {
        id: "empty-storage-bucket",
        name: "Storage bucket holding no objects",
        category: "storage",
        kinds: vec![ResourceKind::StorageBucket],
        lookback_days: 30,
        condition: attribute("object_count", Comparison::Eq, 0.0),
        waste: WasteFormula::FixedAnnual {
            amount: Operand::threshold("annual_overhead_estimate"),
        },
        severity: Severity::AgeDays,
        confidence: ConfidenceScale::storage_age_days(),
        recommendation: "Delete empty bucket {resource_id}; it has held no objects and adds \
                         management overhead",
    }
    .build();
    with_thresholds(rule, &[("annual_overhead_estimate", 12.0)])
}

fn incomplete_multipart_uploads() -> Rule {
    let rule = RuleDef {
        id: "incomplete-multipart-uploads",
        name: "Bucket accumulating incomplete multipart uploads",
        category: "storage",
        kinds: vec![ResourceKind::StorageBucket],
        lookback_days: 30,
        condition: attribute("incomplete_upload_count", Comparison::Gt, 0.0),
        waste: WasteFormula::FractionOfCost {
            fraction: Operand::threshold("incomplete_upload_fraction"),
        },
        severity: Severity::Attribute {
            key: "incomplete_upload_count".to_string(),
        },
        confidence: ConfidenceScale::preset(&[
            (10.0, Confidence::Medium),
            (100.0, Confidence::High),
            (1000.0, Confidence::Critical),
        ]),
        recommendation: "Add a lifecycle rule aborting incomplete multipart uploads in \
                         {resource_id} ({incomplete_upload_count} pending)",
    }
    .build();
    with_thresholds(rule, &[("incomplete_upload_fraction", 0.02)])
}

fn unused_dataset_table() -> Rule {
    let rule = RuleDef {
        id: "unused-dataset-table",
        name: "Dataset table not queried in 90 days",
        category: "data",
        kinds: vec![ResourceKind::DatasetTable],
        lookback_days: 90,
        condition: metric("query_count", Aggregation::Sum, Comparison::Le, "max_queries"),
        waste: WasteFormula::FullCost,
        severity: Severity::AgeDays,
        confidence: ConfidenceScale::storage_age_days(),
        recommendation: "Export {resource_id} to archive storage or drop it; no queries in 90 \
                         days (${monthly_waste}/month, ${already_wasted} so far)",
    }
    .build();
    with_thresholds(rule, &[("max_queries", 0.0)])
}

fn idle_nat_gateway() -> Rule {
    let rule = RuleDef {
        id: "idle-nat-gateway",
        name: "NAT gateway processing almost no traffic",
        category: "network",
        kinds: vec![ResourceKind::NatGateway],
        lookback_days: 30,
        condition: metric("processed_gb", Aggregation::Sum, Comparison::Lt, "idle_processed_gb"),
        waste: WasteFormula::FullCost,
        severity: Severity::AgeDays,
        confidence: ConfidenceScale::age_days(),
        recommendation: "Remove NAT gateway {resource_id} in {region}; it processed under 1 GB \
                         in 30 days",
    }
    .build();
    with_thresholds(rule, &[("idle_processed_gb", 1.0)])
}

fn idle_managed_database() -> Rule {
    let rule = RuleDef {
        id: "idle-managed-database",
        name: "Managed database without client connections",
        category: "database",
        kinds: vec![ResourceKind::ManagedDatabase],
        lookback_days: 14,
        condition: metric(
            "connection_count",
            Aggregation::Maximum,
            Comparison::Le,
            "max_connections",
        ),
        waste: WasteFormula::FullCost,
        severity: Severity::AgeDays,
        confidence: ConfidenceScale::age_days(),
        recommendation: "Back up and delete database {resource_id}; no connections in 14 days \
                         (${monthly_waste}/month)",
    }
    .build();
    with_thresholds(rule, &[("max_connections", 0.0)])
}

fn idle_serverless_min_instances() -> Rule {
    let rule = RuleDef {
        id: "idle-serverless-min-instances",
        name: "Serverless service keeping warm instances without traffic",
        category: "compute",
        kinds: vec![ResourceKind::ServerlessService],
        lookback_days: 30,
        condition: metric("request_count", Aggregation::Sum, Comparison::Le, "max_requests"),
        waste: WasteFormula::Dimensions {
            dimensions: vec!["min_instances".to_string()],
        },
        severity: Severity::AgeDays,
        confidence: ConfidenceScale::age_days(),
        recommendation: "Set minimum instances of {resource_id} to 0; it served no requests in \
                         30 days (${monthly_waste}/month)",
    }
    .build();
    with_thresholds(
        when(rule, attribute("min_instances", Comparison::Gt, 0.0)),
        &[("max_requests", 0.0)],
    )
}

fn load_balancer_without_backends() -> Rule {
    RuleDef {
        id: "load-balancer-without-backends",
        name: "Load balancer with no healthy backends",
        category: "network",
        kinds: vec![ResourceKind::LoadBalancer],
        lookback_days: 7,
        condition: attribute("backend_count", Comparison::Eq, 0.0),
        waste: WasteFormula::FullCost,
        severity: Severity::AgeDays,
        confidence: ConfidenceScale::age_days(),
        recommendation: "Delete load balancer {resource_id}; it has no backends \
                         (${monthly_waste}/month)",
    }
    .build()
}

fn missing_governance_labels() -> Rule {
    let mut rule = RuleDef {
        id: "missing-governance-labels",
        name: "Resource missing cost allocation labels",
        category: "governance",
        kinds: ResourceKind::ALL.to_vec(),
        lookback_days: 7,
        condition: Condition::MissingLabels,
        waste: WasteFormula::FractionOfCost {
            fraction: Operand::threshold("unallocated_cost_fraction"),
        },
        severity: Severity::MissingLabelCount,
        confidence: ConfidenceScale::preset(&[
            (1.0, Confidence::Medium),
            (2.0, Confidence::High),
            (3.0, Confidence::Critical),
        ]),
        recommendation: "Label {resource_id} with its owner, cost center and environment; \
                         {severity} required labels are missing",
    }
    .build();
    rule.required_labels = vec![
        "owner".to_string(),
        "cost_center".to_string(),
        "environment".to_string(),
    ];
    with_thresholds(rule, &[("unallocated_cost_fraction", 0.10)])
}
