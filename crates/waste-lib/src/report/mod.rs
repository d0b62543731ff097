//! Scan report and aggregation
//!
//! A [`ScanReport`] is immutable once built. Findings and diagnostics are
//! sorted on construction, so a report depends only on what was found and
//! never on the order evaluation tasks finished in.

pub mod trend;

pub use trend::{count_by_status, diff, FindingStatus, FindingTransition};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::AggregationError;
use crate::models::{Confidence, Diagnostic, DiagnosticReason, Finding, Provenance};

const RELATIVE_EPSILON: f64 = 1e-9;

/// Scan-level facts recorded next to the findings
#[derive(Debug, Clone, PartialEq)]
pub struct ReportMeta {
    pub generated_at: DateTime<Utc>,
    pub pricing_version: String,
    pub resources_scanned: usize,
    pub cancelled: bool,
}

/// Totals over the findings of a report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub finding_count: usize,
    pub total_monthly_waste: f64,
    pub total_annual_waste: f64,
    pub total_already_wasted: f64,
    pub by_confidence: BTreeMap<Confidence, usize>,
    /// Monthly waste split by how it was derived
    pub by_provenance: BTreeMap<Provenance, f64>,
    pub diagnostics_by_reason: BTreeMap<DiagnosticReason, usize>,
}

/// Totals for one category or rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupTotals {
    pub key: String,
    pub finding_count: usize,
    pub monthly_waste: f64,
    pub annual_waste: f64,
    pub already_wasted: f64,
}

impl GroupTotals {
    fn empty(key: &str) -> Self {
        Self {
            key: key.to_string(),
            finding_count: 0,
            monthly_waste: 0.0,
            annual_waste: 0.0,
            already_wasted: 0.0,
        }
    }

    fn add(&mut self, finding: &Finding) {
        self.finding_count += 1;
        self.monthly_waste += finding.monthly_waste;
        self.annual_waste += finding.annual_waste;
        self.already_wasted += finding.already_wasted;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub generated_at: DateTime<Utc>,
    pub pricing_version: String,
    pub resources_scanned: usize,
    /// Set when the scan was cancelled; findings cover what was fetched
    pub cancelled: bool,
    pub findings: Vec<Finding>,
    pub diagnostics: Vec<Diagnostic>,
    pub summary: Summary,
}

impl ScanReport {
    pub fn build(meta: ReportMeta, mut findings: Vec<Finding>, mut diagnostics: Vec<Diagnostic>) -> Self {
        findings.sort_by(|a, b| {
            (a.resource_id.as_str(), a.rule_id.as_str())
                .cmp(&(b.resource_id.as_str(), b.rule_id.as_str()))
        });
        diagnostics.sort();

        let summary = summarize(&findings, &diagnostics);
        Self {
            generated_at: meta.generated_at,
            pricing_version: meta.pricing_version,
            resources_scanned: meta.resources_scanned,
            cancelled: meta.cancelled,
            findings,
            diagnostics,
            summary,
        }
    }

    /// Totals per finding category, largest monthly waste first
    pub fn by_category(&self) -> Vec<GroupTotals> {
        self.group_by(|f| f.category.as_str())
    }

    /// Totals per rule, largest monthly waste first
    pub fn by_rule(&self) -> Vec<GroupTotals> {
        self.group_by(|f| f.rule_id.as_str())
    }

    fn group_by<'a>(&'a self, key: impl Fn(&'a Finding) -> &'a str) -> Vec<GroupTotals> {
        let mut groups: BTreeMap<&str, GroupTotals> = BTreeMap::new();
        for finding in &self.findings {
            let k = key(finding);
            groups
                .entry(k)
                .or_insert_with(|| GroupTotals::empty(k))
                .add(finding);
        }
        let mut groups: Vec<GroupTotals> = groups.into_values().collect();
        // Stable sort keeps key order among equal totals
        groups.sort_by(|a, b| b.monthly_waste.total_cmp(&a.monthly_waste));
        groups
    }

    /// Findings ordered by waste already incurred, largest first
    pub fn sorted_by_already_wasted(&self) -> Vec<&Finding> {
        let mut sorted: Vec<&Finding> = self.findings.iter().collect();
        sorted.sort_by(|a, b| b.already_wasted.total_cmp(&a.already_wasted));
        sorted
    }

    /// Diagnostics that record faults rather than expected data gaps
    pub fn fault_diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| !d.reason.is_informational())
    }

    /// Check finding uniqueness and that every total matches its findings
    pub fn verify(&self) -> Result<(), AggregationError> {
        let mut seen = HashSet::new();
        for finding in &self.findings {
            if !seen.insert((finding.resource_id.as_str(), finding.rule_id.as_str())) {
                return Err(AggregationError::DuplicateFinding {
                    resource_id: finding.resource_id.clone(),
                    rule_id: finding.rule_id.clone(),
                });
            }
        }

        let s = &self.summary;
        check_total("monthly_waste", s.total_monthly_waste, self.findings.iter().map(|f| f.monthly_waste))?;
        check_total("annual_waste", s.total_annual_waste, self.findings.iter().map(|f| f.annual_waste))?;
        check_total("already_wasted", s.total_already_wasted, self.findings.iter().map(|f| f.already_wasted))?;

        let counted: usize = s.by_confidence.values().sum();
        if counted != self.findings.len() || s.finding_count != self.findings.len() {
            return Err(AggregationError::CountMismatch {
                counted,
                findings: self.findings.len(),
            });
        }

        for group in self.by_category() {
            self.check_members(&group, |f| f.category == group.key)?;
        }
        for group in self.by_rule() {
            self.check_members(&group, |f| f.rule_id == group.key)?;
        }
        Ok(())
    }

    fn check_members(
        &self,
        group: &GroupTotals,
        is_member: impl Fn(&Finding) -> bool,
    ) -> Result<(), AggregationError> {
        let members: Vec<&Finding> = self.findings.iter().filter(|f| is_member(f)).collect();
        check_group(group, "monthly_waste", group.monthly_waste, members.iter().map(|f| f.monthly_waste))?;
        check_group(group, "annual_waste", group.annual_waste, members.iter().map(|f| f.annual_waste))?;
        check_group(group, "already_wasted", group.already_wasted, members.iter().map(|f| f.already_wasted))
    }
}

fn summarize(findings: &[Finding], diagnostics: &[Diagnostic]) -> Summary {
    let mut summary = Summary {
        finding_count: findings.len(),
        ..Default::default()
    };
    for finding in findings {
        summary.total_monthly_waste += finding.monthly_waste;
        summary.total_annual_waste += finding.annual_waste;
        summary.total_already_wasted += finding.already_wasted;
        *summary.by_confidence.entry(finding.confidence).or_insert(0) += 1;
        *summary.by_provenance.entry(finding.provenance).or_insert(0.0) += finding.monthly_waste;
    }
    for diagnostic in diagnostics {
        *summary
            .diagnostics_by_reason
            .entry(diagnostic.reason)
            .or_insert(0) += 1;
    }
    summary
}

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= RELATIVE_EPSILON * a.abs().max(b.abs()).max(1.0)
}

fn check_total(
    field: &'static str,
    reported: f64,
    values: impl Iterator<Item = f64>,
) -> Result<(), AggregationError> {
    let expected: f64 = values.sum();
    if approx_eq(reported, expected) {
        Ok(())
    } else {
        Err(AggregationError::TotalMismatch {
            field,
            reported,
            expected,
        })
    }
}

fn check_group(
    group: &GroupTotals,
    field: &'static str,
    reported: f64,
    values: impl Iterator<Item = f64>,
) -> Result<(), AggregationError> {
    let expected: f64 = values.sum();
    if approx_eq(reported, expected) {
        Ok(())
    } else {
        Err(AggregationError::GroupMismatch {
            group: group.key.clone(),
            field,
            reported,
            expected,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn finding(resource_id: &str, rule_id: &str, category: &str, monthly: f64, age_days: f64) -> Finding {
        Finding {
            resource_id: resource_id.to_string(),
            rule_id: rule_id.to_string(),
            category: category.to_string(),
            monthly_cost: monthly,
            monthly_waste: monthly,
            annual_waste: monthly * 12.0,
            already_wasted: monthly * age_days / 30.0,
            confidence: Confidence::High,
            provenance: Provenance::Measured,
            recommendation: String::new(),
            evidence: BTreeMap::new(),
            detected_at: at(),
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 30, 0, 0, 0).unwrap()
    }

    pub(crate) fn meta() -> ReportMeta {
        ReportMeta {
            generated_at: at(),
            pricing_version: "2024-06".to_string(),
            resources_scanned: 3,
            cancelled: false,
        }
    }

    fn sample() -> ScanReport {
        ScanReport::build(
            meta(),
            vec![
                finding("vm-2", "idle-compute-instance", "compute", 50.0, 10.0),
                finding("disk-1", "unattached-disk", "storage", 4.0, 300.0),
                finding("vm-1", "idle-compute-instance", "compute", 20.0, 60.0),
                finding("vm-1", "missing-governance-labels", "governance", 2.0, 60.0),
            ],
            vec![
                Diagnostic::for_pair("vm-3", "idle-compute-instance", DiagnosticReason::DataUnavailable, "cpu"),
                Diagnostic::for_scan(DiagnosticReason::Cancelled, "stop"),
            ],
        )
    }

    #[test]
    fn test_findings_sorted_by_key() {
        let report = sample();
        let keys: Vec<_> = report
            .findings
            .iter()
            .map(|f| (f.resource_id.as_str(), f.rule_id.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("disk-1", "unattached-disk"),
                ("vm-1", "idle-compute-instance"),
                ("vm-1", "missing-governance-labels"),
                ("vm-2", "idle-compute-instance"),
            ]
        );
    }

    #[test]
    fn test_order_independence() {
        let mut shuffled = sample();
        shuffled.findings.reverse();
        shuffled.diagnostics.reverse();
        let rebuilt = ScanReport::build(meta(), shuffled.findings, shuffled.diagnostics);
        assert_eq!(rebuilt, sample());
    }

    #[test]
    fn test_summary_totals() {
        let report = sample();
        assert_eq!(report.summary.finding_count, 4);
        assert!(approx_eq(report.summary.total_monthly_waste, 76.0));
        assert!(approx_eq(report.summary.total_annual_waste, 912.0));
        assert_eq!(report.summary.by_confidence[&Confidence::High], 4);
        assert_eq!(report.summary.diagnostics_by_reason[&DiagnosticReason::Cancelled], 1);
        assert_eq!(report.fault_diagnostics().count(), 1);
        report.verify().unwrap();
    }

    #[test]
    fn test_groups_sorted_by_waste() {
        let report = sample();
        let categories = report.by_category();
        assert_eq!(categories[0].key, "compute");
        assert_eq!(categories[0].finding_count, 2);
        assert!(approx_eq(categories[0].monthly_waste, 70.0));
        assert_eq!(categories[1].key, "storage");
        assert_eq!(categories[2].key, "governance");

        let rules = report.by_rule();
        assert_eq!(rules[0].key, "idle-compute-instance");
        assert!(approx_eq(rules[0].annual_waste, 840.0));
    }

    #[test]
    fn test_sorted_by_already_wasted() {
        let report = sample();
        let sorted = report.sorted_by_already_wasted();
        assert_eq!(sorted.len(), 4);
        assert!(sorted
            .windows(2)
            .all(|w| w[0].already_wasted >= w[1].already_wasted));
    }

    #[test]
    fn test_verify_detects_tampering() {
        let mut report = sample();
        report.summary.total_monthly_waste += 1.0;
        assert!(matches!(
            report.verify(),
            Err(AggregationError::TotalMismatch { field: "monthly_waste", .. })
        ));

        let mut report = sample();
        let duplicate = report.findings[0].clone();
        report.findings.push(duplicate);
        assert!(matches!(
            report.verify(),
            Err(AggregationError::DuplicateFinding { .. })
        ));

        let mut report = sample();
        report.summary.by_confidence.insert(Confidence::Low, 1);
        assert!(matches!(
            report.verify(),
            Err(AggregationError::CountMismatch { counted: 5, findings: 4 })
        ));
    }

    #[test]
    fn test_report_serializes() {
        let report = sample();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["summary"]["by_confidence"]["HIGH"], 4);
        assert_eq!(json["findings"][0]["provenance"], "measured");
        // Scan-level diagnostics sort ahead of per-resource ones
        assert_eq!(json["diagnostics"][0]["reason"], "cancelled");
        assert!(json["diagnostics"][0].get("resource_id").is_none());
        assert_eq!(json["diagnostics"][1]["resource_id"], "vm-3");
    }
}
