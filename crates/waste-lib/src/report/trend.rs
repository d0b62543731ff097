//! Finding lifecycle across two reports
//!
//! Scans are stateless; lifecycle is derived afterwards by comparing the
//! finding keys of consecutive reports.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ScanReport;
use crate::models::{Finding, FindingKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingStatus {
    New,
    Persisting,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingTransition {
    pub key: FindingKey,
    pub status: FindingStatus,
    /// Current monthly waste, or the last known value for resolved findings
    pub monthly_waste: f64,
}

/// Compare two reports by finding key, ordered by key.
///
/// A cancelled `current` report is incomplete, so keys missing from it are
/// not reported as resolved.
pub fn diff(previous: &ScanReport, current: &ScanReport) -> Vec<FindingTransition> {
    let before = index(&previous.findings);
    let after = index(&current.findings);

    let mut transitions: Vec<FindingTransition> = after
        .iter()
        .map(|(key, finding)| FindingTransition {
            key: (*key).clone(),
            status: if before.contains_key(key) {
                FindingStatus::Persisting
            } else {
                FindingStatus::New
            },
            monthly_waste: finding.monthly_waste,
        })
        .collect();

    if !current.cancelled {
        transitions.extend(
            before
                .iter()
                .filter(|(key, _)| !after.contains_key(*key))
                .map(|(key, finding)| FindingTransition {
                    key: (*key).clone(),
                    status: FindingStatus::Resolved,
                    monthly_waste: finding.monthly_waste,
                }),
        );
    }

    transitions.sort_by(|a, b| a.key.cmp(&b.key));
    transitions
}

/// Number of transitions per status
pub fn count_by_status(transitions: &[FindingTransition]) -> BTreeMap<FindingStatus, usize> {
    let mut counts = BTreeMap::new();
    for t in transitions {
        *counts.entry(t.status).or_insert(0) += 1;
    }
    counts
}

fn index(findings: &[Finding]) -> BTreeMap<FindingKey, &Finding> {
    findings.iter().map(|f| (f.key(), f)).collect()
}
