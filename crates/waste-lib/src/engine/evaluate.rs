//! Evaluate phase
//!
//! One task per applicable (resource, rule) pair against the frozen
//! snapshot. Outcomes fan in over a channel; a failing or panicking pair
//! becomes a diagnostic and never affects the others.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

use super::cache::MetricsSnapshot;
use crate::error::RuleError;
use crate::models::{Diagnostic, DiagnosticReason, Finding, Resource};
use crate::pricing::PricingCatalog;
use crate::rules::{Outcome, Rule, RuleRegistry, SkipReason};

const RESULT_CHANNEL_CAPACITY: usize = 256;

struct PairResult {
    resource_id: String,
    rule_id: String,
    outcome: Result<Outcome, RuleError>,
}

/// Findings and diagnostics of the evaluate phase
#[derive(Debug, Default)]
pub(crate) struct Evaluated {
    pub findings: Vec<Finding>,
    pub diagnostics: Vec<Diagnostic>,
    pub pairs: usize,
    /// Pairs that failed with a computation error or panic
    pub computation_errors: usize,
}

type PairEvaluator =
    fn(&Rule, &Resource, &MetricsSnapshot, &PricingCatalog, DateTime<Utc>) -> Result<Outcome, RuleError>;

pub(crate) async fn evaluate_all(
    resources: &[Arc<Resource>],
    registry: &RuleRegistry,
    catalog: Arc<PricingCatalog>,
    snapshot: Arc<MetricsSnapshot>,
    as_of: DateTime<Utc>,
) -> Evaluated {
    evaluate_with(resources, registry, catalog, snapshot, as_of, evaluate_pair).await
}

pub(crate) async fn evaluate_with(
    resources: &[Arc<Resource>],
    registry: &RuleRegistry,
    catalog: Arc<PricingCatalog>,
    snapshot: Arc<MetricsSnapshot>,
    as_of: DateTime<Utc>,
    evaluate: PairEvaluator,
) -> Evaluated {
    let (tx, mut rx) = mpsc::channel::<PairResult>(RESULT_CHANNEL_CAPACITY);
    let mut handles = Vec::new();

    for resource in resources {
        for rule in registry.applicable(resource, as_of) {
            let ids = (resource.id.clone(), rule.id.clone());
            let tx = tx.clone();
            let resource = resource.clone();
            let catalog = catalog.clone();
            let snapshot = snapshot.clone();
            let handle = tokio::spawn(async move {
                let outcome = evaluate(&rule, &resource, &snapshot, &catalog, as_of);
                let _ = tx
                    .send(PairResult {
                        resource_id: resource.id.clone(),
                        rule_id: rule.id.clone(),
                        outcome,
                    })
                    .await;
            });
            handles.push((ids, handle));
        }
    }
    drop(tx);

    let mut evaluated = Evaluated {
        pairs: handles.len(),
        ..Default::default()
    };

    // Drain before joining so a full channel cannot stall the tasks
    while let Some(result) = rx.recv().await {
        evaluated.absorb(result);
    }

    for ((resource_id, rule_id), handle) in handles {
        if let Err(e) = handle.await {
            error!(
                resource_id = %resource_id,
                rule_id = %rule_id,
                error = %e,
                "Rule evaluation task failed"
            );
            evaluated.computation_errors += 1;
            evaluated.diagnostics.push(Diagnostic::for_pair(
                &resource_id,
                &rule_id,
                DiagnosticReason::ComputationError,
                format!("evaluation task failed: {}", e),
            ));
        }
    }

    debug!(
        pairs = evaluated.pairs,
        findings = evaluated.findings.len(),
        diagnostics = evaluated.diagnostics.len(),
        "Evaluate phase finished"
    );
    evaluated
}

fn evaluate_pair(
    rule: &Rule,
    resource: &Resource,
    snapshot: &MetricsSnapshot,
    catalog: &PricingCatalog,
    as_of: DateTime<Utc>,
) -> Result<Outcome, RuleError> {
    rule.evaluate(resource, snapshot.view(&resource.id), catalog, as_of)
}

impl Evaluated {
    fn absorb(&mut self, result: PairResult) {
        let PairResult {
            resource_id,
            rule_id,
            outcome,
        } = result;

        let diagnostic = |reason: DiagnosticReason, detail: String| {
            Diagnostic::for_pair(&resource_id, &rule_id, reason, detail)
        };

        match outcome {
            Ok(Outcome::Finding(finding)) => self.findings.push(finding),
            Ok(Outcome::Skip(SkipReason::DataUnavailable(why)))
            | Err(RuleError::DataUnavailable(why)) => {
                self.diagnostics
                    .push(diagnostic(DiagnosticReason::DataUnavailable, why));
            }
            Ok(Outcome::Skip(_)) => {}
            Err(RuleError::Configuration(why)) => {
                self.diagnostics
                    .push(diagnostic(DiagnosticReason::ConfigurationError, why));
            }
            Err(RuleError::Computation(why)) => {
                self.computation_errors += 1;
                self.diagnostics
                    .push(diagnostic(DiagnosticReason::ComputationError, why));
            }
        }
    }
}
