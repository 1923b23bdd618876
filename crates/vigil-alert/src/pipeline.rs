//! Per-record alerting pipeline: evaluate, deduplicate, dispatch.
//!
//! The pipeline owns the engine-side state (the merge-group table and the
//! dispatch history) and produces at most one outbound alert per matching
//! rule per record.

use chrono::{DateTime, Utc};
use tracing::instrument;

use vigil_core::traits::RecipientDirectory;
use vigil_core::{ActivityRecord, EngineConfig, RuleSnapshot};
use vigil_observability::MetricsSink;

use crate::dedup::{AlertDeduplicator, SubmitAction};
use crate::dispatch::{AlertDispatcher, AlertTransport, DispatchReport};
use crate::evaluator::AlertEvaluator;

/// What happened to one matching rule for one record.
#[derive(Debug)]
pub struct RecordAlertOutcome {
    /// Rule that matched.
    pub rule_name: String,
    /// Whether the candidate merged into an existing group.
    pub merged: bool,
    /// Occurrences in the group after this record.
    pub occurrence_count: u64,
    /// Delivery report, present only when the alert dispatched.
    pub dispatch: Option<DispatchReport>,
}

/// Composes the evaluator, deduplicator, and dispatcher.
pub struct AlertPipeline<T, D> {
    evaluator: AlertEvaluator,
    dedup: AlertDeduplicator,
    dispatcher: AlertDispatcher<T, D>,
}

impl<T: AlertTransport, D: RecipientDirectory> AlertPipeline<T, D> {
    /// Creates a pipeline with empty dedup state.
    pub fn new(config: &EngineConfig, transport: T, directory: D) -> Self {
        Self {
            evaluator: AlertEvaluator::new(config),
            dedup: AlertDeduplicator::new(),
            dispatcher: AlertDispatcher::new(transport, directory),
        }
    }

    /// Runs one record through every active rule.
    ///
    /// Returns one outcome per matching rule; a record matching several
    /// rules can dispatch several distinct alerts.
    #[instrument(skip_all, fields(record_id = record.id))]
    pub async fn process_record(
        &self,
        record: &ActivityRecord,
        rules: &RuleSnapshot,
        metrics: &dyn MetricsSink,
        now: DateTime<Utc>,
    ) -> Vec<RecordAlertOutcome> {
        let candidates = self.evaluator.evaluate(record, rules);
        metrics.incr("alerts.candidates", candidates.len() as u64);

        let mut outcomes = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let Some(rule) = rules.by_id(candidate.rule_id) else {
                continue;
            };
            let submission = self.dedup.submit(&candidate, rule, now).await;
            match submission.action {
                SubmitAction::Merged => {
                    metrics.incr("alerts.merged", 1);
                    outcomes.push(RecordAlertOutcome {
                        rule_name: candidate.rule_name,
                        merged: true,
                        occurrence_count: submission.group.occurrence_count,
                        dispatch: None,
                    });
                }
                SubmitAction::Dispatch => {
                    metrics.incr("alerts.dispatched", 1);
                    let report = self
                        .dispatcher
                        .dispatch(&candidate, &submission.group, now)
                        .await;
                    metrics.incr("alerts.deliveries_failed", report.failed);
                    outcomes.push(RecordAlertOutcome {
                        rule_name: candidate.rule_name,
                        merged: false,
                        occurrence_count: submission.group.occurrence_count,
                        dispatch: Some(report),
                    });
                }
            }
        }
        outcomes
    }

    /// The deduplicator, for GC sweeps and state snapshots.
    pub fn dedup(&self) -> &AlertDeduplicator {
        &self.dedup
    }

    /// The dispatcher, for history queries.
    pub fn dispatcher(&self) -> &AlertDispatcher<T, D> {
        &self.dispatcher
    }
}
