//! Batch retention sweeps.
//!
//! A sweep evaluates a record batch under one policy snapshot, applies the
//! resulting actions through the injected [`ActionSink`], and reports totals.
//! Records are independent, so they run across a bounded worker pool; one
//! record's sink failure never aborts its siblings.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use vigil_core::condition::ConditionContext;
use vigil_core::traits::{ActionSink, RecordFilter, RecordSource};
use vigil_core::{ActivityRecord, EngineConfig, PolicySnapshot};
use vigil_observability::MetricsSink;

use crate::evaluator::{evaluate_record, DecidedAction};

/// Per-sweep parameters supplied by the scheduler.
#[derive(Debug, Clone)]
pub struct SweepOptions {
    /// Tally decisions without applying any action.
    pub dry_run: bool,
    /// Stop starting new records after this instant; unreached records are
    /// reported, already-decided records keep their decisions.
    pub deadline: Option<Instant>,
    /// Wall-clock "now" used for age thresholds.
    pub now: DateTime<Utc>,
}

impl SweepOptions {
    /// Live sweep anchored at the given instant.
    pub fn live(now: DateTime<Utc>) -> Self {
        Self {
            dry_run: false,
            deadline: None,
            now,
        }
    }

    /// Dry-run sweep anchored at the given instant.
    pub fn dry_run(now: DateTime<Utc>) -> Self {
        Self {
            dry_run: true,
            deadline: None,
            now,
        }
    }
}

/// Per-policy outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PolicyTally {
    /// Records this policy won.
    pub matched: u64,
    /// Actions applied successfully (always zero in dry-run).
    pub applied: u64,
    /// Actions that failed at the sink.
    pub failed: u64,
}

/// Summary of one retention sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    /// Records decided (reached before any deadline).
    pub processed: u64,
    /// Records classified as archive.
    pub archived: u64,
    /// Records classified as delete.
    pub deleted: u64,
    /// Records kept, whether unmatched or under their age threshold.
    pub kept: u64,
    /// Records whose action failed at the sink.
    pub failed: u64,
    /// Records not reached before the deadline.
    pub not_reached: u64,
    /// Whether this was a dry run.
    pub dry_run: bool,
    /// Outcome counters per winning policy.
    pub policy_tallies: HashMap<String, PolicyTally>,
    /// Bounded sample of failure reasons.
    pub failure_samples: Vec<String>,
}

impl SweepReport {
    /// Folds another report into this one (used when paging over a source).
    pub fn merge(&mut self, other: SweepReport) {
        self.processed += other.processed;
        self.archived += other.archived;
        self.deleted += other.deleted;
        self.kept += other.kept;
        self.failed += other.failed;
        self.not_reached += other.not_reached;
        for (name, tally) in other.policy_tallies {
            let entry = self.policy_tallies.entry(name).or_default();
            entry.matched += tally.matched;
            entry.applied += tally.applied;
            entry.failed += tally.failed;
        }
        self.failure_samples.extend(other.failure_samples);
    }
}

/// Outcome of one record within a sweep.
#[derive(Debug)]
enum RecordOutcome {
    Decided {
        action: DecidedAction,
        policy: Option<String>,
        sink_error: Option<String>,
    },
    NotReached,
}

/// Runs retention sweeps over record batches.
pub struct RetentionSweeper {
    config: EngineConfig,
}

impl RetentionSweeper {
    /// Creates a sweeper with the given engine configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Evaluates a batch and (unless dry-run) applies the resulting actions.
    ///
    /// Dry-run and live mode share the decision path in
    /// [`evaluate_record`]; the only difference is whether the sink is
    /// called.
    #[instrument(skip_all, fields(records = records.len(), dry_run = options.dry_run))]
    pub async fn run<S: ActionSink>(
        &self,
        records: &[ActivityRecord],
        policies: &PolicySnapshot,
        sink: &S,
        metrics: &dyn MetricsSink,
        options: &SweepOptions,
    ) -> SweepReport {
        let ctx = ConditionContext {
            timezone: self.config.reference_timezone,
        };
        let concurrency = self.config.sweep_concurrency.max(1);

        let outcomes: Vec<RecordOutcome> = stream::iter(records)
            .map(|record| self.process_record(record, policies, sink, options, &ctx))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let report = self.summarize(outcomes, options.dry_run);
        self.emit_metrics(&report, metrics);

        info!(
            processed = report.processed,
            archived = report.archived,
            deleted = report.deleted,
            kept = report.kept,
            failed = report.failed,
            not_reached = report.not_reached,
            dry_run = report.dry_run,
            "retention sweep finished"
        );
        report
    }

    /// Pages through a record source and sweeps every batch.
    pub async fn run_from_source<R: RecordSource, S: ActionSink>(
        &self,
        source: &R,
        filter: &RecordFilter,
        batch_size: usize,
        policies: &PolicySnapshot,
        sink: &S,
        metrics: &dyn MetricsSink,
        options: &SweepOptions,
    ) -> SweepReport {
        let mut report = SweepReport {
            dry_run: options.dry_run,
            ..Default::default()
        };
        let mut offset = 0;

        loop {
            let batch = match source.fetch_batch(filter, batch_size, offset).await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, offset, "record fetch failed, ending sweep early");
                    if report.failure_samples.len() < self.config.failure_sample_limit {
                        report.failure_samples.push(format!("fetch at {offset}: {e}"));
                    }
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }
            offset += batch.len();
            report.merge(self.run(&batch, policies, sink, metrics, options).await);
        }

        report.failure_samples.truncate(self.config.failure_sample_limit);
        report
    }

    async fn process_record<S: ActionSink>(
        &self,
        record: &ActivityRecord,
        policies: &PolicySnapshot,
        sink: &S,
        options: &SweepOptions,
        ctx: &ConditionContext,
    ) -> RecordOutcome {
        if let Some(deadline) = options.deadline {
            if Instant::now() >= deadline {
                return RecordOutcome::NotReached;
            }
        }

        let decision = evaluate_record(record, policies, options.now, ctx);
        debug!(
            record_id = record.id,
            action = ?decision.action,
            policy = decision.policy.as_deref().unwrap_or("<none>"),
            "record classified"
        );

        let mut sink_error = None;
        if !options.dry_run {
            if let Some(action) = decision.action.to_apply() {
                if let Err(e) = sink.apply(record.id, action).await {
                    warn!(record_id = record.id, error = %e, "retention action failed");
                    sink_error = Some(format!("record {}: {e}", record.id));
                }
            }
        }

        RecordOutcome::Decided {
            action: decision.action,
            policy: decision.policy,
            sink_error,
        }
    }

    fn summarize(&self, outcomes: Vec<RecordOutcome>, dry_run: bool) -> SweepReport {
        let mut report = SweepReport {
            dry_run,
            ..Default::default()
        };

        for outcome in outcomes {
            match outcome {
                RecordOutcome::NotReached => report.not_reached += 1,
                RecordOutcome::Decided {
                    action,
                    policy,
                    sink_error,
                } => {
                    report.processed += 1;
                    match action {
                        DecidedAction::Keep => report.kept += 1,
                        DecidedAction::Archive => report.archived += 1,
                        DecidedAction::Delete => report.deleted += 1,
                    }

                    let failed = sink_error.is_some();
                    if let Some(reason) = sink_error {
                        report.failed += 1;
                        if report.failure_samples.len() < self.config.failure_sample_limit {
                            report.failure_samples.push(reason);
                        }
                    }

                    if let Some(name) = policy {
                        let tally = report.policy_tallies.entry(name).or_default();
                        tally.matched += 1;
                        if failed {
                            tally.failed += 1;
                        } else if !dry_run && action != DecidedAction::Keep {
                            tally.applied += 1;
                        }
                    }
                }
            }
        }
        report
    }

    fn emit_metrics(&self, report: &SweepReport, metrics: &dyn MetricsSink) {
        metrics.incr("retention.records_processed", report.processed);
        metrics.incr("retention.records_archived", report.archived);
        metrics.incr("retention.records_deleted", report.deleted);
        metrics.incr("retention.records_kept", report.kept);
        metrics.incr("retention.actions_failed", report.failed);
        metrics.incr("retention.records_not_reached", report.not_reached);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use vigil_core::mocks::{MockActionSink, MockRecordSource};
    use vigil_core::{RetentionAction, RetentionPolicy};
    use vigil_observability::{InMemoryMetrics, NullMetrics};

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn record(id: i64, module: &str, age_days: i64) -> ActivityRecord {
        ActivityRecord {
            id,
            activity_type: "login".to_string(),
            module: module.to_string(),
            description: String::new(),
            user_id: None,
            subject: None,
            ip_address: None,
            user_agent: None,
            properties: serde_json::Map::new(),
            risk_level: 0,
            created_at: now() - Duration::days(age_days),
            signature: None,
        }
    }

    fn purge_policy(module: &str, days: u32, action: RetentionAction) -> RetentionPolicy {
        RetentionPolicy {
            name: format!("{module}-{days}d"),
            activity_type: None,
            module: Some(module.to_string()),
            retention_days: days,
            action,
            priority: 1,
            conditions: vec![],
            is_active: true,
        }
    }

    fn sweeper() -> RetentionSweeper {
        RetentionSweeper::new(EngineConfig::default())
    }

    #[tokio::test]
    async fn live_sweep_applies_actions_and_tallies() {
        let policies = PolicySnapshot::load(vec![
            purge_policy("auth", 30, RetentionAction::Delete),
            purge_policy("reports", 10, RetentionAction::Archive),
        ])
        .unwrap();

        let records = vec![
            record(1, "auth", 40),    // delete
            record(2, "auth", 5),     // kept (too young)
            record(3, "reports", 20), // archive
            record(4, "billing", 99), // kept (no policy)
        ];

        let sink = MockActionSink::new();
        let report = sweeper()
            .run(
                &records,
                &policies,
                &sink,
                &NullMetrics,
                &SweepOptions::live(now()),
            )
            .await;

        assert_eq!(report.processed, 4);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.archived, 1);
        assert_eq!(report.kept, 2);
        assert_eq!(report.failed, 0);

        let mut applied = sink.applied();
        applied.sort_by_key(|(id, _)| *id);
        assert_eq!(
            applied,
            vec![(1, RetentionAction::Delete), (3, RetentionAction::Archive)]
        );

        let tally = report.policy_tallies["auth-30d"];
        assert_eq!(tally.matched, 2); // record 2 matched but was kept
        assert_eq!(tally.applied, 1);
    }

    #[tokio::test]
    async fn dry_run_decides_identically_but_applies_nothing() {
        let policies =
            PolicySnapshot::load(vec![purge_policy("auth", 30, RetentionAction::Delete)]).unwrap();
        let records = vec![record(1, "auth", 40), record(2, "auth", 10)];

        let live_sink = MockActionSink::new();
        let live = sweeper()
            .run(
                &records,
                &policies,
                &live_sink,
                &NullMetrics,
                &SweepOptions::live(now()),
            )
            .await;

        let dry_sink = MockActionSink::new();
        let dry = sweeper()
            .run(
                &records,
                &policies,
                &dry_sink,
                &NullMetrics,
                &SweepOptions::dry_run(now()),
            )
            .await;

        assert_eq!(dry.deleted, live.deleted);
        assert_eq!(dry.kept, live.kept);
        assert_eq!(dry.processed, live.processed);
        assert_eq!(live_sink.applied().len(), 1);
        assert!(dry_sink.applied().is_empty());
    }

    #[tokio::test]
    async fn sink_failure_does_not_abort_the_batch() {
        let policies =
            PolicySnapshot::load(vec![purge_policy("auth", 0, RetentionAction::Delete)]).unwrap();
        let records = vec![record(1, "auth", 1), record(2, "auth", 1), record(3, "auth", 1)];

        let sink = MockActionSink::new();
        sink.fail_for(2);

        let report = sweeper()
            .run(
                &records,
                &policies,
                &sink,
                &NullMetrics,
                &SweepOptions::live(now()),
            )
            .await;

        assert_eq!(report.processed, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failure_samples.len(), 1);
        assert!(report.failure_samples[0].contains("record 2"));
        assert_eq!(sink.applied().len(), 2);

        let tally = report.policy_tallies["auth-0d"];
        assert_eq!(tally.matched, 3);
        assert_eq!(tally.applied, 2);
        assert_eq!(tally.failed, 1);
    }

    #[tokio::test]
    async fn expired_deadline_reports_unreached_records() {
        let policies =
            PolicySnapshot::load(vec![purge_policy("auth", 0, RetentionAction::Delete)]).unwrap();
        let records = vec![record(1, "auth", 1), record(2, "auth", 1)];

        // A deadline at "now" has already expired by the time the first
        // record is picked up.
        let options = SweepOptions {
            dry_run: false,
            deadline: Some(Instant::now()),
            now: now(),
        };

        let sink = MockActionSink::new();
        let report = sweeper()
            .run(&records, &policies, &sink, &NullMetrics, &options)
            .await;

        assert_eq!(report.processed, 0);
        assert_eq!(report.not_reached, 2);
        assert!(sink.applied().is_empty());
    }

    #[tokio::test]
    async fn sweep_emits_metrics() {
        let policies =
            PolicySnapshot::load(vec![purge_policy("auth", 0, RetentionAction::Archive)]).unwrap();
        let metrics = InMemoryMetrics::new();
        let sink = MockActionSink::new();

        sweeper()
            .run(
                &[record(1, "auth", 1)],
                &policies,
                &sink,
                &metrics,
                &SweepOptions::live(now()),
            )
            .await;

        assert_eq!(metrics.counter("retention.records_processed"), 1);
        assert_eq!(metrics.counter("retention.records_archived"), 1);
    }

    #[tokio::test]
    async fn run_from_source_pages_until_exhausted() {
        let policies =
            PolicySnapshot::load(vec![purge_policy("auth", 0, RetentionAction::Delete)]).unwrap();
        let source = MockRecordSource::new(
            (1..=25).map(|id| record(id, "auth", 1)).collect(),
        );
        let sink = MockActionSink::new();

        let report = sweeper()
            .run_from_source(
                &source,
                &RecordFilter::default(),
                10,
                &policies,
                &sink,
                &NullMetrics,
                &SweepOptions::live(now()),
            )
            .await;

        assert_eq!(report.processed, 25);
        assert_eq!(report.deleted, 25);
        assert_eq!(sink.applied().len(), 25);
    }
}
