//! Time-windowed alert deduplication.
//!
//! Candidates sharing a `(rule_id, merge_key)` group within the rule's merge
//! window collapse into one alert; only the first occurrence dispatches.
//! Submissions for the same key are serialized through a per-key lock so two
//! concurrent "firsts" can never both dispatch; different keys proceed in
//! parallel.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use vigil_core::{NotificationRule, RuleSnapshot};

use crate::evaluator::AlertCandidate;

/// A merged group of similar alerts. Engine-owned, mutable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertGroup {
    /// Rule the group belongs to.
    pub rule_id: Uuid,
    /// Merge key over the rule's merge dimensions.
    pub merge_key: String,
    /// When the group was opened.
    pub first_seen: DateTime<Utc>,
    /// Last time a candidate landed in the group.
    pub last_seen: DateTime<Utc>,
    /// Candidates absorbed so far, the dispatching first included.
    pub occurrence_count: u64,
    /// Record id of the candidate that opened the group.
    pub representative_record_id: i64,
}

/// What happened to a submitted candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitAction {
    /// New group (or expired window): the alert must go out.
    Dispatch,
    /// Absorbed into a live group: no outbound dispatch.
    Merged,
}

/// Result of submitting one candidate.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Dispatch or merged.
    pub action: SubmitAction,
    /// The group state after the submission.
    pub group: AlertGroup,
}

type GroupKey = (Uuid, String);

/// Deduplicates alert candidates by `(rule_id, merge_key)`.
#[derive(Debug, Default)]
pub struct AlertDeduplicator {
    groups: RwLock<HashMap<GroupKey, AlertGroup>>,
    key_locks: Mutex<HashMap<GroupKey, Arc<Mutex<()>>>>,
}

impl AlertDeduplicator {
    /// Creates an empty deduplicator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Submits a candidate, deciding between dispatch and merge.
    ///
    /// The merge comparison is against the stored group only: two candidates
    /// racing on the same key serialize on the key lock, and the loser merges
    /// into the winner's group. The window boundary is exclusive — elapsed
    /// time equal to `merge_window_seconds` starts a new group.
    pub async fn submit(
        &self,
        candidate: &AlertCandidate,
        rule: &NotificationRule,
        now: DateTime<Utc>,
    ) -> Submission {
        let key = (candidate.rule_id, candidate.merge_key.clone());
        let key_lock = self.key_lock(&key).await;
        let _guard = key_lock.lock().await;

        let window = Duration::seconds(rule.merge_window_seconds as i64);
        let mut groups = self.groups.write().await;

        if rule.merge_similar {
            if let Some(group) = groups.get_mut(&key) {
                if now - group.last_seen < window {
                    group.occurrence_count += 1;
                    group.last_seen = now;
                    debug!(
                        rule = %candidate.rule_name,
                        occurrences = group.occurrence_count,
                        "alert merged into existing group"
                    );
                    return Submission {
                        action: SubmitAction::Merged,
                        group: group.clone(),
                    };
                }
            }
        }

        let group = AlertGroup {
            rule_id: candidate.rule_id,
            merge_key: candidate.merge_key.clone(),
            first_seen: now,
            last_seen: now,
            occurrence_count: 1,
            representative_record_id: candidate.record_id,
        };
        groups.insert(key, group.clone());
        Submission {
            action: SubmitAction::Dispatch,
            group,
        }
    }

    /// Evicts groups whose window has fully elapsed.
    ///
    /// Eviction takes the same per-key lock as [`submit`](Self::submit), so
    /// a sweep can never race a concurrent submission for the same key.
    /// Groups whose rule is gone from the snapshot are evicted as well.
    /// Returns the number of groups removed.
    pub async fn evict_expired(&self, rules: &RuleSnapshot, now: DateTime<Utc>) -> usize {
        let keys: Vec<GroupKey> = {
            let groups = self.groups.read().await;
            groups.keys().cloned().collect()
        };

        let mut evicted = 0;
        for key in keys {
            let key_lock = self.key_lock(&key).await;
            let _guard = key_lock.lock().await;

            let mut groups = self.groups.write().await;
            let expired = match groups.get(&key) {
                Some(group) => match rules.by_id(group.rule_id) {
                    Some(rule) => {
                        now - group.last_seen
                            >= Duration::seconds(rule.merge_window_seconds as i64)
                    }
                    None => true,
                },
                None => false,
            };
            if expired && groups.remove(&key).is_some() {
                evicted += 1;
            }
        }

        if evicted > 0 {
            debug!(evicted, "expired alert groups evicted");
        }
        self.prune_locks().await;
        evicted
    }

    /// Current state of one group, if present.
    pub async fn group(&self, rule_id: Uuid, merge_key: &str) -> Option<AlertGroup> {
        let groups = self.groups.read().await;
        groups.get(&(rule_id, merge_key.to_string())).cloned()
    }

    /// Number of live groups.
    pub async fn len(&self) -> usize {
        self.groups.read().await.len()
    }

    /// Whether the group table is empty.
    pub async fn is_empty(&self) -> bool {
        self.groups.read().await.is_empty()
    }

    /// Exports all groups, e.g. for periodic snapshotting by the host.
    pub async fn export(&self) -> Vec<AlertGroup> {
        let groups = self.groups.read().await;
        let mut all: Vec<AlertGroup> = groups.values().cloned().collect();
        all.sort_by(|a, b| (a.rule_id, &a.merge_key).cmp(&(b.rule_id, &b.merge_key)));
        all
    }

    /// Replaces the group table with a previously exported snapshot.
    pub async fn import(&self, snapshot: Vec<AlertGroup>) {
        let mut groups = self.groups.write().await;
        groups.clear();
        for group in snapshot {
            groups.insert((group.rule_id, group.merge_key.clone()), group);
        }
    }

    /// Gets or creates the lock guarding one group key.
    async fn key_lock(&self, key: &GroupKey) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops locks for keys that no longer have a group.
    async fn prune_locks(&self) {
        let groups = self.groups.read().await;
        let mut locks = self.key_locks.lock().await;
        locks.retain(|key, lock| groups.contains_key(key) || Arc::strong_count(lock) > 1);
    }
}
