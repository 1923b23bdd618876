//! Single-winner retention policy selection.
//!
//! Every record is decided independently: filter active policies by scope,
//! keep those whose conditions match, pick the highest-priority winner, and
//! apply its action only once the record is old enough. No matching policy
//! means keep — unclassified data is never auto-deleted.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use vigil_core::condition::{self, ConditionContext};
use vigil_core::{ActivityRecord, PolicySnapshot, RetentionAction, RetentionPolicy};

/// Final classification of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecidedAction {
    /// Leave the record in the hot store.
    Keep,
    /// Move the record to cold storage.
    Archive,
    /// Hard-delete the record.
    Delete,
}

impl From<RetentionAction> for DecidedAction {
    fn from(action: RetentionAction) -> Self {
        match action {
            RetentionAction::Archive => Self::Archive,
            RetentionAction::Delete => Self::Delete,
        }
    }
}

impl DecidedAction {
    /// The store-side action to apply, if any.
    pub fn to_apply(self) -> Option<RetentionAction> {
        match self {
            Self::Keep => None,
            Self::Archive => Some(RetentionAction::Archive),
            Self::Delete => Some(RetentionAction::Delete),
        }
    }
}

/// Outcome of evaluating one record against a policy set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// What happens to the record.
    pub action: DecidedAction,
    /// Name of the winning policy; `None` when no policy matched.
    pub policy: Option<String>,
}

impl Decision {
    fn keep_unmatched() -> Self {
        Self {
            action: DecidedAction::Keep,
            policy: None,
        }
    }
}

/// Selects the single winning policy for a record, if any.
///
/// Ties on priority break toward the more specific scope (both
/// `activity_type` and `module` set beats one beats none), then toward the
/// lexicographically smallest name, so repeated evaluation is fully
/// deterministic.
pub fn select_policy<'a>(
    record: &ActivityRecord,
    policies: &'a PolicySnapshot,
    ctx: &ConditionContext,
) -> Option<&'a RetentionPolicy> {
    policies
        .active()
        .filter(|p| p.in_scope(&record.activity_type, &record.module))
        .filter(|p| condition::matches(record, &p.conditions, ctx))
        .max_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.specificity().cmp(&b.specificity()))
                .then_with(|| b.name.cmp(&a.name))
        })
}

/// Decides what happens to one record.
///
/// This is the only decision path: the sweep runner calls it for dry-run and
/// live mode alike, so previews cannot diverge from execution.
pub fn evaluate_record(
    record: &ActivityRecord,
    policies: &PolicySnapshot,
    now: DateTime<Utc>,
    ctx: &ConditionContext,
) -> Decision {
    let Some(winner) = select_policy(record, policies, ctx) else {
        return Decision::keep_unmatched();
    };

    let age = now - record.created_at;
    if age < Duration::days(i64::from(winner.retention_days)) {
        return Decision {
            action: DecidedAction::Keep,
            policy: Some(winner.name.clone()),
        };
    }

    Decision {
        action: winner.action.into(),
        policy: Some(winner.name.clone()),
    }
}
