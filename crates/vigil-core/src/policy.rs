//! Retention policy model and read-only policy snapshots.

use serde::{Deserialize, Serialize};

use crate::condition::{Condition, ConditionError};

/// What happens to a record once its retention threshold is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionAction {
    /// Move the record to cold storage.
    Archive,
    /// Hard-delete the record.
    Delete,
}

impl std::fmt::Display for RetentionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Archive => f.write_str("archive"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

/// A retention policy: decides when and how aged records leave the hot store.
///
/// Policies are configuration — the engine never mutates them. `activity_type`
/// and `module` are optional scope filters; `None` means "any".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Unique policy name.
    pub name: String,
    /// Activity type scope, `None` for any type.
    pub activity_type: Option<String>,
    /// Module scope, `None` for any module.
    pub module: Option<String>,
    /// Minimum record age in days before the action applies.
    pub retention_days: u32,
    /// Action taken once the age threshold is met.
    pub action: RetentionAction,
    /// Higher priority wins when several policies match.
    pub priority: i32,
    /// Additional conditions, all of which must hold.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Inactive policies are skipped entirely.
    pub is_active: bool,
}

impl RetentionPolicy {
    /// Whether the policy's type/module scope admits the given record fields.
    pub fn in_scope(&self, activity_type: &str, module: &str) -> bool {
        self.activity_type
            .as_deref()
            .map(|t| t == activity_type)
            .unwrap_or(true)
            && self.module.as_deref().map(|m| m == module).unwrap_or(true)
    }

    /// Scope specificity: both filters set beats one beats none.
    pub fn specificity(&self) -> u8 {
        self.activity_type.is_some() as u8 + self.module.is_some() as u8
    }
}

/// An immutable, validated set of retention policies.
///
/// Snapshots are loaded at an explicit reload boundary so a sweep sees one
/// consistent policy set throughout its run.
#[derive(Debug, Clone, Default)]
pub struct PolicySnapshot {
    policies: Vec<RetentionPolicy>,
}

impl PolicySnapshot {
    /// Validates and wraps a policy set.
    ///
    /// Rejects the whole snapshot if any policy carries a malformed
    /// condition, so configuration errors surface at load time rather than
    /// mid-sweep.
    pub fn load(policies: Vec<RetentionPolicy>) -> Result<Self, ConditionError> {
        for policy in &policies {
            for condition in &policy.conditions {
                condition.validate()?;
            }
        }
        Ok(Self { policies })
    }

    /// All policies, active or not.
    pub fn all(&self) -> &[RetentionPolicy] {
        &self.policies
    }

    /// Active policies only.
    pub fn active(&self) -> impl Iterator<Item = &RetentionPolicy> {
        self.policies.iter().filter(|p| p.is_active)
    }

    /// Number of policies in the snapshot.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
