//! Notification rule model: who gets told about what, and how duplicates
//! collapse.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::condition::{Condition, ConditionError, ConditionOperator};

/// Human-facing severity label for an alert rule (0–4).
///
/// Severity only affects presentation; it never changes matching or
/// deduplication behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    /// Numeric level, 0 (info) through 4 (critical).
    pub fn level(&self) -> u8 {
        match self {
            Self::Info => 0,
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }

    /// Builds a severity from its numeric level, saturating at critical.
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => Self::Info,
            1 => Self::Low,
            2 => Self::Medium,
            3 => Self::High,
            _ => Self::Critical,
        }
    }
}

/// Selects who receives an alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecipientSelector {
    /// Every administrator known to the recipient directory.
    AllAdministrators,
    /// A specific user id.
    User { id: i64 },
    /// An explicit address outside the user store.
    Email { address: String },
}

/// A concrete, resolved recipient.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Recipient {
    /// A user resolved from the directory.
    User { id: i64 },
    /// A bare address.
    Email { address: String },
}

/// Channel-specific delivery configuration, iterated in order on dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel_type", rename_all = "snake_case")]
pub enum ChannelConfig {
    /// Deliver via email.
    Email {
        #[serde(default)]
        template: Option<String>,
    },
    /// Deliver via SMS.
    Sms,
    /// Post to a webhook endpoint.
    Webhook {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl ChannelConfig {
    /// Stable channel-type token used in reports and logs.
    pub fn channel_type(&self) -> &'static str {
        match self {
            Self::Email { .. } => "email",
            Self::Sms => "sms",
            Self::Webhook { .. } => "webhook",
        }
    }
}

/// Default merge dimensions when a rule does not override them.
pub const DEFAULT_MERGE_FIELDS: [&str; 2] = ["user_id", "ip_address"];

/// A notification rule: matches activity and renders outbound alerts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRule {
    /// Stable rule identifier.
    pub id: Uuid,
    /// Unique rule name.
    pub name: String,
    /// Conditions, AND-ed. Alongside generic record conditions the alerting
    /// vocabulary recognizes `activity_types`, `min_risk_level`,
    /// `ip_patterns`, and `time_range`.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Recipient selectors, expanded at dispatch time.
    pub recipients: Vec<RecipientSelector>,
    /// Title template with `{field}` placeholders.
    pub title_template: String,
    /// Message template with `{field}` placeholders.
    pub message_template: String,
    /// Whether near-duplicate alerts merge within the window.
    pub merge_similar: bool,
    /// Merge window in seconds; elapsed time equal to the window starts a
    /// new alert.
    pub merge_window_seconds: u64,
    /// Fields whose values define "similar" for this rule. Empty means the
    /// default user+IP dimensions.
    #[serde(default)]
    pub merge_fields: Vec<String>,
    /// Delivery channels, tried in order.
    pub dispatch_channels: Vec<ChannelConfig>,
    /// Human-facing severity label.
    pub severity: AlertSeverity,
    /// Inactive rules never match.
    pub is_active: bool,
}

impl NotificationRule {
    /// The merge dimensions in effect for this rule.
    pub fn merge_dimensions(&self) -> Vec<&str> {
        if self.merge_fields.is_empty() {
            DEFAULT_MERGE_FIELDS.to_vec()
        } else {
            self.merge_fields.iter().map(String::as_str).collect()
        }
    }
}

/// Fields with alerting-specific semantics in rule conditions.
pub const ALERT_VOCABULARY: [&str; 4] =
    ["activity_types", "min_risk_level", "ip_patterns", "time_range"];

/// An immutable, validated set of notification rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSnapshot {
    rules: Vec<NotificationRule>,
}

impl RuleSnapshot {
    /// Validates and wraps a rule set.
    ///
    /// Generic conditions are validated against the record model; conditions
    /// using the alerting vocabulary are checked for the operator/value
    /// shapes that vocabulary supports.
    pub fn load(rules: Vec<NotificationRule>) -> Result<Self, ConditionError> {
        for rule in &rules {
            for condition in &rule.conditions {
                if ALERT_VOCABULARY.contains(&condition.field.as_str()) {
                    validate_vocabulary_condition(condition)?;
                } else {
                    condition.validate()?;
                }
            }
        }
        Ok(Self { rules })
    }

    /// All rules, active or not.
    pub fn all(&self) -> &[NotificationRule] {
        &self.rules
    }

    /// Active rules only.
    pub fn active(&self) -> impl Iterator<Item = &NotificationRule> {
        self.rules.iter().filter(|r| r.is_active)
    }

    /// Looks up a rule by id.
    pub fn by_id(&self, id: Uuid) -> Option<&NotificationRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Number of rules in the snapshot.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn validate_vocabulary_condition(condition: &Condition) -> Result<(), ConditionError> {
    let ok = match condition.field.as_str() {
        "activity_types" | "ip_patterns" => condition.value.is_array(),
        "min_risk_level" => condition.value.is_number(),
        "time_range" => crate::condition::hour_set(&condition.value).is_some(),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(ConditionError::InvalidValue {
            operator: condition.operator,
            value: condition.value.clone(),
        })
    }
}

/// Convenience constructor for vocabulary conditions, picking the natural
/// operator for each field.
pub fn vocabulary_condition(field: &str, value: serde_json::Value) -> Condition {
    let operator = match field {
        "activity_types" | "ip_patterns" => ConditionOperator::In,
        "min_risk_level" => ConditionOperator::Gte,
        "time_range" => ConditionOperator::TimeRange,
        _ => ConditionOperator::Eq,
    };
    Condition::new(field, operator, value)
}
