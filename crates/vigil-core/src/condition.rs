//! Condition expression language shared by the retention and alerting engines.
//!
//! A condition is a `{field, operator, value}` triple; a rule's conditions are
//! AND-ed. Evaluation fails closed: an unknown field or an operator applied to
//! an incompatible value makes the condition false and logs a diagnostic,
//! never silently true.

use chrono::Timelike;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::record::ActivityRecord;

/// Errors raised when loading or validating conditions.
///
/// These are configuration errors: they indicate a malformed rule or policy,
/// not a data-quality finding, and are surfaced at load time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConditionError {
    /// The operator token is not part of the supported set.
    #[error("unknown condition operator: {0:?}")]
    UnknownOperator(String),

    /// The condition references a field the record model does not have.
    #[error("condition references unknown field: {0:?}")]
    UnknownField(String),

    /// A numeric operator was applied to a non-numeric field.
    #[error("operator {operator} requires a numeric field, got {field:?}")]
    NonNumericField {
        /// Offending operator.
        operator: ConditionOperator,
        /// Field the condition referenced.
        field: String,
    },

    /// The condition value has the wrong shape for its operator.
    #[error("operator {operator} cannot use value {value}")]
    InvalidValue {
        /// Offending operator.
        operator: ConditionOperator,
        /// The rejected value.
        value: serde_json::Value,
    },
}

/// Comparison operators supported by the condition language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOperator {
    /// Exact equality after coercion to the field's type.
    #[serde(rename = "=")]
    Eq,
    /// Negated equality.
    #[serde(rename = "!=")]
    NotEq,
    /// Numeric greater-than.
    #[serde(rename = ">")]
    Gt,
    /// Numeric greater-or-equal.
    #[serde(rename = ">=")]
    Gte,
    /// Numeric less-than.
    #[serde(rename = "<")]
    Lt,
    /// Numeric less-or-equal.
    #[serde(rename = "<=")]
    Lte,
    /// Case-insensitive substring, with one optional leading or trailing `%`.
    #[serde(rename = "like")]
    Like,
    /// Case-insensitive substring absence.
    #[serde(rename = "not_contains")]
    NotContains,
    /// Set membership.
    #[serde(rename = "in")]
    In,
    /// Record hour-of-day (reference timezone) falls in a set of hours.
    #[serde(rename = "time_range")]
    TimeRange,
}

impl ConditionOperator {
    /// Parses an operator token, rejecting unknown operators at load time.
    pub fn parse(token: &str) -> Result<Self, ConditionError> {
        match token {
            "=" | "eq" => Ok(Self::Eq),
            "!=" | "not_eq" => Ok(Self::NotEq),
            ">" | "gt" => Ok(Self::Gt),
            ">=" | "gte" => Ok(Self::Gte),
            "<" | "lt" => Ok(Self::Lt),
            "<=" | "lte" => Ok(Self::Lte),
            "like" => Ok(Self::Like),
            "not_contains" => Ok(Self::NotContains),
            "in" => Ok(Self::In),
            "time_range" => Ok(Self::TimeRange),
            other => Err(ConditionError::UnknownOperator(other.to_string())),
        }
    }

    /// Whether this operator only makes sense on numeric fields.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Gt | Self::Gte | Self::Lt | Self::Lte)
    }
}

impl std::fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token = match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Like => "like",
            Self::NotContains => "not_contains",
            Self::In => "in",
            Self::TimeRange => "time_range",
        };
        f.write_str(token)
    }
}

/// A single field/operator/value triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Record field the condition reads.
    pub field: String,
    /// Comparison operator.
    pub operator: ConditionOperator,
    /// Value to compare against.
    pub value: serde_json::Value,
}

impl Condition {
    /// Creates a condition.
    pub fn new(
        field: impl Into<String>,
        operator: ConditionOperator,
        value: serde_json::Value,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Validates the condition against the record model.
    ///
    /// Catches unknown fields, numeric operators on non-numeric fields, and
    /// value shapes the operator cannot use. `properties.*` fields are
    /// dynamically typed and only checked for value shape.
    pub fn validate(&self) -> Result<(), ConditionError> {
        if !ActivityRecord::is_known_field(&self.field) {
            return Err(ConditionError::UnknownField(self.field.clone()));
        }

        if self.operator.is_numeric()
            && !self.field.starts_with("properties.")
            && !matches!(
                self.field.as_str(),
                "id" | "user_id" | "subject_id" | "risk_level" | "created_at"
            )
        {
            return Err(ConditionError::NonNumericField {
                operator: self.operator,
                field: self.field.clone(),
            });
        }

        match self.operator {
            ConditionOperator::In => {
                if !self.value.is_array() {
                    return Err(ConditionError::InvalidValue {
                        operator: self.operator,
                        value: self.value.clone(),
                    });
                }
            }
            ConditionOperator::TimeRange => {
                if hour_set(&self.value).is_none() {
                    return Err(ConditionError::InvalidValue {
                        operator: self.operator,
                        value: self.value.clone(),
                    });
                }
            }
            ConditionOperator::Like | ConditionOperator::NotContains => {
                if !self.value.is_string() {
                    return Err(ConditionError::InvalidValue {
                        operator: self.operator,
                        value: self.value.clone(),
                    });
                }
            }
            _ => {}
        }

        Ok(())
    }
}

/// Evaluation context for condition matching.
#[derive(Debug, Clone)]
pub struct ConditionContext {
    /// Reference timezone for `time_range` hour-of-day checks.
    pub timezone: Tz,
}

impl Default for ConditionContext {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::UTC,
        }
    }
}

/// Checks whether a record satisfies all conditions (logical AND).
///
/// An empty condition list matches everything.
pub fn matches(record: &ActivityRecord, conditions: &[Condition], ctx: &ConditionContext) -> bool {
    conditions.iter().all(|c| matches_one(record, c, ctx))
}

/// Evaluates a single condition against a record, failing closed.
pub fn matches_one(record: &ActivityRecord, condition: &Condition, ctx: &ConditionContext) -> bool {
    if condition.operator == ConditionOperator::TimeRange {
        return match hour_set(&condition.value) {
            Some(hours) => {
                let hour = record.created_at.with_timezone(&ctx.timezone).hour() as u8;
                hours.contains(&hour)
            }
            None => {
                warn!(
                    field = %condition.field,
                    value = %condition.value,
                    "time_range condition has malformed hour set, treating as no match"
                );
                false
            }
        };
    }

    let field_value = match record.field(&condition.field) {
        Some(v) => v,
        None => {
            warn!(
                field = %condition.field,
                "condition references unknown field, treating as no match"
            );
            return false;
        }
    };

    match condition.operator {
        ConditionOperator::Eq => coerced_eq(&field_value, &condition.value),
        ConditionOperator::NotEq => !coerced_eq(&field_value, &condition.value),
        ConditionOperator::Gt => compare_numeric(&field_value, &condition.value, |a, b| a > b),
        ConditionOperator::Gte => compare_numeric(&field_value, &condition.value, |a, b| a >= b),
        ConditionOperator::Lt => compare_numeric(&field_value, &condition.value, |a, b| a < b),
        ConditionOperator::Lte => compare_numeric(&field_value, &condition.value, |a, b| a <= b),
        ConditionOperator::Like => like_match(&field_value, &condition.value),
        ConditionOperator::NotContains => match (field_value.as_str(), condition.value.as_str()) {
            (Some(haystack), Some(needle)) => {
                !haystack.to_lowercase().contains(&needle.to_lowercase())
            }
            _ => false,
        },
        ConditionOperator::In => match condition.value.as_array() {
            Some(set) => set.iter().any(|v| coerced_eq(&field_value, v)),
            None => {
                warn!(
                    field = %condition.field,
                    "in condition value is not an array, treating as no match"
                );
                false
            }
        },
        ConditionOperator::TimeRange => unreachable!("handled above"),
    }
}

/// Equality after coercion: numbers compare numerically even when one side is
/// a numeric string; null only equals null; everything else compares exactly.
fn coerced_eq(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    if a.is_null() || b.is_null() {
        return a.is_null() && b.is_null();
    }
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x == y;
    }
    match (a.as_str(), b.as_str()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Numeric coercion: JSON numbers pass through, numeric strings parse.
fn as_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Compares two values as numbers; non-numeric operands fail closed.
fn compare_numeric(a: &serde_json::Value, b: &serde_json::Value, cmp: fn(f64, f64) -> bool) -> bool {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => cmp(x, y),
        _ => {
            warn!("numeric comparison on non-numeric operand, treating as no match");
            false
        }
    }
}

/// Case-insensitive `like`: one leading or trailing `%` anchors the test;
/// a pattern with neither (or both) degrades to a substring check.
fn like_match(field: &serde_json::Value, pattern: &serde_json::Value) -> bool {
    let (Some(haystack), Some(pattern)) = (field.as_str(), pattern.as_str()) else {
        return false;
    };
    let haystack = haystack.to_lowercase();
    let pattern = pattern.to_lowercase();

    match (pattern.strip_prefix('%'), pattern.strip_suffix('%')) {
        (Some(rest), None) => haystack.ends_with(rest),
        (None, Some(rest)) => haystack.starts_with(rest),
        _ => haystack.contains(pattern.trim_matches('%')),
    }
}

/// Extracts the hour set from a `time_range` value.
///
/// Accepts an explicit array of hours (`[22, 23, 0, 1]`) or a
/// `{"start": 22, "end": 6}` window, which expands with wraparound —
/// `start == end` means the full day.
pub fn hour_set(value: &serde_json::Value) -> Option<Vec<u8>> {
    if let Some(array) = value.as_array() {
        let mut hours = Vec::with_capacity(array.len());
        for entry in array {
            let hour = entry.as_u64()?;
            if hour > 23 {
                return None;
            }
            hours.push(hour as u8);
        }
        return Some(hours);
    }

    let object = value.as_object()?;
    let start = object.get("start")?.as_u64()?;
    let end = object.get("end")?.as_u64()?;
    if start > 23 || end > 23 {
        return None;
    }
    let (start, end) = (start as u8, end as u8);

    let mut hours = Vec::new();
    let mut hour = start;
    loop {
        hours.push(hour);
        hour = (hour + 1) % 24;
        if hour == end {
            break;
        }
        if hour == start {
            break;
        }
    }
    Some(hours)
}
