//! Activity record data model.
//!
//! An [`ActivityRecord`] is an already-persisted audit log row, modeled as a
//! value object. Once a record carries a signature it is immutable; any
//! observed field change afterwards is a tamper event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Polymorphic reference to the entity an activity acted on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectRef {
    /// Entity type, e.g. `"user"` or `"report"`.
    pub subject_type: String,
    /// Entity identifier within that type.
    pub subject_id: i64,
}

/// A single activity/audit log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Unique, monotonically increasing identifier within the store.
    pub id: i64,
    /// Activity type, e.g. `"login"` or `"delete_user"`.
    #[serde(rename = "type")]
    pub activity_type: String,
    /// Originating module, e.g. `"auth"` or `"users"`.
    pub module: String,
    /// Free-text description of what happened.
    pub description: String,
    /// Acting user, if the activity is attributable.
    pub user_id: Option<i64>,
    /// Entity the activity acted on, if any.
    pub subject: Option<SubjectRef>,
    /// Source IP address, when known.
    pub ip_address: Option<String>,
    /// Client user agent, when known.
    pub user_agent: Option<String>,
    /// Structured context captured with the activity. May nest.
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    /// Risk score in `0..=10`.
    pub risk_level: u8,
    /// Creation time, UTC, second precision.
    pub created_at: DateTime<Utc>,
    /// Hex-encoded integrity signature, present once sealed.
    #[serde(default)]
    pub signature: Option<String>,
}

impl ActivityRecord {
    /// Whether this record has been sealed.
    pub fn is_sealed(&self) -> bool {
        self.signature.is_some()
    }

    /// Resolves a named field to its JSON value.
    ///
    /// Understands the fixed record fields plus `properties.<dotted.path>`
    /// lookups into the properties map. Returns `None` for unknown field
    /// names; a known field holding null resolves to `Value::Null`.
    pub fn field(&self, name: &str) -> Option<serde_json::Value> {
        use serde_json::Value;

        if let Some(path) = name.strip_prefix("properties.") {
            let mut parts = path.split('.');
            let mut current = self.properties.get(parts.next()?)?;
            for part in parts {
                current = current.as_object()?.get(part)?;
            }
            return Some(current.clone());
        }

        let value = match name {
            "id" => Value::from(self.id),
            "type" => Value::from(self.activity_type.clone()),
            "module" => Value::from(self.module.clone()),
            "description" => Value::from(self.description.clone()),
            "user_id" => self.user_id.map(Value::from).unwrap_or(Value::Null),
            "subject_type" => self
                .subject
                .as_ref()
                .map(|s| Value::from(s.subject_type.clone()))
                .unwrap_or(Value::Null),
            "subject_id" => self
                .subject
                .as_ref()
                .map(|s| Value::from(s.subject_id))
                .unwrap_or(Value::Null),
            "ip_address" => self
                .ip_address
                .clone()
                .map(Value::from)
                .unwrap_or(Value::Null),
            "user_agent" => self
                .user_agent
                .clone()
                .map(Value::from)
                .unwrap_or(Value::Null),
            "risk_level" => Value::from(self.risk_level),
            "created_at" => Value::from(self.created_at.timestamp()),
            _ => return None,
        };
        Some(value)
    }

    /// Whether `name` refers to a field this record model understands.
    pub fn is_known_field(name: &str) -> bool {
        matches!(
            name,
            "id" | "type"
                | "module"
                | "description"
                | "user_id"
                | "subject_type"
                | "subject_id"
                | "ip_address"
                | "user_agent"
                | "risk_level"
                | "created_at"
        ) || name.starts_with("properties.")
    }

    /// Renders a field as a display string for templates and merge keys.
    ///
    /// Null and unknown fields render as the empty string.
    pub fn field_display(&self, name: &str) -> String {
        match self.field(name) {
            Some(serde_json::Value::String(s)) => s,
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_record() -> ActivityRecord {
        let mut properties = serde_json::Map::new();
        properties.insert("browser".to_string(), json!("firefox"));
        properties.insert("attempt".to_string(), json!({"count": 3}));

        ActivityRecord {
            id: 42,
            activity_type: "login_failed".to_string(),
            module: "auth".to_string(),
            description: "Failed login attempt".to_string(),
            user_id: Some(7),
            subject: Some(SubjectRef {
                subject_type: "user".to_string(),
                subject_id: 7,
            }),
            ip_address: Some("10.0.0.5".to_string()),
            user_agent: Some("curl/8.0".to_string()),
            properties,
            risk_level: 6,
            created_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            signature: None,
        }
    }

    #[test]
    fn resolves_fixed_fields() {
        let record = sample_record();
        assert_eq!(record.field("type"), Some(json!("login_failed")));
        assert_eq!(record.field("module"), Some(json!("auth")));
        assert_eq!(record.field("user_id"), Some(json!(7)));
        assert_eq!(record.field("risk_level"), Some(json!(6)));
        assert_eq!(record.field("subject_type"), Some(json!("user")));
    }

    #[test]
    fn null_fields_resolve_to_null() {
        let mut record = sample_record();
        record.user_id = None;
        record.subject = None;
        assert_eq!(record.field("user_id"), Some(serde_json::Value::Null));
        assert_eq!(record.field("subject_id"), Some(serde_json::Value::Null));
    }

    #[test]
    fn unknown_field_resolves_to_none() {
        let record = sample_record();
        assert_eq!(record.field("no_such_field"), None);
        assert!(!ActivityRecord::is_known_field("no_such_field"));
    }

    #[test]
    fn resolves_nested_properties() {
        let record = sample_record();
        assert_eq!(record.field("properties.browser"), Some(json!("firefox")));
        assert_eq!(record.field("properties.attempt.count"), Some(json!(3)));
        assert_eq!(record.field("properties.attempt.missing"), None);
    }

    #[test]
    fn created_at_resolves_to_epoch_seconds() {
        let record = sample_record();
        assert_eq!(record.field("created_at"), Some(json!(1_700_000_000)));
    }

    #[test]
    fn field_display_renders_strings_bare() {
        let record = sample_record();
        assert_eq!(record.field_display("module"), "auth");
        assert_eq!(record.field_display("risk_level"), "6");
        assert_eq!(record.field_display("nonexistent"), "");
    }

    #[test]
    fn serde_round_trip_uses_type_key() {
        let record = sample_record();
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"type\":\"login_failed\""));
        let back: ActivityRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
