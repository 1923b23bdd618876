//! Rule matching and alert candidate rendering.
//!
//! Unlike retention, alerting has no single winner: every active rule whose
//! conditions match produces its own candidate. Rule conditions use the
//! shared condition language, with four fields carrying alerting-specific
//! semantics: `activity_types`, `min_risk_level`, `ip_patterns`, and
//! `time_range`.

use glob::Pattern;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use vigil_core::condition::{self, Condition, ConditionContext, ConditionOperator};
use vigil_core::rule::ALERT_VOCABULARY;
use vigil_core::{
    ActivityRecord, AlertSeverity, ChannelConfig, EngineConfig, NotificationRule, RecipientSelector,
    RuleSnapshot,
};

/// A rendered alert candidate, ready for deduplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertCandidate {
    /// Rule that produced the candidate.
    pub rule_id: Uuid,
    /// Rule name, carried for reporting.
    pub rule_name: String,
    /// Record that triggered the rule.
    pub record_id: i64,
    /// Deduplication key over the rule's merge dimensions.
    pub merge_key: String,
    /// Rendered title.
    pub title: String,
    /// Rendered message body.
    pub message: String,
    /// Severity label from the rule.
    pub severity: AlertSeverity,
    /// Delivery channels, in dispatch order.
    pub channels: Vec<ChannelConfig>,
    /// Unexpanded recipient selectors.
    pub recipients: Vec<RecipientSelector>,
}

/// Matches records against notification rules and renders candidates.
pub struct AlertEvaluator {
    ctx: ConditionContext,
}

impl AlertEvaluator {
    /// Creates an evaluator using the engine's reference timezone.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            ctx: ConditionContext {
                timezone: config.reference_timezone,
            },
        }
    }

    /// Returns one candidate per active rule the record matches.
    pub fn evaluate(&self, record: &ActivityRecord, rules: &RuleSnapshot) -> Vec<AlertCandidate> {
        let mut candidates = Vec::new();
        for rule in rules.active() {
            if !self.rule_matches(rule, record) {
                continue;
            }
            debug!(rule = %rule.name, record_id = record.id, "alert rule matched");
            candidates.push(AlertCandidate {
                rule_id: rule.id,
                rule_name: rule.name.clone(),
                record_id: record.id,
                merge_key: merge_key(rule, record),
                title: render_template(&rule.title_template, record),
                message: render_template(&rule.message_template, record),
                severity: rule.severity,
                channels: rule.dispatch_channels.clone(),
                recipients: rule.recipients.clone(),
            });
        }
        candidates
    }

    /// Whether a record satisfies all of a rule's conditions.
    pub fn rule_matches(&self, rule: &NotificationRule, record: &ActivityRecord) -> bool {
        rule.conditions
            .iter()
            .all(|c| self.condition_matches(c, record))
    }

    fn condition_matches(&self, cond: &Condition, record: &ActivityRecord) -> bool {
        if !ALERT_VOCABULARY.contains(&cond.field.as_str()) {
            return condition::matches_one(record, cond, &self.ctx);
        }

        match cond.field.as_str() {
            // Exact set membership: "login_failed" never matches a rule that
            // only lists "login".
            "activity_types" => {
                let lowered = Condition::new("type", ConditionOperator::In, cond.value.clone());
                condition::matches_one(record, &lowered, &self.ctx)
            }
            "min_risk_level" => {
                let lowered =
                    Condition::new("risk_level", ConditionOperator::Gte, cond.value.clone());
                condition::matches_one(record, &lowered, &self.ctx)
            }
            "time_range" => {
                let lowered =
                    Condition::new("created_at", ConditionOperator::TimeRange, cond.value.clone());
                condition::matches_one(record, &lowered, &self.ctx)
            }
            "ip_patterns" => self.ip_matches(cond, record),
            _ => unreachable!("vocabulary list covers all arms"),
        }
    }

    /// Glob match of the record's IP against any listed pattern.
    ///
    /// A record without an IP cannot match; an invalid pattern logs a
    /// diagnostic and counts as no match.
    fn ip_matches(&self, cond: &Condition, record: &ActivityRecord) -> bool {
        let Some(ip) = record.ip_address.as_deref() else {
            return false;
        };
        let Some(patterns) = cond.value.as_array() else {
            warn!("ip_patterns value is not an array, treating as no match");
            return false;
        };
        patterns.iter().any(|p| match p.as_str() {
            Some(raw) => match Pattern::new(raw) {
                Ok(pattern) => pattern.matches(ip),
                Err(e) => {
                    warn!(pattern = raw, error = %e, "invalid ip glob pattern, treating as no match");
                    false
                }
            },
            None => false,
        })
    }
}

/// Substitutes `{field}` placeholders with record values.
///
/// Any field the record model resolves is available, including
/// `{properties.x.y}` paths. Unknown placeholders render as the empty
/// string; braces that do not form a placeholder pass through untouched.
pub fn render_template(template: &str, record: &ActivityRecord) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                if !name.is_empty()
                    && name
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
                {
                    out.push_str(&record.field_display(name));
                } else {
                    // Not a placeholder; keep the literal text.
                    out.push('{');
                    out.push_str(name);
                    out.push('}');
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Stable deduplication key over the rule's merge dimensions.
///
/// Hashes the rule id plus each dimension name and the record's display
/// value for it, so records that are "similar" under the rule collapse to
/// the same key and different rules never share keys.
pub fn merge_key(rule: &NotificationRule, record: &ActivityRecord) -> String {
    let mut hasher = Sha256::new();
    hasher.update(rule.id.as_bytes());
    for dimension in rule.merge_dimensions() {
        hasher.update(dimension.as_bytes());
        hasher.update([0u8]);
        hasher.update(record.field_display(dimension).as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use serde_json::json;
    use vigil_core::rule::vocabulary_condition;

    fn record() -> ActivityRecord {
        let mut properties = serde_json::Map::new();
        properties.insert("attempts".to_string(), json!(4));
        ActivityRecord {
            id: 10,
            activity_type: "login_failed".to_string(),
            module: "auth".to_string(),
            description: "Failed login".to_string(),
            user_id: Some(7),
            subject: None,
            ip_address: Some("10.0.3.7".to_string()),
            user_agent: None,
            properties,
            risk_level: 6,
            // 2023-11-14 22:13:20 UTC
            created_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            signature: None,
        }
    }

    fn rule(name: &str, conditions: Vec<Condition>) -> NotificationRule {
        NotificationRule {
            id: Uuid::new_v4(),
            name: name.to_string(),
            conditions,
            recipients: vec![RecipientSelector::AllAdministrators],
            title_template: "Alert: {type}".to_string(),
            message_template: "{description} from {ip_address}".to_string(),
            merge_similar: true,
            merge_window_seconds: 300,
            merge_fields: vec![],
            dispatch_channels: vec![ChannelConfig::Email { template: None }],
            severity: AlertSeverity::High,
            is_active: true,
        }
    }

    fn evaluator() -> AlertEvaluator {
        AlertEvaluator::new(&EngineConfig::default())
    }

    #[test]
    fn all_matching_rules_produce_candidates() {
        let rules = RuleSnapshot::load(vec![
            rule("security", vec![vocabulary_condition("min_risk_level", json!(5))]),
            rule("audit-all", vec![]),
            rule(
                "unrelated",
                vec![vocabulary_condition("activity_types", json!(["export"]))],
            ),
        ])
        .unwrap();

        let candidates = evaluator().evaluate(&record(), &rules);
        let names: Vec<&str> = candidates.iter().map(|c| c.rule_name.as_str()).collect();
        assert_eq!(names, vec!["security", "audit-all"]);
    }

    #[test]
    fn activity_types_use_exact_set_semantics() {
        // "login_failed" must not match a rule listing only "login".
        let rules = RuleSnapshot::load(vec![rule(
            "logins",
            vec![
                vocabulary_condition("activity_types", json!(["login"])),
                vocabulary_condition("min_risk_level", json!(5)),
            ],
        )])
        .unwrap();
        assert!(evaluator().evaluate(&record(), &rules).is_empty());

        let rules = RuleSnapshot::load(vec![rule(
            "failed-logins",
            vec![vocabulary_condition(
                "activity_types",
                json!(["login", "login_failed"]),
            )],
        )])
        .unwrap();
        assert_eq!(evaluator().evaluate(&record(), &rules).len(), 1);
    }

    #[test]
    fn min_risk_level_is_a_threshold() {
        let e = evaluator();
        let low = rule("low", vec![vocabulary_condition("min_risk_level", json!(6))]);
        assert!(e.rule_matches(&low, &record()));

        let high = rule("high", vec![vocabulary_condition("min_risk_level", json!(7))]);
        assert!(!e.rule_matches(&high, &record()));
    }

    #[test]
    fn ip_patterns_glob_match() {
        let e = evaluator();
        let inside = rule(
            "internal",
            vec![vocabulary_condition("ip_patterns", json!(["10.0.*", "192.168.*"]))],
        );
        assert!(e.rule_matches(&inside, &record()));

        let outside = rule(
            "external",
            vec![vocabulary_condition("ip_patterns", json!(["172.16.*"]))],
        );
        assert!(!e.rule_matches(&outside, &record()));
    }

    #[test]
    fn ip_patterns_without_record_ip_never_match() {
        let e = evaluator();
        let r = rule(
            "internal",
            vec![vocabulary_condition("ip_patterns", json!(["*"]))],
        );
        let mut rec = record();
        rec.ip_address = None;
        assert!(!e.rule_matches(&r, &rec));
    }

    #[test]
    fn time_range_gates_by_hour() {
        let e = evaluator();
        let night = rule(
            "night",
            vec![vocabulary_condition("time_range", json!({"start": 22, "end": 6}))],
        );
        assert!(e.rule_matches(&night, &record()));

        let office = rule(
            "office",
            vec![vocabulary_condition("time_range", json!({"start": 9, "end": 17}))],
        );
        assert!(!e.rule_matches(&office, &record()));
    }

    #[test]
    fn generic_conditions_pass_through_to_the_shared_matcher() {
        let e = evaluator();
        let r = rule(
            "auth-only",
            vec![Condition::new("module", ConditionOperator::Eq, json!("auth"))],
        );
        assert!(e.rule_matches(&r, &record()));
    }

    #[test]
    fn inactive_rules_never_match() {
        let mut r = rule("off", vec![]);
        r.is_active = false;
        let rules = RuleSnapshot::load(vec![r]).unwrap();
        assert!(evaluator().evaluate(&record(), &rules).is_empty());
    }

    // ==========================================================================
    // Templates
    // ==========================================================================

    #[test]
    fn templates_substitute_record_fields() {
        let rec = record();
        assert_eq!(
            render_template("Alert: {type} via {module}", &rec),
            "Alert: login_failed via auth"
        );
        assert_eq!(
            render_template("{description} from {ip_address}", &rec),
            "Failed login from 10.0.3.7"
        );
    }

    #[test]
    fn templates_reach_into_properties() {
        assert_eq!(
            render_template("{properties.attempts} attempts", &record()),
            "4 attempts"
        );
    }

    #[test]
    fn unknown_placeholders_render_empty() {
        assert_eq!(render_template("[{nonexistent}]", &record()), "[]");
    }

    #[test]
    fn null_fields_render_empty() {
        let mut rec = record();
        rec.user_agent = None;
        assert_eq!(render_template("ua={user_agent}.", &rec), "ua=.");
    }

    #[test]
    fn non_placeholder_braces_pass_through() {
        assert_eq!(render_template("a {not valid} b", &record()), "a {not valid} b");
        assert_eq!(render_template("trailing {", &record()), "trailing {");
        assert_eq!(render_template("{}", &record()), "{}");
    }

    // ==========================================================================
    // Merge keys
    // ==========================================================================

    #[test]
    fn merge_key_is_stable_for_same_user_and_ip() {
        let r = rule("r", vec![]);
        let a = record();
        let mut b = record();
        b.id = 11;
        b.description = "Another failure".to_string();
        assert_eq!(merge_key(&r, &a), merge_key(&r, &b));
    }

    #[test]
    fn merge_key_differs_across_users_and_rules() {
        let r = rule("r", vec![]);
        let a = record();
        let mut other_user = record();
        other_user.user_id = Some(8);
        assert_ne!(merge_key(&r, &a), merge_key(&r, &other_user));

        let r2 = rule("r2", vec![]);
        assert_ne!(merge_key(&r, &a), merge_key(&r2, &a));
    }

    #[test]
    fn merge_key_honors_rule_override() {
        let mut r = rule("by-module", vec![]);
        r.merge_fields = vec!["module".to_string()];

        let a = record();
        let mut other_user = record();
        other_user.user_id = Some(99);
        // Same module, different user: still the same group.
        assert_eq!(merge_key(&r, &a), merge_key(&r, &other_user));
    }
}
