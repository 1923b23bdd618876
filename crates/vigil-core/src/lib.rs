//! # vigil-core
//!
//! Core data models and shared machinery for the Vigil audit engine.
//!
//! This crate provides the activity record model, the condition expression
//! language shared by the retention and alerting engines, the read-only
//! policy/rule snapshots, and the collaborator traits (record source, action
//! sink, recipient directory, secrets provider) the engine is driven through.

pub mod condition;
pub mod config;
pub mod mocks;
pub mod policy;
pub mod record;
pub mod rule;
pub mod traits;

pub use condition::{Condition, ConditionContext, ConditionError, ConditionOperator};
pub use config::EngineConfig;
pub use policy::{PolicySnapshot, RetentionAction, RetentionPolicy};
pub use record::{ActivityRecord, SubjectRef};
pub use rule::{
    AlertSeverity, ChannelConfig, NotificationRule, Recipient, RecipientSelector, RuleSnapshot,
};
pub use traits::{ActionSink, CollaboratorError, RecordFilter, RecordSource, RecipientDirectory, SecretsProvider};
