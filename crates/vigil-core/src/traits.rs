//! Collaborator traits the engine is driven through.
//!
//! The engine never owns persistence, delivery transports, or key storage;
//! those arrive as injected implementations of the traits below. Mocks for
//! all of them live in [`crate::mocks`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::policy::RetentionAction;
use crate::record::ActivityRecord;
use crate::rule::Recipient;

/// Failure from an external collaborator.
#[derive(Error, Debug, Clone)]
pub enum CollaboratorError {
    /// Transient I/O failure; the caller may retry per its own policy.
    #[error("transient i/o failure: {0}")]
    Transient(String),

    /// Permanent failure; retrying will not help.
    #[error("permanent failure: {0}")]
    Permanent(String),
}

/// Filter for pulling record batches from the store.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Restrict to one activity type.
    pub activity_type: Option<String>,
    /// Restrict to one module.
    pub module: Option<String>,
    /// Only records created strictly before this instant.
    pub created_before: Option<DateTime<Utc>>,
    /// Only records created at or after this instant.
    pub created_after: Option<DateTime<Utc>>,
}

/// Pull interface over the backing record store.
///
/// The engine only reads records; it never writes them.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetches one page of records matching the filter.
    async fn fetch_batch(
        &self,
        filter: &RecordFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ActivityRecord>, CollaboratorError>;
}

/// Applies retention outcomes to the backing store.
#[async_trait]
pub trait ActionSink: Send + Sync {
    /// Archives or deletes a single record.
    async fn apply(&self, record_id: i64, action: RetentionAction)
        -> Result<(), CollaboratorError>;
}

/// Resolves recipient selectors to concrete recipients.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// All administrators, for the `all_administrators` selector.
    async fn administrators(&self) -> Result<Vec<Recipient>, CollaboratorError>;
}

/// Supplies the MAC secret key.
///
/// The key is read once at engine construction; rotation happens through an
/// explicit reload boundary, never a hot in-place swap.
pub trait SecretsProvider: Send + Sync {
    /// The current MAC key, or `None` when no key is provisioned.
    fn mac_key(&self) -> Option<Vec<u8>>;
}
