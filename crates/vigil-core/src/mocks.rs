//! In-memory mock collaborators for tests and development.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::policy::RetentionAction;
use crate::record::ActivityRecord;
use crate::rule::Recipient;
use crate::traits::{
    ActionSink, CollaboratorError, RecordFilter, RecordSource, RecipientDirectory, SecretsProvider,
};

/// Record source backed by a vector, paged in memory.
#[derive(Debug, Default)]
pub struct MockRecordSource {
    records: Vec<ActivityRecord>,
}

impl MockRecordSource {
    /// Creates a source over the given records.
    pub fn new(records: Vec<ActivityRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl RecordSource for MockRecordSource {
    async fn fetch_batch(
        &self,
        filter: &RecordFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ActivityRecord>, CollaboratorError> {
        let page = self
            .records
            .iter()
            .filter(|r| {
                filter
                    .activity_type
                    .as_deref()
                    .map(|t| r.activity_type == t)
                    .unwrap_or(true)
                    && filter.module.as_deref().map(|m| r.module == m).unwrap_or(true)
                    && filter
                        .created_before
                        .map(|t| r.created_at < t)
                        .unwrap_or(true)
                    && filter
                        .created_after
                        .map(|t| r.created_at >= t)
                        .unwrap_or(true)
            })
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        Ok(page)
    }
}

/// Action sink that records applied actions, optionally failing chosen ids.
#[derive(Debug, Default)]
pub struct MockActionSink {
    applied: Mutex<Vec<(i64, RetentionAction)>>,
    failing_ids: Mutex<Vec<i64>>,
}

impl MockActionSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `apply` fail with a transient error for the given record id.
    pub fn fail_for(&self, record_id: i64) {
        self.failing_ids.lock().unwrap().push(record_id);
    }

    /// All actions applied so far.
    pub fn applied(&self) -> Vec<(i64, RetentionAction)> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionSink for MockActionSink {
    async fn apply(
        &self,
        record_id: i64,
        action: RetentionAction,
    ) -> Result<(), CollaboratorError> {
        if self.failing_ids.lock().unwrap().contains(&record_id) {
            return Err(CollaboratorError::Transient(format!(
                "storage unavailable for record {record_id}"
            )));
        }
        self.applied.lock().unwrap().push((record_id, action));
        Ok(())
    }
}

/// Recipient directory with a fixed administrator list.
#[derive(Debug, Default)]
pub struct MockRecipientDirectory {
    administrators: Vec<Recipient>,
}

impl MockRecipientDirectory {
    /// Creates a directory with the given administrators.
    pub fn new(administrators: Vec<Recipient>) -> Self {
        Self { administrators }
    }

    /// Creates a directory with `count` administrator users, ids `1..=count`.
    pub fn with_admin_users(count: i64) -> Self {
        Self {
            administrators: (1..=count).map(|id| Recipient::User { id }).collect(),
        }
    }
}

#[async_trait]
impl RecipientDirectory for MockRecipientDirectory {
    async fn administrators(&self) -> Result<Vec<Recipient>, CollaboratorError> {
        Ok(self.administrators.clone())
    }
}

/// Secrets provider returning a fixed key, or none at all.
#[derive(Debug, Default)]
pub struct StaticSecrets {
    key: Option<Vec<u8>>,
}

impl StaticSecrets {
    /// Provider with the given MAC key.
    pub fn with_key(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: Some(key.into()),
        }
    }

    /// Provider with no key provisioned.
    pub fn empty() -> Self {
        Self { key: None }
    }
}

impl SecretsProvider for StaticSecrets {
    fn mac_key(&self) -> Option<Vec<u8>> {
        self.key.clone()
    }
}
