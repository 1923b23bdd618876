//! Dispatch resolution: recipients, channels, and delivery bookkeeping.
//!
//! Delivery itself is a collaborator behind [`AlertTransport`]; this module
//! expands recipient selectors, walks the rule's channels in order, and keeps
//! each channel/recipient failure independent of its siblings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use vigil_core::traits::{CollaboratorError, RecipientDirectory};
use vigil_core::{AlertSeverity, ChannelConfig, Recipient, RecipientSelector};

use crate::dedup::AlertGroup;
use crate::evaluator::AlertCandidate;

/// A fully rendered alert handed to the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedAlert {
    /// Unique id for this outbound alert.
    pub alert_id: Uuid,
    /// Rule that fired.
    pub rule_id: Uuid,
    /// Rule name, for display.
    pub rule_name: String,
    /// Record that opened the alert group.
    pub record_id: i64,
    /// Severity label.
    pub severity: AlertSeverity,
    /// Rendered title.
    pub title: String,
    /// Rendered message body.
    pub message: String,
    /// Occurrences merged into the group at dispatch time.
    pub occurrence_count: u64,
}

/// Delivers rendered alerts over a concrete channel.
///
/// Implementations live outside the engine (mail gateway, SMS bridge,
/// webhook poster); [`crate::testing::MockAlertTransport`] covers tests.
#[async_trait]
pub trait AlertTransport: Send + Sync {
    /// Delivers one alert to one recipient over one channel.
    async fn deliver(
        &self,
        channel: &ChannelConfig,
        recipient: &Recipient,
        alert: &RenderedAlert,
    ) -> Result<(), CollaboratorError>;
}

/// Outcome of one channel/recipient delivery attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelOutcome {
    /// Channel type token (`email`, `sms`, `webhook`).
    pub channel_type: String,
    /// The resolved recipient.
    pub recipient: Recipient,
    /// Whether delivery succeeded.
    pub success: bool,
    /// Transport error, when delivery failed.
    pub error: Option<String>,
}

/// Summary of dispatching one alert.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    /// Id of the dispatched alert.
    pub alert_id: Uuid,
    /// Delivery attempts made.
    pub attempted: u64,
    /// Successful deliveries.
    pub delivered: u64,
    /// Failed deliveries.
    pub failed: u64,
    /// Per-attempt outcomes, in channel order.
    pub outcomes: Vec<ChannelOutcome>,
}

/// One line of dispatch history.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchRecord {
    /// Alert this delivery belonged to.
    pub alert_id: Uuid,
    /// Rule that fired.
    pub rule_id: Uuid,
    /// Channel type token.
    pub channel_type: String,
    /// Whether the delivery succeeded.
    pub success: bool,
    /// Transport error, when it failed.
    pub error: Option<String>,
    /// When the attempt was made.
    pub sent_at: DateTime<Utc>,
}

/// Expands recipients and drives the transport for dispatched alerts.
pub struct AlertDispatcher<T, D> {
    transport: T,
    directory: D,
    history: Arc<RwLock<VecDeque<DispatchRecord>>>,
    max_history: usize,
}

impl<T: AlertTransport, D: RecipientDirectory> AlertDispatcher<T, D> {
    /// Creates a dispatcher over the given transport and directory.
    pub fn new(transport: T, directory: D) -> Self {
        Self {
            transport,
            directory,
            history: Arc::new(RwLock::new(VecDeque::new())),
            max_history: 10_000,
        }
    }

    /// Dispatches one alert: expand recipients, then walk the channels in
    /// order. A failing channel or recipient never blocks the rest.
    pub async fn dispatch(
        &self,
        candidate: &AlertCandidate,
        group: &AlertGroup,
        now: DateTime<Utc>,
    ) -> DispatchReport {
        let alert = RenderedAlert {
            alert_id: Uuid::new_v4(),
            rule_id: candidate.rule_id,
            rule_name: candidate.rule_name.clone(),
            record_id: group.representative_record_id,
            severity: candidate.severity,
            title: candidate.title.clone(),
            message: candidate.message.clone(),
            occurrence_count: group.occurrence_count,
        };

        let recipients = self.expand_recipients(&candidate.recipients).await;
        let mut report = DispatchReport {
            alert_id: alert.alert_id,
            attempted: 0,
            delivered: 0,
            failed: 0,
            outcomes: Vec::new(),
        };

        for channel in &candidate.channels {
            for recipient in &recipients {
                report.attempted += 1;
                let result = self.transport.deliver(channel, recipient, &alert).await;
                let (success, error) = match result {
                    Ok(()) => (true, None),
                    Err(e) => {
                        warn!(
                            rule = %candidate.rule_name,
                            channel = channel.channel_type(),
                            error = %e,
                            "alert delivery failed"
                        );
                        (false, Some(e.to_string()))
                    }
                };
                if success {
                    report.delivered += 1;
                } else {
                    report.failed += 1;
                }

                self.record(DispatchRecord {
                    alert_id: alert.alert_id,
                    rule_id: candidate.rule_id,
                    channel_type: channel.channel_type().to_string(),
                    success,
                    error: error.clone(),
                    sent_at: now,
                })
                .await;

                report.outcomes.push(ChannelOutcome {
                    channel_type: channel.channel_type().to_string(),
                    recipient: recipient.clone(),
                    success,
                    error,
                });
            }
        }

        info!(
            rule = %candidate.rule_name,
            alert_id = %alert.alert_id,
            delivered = report.delivered,
            failed = report.failed,
            "alert dispatched"
        );
        report
    }

    /// Recent dispatch history, newest first.
    pub async fn history(&self, limit: Option<usize>) -> Vec<DispatchRecord> {
        let history = self.history.read().await;
        let iter = history.iter().rev().cloned();
        match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        }
    }

    /// Resolves selectors to concrete recipients, de-duplicating overlaps.
    ///
    /// A directory failure degrades to the explicit selectors and logs —
    /// an unreachable directory must not silently drop an alert that also
    /// names direct recipients.
    async fn expand_recipients(&self, selectors: &[RecipientSelector]) -> Vec<Recipient> {
        let mut recipients: Vec<Recipient> = Vec::new();
        for selector in selectors {
            match selector {
                RecipientSelector::AllAdministrators => {
                    match self.directory.administrators().await {
                        Ok(admins) => recipients.extend(admins),
                        Err(e) => {
                            warn!(error = %e, "recipient directory unavailable, skipping administrator expansion");
                        }
                    }
                }
                RecipientSelector::User { id } => recipients.push(Recipient::User { id: *id }),
                RecipientSelector::Email { address } => recipients.push(Recipient::Email {
                    address: address.clone(),
                }),
            }
        }
        let mut seen = Vec::new();
        recipients.retain(|r| {
            if seen.contains(r) {
                false
            } else {
                seen.push(r.clone());
                true
            }
        });
        recipients
    }

    async fn record(&self, record: DispatchRecord) {
        let mut history = self.history.write().await;
        if history.len() >= self.max_history {
            history.pop_front();
        }
        history.push_back(record);
    }
}
