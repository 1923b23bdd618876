//! Mock transport for tests.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use vigil_core::traits::CollaboratorError;
use vigil_core::{ChannelConfig, Recipient};

use crate::dispatch::{AlertTransport, RenderedAlert};

/// One recorded delivery.
#[derive(Debug, Clone)]
pub struct RecordedDelivery {
    /// Channel type token the delivery used.
    pub channel_type: String,
    /// Recipient it went to.
    pub recipient: Recipient,
    /// The alert as the transport saw it.
    pub alert: RenderedAlert,
}

/// Transport that records deliveries in memory, optionally failing whole
/// channel types.
#[derive(Clone, Default)]
pub struct MockAlertTransport {
    deliveries: Arc<Mutex<Vec<RecordedDelivery>>>,
    failing_channels: Arc<Mutex<Vec<String>>>,
}

impl MockAlertTransport {
    /// Creates an empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every delivery over the given channel type fail transiently.
    pub fn fail_channel(&self, channel_type: &str) {
        self.failing_channels
            .lock()
            .unwrap()
            .push(channel_type.to_string());
    }

    /// Everything delivered so far.
    pub fn deliveries(&self) -> Vec<RecordedDelivery> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertTransport for MockAlertTransport {
    async fn deliver(
        &self,
        channel: &ChannelConfig,
        recipient: &Recipient,
        alert: &RenderedAlert,
    ) -> Result<(), CollaboratorError> {
        let channel_type = channel.channel_type();
        if self
            .failing_channels
            .lock()
            .unwrap()
            .iter()
            .any(|c| c == channel_type)
        {
            return Err(CollaboratorError::Transient(format!(
                "{channel_type} gateway unavailable"
            )));
        }
        self.deliveries.lock().unwrap().push(RecordedDelivery {
            channel_type: channel_type.to_string(),
            recipient: recipient.clone(),
            alert: alert.clone(),
        });
        Ok(())
    }
}
