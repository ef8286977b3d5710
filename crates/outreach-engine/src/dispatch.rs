//! Message dispatch: picks a channel for the recipient and hands the message
//! to the transport under a uniform timeout.
//!
//! Nothing here returns an error. A failed or timed-out send is logged and
//! reported as `DeliveryOutcome::Failed` so callers can keep going.

use std::sync::Arc;
use std::time::Duration;

use outreach_core::traits::Transport;
use outreach_core::types::{Channel, DeliveryReceipt, OutboundMessage, Recipient};
use serde::Serialize;

/// What happened to one message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Sent {
        channel: Channel,
        provider_message_id: Option<String>,
    },
    Failed {
        channel: Channel,
        error: String,
    },
    /// No consented channel with an address.
    Unreachable,
}

impl DeliveryOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, DeliveryOutcome::Sent { .. })
    }

    fn from_receipt(channel: Channel, receipt: DeliveryReceipt) -> Self {
        if receipt.success {
            DeliveryOutcome::Sent {
                channel,
                provider_message_id: receipt.provider_message_id,
            }
        } else {
            DeliveryOutcome::Failed {
                channel,
                error: receipt.error.unwrap_or_else(|| "unknown transport error".into()),
            }
        }
    }
}

/// SMS when a phone is on file and SMS is consented, email otherwise.
pub fn preferred_channel(recipient: &Recipient) -> Option<(Channel, &str)> {
    if let Some(phone) = recipient.phone.as_deref()
        && recipient.consent.sms
        && !phone.trim().is_empty()
    {
        return Some((Channel::Sms, phone));
    }
    if let Some(email) = recipient.email.as_deref()
        && recipient.consent.email
        && !email.trim().is_empty()
    {
        return Some((Channel::Email, email));
    }
    None
}

pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// Deliver to a recipient on their preferred channel.
    pub async fn deliver(&self, recipient: &Recipient, message: &OutboundMessage) -> DeliveryOutcome {
        let Some((channel, address)) = preferred_channel(recipient) else {
            tracing::info!(
                "📭 {} has no reachable channel, skipping {}",
                recipient.id,
                message.category
            );
            return DeliveryOutcome::Unreachable;
        };

        let outcome = match channel {
            Channel::Sms => self.sms(address, &message.body).await,
            Channel::Email => self.email(address, &message.subject, &message.body).await,
        };
        match &outcome {
            DeliveryOutcome::Sent { .. } => {
                tracing::info!("📤 {} → {} via {channel}", message.category, recipient.id)
            }
            DeliveryOutcome::Failed { error, .. } => tracing::warn!(
                "⚠️ {} to {} via {channel} failed: {error}",
                message.category,
                recipient.id
            ),
            DeliveryOutcome::Unreachable => {}
        }
        outcome
    }

    /// Raw SMS to a number, used where no recipient record exists.
    pub async fn sms(&self, to: &str, body: &str) -> DeliveryOutcome {
        let send = self.transport.send_sms(to, body);
        match tokio::time::timeout(self.timeout, send).await {
            Ok(receipt) => DeliveryOutcome::from_receipt(Channel::Sms, receipt),
            Err(_) => DeliveryOutcome::Failed {
                channel: Channel::Sms,
                error: format!("timed out after {}s", self.timeout.as_secs()),
            },
        }
    }

    async fn email(&self, to: &str, subject: &str, body: &str) -> DeliveryOutcome {
        let send = self.transport.send_email(to, subject, None, Some(body));
        match tokio::time::timeout(self.timeout, send).await {
            Ok(receipt) => DeliveryOutcome::from_receipt(Channel::Email, receipt),
            Err(_) => DeliveryOutcome::Failed {
                channel: Channel::Email,
                error: format!("timed out after {}s", self.timeout.as_secs()),
            },
        }
    }
}
