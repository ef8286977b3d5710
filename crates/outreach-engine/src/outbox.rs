//! Gate-then-dispatch: the single path every outbound message takes.

use std::sync::Arc;

use outreach_core::types::{OutboundMessage, Recipient};
use serde::Serialize;

use crate::dispatch::{DeliveryOutcome, Dispatcher, preferred_channel};
use crate::gate::{DeliveryGate, GateRejection, Urgency};

/// Result of one gated send.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SendOutcome {
    Delivered { delivery: DeliveryOutcome },
    Gated { reason: GateRejection },
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Delivered { delivery } if delivery.is_sent())
    }
}

pub struct Outbox {
    gate: Arc<DeliveryGate>,
    dispatcher: Arc<Dispatcher>,
}

impl Outbox {
    pub fn new(gate: Arc<DeliveryGate>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { gate, dispatcher }
    }

    pub fn gate(&self) -> &DeliveryGate {
        &self.gate
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Admit through the gate, then deliver. Unreachable recipients are
    /// skipped before the gate so they never spend quota.
    pub async fn send(&self, recipient: &Recipient, urgency: Urgency, message: &OutboundMessage) -> SendOutcome {
        if preferred_channel(recipient).is_none() {
            return SendOutcome::Delivered {
                delivery: self.dispatcher.deliver(recipient, message).await,
            };
        }
        let decision = self.gate.admit(recipient, urgency);
        if let Some(reason) = decision.reason {
            tracing::info!("🔕 {} to {} held back: {reason:?}", message.category, recipient.id);
            return SendOutcome::Gated { reason };
        }
        SendOutcome::Delivered {
            delivery: self.dispatcher.deliver(recipient, message).await,
        }
    }

    /// Deliver a scanner message: the batch already passed quiet hours, so
    /// only the rate limit applies here.
    pub async fn send_batch_member(&self, recipient: &Recipient, message: &OutboundMessage) -> SendOutcome {
        if preferred_channel(recipient).is_none() {
            return SendOutcome::Delivered {
                delivery: DeliveryOutcome::Unreachable,
            };
        }
        let decision = self.gate.admit_batch_member(&recipient.id);
        if let Some(reason) = decision.reason {
            tracing::debug!("🔕 {} to {} held back: {reason:?}", message.category, recipient.id);
            return SendOutcome::Gated { reason };
        }
        SendOutcome::Delivered {
            delivery: self.dispatcher.deliver(recipient, message).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::MemoryRateLimiter;
    use crate::testing::RecordingTransport;
    use chrono::TimeZone;
    use outreach_core::config::GateConfig;
    use outreach_core::types::Category;
    use outreach_core::{Clock, ManualClock};
    use std::time::Duration;

    fn outbox(transport: Arc<RecordingTransport>, hour_utc: u32) -> Outbox {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at(
            chrono::Utc.with_ymd_and_hms(2026, 6, 15, hour_utc, 0, 0).unwrap(),
        ));
        let gate = DeliveryGate::from_config(&GateConfig::default(), Arc::new(MemoryRateLimiter::new()), clock).unwrap();
        Outbox::new(Arc::new(gate), Arc::new(Dispatcher::new(transport, Duration::from_secs(5))))
    }

    fn reachable() -> Recipient {
        let mut r = Recipient::customer("c1");
        r.phone = Some("+15550100".into());
        r
    }

    fn msg() -> OutboundMessage {
        OutboundMessage::new(Category::BookingConfirmed, "s", "b")
    }

    #[tokio::test]
    async fn test_second_normal_send_is_gated() {
        let transport = Arc::new(RecordingTransport::new());
        let outbox = outbox(transport.clone(), 18);
        assert!(outbox.send(&reachable(), Urgency::Normal, &msg()).await.is_sent());
        assert_eq!(
            outbox.send(&reachable(), Urgency::Normal, &msg()).await,
            SendOutcome::Gated {
                reason: GateRejection::RateLimited
            }
        );
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_does_not_spend_quota() {
        let transport = Arc::new(RecordingTransport::new());
        let outbox = outbox(transport.clone(), 18);
        let mut r = Recipient::customer("c1");
        assert!(!outbox.send(&r, Urgency::Normal, &msg()).await.is_sent());
        r.phone = Some("+15550100".into());
        assert!(outbox.send(&r, Urgency::Normal, &msg()).await.is_sent());
    }

    #[tokio::test]
    async fn test_failed_transport_still_spends_quota() {
        let transport = Arc::new(RecordingTransport::failing("boom"));
        let outbox = outbox(transport.clone(), 18);
        assert!(!outbox.send(&reachable(), Urgency::Normal, &msg()).await.is_sent());
        assert!(matches!(
            outbox.send(&reachable(), Urgency::Normal, &msg()).await,
            SendOutcome::Gated { .. }
        ));
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_emergency_sends_in_quiet_hours() {
        let transport = Arc::new(RecordingTransport::new());
        let outbox = outbox(transport.clone(), 6); // 23:00 PDT
        assert!(matches!(
            outbox.send(&reachable(), Urgency::Normal, &msg()).await,
            SendOutcome::Gated {
                reason: GateRejection::QuietHours
            }
        ));
        assert!(outbox.send(&reachable(), Urgency::Emergency, &msg()).await.is_sent());
    }
}
