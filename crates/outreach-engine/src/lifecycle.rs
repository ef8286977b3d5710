//! Lifecycle event handlers.
//!
//! Each business event maps to at most one message per party, then goes
//! through the delivery gate. Handlers never return errors: every failure
//! is logged and folded into a `HandlerOutcome`.
//!
//! | Event                  | Urgency                                   |
//! |------------------------|-------------------------------------------|
//! | booking_confirmed      | normal                                    |
//! | pro_en_route           | time-sensitive                            |
//! | job_completed          | follow-up persisted, fired by a scanner   |
//! | payment_captured       | threshold detector (loyalty)              |
//! | certification_completed| threshold detector (fee tier)             |
//! | referral_completed     | credit first, then notify both sides      |
//! | smart_home_alert       | emergency for leak/smoke/CO/gas, else normal |
//! | inbound_message        | emergency matcher on keyword hit          |

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use outreach_core::config::FollowUpConfig;
use outreach_core::traits::{FollowUpStore, RecipientDirectory, ReferralLedger};
use outreach_core::types::{Category, EmergencyDispatchRequest, FollowUp, Metric, OutboundMessage, Recipient};
use outreach_core::Clock;
use serde::{Deserialize, Serialize};

use crate::emergency::{self, EmergencyMatcher};
use crate::gate::Urgency;
use crate::outbox::{Outbox, SendOutcome};
use crate::templates::{self, Fields, Template};
use crate::threshold::{ThresholdDetector, TierChange};

/// A business event reported by the surrounding application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    BookingConfirmed {
        booking_id: String,
        customer_id: String,
        service: String,
        scheduled_for: DateTime<Utc>,
    },
    ProEnRoute {
        booking_id: String,
        customer_id: String,
        pro_name: String,
        service: String,
        #[serde(default)]
        eta_minutes: Option<u32>,
    },
    JobCompleted {
        booking_id: String,
        customer_id: String,
        service: String,
    },
    /// Sent after the points mutation is committed.
    PaymentCaptured {
        customer_id: String,
        points_awarded: f64,
    },
    /// Sent after the certification count is committed.
    CertificationCompleted {
        pro_id: String,
        #[serde(default = "one")]
        certifications_added: u32,
    },
    ReferralCompleted {
        referrer_id: String,
        referee_id: String,
        amount_cents: u32,
    },
    SmartHomeAlert {
        customer_id: String,
        alert_type: String,
        #[serde(default)]
        device: Option<String>,
    },
    InboundMessage {
        sender_id: String,
        text: String,
        #[serde(default)]
        location_hint: Option<String>,
    },
}

fn one() -> u32 {
    1
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::BookingConfirmed { .. } => "booking_confirmed",
            LifecycleEvent::ProEnRoute { .. } => "pro_en_route",
            LifecycleEvent::JobCompleted { .. } => "job_completed",
            LifecycleEvent::PaymentCaptured { .. } => "payment_captured",
            LifecycleEvent::CertificationCompleted { .. } => "certification_completed",
            LifecycleEvent::ReferralCompleted { .. } => "referral_completed",
            LifecycleEvent::SmartHomeAlert { .. } => "smart_home_alert",
            LifecycleEvent::InboundMessage { .. } => "inbound_message",
        }
    }
}

/// What a handler did. Serialized for the trigger surface and CLI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HandlerOutcome {
    Notified { result: SendOutcome },
    FollowUpScheduled { due_at: DateTime<Utc> },
    TierChanged { change: TierChange },
    NoTierChange,
    Referral {
        credited: bool,
        referrer: Option<SendOutcome>,
        referee: Option<SendOutcome>,
    },
    Emergency { request: EmergencyDispatchRequest },
    NotEmergency,
    RecipientMissing { recipient_id: String },
    Failed { error: String },
}

pub struct LifecycleHandlers {
    follow_up: FollowUpConfig,
    directory: Arc<dyn RecipientDirectory>,
    follow_ups: Arc<dyn FollowUpStore>,
    referrals: Arc<dyn ReferralLedger>,
    threshold: Arc<ThresholdDetector>,
    matcher: Arc<EmergencyMatcher>,
    outbox: Arc<Outbox>,
    clock: Arc<dyn Clock>,
}

impl LifecycleHandlers {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        follow_up: FollowUpConfig,
        directory: Arc<dyn RecipientDirectory>,
        follow_ups: Arc<dyn FollowUpStore>,
        referrals: Arc<dyn ReferralLedger>,
        threshold: Arc<ThresholdDetector>,
        matcher: Arc<EmergencyMatcher>,
        outbox: Arc<Outbox>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            follow_up,
            directory,
            follow_ups,
            referrals,
            threshold,
            matcher,
            outbox,
            clock,
        }
    }

    pub async fn handle(&self, event: LifecycleEvent) -> HandlerOutcome {
        tracing::debug!("📨 Lifecycle event: {}", event.name());
        match event {
            LifecycleEvent::BookingConfirmed {
                customer_id,
                service,
                scheduled_for,
                ..
            } => {
                let Some(recipient) = self.lookup(&customer_id).await else {
                    return missing(customer_id);
                };
                let tz = self.outbox.gate().quiet_hours().tz_for(recipient.timezone.as_deref());
                let when = scheduled_for.with_timezone(&tz).format("%a %b %-d at %-I:%M %p");
                let fields = Fields::new().with("service", &service).with("when", when);
                self.notify(&recipient, Urgency::Normal, Category::BookingConfirmed, templates::BOOKING_CONFIRMED, fields)
                    .await
            }
            LifecycleEvent::ProEnRoute {
                customer_id,
                pro_name,
                service,
                eta_minutes,
                ..
            } => {
                let Some(recipient) = self.lookup(&customer_id).await else {
                    return missing(customer_id);
                };
                let eta = eta_minutes
                    .map(|m| format!("ETA {m} min"))
                    .unwrap_or_else(|| "arriving shortly".into());
                let fields = Fields::new()
                    .with("pro_name", &pro_name)
                    .with("service", &service)
                    .with("eta", eta);
                self.notify(&recipient, Urgency::TimeSensitive, Category::ProEnRoute, templates::PRO_EN_ROUTE, fields)
                    .await
            }
            LifecycleEvent::JobCompleted {
                booking_id,
                customer_id,
                service,
            } => self.schedule_follow_up(booking_id, customer_id, service).await,
            LifecycleEvent::PaymentCaptured {
                customer_id,
                points_awarded,
            } => self.tier_check(&customer_id, Metric::LoyaltyPoints, points_awarded).await,
            LifecycleEvent::CertificationCompleted {
                pro_id,
                certifications_added,
            } => {
                self.tier_check(&pro_id, Metric::CertificationCount, f64::from(certifications_added))
                    .await
            }
            LifecycleEvent::ReferralCompleted {
                referrer_id,
                referee_id,
                amount_cents,
            } => self.referral(&referrer_id, &referee_id, amount_cents).await,
            LifecycleEvent::SmartHomeAlert {
                customer_id,
                alert_type,
                device,
            } => {
                let Some(recipient) = self.lookup(&customer_id).await else {
                    return missing(customer_id);
                };
                let urgency = if templates::is_emergency_alert(&alert_type) {
                    tracing::warn!("🚨 Smart-home {alert_type} for {customer_id}");
                    Urgency::Emergency
                } else {
                    Urgency::Normal
                };
                let fields = Fields::new()
                    .with("device", device.as_deref().unwrap_or("sensor"))
                    .with("alert_type", alert_type.replace('_', " "));
                self.notify(
                    &recipient,
                    urgency,
                    Category::SmartHomeAlert,
                    templates::smart_home(&alert_type),
                    fields,
                )
                .await
            }
            LifecycleEvent::InboundMessage {
                sender_id,
                text,
                location_hint,
            } => {
                let Some(keyword) = emergency::detect(&text, self.matcher.keywords()) else {
                    return HandlerOutcome::NotEmergency;
                };
                tracing::info!("🔎 Inbound message from {sender_id} matched '{keyword}'");
                let request = match self.lookup(&sender_id).await {
                    Some(recipient) => self.matcher.handle(&recipient, &text, location_hint.as_deref()).await,
                    None => {
                        self.matcher
                            .escalate_unresolved(&sender_id, &text, location_hint.as_deref())
                            .await
                    }
                };
                HandlerOutcome::Emergency { request }
            }
        }
    }

    async fn lookup(&self, id: &str) -> Option<Recipient> {
        match self.directory.get_user(id).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!("⚠️ Recipient lookup for {id} failed: {e}");
                None
            }
        }
    }

    async fn notify(
        &self,
        recipient: &Recipient,
        urgency: Urgency,
        category: Category,
        template: Template,
        fields: Fields,
    ) -> HandlerOutcome {
        let (subject, body) = fields.with("name", recipient.greeting_name()).render(template);
        let result = self
            .outbox
            .send(recipient, urgency, &OutboundMessage::new(category, subject, body))
            .await;
        HandlerOutcome::Notified { result }
    }

    async fn schedule_follow_up(&self, booking_id: String, customer_id: String, service: String) -> HandlerOutcome {
        let due_at = self.clock.now() + Duration::minutes(self.follow_up.delay_minutes);
        let follow_up = FollowUp {
            id: uuid::Uuid::new_v4().to_string(),
            booking_id,
            recipient_id: customer_id,
            service,
            due_at,
            fired_at: None,
        };
        match self.follow_ups.schedule_follow_up(&follow_up).await {
            Ok(()) => {
                tracing::info!("⏳ Follow-up for booking {} due at {due_at}", follow_up.booking_id);
                HandlerOutcome::FollowUpScheduled { due_at }
            }
            Err(e) => {
                tracing::warn!("⚠️ Could not persist follow-up for booking {}: {e}", follow_up.booking_id);
                HandlerOutcome::Failed { error: e.to_string() }
            }
        }
    }

    async fn tier_check(&self, recipient_id: &str, metric: Metric, delta: f64) -> HandlerOutcome {
        match self.threshold.on_metric_changed(recipient_id, metric, delta).await {
            Some(change) => HandlerOutcome::TierChanged { change },
            None => HandlerOutcome::NoTierChange,
        }
    }

    async fn referral(&self, referrer_id: &str, referee_id: &str, amount_cents: u32) -> HandlerOutcome {
        match self.referrals.credit_referral(referrer_id, referee_id, amount_cents).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!("🔁 Referral {referrer_id} → {referee_id} already credited");
                return HandlerOutcome::Referral {
                    credited: false,
                    referrer: None,
                    referee: None,
                };
            }
            Err(e) => {
                tracing::warn!("⚠️ Referral credit {referrer_id} → {referee_id} failed: {e}");
                return HandlerOutcome::Failed { error: e.to_string() };
            }
        }

        // Credits are committed; notifications are best-effort from here on.
        let amount = format!("{}.{:02}", amount_cents / 100, amount_cents % 100);
        let referee = self.lookup(referee_id).await;
        let friend = referee
            .as_ref()
            .map(|r| r.greeting_name().to_string())
            .unwrap_or_else(|| "Your friend".into());

        let referrer_result = match self.lookup(referrer_id).await {
            Some(r) => Some(
                self.referral_message(&r, templates::REFERRAL_REFERRER, &amount, &friend)
                    .await,
            ),
            None => None,
        };
        let referee_result = match &referee {
            Some(r) => Some(self.referral_message(r, templates::REFERRAL_REFEREE, &amount, &friend).await),
            None => None,
        };
        HandlerOutcome::Referral {
            credited: true,
            referrer: referrer_result,
            referee: referee_result,
        }
    }

    async fn referral_message(&self, recipient: &Recipient, template: Template, amount: &str, friend: &str) -> SendOutcome {
        let (subject, body) = Fields::new()
            .with("name", recipient.greeting_name())
            .with("amount", amount)
            .with("friend", friend)
            .render(template);
        self.outbox
            .send(
                recipient,
                Urgency::Normal,
                &OutboundMessage::new(Category::ReferralCredit, subject, body),
            )
            .await
    }
}

fn missing(recipient_id: String) -> HandlerOutcome {
    tracing::warn!("⚠️ Lifecycle event for unknown recipient {recipient_id}");
    HandlerOutcome::RecipientMissing { recipient_id }
}
