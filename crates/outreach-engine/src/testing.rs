//! Test fixtures shared by the engine's unit tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use outreach_core::traits::{Transport, WeatherSource};
use outreach_core::types::{Channel, ConsentFlags, DeliveryReceipt, Recipient, RecipientRole, WeatherAlert};
use outreach_core::{ManualClock, OutreachConfig};

use crate::engine::{Collaborators, OutreachEngine};
use crate::persistence::{OutreachDb, ProProfile};
use crate::rate_limit::MemoryRateLimiter;

/// Monday 2026-06-15 18:00 UTC, 11:00 in the default region.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 15, 18, 0, 0).unwrap()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub channel: Channel,
    pub to: String,
    pub subject: Option<String>,
    pub body: String,
}

/// Records every send; optionally fails or stalls.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentMessage>>,
    fail_with: Option<String>,
    delay: Option<Duration>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: &str) -> Self {
        Self {
            fail_with: Some(error.to_string()),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, to: &str) -> Vec<SentMessage> {
        self.sent().into_iter().filter(|m| m.to == to).collect()
    }

    async fn finish(&self, message: SentMessage) -> DeliveryReceipt {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.sent.lock().unwrap().push(message);
        match &self.fail_with {
            Some(error) => DeliveryReceipt::failed(error.clone()),
            None => DeliveryReceipt::ok(Some("test-id".into())),
        }
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send_sms(&self, to: &str, body: &str) -> DeliveryReceipt {
        self.finish(SentMessage {
            channel: Channel::Sms,
            to: to.to_string(),
            subject: None,
            body: body.to_string(),
        })
        .await
    }

    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        html_body: Option<&str>,
        text_body: Option<&str>,
    ) -> DeliveryReceipt {
        self.finish(SentMessage {
            channel: Channel::Email,
            to: to.to_string(),
            subject: Some(subject.to_string()),
            body: text_body.or(html_body).unwrap_or_default().to_string(),
        })
        .await
    }
}

/// Fixed alert list per zone.
#[derive(Default)]
pub struct StaticWeather {
    pub alerts: Vec<WeatherAlert>,
}

impl StaticWeather {
    pub fn with_alert(zone: &str, event: &str, severity: &str) -> Self {
        Self {
            alerts: vec![WeatherAlert {
                zone: zone.to_string(),
                event: event.to_string(),
                severity: severity.to_string(),
                headline: format!("{event} in effect"),
            }],
        }
    }
}

#[async_trait]
impl WeatherSource for StaticWeather {
    async fn active_alerts(&self, zone: &str) -> Vec<WeatherAlert> {
        self.alerts.iter().filter(|a| a.zone == zone).cloned().collect()
    }
}

/// A full engine over an in-memory store, a recording transport and a
/// manual clock parked at `t0()`.
pub struct Harness {
    pub db: Arc<OutreachDb>,
    pub transport: Arc<RecordingTransport>,
    pub clock: Arc<ManualClock>,
    pub weather: Arc<StaticWeather>,
    pub rate_limits: Arc<MemoryRateLimiter>,
    pub engine: Arc<OutreachEngine>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(OutreachConfig::default(), RecordingTransport::new(), StaticWeather::default())
    }

    pub fn with_transport(transport: RecordingTransport) -> Self {
        Self::build(OutreachConfig::default(), transport, StaticWeather::default())
    }

    pub fn build(config: OutreachConfig, transport: RecordingTransport, weather: StaticWeather) -> Self {
        let clock = Arc::new(ManualClock::at(t0()));
        let db = Arc::new(OutreachDb::open_in_memory().unwrap().with_clock(clock.clone()));
        let transport = Arc::new(transport);
        let weather = Arc::new(weather);
        let rate_limits = Arc::new(MemoryRateLimiter::new());
        let collaborators = Collaborators::from_db(
            db.clone(),
            rate_limits.clone(),
            weather.clone(),
            transport.clone(),
            clock.clone(),
        );
        let engine = Arc::new(OutreachEngine::new(config, collaborators).unwrap());
        Self {
            db,
            transport,
            clock,
            weather,
            rate_limits,
            engine,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators::from_db(
            self.db.clone(),
            self.rate_limits.clone(),
            self.weather.clone(),
            self.transport.clone(),
            self.clock.clone(),
        )
    }

    /// Consenting, SMS-reachable customer in zone WAZ558.
    pub fn customer(&self, id: &str) -> Recipient {
        let mut r = Recipient::customer(id);
        r.first_name = Some("Dana".into());
        r.phone = Some(format!("+1555{id}"));
        r.consent = ConsentFlags {
            proactive: true,
            ..ConsentFlags::default()
        };
        r.service_zone = Some("WAZ558".into());
        self.db.upsert_recipient(&r).unwrap();
        r
    }

    /// Background-cleared pro with two certifications.
    pub fn pro(&self, id: &str, available: bool) -> Recipient {
        let mut r = Recipient::customer(id);
        r.role = RecipientRole::Pro;
        r.first_name = Some("Sam".into());
        r.phone = Some(format!("+1999{id}"));
        self.db.upsert_recipient(&r).unwrap();
        self.db
            .upsert_pro_profile(&ProProfile {
                recipient_id: id.into(),
                display_name: format!("Sam ({id})"),
                available,
                can_accept_jobs: true,
                background_cleared: true,
                rating: Some(4.9),
                certification_count: 2,
            })
            .unwrap();
        r
    }
}
