//! Scheduled campaign scanners.
//!
//! Every scanner follows the same batch template:
//!
//! ```text
//! quiet hours? ──yes──▶ defer whole batch
//!      │no
//!      ▼
//! cohort query (eligibility + consent + dedup anti-join)
//!      │            store error → empty cohort
//!      ▼
//! for each recipient, sequentially:
//!     compose → rate limit → transport → dedup record on success
//! ```
//!
//! `job_follow_up` is the odd one out: it drains persisted follow-ups
//! instead of running a cohort query.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{Datelike, Duration};
use outreach_core::config::{CampaignSettings, DedupScope, OutreachConfig};
use outreach_core::error::OutreachError;
use outreach_core::traits::{CohortQuery, CohortStore, DedupFilter, FollowUpStore, RecipientDirectory, WeatherSource};
use outreach_core::types::{Category, CohortRow, DedupRecord, FollowUp, OutboundMessage, ScanSummary, WeatherAlert};
use outreach_core::Clock;
use serde::{Deserialize, Serialize};

use crate::outbox::{Outbox, SendOutcome};
use crate::templates::{self, Fields, Template};

/// Follow-ups held back by the gate are retried until this old.
const FOLLOW_UP_GIVE_UP_AFTER_HOURS: i64 = 72;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Campaign {
    MaintenanceReminder,
    WeatherHeadsup,
    WinBack,
    HomeHealthNudge,
    SeasonalPromo,
    JobFollowUp,
}

impl Campaign {
    pub const ALL: [Campaign; 6] = [
        Campaign::MaintenanceReminder,
        Campaign::WeatherHeadsup,
        Campaign::WinBack,
        Campaign::HomeHealthNudge,
        Campaign::SeasonalPromo,
        Campaign::JobFollowUp,
    ];

    pub fn name(&self) -> &'static str {
        self.category().as_str()
    }

    pub fn category(&self) -> Category {
        match self {
            Campaign::MaintenanceReminder => Category::MaintenanceReminder,
            Campaign::WeatherHeadsup => Category::WeatherHeadsup,
            Campaign::WinBack => Category::WinBack,
            Campaign::HomeHealthNudge => Category::HomeHealthNudge,
            Campaign::SeasonalPromo => Category::SeasonalPromo,
            Campaign::JobFollowUp => Category::JobFollowUp,
        }
    }

    pub fn settings<'c>(&self, config: &'c OutreachConfig) -> &'c CampaignSettings {
        let c = &config.campaigns;
        match self {
            Campaign::MaintenanceReminder => &c.maintenance_reminder,
            Campaign::WeatherHeadsup => &c.weather_headsup,
            Campaign::WinBack => &c.win_back,
            Campaign::HomeHealthNudge => &c.home_health_nudge,
            Campaign::SeasonalPromo => &c.seasonal_promo,
            Campaign::JobFollowUp => &c.job_follow_up,
        }
    }
}

impl fmt::Display for Campaign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Campaign {
    type Err = OutreachError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Campaign::ALL
            .iter()
            .copied()
            .find(|c| c.name() == normalized)
            .ok_or_else(|| OutreachError::Config(format!("unknown campaign '{s}'")))
    }
}

pub struct CampaignScanner {
    config: Arc<OutreachConfig>,
    cohorts: Arc<dyn CohortStore>,
    follow_ups: Arc<dyn FollowUpStore>,
    directory: Arc<dyn RecipientDirectory>,
    weather: Arc<dyn WeatherSource>,
    outbox: Arc<Outbox>,
    clock: Arc<dyn Clock>,
}

impl CampaignScanner {
    pub fn new(
        config: Arc<OutreachConfig>,
        cohorts: Arc<dyn CohortStore>,
        follow_ups: Arc<dyn FollowUpStore>,
        directory: Arc<dyn RecipientDirectory>,
        weather: Arc<dyn WeatherSource>,
        outbox: Arc<Outbox>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            cohorts,
            follow_ups,
            directory,
            weather,
            outbox,
            clock,
        }
    }

    /// Run one scanner to completion. Never fails: errors shrink the cohort.
    pub async fn run(&self, campaign: Campaign) -> ScanSummary {
        let settings = campaign.settings(&self.config);
        if !settings.enabled {
            tracing::info!("⏸️ Campaign {campaign} is disabled");
            return ScanSummary::deferred(campaign.name());
        }
        if self.outbox.gate().batch_in_quiet_hours() {
            tracing::info!("🌙 {campaign} deferred: quiet hours on the region clock");
            return ScanSummary::deferred(campaign.name());
        }

        let summary = match campaign {
            Campaign::JobFollowUp => self.run_follow_ups().await,
            Campaign::WeatherHeadsup => self.run_weather(settings).await,
            _ => self.run_cohort(campaign, settings).await,
        };
        tracing::info!(
            "📣 {campaign}: {} sent, {} skipped",
            summary.sent,
            summary.skipped
        );
        summary
    }

    fn dedup_filter(&self, campaign: Campaign, settings: &CampaignSettings) -> DedupFilter {
        DedupFilter {
            window_days: settings.lookback_days.unwrap_or(self.config.dedup.window_days),
            category: match settings.scope {
                DedupScope::SameCampaign => Some(campaign.category()),
                DedupScope::AnyCampaign => None,
            },
        }
    }

    async fn select(&self, campaign: Campaign, settings: &CampaignSettings, query: CohortQuery) -> Vec<CohortRow> {
        let dedup = self.dedup_filter(campaign, settings);
        match self.cohorts.select_cohort(&query, &dedup, self.clock.now()).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!("⚠️ {campaign} cohort query failed, skipping this cycle: {e}");
                Vec::new()
            }
        }
    }

    async fn run_cohort(&self, campaign: Campaign, settings: &CampaignSettings) -> ScanSummary {
        let c = &self.config.campaigns;
        let query = match campaign {
            Campaign::MaintenanceReminder => CohortQuery::MaintenanceDue {
                within_days: c.maintenance_lead_days,
            },
            Campaign::WinBack => CohortQuery::Inactive { days: c.inactive_days },
            Campaign::HomeHealthNudge => CohortQuery::HomeHealthDormant {
                inactive_days: c.home_health_inactive_days,
            },
            _ => CohortQuery::AllCustomers,
        };
        let rows = self.select(campaign, settings, query).await;

        let month = self.clock.now().with_timezone(&self.outbox.gate().quiet_hours().region()).month();
        let mut summary = ScanSummary::empty(campaign.name());
        let mut seen = HashSet::new();
        self.fan_out(campaign, rows, &mut summary, &mut seen, |row| match campaign {
            Campaign::MaintenanceReminder => {
                templates::maintenance(row.fields.get("reminder_type").map(String::as_str).unwrap_or_default())
            }
            Campaign::WinBack => templates::WIN_BACK,
            Campaign::HomeHealthNudge => templates::HOME_HEALTH_NUDGE,
            _ => templates::seasonal(month),
        })
        .await;
        summary
    }

    async fn run_weather(&self, settings: &CampaignSettings) -> ScanSummary {
        let campaign = Campaign::WeatherHeadsup;
        let mut summary = ScanSummary::empty(campaign.name());
        if !self.config.weather.enabled {
            return summary;
        }

        let mut seen = HashSet::new();
        for zone in &self.config.weather.zones {
            let Some(alert) = self.severe_alert(zone).await else {
                continue;
            };
            tracing::info!("⛈️ {} ({}) active in {zone}", alert.event, alert.severity);
            let rows: Vec<CohortRow> = self
                .select(campaign, settings, CohortQuery::ServiceZone { zone: zone.clone() })
                .await
                .into_iter()
                .map(|row| {
                    row.with_field("event", alert.event.clone())
                        .with_field("headline", alert.headline.clone())
                })
                .collect();
            self.fan_out(campaign, rows, &mut summary, &mut seen, |_| templates::WEATHER_HEADSUP)
                .await;
        }
        summary
    }

    async fn severe_alert(&self, zone: &str) -> Option<WeatherAlert> {
        self.weather
            .active_alerts(zone)
            .await
            .into_iter()
            .find(WeatherAlert::is_severe)
    }

    /// Sequential sends; one recipient at a time.
    async fn fan_out(
        &self,
        campaign: Campaign,
        rows: Vec<CohortRow>,
        summary: &mut ScanSummary,
        seen: &mut HashSet<String>,
        template_for: impl Fn(&CohortRow) -> Template,
    ) {
        for row in rows {
            if !seen.insert(row.recipient.id.clone()) {
                continue;
            }
            if !row.recipient.consent.proactive {
                summary.skipped += 1;
                continue;
            }

            let (subject, body) = Fields::from_map(&row.fields)
                .with("name", row.recipient.greeting_name())
                .render(template_for(&row));
            let message = OutboundMessage::new(campaign.category(), subject, body);

            if self.outbox.send_batch_member(&row.recipient, &message).await.is_sent() {
                summary.sent += 1;
                let record = DedupRecord {
                    recipient_id: row.recipient.id.clone(),
                    category: campaign.category(),
                    sent_at: self.clock.now(),
                    body: message.body,
                };
                if let Err(e) = self.cohorts.record_dedup(&record).await {
                    tracing::warn!("⚠️ Failed to record {campaign} dedup for {}: {e}", row.recipient.id);
                }
            } else {
                summary.skipped += 1;
            }
        }
    }

    async fn run_follow_ups(&self) -> ScanSummary {
        let mut summary = ScanSummary::empty(Campaign::JobFollowUp.name());
        let now = self.clock.now();
        let due = match self.follow_ups.due_follow_ups(now).await {
            Ok(due) => due,
            Err(e) => {
                tracing::warn!("⚠️ Follow-up query failed, skipping this cycle: {e}");
                return summary;
            }
        };

        for follow_up in due {
            let fire = match self.fire_follow_up(&follow_up).await {
                Some(outcome) if outcome.is_sent() => {
                    summary.sent += 1;
                    true
                }
                Some(SendOutcome::Gated { reason }) => {
                    summary.skipped += 1;
                    let stale = now - follow_up.due_at > Duration::hours(FOLLOW_UP_GIVE_UP_AFTER_HOURS);
                    if stale {
                        tracing::info!("🗑️ Dropping follow-up {} after repeated {reason:?}", follow_up.id);
                    }
                    stale
                }
                _ => {
                    summary.skipped += 1;
                    true
                }
            };
            if fire && let Err(e) = self.follow_ups.mark_follow_up_fired(&follow_up.id, now).await {
                tracing::warn!("⚠️ Failed to mark follow-up {} fired: {e}", follow_up.id);
            }
        }
        summary
    }

    /// `None` when the recipient cannot be resolved.
    async fn fire_follow_up(&self, follow_up: &FollowUp) -> Option<SendOutcome> {
        let recipient = match self.directory.get_user(&follow_up.recipient_id).await {
            Ok(Some(r)) => r,
            Ok(None) => {
                tracing::warn!("⚠️ Follow-up {} for unknown recipient {}", follow_up.id, follow_up.recipient_id);
                return None;
            }
            Err(e) => {
                tracing::warn!("⚠️ Follow-up {} recipient lookup failed: {e}", follow_up.id);
                return None;
            }
        };
        let (subject, body) = Fields::new()
            .with("name", recipient.greeting_name())
            .with("service", &follow_up.service)
            .render(templates::JOB_FOLLOW_UP);
        let message = OutboundMessage::new(Category::JobFollowUp, subject, body);
        Some(self.outbox.send_batch_member(&recipient, &message).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::gate::DeliveryGate;
    use crate::persistence::OutreachDb;
    use crate::rate_limit::MemoryRateLimiter;
    use crate::testing::{RecordingTransport, StaticWeather};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use outreach_core::types::Recipient;
    use outreach_core::ManualClock;
    use outreach_core::traits::RateLimitStore;

    struct BrokenStore;

    #[async_trait]
    impl CohortStore for BrokenStore {
        async fn select_cohort(
            &self,
            _query: &CohortQuery,
            _dedup: &DedupFilter,
            _now: DateTime<Utc>,
        ) -> outreach_core::Result<Vec<CohortRow>> {
            Err(OutreachError::Store("connection refused".into()))
        }

        async fn has_recent_record(&self, _id: &str, _days: u32, _now: DateTime<Utc>) -> outreach_core::Result<bool> {
            Err(OutreachError::Store("connection refused".into()))
        }

        async fn record_dedup(&self, _record: &DedupRecord) -> outreach_core::Result<()> {
            Err(OutreachError::Store("connection refused".into()))
        }
    }

    struct Fixture {
        db: Arc<OutreachDb>,
        transport: Arc<RecordingTransport>,
        clock: Arc<ManualClock>,
        limiter: Arc<MemoryRateLimiter>,
        scanner: CampaignScanner,
    }

    // 2026-06-15 18:00 UTC = 11:00 PDT, a Monday.
    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 18, 0, 0).unwrap()
    }

    fn fixture_with(config: OutreachConfig, weather: StaticWeather, cohorts: Option<Arc<dyn CohortStore>>) -> Fixture {
        let db = Arc::new(OutreachDb::open_in_memory().unwrap());
        let transport = Arc::new(RecordingTransport::new());
        let clock = Arc::new(ManualClock::at(t0()));
        let limiter = Arc::new(MemoryRateLimiter::new());
        let gate = DeliveryGate::from_config(&config.gate, limiter.clone(), clock.clone()).unwrap();
        let outbox = Arc::new(Outbox::new(
            Arc::new(gate),
            Arc::new(Dispatcher::new(transport.clone(), std::time::Duration::from_secs(5))),
        ));
        let scanner = CampaignScanner::new(
            Arc::new(config),
            cohorts.unwrap_or_else(|| db.clone() as Arc<dyn CohortStore>),
            db.clone(),
            db.clone(),
            Arc::new(weather),
            outbox,
            clock.clone(),
        );
        Fixture {
            db,
            transport,
            clock,
            limiter,
            scanner,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(OutreachConfig::default(), StaticWeather::default(), None)
    }

    fn customer(db: &OutreachDb, id: &str, consent: bool) -> Recipient {
        let mut r = Recipient::customer(id);
        r.first_name = Some(format!("Name{id}"));
        r.phone = Some(format!("+1555{id}"));
        r.consent.proactive = consent;
        r.service_zone = Some("WAZ558".into());
        db.upsert_recipient(&r).unwrap();
        r
    }

    #[test]
    fn test_campaign_names_parse() {
        for c in Campaign::ALL {
            assert_eq!(c.name().parse::<Campaign>().unwrap(), c);
        }
        assert_eq!("weather-headsup".parse::<Campaign>().unwrap(), Campaign::WeatherHeadsup);
        assert!("spam_blast".parse::<Campaign>().is_err());
    }

    #[tokio::test]
    async fn test_seasonal_uses_month_template_and_consent() {
        let f = fixture();
        customer(&f.db, "1", true);
        customer(&f.db, "2", false);

        let summary = f.scanner.run(Campaign::SeasonalPromo).await;
        assert_eq!(summary.sent, 1);
        assert!(!summary.deferred);

        let sent = f.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "+15551");
        assert!(sent[0].body.contains("HVAC tune-ups"), "June copy: {}", sent[0].body);
        assert!(sent[0].body.starts_with("Hi Name1"));

        let records = f.db.dedup_records("1").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].category, Category::SeasonalPromo);
    }

    #[tokio::test]
    async fn test_second_run_inside_window_selects_nobody() {
        let f = fixture();
        customer(&f.db, "1", true);
        assert_eq!(f.scanner.run(Campaign::SeasonalPromo).await.sent, 1);

        // past the rate limit, still inside the 7-day dedup window
        f.clock.advance(Duration::days(2));
        let again = f.scanner.run(Campaign::SeasonalPromo).await;
        assert_eq!((again.sent, again.skipped), (0, 0));
        assert_eq!(f.transport.sent().len(), 1);

        // after the window the recipient is eligible again
        f.clock.advance(Duration::days(6));
        assert_eq!(f.scanner.run(Campaign::SeasonalPromo).await.sent, 1);
    }

    #[tokio::test]
    async fn test_quiet_hours_defer_whole_batch() {
        let f = fixture();
        customer(&f.db, "1", true);
        f.clock.set(Utc.with_ymd_and_hms(2026, 6, 16, 5, 0, 0).unwrap()); // 22:00 PDT
        let summary = f.scanner.run(Campaign::SeasonalPromo).await;
        assert!(summary.deferred);
        assert!(f.transport.sent().is_empty());
        assert!(f.limiter.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_campaign_does_nothing() {
        let mut config = OutreachConfig::default();
        config.campaigns.win_back.enabled = false;
        let f = fixture_with(config, StaticWeather::default(), None);
        customer(&f.db, "1", true);
        f.db.insert_booking("b1", "1", "carpet cleaning", t0() - Duration::days(40)).unwrap();
        assert!(f.scanner.run(Campaign::WinBack).await.deferred);
        assert!(f.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limited_member_is_skipped_not_recorded() {
        let f = fixture();
        customer(&f.db, "1", true);
        customer(&f.db, "2", true);
        f.limiter.record("1", t0() - Duration::hours(1)).unwrap();

        let summary = f.scanner.run(Campaign::SeasonalPromo).await;
        assert_eq!((summary.sent, summary.skipped), (1, 1));
        assert!(f.db.dedup_records("1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_maintenance_template_by_reminder_type() {
        let f = fixture();
        customer(&f.db, "1", true);
        f.db.insert_maintenance("1", "dryer_vent", t0() + Duration::days(3)).unwrap();
        assert_eq!(f.scanner.run(Campaign::MaintenanceReminder).await.sent, 1);
        let body = &f.transport.sent()[0].body;
        assert!(body.contains("dryer vent cleaning is due around Jun 18"), "{body}");
    }

    #[tokio::test]
    async fn test_win_back_names_last_service() {
        let f = fixture();
        customer(&f.db, "1", true);
        f.db.insert_booking("b1", "1", "carpet cleaning", t0() - Duration::days(40)).unwrap();
        assert_eq!(f.scanner.run(Campaign::WinBack).await.sent, 1);
        assert!(f.transport.sent()[0].body.contains("last carpet cleaning"));
    }

    #[tokio::test]
    async fn test_weather_only_for_severe_alerts_in_configured_zones() {
        let mut config = OutreachConfig::default();
        config.weather.zones = vec!["WAZ558".into()];

        let mild = fixture_with(config.clone(), StaticWeather::with_alert("WAZ558", "Wind Advisory", "Moderate"), None);
        customer(&mild.db, "1", true);
        assert_eq!(mild.scanner.run(Campaign::WeatherHeadsup).await.sent, 0);

        let severe = fixture_with(config, StaticWeather::with_alert("WAZ558", "Flood Warning", "Severe"), None);
        customer(&severe.db, "1", true);
        let mut elsewhere = customer(&severe.db, "2", true);
        elsewhere.service_zone = Some("ORZ006".into());
        severe.db.upsert_recipient(&elsewhere).unwrap();

        let summary = severe.scanner.run(Campaign::WeatherHeadsup).await;
        assert_eq!(summary.sent, 1);
        let sent = severe.transport.sent();
        assert_eq!(sent[0].to, "+15551");
        assert!(sent[0].body.contains("Flood Warning in effect"));
    }

    #[tokio::test]
    async fn test_same_campaign_scope_ignores_other_campaigns() {
        let mut config = OutreachConfig::default();
        config.weather.zones = vec!["WAZ558".into()];
        let f = fixture_with(config, StaticWeather::with_alert("WAZ558", "Flood Warning", "Extreme"), None);
        customer(&f.db, "1", true);

        assert_eq!(f.scanner.run(Campaign::SeasonalPromo).await.sent, 1);
        f.clock.advance(Duration::days(2));
        // weather dedups only against weather, so the promo does not exclude
        assert_eq!(f.scanner.run(Campaign::WeatherHeadsup).await.sent, 1);
        // but seasonal (any-campaign scope) now sees the weather record
        f.clock.advance(Duration::days(6));
        assert_eq!(f.scanner.run(Campaign::SeasonalPromo).await.sent, 0);
    }

    #[tokio::test]
    async fn test_store_failure_means_zero_recipients() {
        let f = fixture_with(OutreachConfig::default(), StaticWeather::default(), Some(Arc::new(BrokenStore)));
        customer(&f.db, "1", true);
        let summary = f.scanner.run(Campaign::SeasonalPromo).await;
        assert_eq!((summary.sent, summary.skipped, summary.deferred), (0, 0, false));
    }

    #[tokio::test]
    async fn test_follow_ups_fire_once_when_due() {
        let f = fixture();
        customer(&f.db, "1", true);
        f.db.schedule_follow_up(&FollowUp {
            id: "f1".into(),
            booking_id: "b1".into(),
            recipient_id: "1".into(),
            service: "deep clean".into(),
            due_at: t0() + Duration::hours(2),
            fired_at: None,
        })
        .await
        .unwrap();

        assert_eq!(f.scanner.run(Campaign::JobFollowUp).await.sent, 0);
        f.clock.advance(Duration::hours(2));
        assert_eq!(f.scanner.run(Campaign::JobFollowUp).await.sent, 1);
        f.clock.advance(Duration::minutes(15));
        assert_eq!(f.scanner.run(Campaign::JobFollowUp).await.sent, 0);

        let sent = f.transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("deep clean"));
    }

    #[tokio::test]
    async fn test_rate_limited_follow_up_stays_pending() {
        let f = fixture();
        customer(&f.db, "1", true);
        f.limiter.record("1", t0()).unwrap();
        f.db.schedule_follow_up(&FollowUp {
            id: "f1".into(),
            booking_id: "b1".into(),
            recipient_id: "1".into(),
            service: "deep clean".into(),
            due_at: t0(),
            fired_at: None,
        })
        .await
        .unwrap();

        assert_eq!(f.scanner.run(Campaign::JobFollowUp).await.skipped, 1);
        // next day, inside allowed hours, quota free again
        f.clock.advance(Duration::hours(24));
        assert_eq!(f.scanner.run(Campaign::JobFollowUp).await.sent, 1);
    }
}
