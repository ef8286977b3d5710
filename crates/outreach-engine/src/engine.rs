//! Outreach engine: wires the gate, handlers, scanners and matcher
//! around one set of collaborators.
//!
//! Entry points never return errors to the caller's business operation.
//! `fire` is the fire-and-forget form used from request handlers;
//! `spawn_campaign_loop` is the optional in-process scheduler for
//! deployments without an external cron.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use outreach_core::config::OutreachConfig;
use outreach_core::error::Result;
use outreach_core::traits::{
    CohortStore, EmergencyLog, FollowUpStore, MetricSource, ProviderPool, RateLimitStore, RecipientDirectory,
    ReferralLedger, Transport, WeatherSource,
};
use outreach_core::types::{EmergencyDispatchRequest, ScanSummary};
use outreach_core::Clock;
use tokio::task::JoinHandle;

use crate::campaigns::{Campaign, CampaignScanner};
use crate::cron::CronSchedule;
use crate::dispatch::Dispatcher;
use crate::emergency::EmergencyMatcher;
use crate::gate::DeliveryGate;
use crate::lifecycle::{HandlerOutcome, LifecycleEvent, LifecycleHandlers};
use crate::outbox::Outbox;
use crate::persistence::OutreachDb;
use crate::threshold::{ThresholdDetector, TierLadder};

/// Everything the engine needs from the surrounding application.
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn RecipientDirectory>,
    pub cohorts: Arc<dyn CohortStore>,
    pub follow_ups: Arc<dyn FollowUpStore>,
    pub metrics: Arc<dyn MetricSource>,
    pub referrals: Arc<dyn ReferralLedger>,
    pub pros: Arc<dyn ProviderPool>,
    pub emergencies: Arc<dyn EmergencyLog>,
    pub rate_limits: Arc<dyn RateLimitStore>,
    pub weather: Arc<dyn WeatherSource>,
    pub transport: Arc<dyn Transport>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Every persistent collaborator backed by one SQLite store.
    pub fn from_db(
        db: Arc<OutreachDb>,
        rate_limits: Arc<dyn RateLimitStore>,
        weather: Arc<dyn WeatherSource>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            directory: db.clone(),
            cohorts: db.clone(),
            follow_ups: db.clone(),
            metrics: db.clone(),
            referrals: db.clone(),
            pros: db.clone(),
            emergencies: db,
            rate_limits,
            weather,
            transport,
            clock,
        }
    }
}

pub struct OutreachEngine {
    config: Arc<OutreachConfig>,
    region: Tz,
    outbox: Arc<Outbox>,
    lifecycle: LifecycleHandlers,
    scanner: CampaignScanner,
    emergencies: Arc<dyn EmergencyLog>,
    schedules: Vec<(Campaign, CronSchedule)>,
    clock: Arc<dyn Clock>,
}

impl OutreachEngine {
    /// Validate the config, parse every campaign schedule and wire the parts.
    pub fn new(config: OutreachConfig, c: Collaborators) -> Result<Self> {
        config.validate()?;
        let region = config.gate.region_tz()?;
        let schedules = Campaign::ALL
            .iter()
            .map(|campaign| {
                let schedule = campaign.settings(&config).schedule.parse::<CronSchedule>()?;
                Ok((*campaign, schedule))
            })
            .collect::<Result<Vec<_>>>()?;

        let gate = DeliveryGate::from_config(&config.gate, c.rate_limits.clone(), c.clock.clone())?;
        let dispatcher = Dispatcher::new(c.transport.clone(), Duration::from_secs(config.transport.timeout_secs));
        let outbox = Arc::new(Outbox::new(Arc::new(gate), Arc::new(dispatcher)));

        let threshold = Arc::new(ThresholdDetector::new(
            TierLadder::new(&config.loyalty),
            TierLadder::new(&config.fee),
            c.metrics.clone(),
            c.directory.clone(),
            outbox.clone(),
        ));
        let matcher = Arc::new(EmergencyMatcher::new(
            config.emergency.clone(),
            c.pros.clone(),
            c.emergencies.clone(),
            outbox.clone(),
            c.clock.clone(),
        ));
        let lifecycle = LifecycleHandlers::new(
            config.follow_up.clone(),
            c.directory.clone(),
            c.follow_ups.clone(),
            c.referrals.clone(),
            threshold,
            matcher,
            outbox.clone(),
            c.clock.clone(),
        );

        let config = Arc::new(config);
        let scanner = CampaignScanner::new(
            config.clone(),
            c.cohorts.clone(),
            c.follow_ups.clone(),
            c.directory.clone(),
            c.weather.clone(),
            outbox.clone(),
            c.clock.clone(),
        );

        tracing::info!(
            "✅ Outreach engine ready (transport: {}, region: {region})",
            outbox.dispatcher().transport_name()
        );
        Ok(Self {
            config,
            region,
            outbox,
            lifecycle,
            scanner,
            emergencies: c.emergencies,
            schedules,
            clock: c.clock,
        })
    }

    pub fn config(&self) -> &OutreachConfig {
        &self.config
    }

    pub fn gate(&self) -> &DeliveryGate {
        self.outbox.gate()
    }

    /// Handle one lifecycle event to completion.
    pub async fn handle(&self, event: LifecycleEvent) -> HandlerOutcome {
        self.lifecycle.handle(event).await
    }

    /// Fire-and-forget: the caller's operation never waits on or sees the
    /// outcome unless it keeps the handle.
    pub fn fire(self: &Arc<Self>, event: LifecycleEvent) -> JoinHandle<HandlerOutcome> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let name = event.name();
            let outcome = engine.handle(event).await;
            tracing::debug!("📨 {name} handled: {outcome:?}");
            outcome
        })
    }

    pub async fn run_campaign(&self, campaign: Campaign) -> ScanSummary {
        self.scanner.run(campaign).await
    }

    /// Enabled campaigns with a fire time in `(since, now]` on the region clock.
    pub fn due_campaigns(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> Vec<Campaign> {
        self.schedules
            .iter()
            .filter(|(campaign, schedule)| {
                campaign.settings(&self.config).enabled && schedule.is_due(since, now, self.region)
            })
            .map(|(campaign, _)| *campaign)
            .collect()
    }

    /// Requests waiting for a human dispatcher, newest first.
    pub async fn escalations(&self, limit: u32) -> Result<Vec<EmergencyDispatchRequest>> {
        self.emergencies.manual_escalations(limit).await
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

/// Run due campaigns on a fixed tick, forever.
pub async fn spawn_campaign_loop(engine: Arc<OutreachEngine>, check_interval_secs: u64) {
    tracing::info!("⏰ Campaign loop started (check every {check_interval_secs}s)");
    for (campaign, schedule) in &engine.schedules {
        tracing::info!("📅 {campaign}: '{}'", schedule.expression());
    }

    let mut interval = tokio::time::interval(Duration::from_secs(check_interval_secs.max(1)));
    let mut last_check = engine.now();

    loop {
        interval.tick().await;
        let now = engine.now();
        for campaign in engine.due_campaigns(last_check, now) {
            tracing::info!("🔔 Campaign triggered: {campaign}");
            let summary = engine.run_campaign(campaign).await;
            if summary.deferred {
                tracing::info!("⏸️ {campaign} deferred until its next slot");
            }
        }
        last_check = now;
    }
}
