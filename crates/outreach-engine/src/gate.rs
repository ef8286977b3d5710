//! Delivery gate: admission control for every outbound send.
//!
//! Two checks, both skipped for emergencies:
//! - quiet hours: sends only inside `[start, end)` on the recipient's clock
//! - rate limit: at most one non-emergency send per recipient per window
//!
//! The quota is spent on the attempt, not on confirmed delivery: `admit`
//! records the timestamp before the transport is called.

use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;
use outreach_core::config::GateConfig;
use outreach_core::error::Result;
use outreach_core::traits::RateLimitStore;
use outreach_core::types::Recipient;
use outreach_core::Clock;
use serde::Serialize;

/// How hard a send pushes through the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    /// Quiet hours and rate limit both apply.
    Normal,
    /// Ignores a spent quota but still honours quiet hours.
    TimeSensitive,
    /// Bypasses everything and never touches the quota.
    Emergency,
}

/// Why a send was held back. Not an error: a normal, logged outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateRejection {
    QuietHours,
    RateLimited,
    /// Rate-limit store could not be read; non-emergency sends fail closed.
    LimiterUnavailable,
}

/// `{allowed, reason?}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateDecision {
    pub allowed: bool,
    pub reason: Option<GateRejection>,
}

impl GateDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: GateRejection) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Allowed sending window on a local clock.
#[derive(Debug, Clone)]
pub struct QuietHours {
    start_hour: u32,
    end_hour: u32,
    region: Tz,
}

impl QuietHours {
    pub fn new(start_hour: u32, end_hour: u32, region: Tz) -> Self {
        Self {
            start_hour,
            end_hour,
            region,
        }
    }

    pub fn from_config(config: &GateConfig) -> Result<Self> {
        Ok(Self::new(
            config.allowed_start_hour,
            config.allowed_end_hour,
            config.region_tz()?,
        ))
    }

    pub fn region(&self) -> Tz {
        self.region
    }

    /// Recipient timezone if it parses, otherwise the region clock.
    pub fn tz_for(&self, timezone: Option<&str>) -> Tz {
        match timezone {
            Some(name) => name.parse::<Tz>().unwrap_or_else(|_| {
                tracing::debug!("Unknown recipient timezone '{name}', using region clock");
                self.region
            }),
            None => self.region,
        }
    }

    /// True outside `[start, end)` local time.
    pub fn is_quiet_at(&self, now: DateTime<Utc>, timezone: Option<&str>) -> bool {
        let hour = now.with_timezone(&self.tz_for(timezone)).hour();
        !(hour >= self.start_hour && hour < self.end_hour)
    }
}

/// Quiet hours + per-recipient rate limit.
pub struct DeliveryGate {
    quiet: QuietHours,
    limiter: Arc<dyn RateLimitStore>,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl DeliveryGate {
    pub fn new(
        quiet: QuietHours,
        limiter: Arc<dyn RateLimitStore>,
        window: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            quiet,
            limiter,
            window,
            clock,
        }
    }

    pub fn from_config(
        config: &GateConfig,
        limiter: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Ok(Self::new(
            QuietHours::from_config(config)?,
            limiter,
            Duration::hours(config.rate_limit_hours),
            clock,
        ))
    }

    pub fn quiet_hours(&self) -> &QuietHours {
        &self.quiet
    }

    /// Pure check, no side effects.
    pub fn can_send(&self, recipient: &Recipient, urgency: Urgency) -> GateDecision {
        if urgency == Urgency::Emergency {
            return GateDecision::allow();
        }
        let now = self.clock.now();
        if self.quiet.is_quiet_at(now, recipient.timezone.as_deref()) {
            return GateDecision::deny(GateRejection::QuietHours);
        }
        if urgency == Urgency::TimeSensitive {
            return GateDecision::allow();
        }
        match self.limiter.last_sent(&recipient.id) {
            Ok(Some(last)) if now - last < self.window => GateDecision::deny(GateRejection::RateLimited),
            Ok(_) => GateDecision::allow(),
            Err(e) => {
                tracing::warn!("⚠️ Rate-limit lookup failed for {}: {e}", recipient.id);
                GateDecision::deny(GateRejection::LimiterUnavailable)
            }
        }
    }

    /// Overwrite the recipient's last-sent timestamp with now.
    pub fn record_send(&self, recipient_id: &str) {
        if let Err(e) = self.limiter.record(recipient_id, self.clock.now()) {
            tracing::warn!("⚠️ Failed to record send for {recipient_id}: {e}");
        }
    }

    /// Check and, when allowed, spend the quota in one step.
    pub fn admit(&self, recipient: &Recipient, urgency: Urgency) -> GateDecision {
        match urgency {
            Urgency::Emergency => GateDecision::allow(),
            Urgency::TimeSensitive => {
                if self.quiet.is_quiet_at(self.clock.now(), recipient.timezone.as_deref()) {
                    return GateDecision::deny(GateRejection::QuietHours);
                }
                self.record_send(&recipient.id);
                GateDecision::allow()
            }
            Urgency::Normal => {
                if self.quiet.is_quiet_at(self.clock.now(), recipient.timezone.as_deref()) {
                    return GateDecision::deny(GateRejection::QuietHours);
                }
                self.acquire(&recipient.id)
            }
        }
    }

    /// Rate limit only, for batch members whose run already passed the
    /// batch-level quiet-hours check.
    pub fn admit_batch_member(&self, recipient_id: &str) -> GateDecision {
        self.acquire(recipient_id)
    }

    /// Quiet hours on the region clock, checked once per scanner run.
    pub fn batch_in_quiet_hours(&self) -> bool {
        self.quiet.is_quiet_at(self.clock.now(), None)
    }

    fn acquire(&self, recipient_id: &str) -> GateDecision {
        match self.limiter.try_acquire(recipient_id, self.clock.now(), self.window) {
            Ok(true) => GateDecision::allow(),
            Ok(false) => GateDecision::deny(GateRejection::RateLimited),
            Err(e) => {
                tracing::warn!("⚠️ Rate-limit acquire failed for {recipient_id}: {e}");
                GateDecision::deny(GateRejection::LimiterUnavailable)
            }
        }
    }
}
