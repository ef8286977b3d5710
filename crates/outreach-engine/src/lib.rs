//! # Outreach Engine
//!
//! Proactive outreach and emergency dispatch for a home-services marketplace.
//! Every non-emergency message passes one delivery gate; scheduled campaigns
//! share one dedup ledger; urgent inbound messages are matched to an
//! available pro without waiting on a human.
//!
//! ## Architecture
//! ```text
//! Lifecycle event (booking, payment, referral, sensor, inbound)
//!   └── LifecycleHandlers ──┬── ThresholdDetector (loyalty / fee tiers)
//!                           ├── EmergencyMatcher  (keywords → pro → customer)
//!                           └── FollowUpStore     (completed job + 2h)
//!
//! Cron tick ("0 10 * * *", "0 */6 * * *", ...)
//!   └── CampaignScanner
//!         ├── batch quiet-hours check (region clock)
//!         ├── CohortStore.select_cohort ⨝ dedup ledger
//!         └── per recipient: gate → dispatch → DedupRecord
//!
//! Outbox
//!   ├── DeliveryGate (quiet hours + 24h rate limit, emergency bypass)
//!   └── Dispatcher → Transport (SMS / email, bounded by a timeout)
//! ```

pub mod campaigns;
pub mod cron;
pub mod dispatch;
pub mod emergency;
pub mod engine;
pub mod gate;
pub mod lifecycle;
pub mod outbox;
pub mod persistence;
pub mod rate_limit;
pub mod templates;
pub mod threshold;
pub mod weather;

#[cfg(test)]
mod testing;

pub use campaigns::{Campaign, CampaignScanner};
pub use cron::CronSchedule;
pub use engine::{Collaborators, OutreachEngine, spawn_campaign_loop};
pub use gate::{DeliveryGate, GateDecision, GateRejection, Urgency};
pub use lifecycle::{HandlerOutcome, LifecycleEvent};
pub use outbox::{Outbox, SendOutcome};
pub use persistence::OutreachDb;
pub use rate_limit::MemoryRateLimiter;
pub use weather::NwsWeatherSource;
