//! Read-mostly collaborators: user lookup, metrics, provider pool, weather.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Metric, ProCandidate, Recipient, WeatherAlert};

/// `getUser(id)`.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn get_user(&self, id: &str) -> Result<Option<Recipient>>;
}

/// Current, committed value of a tiering metric.
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn current_value(&self, recipient_id: &str, metric: Metric) -> Result<f64>;
}

/// Credits both sides of a completed referral.
#[async_trait]
pub trait ReferralLedger: Send + Sync {
    /// Credit referrer and referee in one transaction. Returns `false` when
    /// this referee was already credited.
    async fn credit_referral(&self, referrer_id: &str, referee_id: &str, amount_cents: u32) -> Result<bool>;
}

/// Pros that are available, eligible for jobs and background-cleared.
#[async_trait]
pub trait ProviderPool: Send + Sync {
    async fn emergency_candidates(&self, limit: u32) -> Result<Vec<ProCandidate>>;
}

/// Active weather alerts per service zone.
///
/// Implementations degrade to an empty list on failure or timeout.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn active_alerts(&self, zone: &str) -> Vec<WeatherAlert>;
}
