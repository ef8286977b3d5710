//! Threshold detector: tier crossings over monotonic metrics.
//!
//! Called after a metric mutation is committed, with the delta that was
//! applied. The prior value is reconstructed as `current - delta`, so a
//! crash between commit and notification can only lose a message.

use std::sync::Arc;

use outreach_core::config::{TierConfig, TierLadderConfig};
use outreach_core::traits::{MetricSource, RecipientDirectory};
use outreach_core::types::{Category, Metric, OutboundMessage};
use serde::Serialize;

use crate::gate::Urgency;
use crate::outbox::Outbox;
use crate::templates::{self, Fields};

/// Step function over ascending breakpoints.
#[derive(Debug, Clone)]
pub struct TierLadder {
    tiers: Vec<TierConfig>,
}

impl TierLadder {
    pub fn new(config: &TierLadderConfig) -> Self {
        let mut tiers = config.tiers.clone();
        tiers.sort_by(|a, b| a.min.total_cmp(&b.min));
        Self { tiers }
    }

    /// Index of the highest tier whose minimum is `<= value`.
    pub fn index_for(&self, value: f64) -> Option<usize> {
        self.tiers.iter().rposition(|t| value >= t.min)
    }

    pub fn tier_for(&self, value: f64) -> Option<&TierConfig> {
        self.index_for(value).map(|i| &self.tiers[i])
    }
}

/// A tier transition caused by one metric change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierChange {
    pub recipient_id: String,
    pub metric: Metric,
    pub from: Option<String>,
    pub to: Option<String>,
    pub prior_value: f64,
    pub new_value: f64,
    pub upgraded: bool,
    /// Whether the congratulation actually went out.
    pub notified: bool,
}

pub struct ThresholdDetector {
    loyalty: TierLadder,
    fee: TierLadder,
    metrics: Arc<dyn MetricSource>,
    directory: Arc<dyn RecipientDirectory>,
    outbox: Arc<Outbox>,
}

impl ThresholdDetector {
    pub fn new(
        loyalty: TierLadder,
        fee: TierLadder,
        metrics: Arc<dyn MetricSource>,
        directory: Arc<dyn RecipientDirectory>,
        outbox: Arc<Outbox>,
    ) -> Self {
        Self {
            loyalty,
            fee,
            metrics,
            directory,
            outbox,
        }
    }

    fn ladder(&self, metric: Metric) -> &TierLadder {
        match metric {
            Metric::LoyaltyPoints => &self.loyalty,
            Metric::CertificationCount => &self.fee,
        }
    }

    /// `onMetricChanged`. Returns the change when the tier moved; only an
    /// upward move sends a congratulation.
    pub async fn on_metric_changed(&self, recipient_id: &str, metric: Metric, delta: f64) -> Option<TierChange> {
        let new_value = match self.metrics.current_value(recipient_id, metric).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("⚠️ Could not read {metric} for {recipient_id}: {e}");
                return None;
            }
        };
        let prior_value = new_value - delta;

        let ladder = self.ladder(metric);
        let prior_index = ladder.index_for(prior_value);
        let new_index = ladder.index_for(new_value);
        if prior_index == new_index {
            return None;
        }

        let upgraded = new_index > prior_index;
        let new_tier = ladder.tier_for(new_value);
        let mut change = TierChange {
            recipient_id: recipient_id.to_string(),
            metric,
            from: ladder.tier_for(prior_value).map(|t| t.name.clone()),
            to: new_tier.map(|t| t.name.clone()),
            prior_value,
            new_value,
            upgraded,
            notified: false,
        };

        let Some(tier) = new_tier.filter(|_| upgraded) else {
            tracing::info!("📉 {recipient_id} moved down to {:?} on {metric}, not notifying", change.to);
            return Some(change);
        };
        tracing::info!("🏆 {recipient_id} reached {} ({metric} {prior_value} → {new_value})", tier.name);

        let recipient = match self.directory.get_user(recipient_id).await {
            Ok(Some(r)) => r,
            Ok(None) => {
                tracing::warn!("⚠️ Tier change for unknown recipient {recipient_id}");
                return Some(change);
            }
            Err(e) => {
                tracing::warn!("⚠️ Recipient lookup for {recipient_id} failed: {e}");
                return Some(change);
            }
        };

        let fields = Fields::new()
            .with("name", recipient.greeting_name())
            .with("tier", &tier.name)
            .with("perk", &tier.perk)
            .with("value", new_value);
        let (category, template) = match metric {
            Metric::LoyaltyPoints => (Category::LoyaltyTier, templates::LOYALTY_TIER),
            Metric::CertificationCount => (Category::FeeTier, templates::FEE_TIER),
        };
        let (subject, body) = fields.render(template);
        let outcome = self
            .outbox
            .send(&recipient, Urgency::Normal, &OutboundMessage::new(category, subject, body))
            .await;
        change.notified = outcome.is_sent();
        Some(change)
    }
}
