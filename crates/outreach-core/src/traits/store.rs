//! Persistent query surface: cohorts, dedup ledger, follow-ups, emergencies.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{Category, CohortRow, DedupRecord, EmergencyDispatchRequest, FollowUp};

/// Eligibility predicate for one scanner run.
#[derive(Debug, Clone, PartialEq)]
pub enum CohortQuery {
    /// Maintenance due between now and `within_days` from now.
    MaintenanceDue { within_days: u32 },
    /// Customers who booked before but not in the last `days`.
    Inactive { days: u32 },
    /// Customers with zero home-health scans, inactive `inactive_days`+.
    HomeHealthDormant { inactive_days: u32 },
    /// Every customer (seasonal promotions).
    AllCustomers,
    /// Customers whose home lies in a weather zone.
    ServiceZone { zone: String },
}

/// Anti-join applied inside the cohort query.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupFilter {
    pub window_days: u32,
    /// `None` excludes on any prior campaign message.
    pub category: Option<Category>,
}

/// Cohort selection plus the dedup ledger.
#[async_trait]
pub trait CohortStore: Send + Sync {
    /// Select consenting recipients matching `query` that have no dedup
    /// record inside `dedup`'s window.
    async fn select_cohort(
        &self,
        query: &CohortQuery,
        dedup: &DedupFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<CohortRow>>;

    async fn has_recent_record(&self, recipient_id: &str, window_days: u32, now: DateTime<Utc>) -> Result<bool>;

    async fn record_dedup(&self, record: &DedupRecord) -> Result<()>;
}

/// Durable post-completion follow-ups.
#[async_trait]
pub trait FollowUpStore: Send + Sync {
    async fn schedule_follow_up(&self, follow_up: &FollowUp) -> Result<()>;

    async fn due_follow_ups(&self, now: DateTime<Utc>) -> Result<Vec<FollowUp>>;

    async fn mark_follow_up_fired(&self, id: &str, at: DateTime<Utc>) -> Result<()>;
}

/// Durable record of emergency dispatch requests.
#[async_trait]
pub trait EmergencyLog: Send + Sync {
    /// Insert or update by id.
    async fn save_request(&self, request: &EmergencyDispatchRequest) -> Result<()>;

    /// Requests that ended in manual escalation, newest first.
    async fn manual_escalations(&self, limit: u32) -> Result<Vec<EmergencyDispatchRequest>>;
}
