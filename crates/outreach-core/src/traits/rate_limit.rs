//! Per-recipient send timestamps backing the delivery gate's rate limit.

use chrono::{DateTime, Duration, Utc};

use crate::error::Result;

/// Holds the last non-emergency send per recipient.
///
/// `try_acquire` must be atomic: two concurrent callers for the same
/// recipient inside one window may not both get `true`.
pub trait RateLimitStore: Send + Sync {
    /// Last recorded non-emergency send.
    fn last_sent(&self, recipient_id: &str) -> Result<Option<DateTime<Utc>>>;

    /// Overwrite the timestamp unconditionally.
    fn record(&self, recipient_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Record `now` only if the previous send is at least `window` old (or
    /// absent). Returns whether the slot was taken.
    fn try_acquire(&self, recipient_id: &str, now: DateTime<Utc>, window: Duration) -> Result<bool>;
}
