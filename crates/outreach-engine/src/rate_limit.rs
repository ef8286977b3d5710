//! In-process rate-limit map.
//!
//! One timestamp per recipient, overwritten on every non-emergency attempt.
//! Lost on restart and not shared between instances; enable
//! `gate.shared_rate_limit` to use the SQLite-backed store instead.

use chrono::{DateTime, Duration, Utc};
use outreach_core::error::{OutreachError, Result};
use outreach_core::traits::RateLimitStore;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryRateLimiter {
    last_sent: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.last_sent.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> OutreachError {
    OutreachError::Store(format!("rate-limit map poisoned: {e}"))
}

impl RateLimitStore for MemoryRateLimiter {
    fn last_sent(&self, recipient_id: &str) -> Result<Option<DateTime<Utc>>> {
        let map = self.last_sent.lock().map_err(poisoned)?;
        Ok(map.get(recipient_id).copied())
    }

    fn record(&self, recipient_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut map = self.last_sent.lock().map_err(poisoned)?;
        map.insert(recipient_id.to_string(), at);
        Ok(())
    }

    fn try_acquire(&self, recipient_id: &str, now: DateTime<Utc>, window: Duration) -> Result<bool> {
        let mut map = self.last_sent.lock().map_err(poisoned)?;
        if let Some(last) = map.get(recipient_id) {
            if now - *last < window {
                return Ok(false);
            }
        }
        map.insert(recipient_id.to_string(), now);
        Ok(true)
    }
}
