//! Lightweight cron expression parser for campaign schedules.
//! Supports: "MIN HOUR DOM MON DOW" (5-field, no seconds)
//! Per field: *, */N, N, A-B, A-B/N and comma lists of those.
//! Example: "0 */6 * * *" = every six hours on the hour
//!
//! Schedules are evaluated on a wall clock (the region timezone), so
//! "0 10 * * *" means 10:00 local, DST included.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use chrono_tz::Tz;
use outreach_core::error::{OutreachError, Result};

/// Parsed 5-field cron expression. Each field is a bitmask of allowed values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl FromStr for CronSchedule {
    type Err = OutreachError;

    fn from_str(expression: &str) -> Result<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(OutreachError::Config(format!(
                "Invalid cron expression '{expression}' (need 5 fields: MIN HOUR DOM MON DOW)"
            )));
        }
        let field = |spec: &str, min: u32, max: u32, name: &str| {
            parse_field(spec, min, max)
                .ok_or_else(|| OutreachError::Config(format!("Invalid {name} field '{spec}' in '{expression}'")))
        };

        let mut days_of_week = field(parts[4], 0, 7, "day-of-week")?;
        // 7 is an alias for Sunday
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            expression: expression.to_string(),
            minutes: field(parts[0], 0, 59, "minute")?,
            hours: field(parts[1], 0, 23, "hour")?,
            days_of_month: field(parts[2], 1, 31, "day-of-month")?,
            months: field(parts[3], 1, 12, "month")?,
            days_of_week,
            dom_restricted: parts[2] != "*",
            dow_restricted: parts[4] != "*",
        })
    }
}

impl CronSchedule {
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Whether the minute containing `at` is a fire time on `tz`'s clock.
    pub fn matches(&self, at: DateTime<Utc>, tz: Tz) -> bool {
        let local = at.with_timezone(&tz);
        self.day_matches(&local) && bit(self.hours, local.hour()) && bit(self.minutes, local.minute())
    }

    fn day_matches(&self, local: &DateTime<Tz>) -> bool {
        if !bit(self.months, local.month()) {
            return false;
        }
        let dom = bit(self.days_of_month, local.day());
        let dow = bit(self.days_of_week, local.weekday().num_days_from_sunday());
        // Classic cron: when both day fields are restricted, either may match.
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            _ => dom && dow,
        }
    }

    /// First fire time strictly after `after`, searching up to a year ahead.
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let mut candidate = after + Duration::minutes(1);
        candidate = candidate.with_second(0)?.with_nanosecond(0)?;
        let limit = after + Duration::days(366);

        while candidate <= limit {
            let local = candidate.with_timezone(&tz);
            if !self.day_matches(&local) || !bit(self.hours, local.hour()) {
                // Jump to the next local hour boundary.
                candidate += Duration::minutes(i64::from(60 - local.minute()));
                continue;
            }
            if bit(self.minutes, local.minute()) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }

    /// True when a fire time falls in `(since, now]`.
    pub fn is_due(&self, since: DateTime<Utc>, now: DateTime<Utc>, tz: Tz) -> bool {
        self.next_after(since, tz).is_some_and(|next| next <= now)
    }
}

fn bit(mask: u64, value: u32) -> bool {
    mask & (1u64 << value) != 0
}

/// Parse a cron field into a bitmask of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> Option<u64> {
    let mut mask = 0u64;
    for part in field.split(',') {
        let part = part.trim();
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, step.parse::<u32>().ok()?),
            None => (part, 1),
        };
        if step == 0 {
            return None;
        }
        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (a.parse().ok()?, b.parse().ok()?)
        } else {
            let n: u32 = range.parse().ok()?;
            // "N/step" runs from N to the end of the field.
            if part.contains('/') { (n, max) } else { (n, n) }
        };
        if lo < min || hi > max || lo > hi {
            return None;
        }
        for v in (lo..=hi).step_by(step as usize) {
            mask |= 1u64 << v;
        }
    }
    Some(mask)
}
