//! SQLite-backed reference store for every persistent collaborator.
//!
//! The surrounding application owns users, bookings and pros; this schema is
//! the minimal slice the engine reads, plus the tables the engine owns
//! itself (dedup ledger, rate limits, follow-ups, emergency requests).
//! All timestamps are epoch milliseconds so window predicates stay numeric.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use outreach_core::error::{OutreachError, Result};
use outreach_core::traits::{
    CohortQuery, CohortStore, DedupFilter, EmergencyLog, FollowUpStore, MetricSource, ProviderPool,
    RateLimitStore, RecipientDirectory, ReferralLedger,
};
use outreach_core::{Clock, SystemClock};
use outreach_core::types::{
    Category, CohortRow, ConsentFlags, DedupRecord, EmergencyDispatchRequest, FollowUp, GeoPoint, Metric,
    ProCandidate, Recipient, RecipientRole,
};
use rusqlite::{Connection, OptionalExtension, Row, named_params, params};

/// SQLite store shared by the engine's collaborators.
pub struct OutreachDb {
    conn: Mutex<Connection>,
    /// Stamps rows the store creates on its own (`created_ms`).
    clock: Arc<dyn Clock>,
}

/// Dispatch-relevant attributes of a pro.
#[derive(Debug, Clone, PartialEq)]
pub struct ProProfile {
    pub recipient_id: String,
    pub display_name: String,
    pub available: bool,
    pub can_accept_jobs: bool,
    pub background_cleared: bool,
    pub rating: Option<f64>,
    pub certification_count: u32,
}

fn store_err(e: rusqlite::Error) -> OutreachError {
    OutreachError::Store(e.to_string())
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn window_start(now: DateTime<Utc>, days: u32) -> i64 {
    (now - Duration::days(i64::from(days))).timestamp_millis()
}

const RECIPIENT_COLUMNS: &str = "r.id, r.role, r.first_name, r.phone, r.email, r.proactive_consent, \
     r.sms_ok, r.email_ok, r.timezone, r.service_zone, r.latitude, r.longitude";

/// Index of the first column after `RECIPIENT_COLUMNS`.
const EXTRA_COLUMN: usize = 12;

/// Excludes anyone contacted by a campaign inside the window.
const DEDUP_ANTI_JOIN: &str = "NOT EXISTS (SELECT 1 FROM outreach_dedup d \
     WHERE d.recipient_id = r.id AND d.sent_ms >= :since \
     AND (:category IS NULL OR d.category = :category))";

fn recipient_from_row(row: &Row<'_>) -> rusqlite::Result<Recipient> {
    let role: String = row.get(1)?;
    let lat: Option<f64> = row.get(10)?;
    let lon: Option<f64> = row.get(11)?;
    Ok(Recipient {
        id: row.get(0)?,
        role: if role == "pro" {
            RecipientRole::Pro
        } else {
            RecipientRole::Customer
        },
        first_name: row.get(2)?,
        phone: row.get(3)?,
        email: row.get(4)?,
        consent: ConsentFlags {
            proactive: row.get::<_, i64>(5)? != 0,
            sms: row.get::<_, i64>(6)? != 0,
            email: row.get::<_, i64>(7)? != 0,
        },
        timezone: row.get(8)?,
        service_zone: row.get(9)?,
        location: lat.zip(lon).map(|(lat, lon)| GeoPoint { lat, lon }),
    })
}

impl OutreachDb {
    /// Open or create the database file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| OutreachError::Store(format!("DB open: {e}")))?;
        // WAL lets several engine instances share the rate-limit table.
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        let db = Self {
            conn: Mutex::new(conn),
            clock: Arc::new(SystemClock),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Fresh in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        let db = Self {
            conn: Mutex::new(conn),
            clock: Arc::new(SystemClock),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Use the engine's clock for row creation times.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| OutreachError::Store(format!("Lock: {e}")))
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            -- Slice of the application's user table
            CREATE TABLE IF NOT EXISTS recipients (
                id TEXT PRIMARY KEY,
                role TEXT NOT NULL DEFAULT 'customer',   -- 'customer' | 'pro'
                first_name TEXT,
                phone TEXT,
                email TEXT,
                proactive_consent INTEGER NOT NULL DEFAULT 0,
                sms_ok INTEGER NOT NULL DEFAULT 1,
                email_ok INTEGER NOT NULL DEFAULT 1,
                timezone TEXT,
                service_zone TEXT,
                latitude REAL,
                longitude REAL,
                loyalty_points REAL NOT NULL DEFAULT 0,
                last_active_ms INTEGER,
                created_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS bookings (
                id TEXT PRIMARY KEY,
                customer_id TEXT NOT NULL,
                service TEXT NOT NULL,
                created_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_bookings_customer ON bookings(customer_id, created_ms);

            CREATE TABLE IF NOT EXISTS maintenance_schedules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recipient_id TEXT NOT NULL,
                reminder_type TEXT NOT NULL,     -- 'gutter_cleaning', 'hvac_filter', ...
                due_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS home_scans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recipient_id TEXT NOT NULL,
                scanned_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS pro_profiles (
                recipient_id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                is_available INTEGER NOT NULL DEFAULT 0,
                can_accept_jobs INTEGER NOT NULL DEFAULT 0,
                background_cleared INTEGER NOT NULL DEFAULT 0,
                rating REAL,
                certification_count INTEGER NOT NULL DEFAULT 0
            );

            -- Dedup ledger: one row per scanner-driven send
            CREATE TABLE IF NOT EXISTS outreach_dedup (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recipient_id TEXT NOT NULL,
                category TEXT NOT NULL,
                sent_ms INTEGER NOT NULL,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_dedup_recipient ON outreach_dedup(recipient_id, sent_ms);

            -- Shared rate-limit map (gate.shared_rate_limit)
            CREATE TABLE IF NOT EXISTS rate_limits (
                recipient_id TEXT PRIMARY KEY,
                last_sent_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS follow_ups (
                id TEXT PRIMARY KEY,
                booking_id TEXT NOT NULL UNIQUE,
                recipient_id TEXT NOT NULL,
                service TEXT NOT NULL,
                due_ms INTEGER NOT NULL,
                fired_ms INTEGER
            );

            CREATE TABLE IF NOT EXISTS referral_credits (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                referee_id TEXT NOT NULL,
                recipient_id TEXT NOT NULL,
                role TEXT NOT NULL,              -- 'referrer' | 'referee'
                amount_cents INTEGER NOT NULL,
                created_ms INTEGER NOT NULL,
                UNIQUE (referee_id, role)
            );

            CREATE TABLE IF NOT EXISTS emergency_requests (
                id TEXT PRIMARY KEY,
                requester_id TEXT NOT NULL,
                raw_message TEXT NOT NULL,
                location_hint TEXT,
                candidates TEXT NOT NULL DEFAULT '[]',   -- JSON array
                selected TEXT,                           -- JSON object
                eta_minutes INTEGER,
                state TEXT NOT NULL,
                created_ms INTEGER NOT NULL,
                updated_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_emergency_state ON emergency_requests(state, created_ms);
            ",
        )
        .map_err(|e| OutreachError::Store(format!("Migration: {e}")))?;
        Ok(())
    }

    // ─── Application-side writes ─────────────────────────────

    /// Insert or replace a recipient, keeping points and activity.
    pub fn upsert_recipient(&self, r: &Recipient) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO recipients
             (id, role, first_name, phone, email, proactive_consent, sms_ok, email_ok,
              timezone, service_zone, latitude, longitude, created_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(id) DO UPDATE SET
               role = excluded.role, first_name = excluded.first_name, phone = excluded.phone,
               email = excluded.email, proactive_consent = excluded.proactive_consent,
               sms_ok = excluded.sms_ok, email_ok = excluded.email_ok, timezone = excluded.timezone,
               service_zone = excluded.service_zone, latitude = excluded.latitude,
               longitude = excluded.longitude",
            params![
                r.id,
                r.role.as_str(),
                r.first_name,
                r.phone,
                r.email,
                r.consent.proactive as i32,
                r.consent.sms as i32,
                r.consent.email as i32,
                r.timezone,
                r.service_zone,
                r.location.map(|p| p.lat),
                r.location.map(|p| p.lon),
                self.clock.now().timestamp_millis(),
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    pub fn set_last_active(&self, recipient_id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE recipients SET last_active_ms = ?1 WHERE id = ?2",
            params![at.timestamp_millis(), recipient_id],
        )
        .map_err(store_err)?;
        Ok(())
    }

    pub fn insert_booking(&self, id: &str, customer_id: &str, service: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO bookings (id, customer_id, service, created_ms) VALUES (?1, ?2, ?3, ?4)",
            params![id, customer_id, service, at.timestamp_millis()],
        )
        .map_err(store_err)?;
        Ok(())
    }

    pub fn insert_maintenance(&self, recipient_id: &str, reminder_type: &str, due: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO maintenance_schedules (recipient_id, reminder_type, due_ms) VALUES (?1, ?2, ?3)",
            params![recipient_id, reminder_type, due.timestamp_millis()],
        )
        .map_err(store_err)?;
        Ok(())
    }

    pub fn insert_home_scan(&self, recipient_id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO home_scans (recipient_id, scanned_ms) VALUES (?1, ?2)",
            params![recipient_id, at.timestamp_millis()],
        )
        .map_err(store_err)?;
        Ok(())
    }

    pub fn upsert_pro_profile(&self, p: &ProProfile) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO pro_profiles
             (recipient_id, display_name, is_available, can_accept_jobs, background_cleared, rating, certification_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                p.recipient_id,
                p.display_name,
                p.available as i32,
                p.can_accept_jobs as i32,
                p.background_cleared as i32,
                p.rating,
                p.certification_count,
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// Commit a loyalty-points mutation; returns the new balance.
    pub fn add_loyalty_points(&self, recipient_id: &str, points: f64) -> Result<f64> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE recipients SET loyalty_points = loyalty_points + ?1 WHERE id = ?2",
            params![points, recipient_id],
        )
        .map_err(store_err)?;
        conn.query_row(
            "SELECT loyalty_points FROM recipients WHERE id = ?1",
            [recipient_id],
            |row| row.get(0),
        )
        .map_err(store_err)
    }

    pub fn set_certification_count(&self, pro_id: &str, count: u32) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE pro_profiles SET certification_count = ?1 WHERE recipient_id = ?2",
            params![count, pro_id],
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// Total referral credit held by a recipient.
    pub fn referral_balance_cents(&self, recipient_id: &str) -> Result<i64> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COALESCE(SUM(amount_cents), 0) FROM referral_credits WHERE recipient_id = ?1",
            [recipient_id],
            |row| row.get(0),
        )
        .map_err(store_err)
    }

    /// Dedup rows for one recipient, oldest first.
    pub fn dedup_records(&self, recipient_id: &str) -> Result<Vec<DedupRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT recipient_id, category, sent_ms, body FROM outreach_dedup
                 WHERE recipient_id = ?1 ORDER BY sent_ms, id",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([recipient_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(store_err)?;

        let mut records = Vec::new();
        for row in rows {
            let (recipient_id, category, sent_ms, body) = row.map_err(store_err)?;
            records.push(DedupRecord {
                recipient_id,
                category: category.parse::<Category>()?,
                sent_at: from_ms(sent_ms),
                body,
            });
        }
        Ok(records)
    }

    // ─── Cohorts ─────────────────────────────────────────────

    fn query_cohort(
        &self,
        sql: &str,
        params: &[(&str, &dyn rusqlite::ToSql)],
        extra: impl Fn(&Row<'_>, CohortRow) -> rusqlite::Result<CohortRow>,
    ) -> Result<Vec<CohortRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).map_err(store_err)?;
        let rows = stmt
            .query_map(params, |row| extra(row, CohortRow::new(recipient_from_row(row)?)))
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    fn select_cohort_sync(&self, query: &CohortQuery, dedup: &DedupFilter, now: DateTime<Utc>) -> Result<Vec<CohortRow>> {
        let since = window_start(now, dedup.window_days);
        let category = dedup.category.map(|c| c.as_str());
        let now_ms = now.timestamp_millis();

        match query {
            CohortQuery::MaintenanceDue { within_days } => {
                let until = (now + Duration::days(i64::from(*within_days))).timestamp_millis();
                // SQLite returns the bare columns of the MIN() row: earliest due item per recipient.
                let sql = format!(
                    "SELECT {RECIPIENT_COLUMNS}, m.reminder_type, MIN(m.due_ms)
                     FROM maintenance_schedules m JOIN recipients r ON r.id = m.recipient_id
                     WHERE r.proactive_consent = 1 AND m.due_ms >= :now AND m.due_ms <= :until
                       AND {DEDUP_ANTI_JOIN}
                     GROUP BY r.id ORDER BY r.id"
                );
                self.query_cohort(
                    &sql,
                    named_params! { ":now": now_ms, ":until": until, ":since": since, ":category": category },
                    |row, cohort| {
                        let reminder_type: String = row.get(EXTRA_COLUMN)?;
                        let due_ms: i64 = row.get(EXTRA_COLUMN + 1)?;
                        Ok(cohort
                            .with_field("reminder_type", reminder_type)
                            .with_field("due_date", from_ms(due_ms).format("%b %-d").to_string()))
                    },
                )
            }
            CohortQuery::Inactive { days } => {
                let sql = format!(
                    "SELECT {RECIPIENT_COLUMNS},
                       (SELECT b.service FROM bookings b WHERE b.customer_id = r.id ORDER BY b.created_ms DESC LIMIT 1)
                     FROM recipients r
                     WHERE r.role = 'customer' AND r.proactive_consent = 1
                       AND EXISTS (SELECT 1 FROM bookings b WHERE b.customer_id = r.id)
                       AND NOT EXISTS (SELECT 1 FROM bookings b WHERE b.customer_id = r.id AND b.created_ms >= :cutoff)
                       AND {DEDUP_ANTI_JOIN}
                     ORDER BY r.id"
                );
                let cutoff = window_start(now, *days);
                self.query_cohort(
                    &sql,
                    named_params! { ":cutoff": cutoff, ":since": since, ":category": category },
                    |row, cohort| {
                        let service: Option<String> = row.get(EXTRA_COLUMN)?;
                        Ok(cohort.with_field("last_service", service.unwrap_or_else(|| "home service".into())))
                    },
                )
            }
            CohortQuery::HomeHealthDormant { inactive_days } => {
                let sql = format!(
                    "SELECT {RECIPIENT_COLUMNS} FROM recipients r
                     WHERE r.role = 'customer' AND r.proactive_consent = 1
                       AND NOT EXISTS (SELECT 1 FROM home_scans s WHERE s.recipient_id = r.id)
                       AND COALESCE(r.last_active_ms, r.created_ms) < :cutoff
                       AND {DEDUP_ANTI_JOIN}
                     ORDER BY r.id"
                );
                let cutoff = window_start(now, *inactive_days);
                self.query_cohort(
                    &sql,
                    named_params! { ":cutoff": cutoff, ":since": since, ":category": category },
                    |_, cohort| Ok(cohort),
                )
            }
            CohortQuery::AllCustomers => {
                let sql = format!(
                    "SELECT {RECIPIENT_COLUMNS} FROM recipients r
                     WHERE r.role = 'customer' AND r.proactive_consent = 1 AND {DEDUP_ANTI_JOIN}
                     ORDER BY r.id"
                );
                self.query_cohort(
                    &sql,
                    named_params! { ":since": since, ":category": category },
                    |_, cohort| Ok(cohort),
                )
            }
            CohortQuery::ServiceZone { zone } => {
                let sql = format!(
                    "SELECT {RECIPIENT_COLUMNS} FROM recipients r
                     WHERE r.role = 'customer' AND r.proactive_consent = 1 AND r.service_zone = :zone
                       AND {DEDUP_ANTI_JOIN}
                     ORDER BY r.id"
                );
                self.query_cohort(
                    &sql,
                    named_params! { ":zone": zone, ":since": since, ":category": category },
                    |_, cohort| Ok(cohort),
                )
            }
        }
    }

    fn emergency_from_row(row: &Row<'_>) -> rusqlite::Result<(EmergencyDispatchRequest, String)> {
        let candidates_json: String = row.get(4)?;
        let selected_json: Option<String> = row.get(5)?;
        let state: String = row.get(7)?;
        let request = EmergencyDispatchRequest {
            id: row.get(0)?,
            requester_id: row.get(1)?,
            raw_message: row.get(2)?,
            location_hint: row.get(3)?,
            candidates: serde_json::from_str(&candidates_json).unwrap_or_default(),
            selected: selected_json.and_then(|s| serde_json::from_str(&s).ok()),
            eta_minutes: row.get(6)?,
            state: outreach_core::types::DispatchState::Detected,
            created_at: from_ms(row.get(8)?),
            updated_at: from_ms(row.get(9)?),
        };
        Ok((request, state))
    }
}

#[async_trait]
impl RecipientDirectory for OutreachDb {
    async fn get_user(&self, id: &str) -> Result<Option<Recipient>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {RECIPIENT_COLUMNS} FROM recipients r WHERE r.id = ?1"),
            [id],
            recipient_from_row,
        )
        .optional()
        .map_err(store_err)
    }
}

#[async_trait]
impl CohortStore for OutreachDb {
    async fn select_cohort(&self, query: &CohortQuery, dedup: &DedupFilter, now: DateTime<Utc>) -> Result<Vec<CohortRow>> {
        self.select_cohort_sync(query, dedup, now)
    }

    async fn has_recent_record(&self, recipient_id: &str, window_days: u32, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM outreach_dedup WHERE recipient_id = ?1 AND sent_ms >= ?2)",
            params![recipient_id, window_start(now, window_days)],
            |row| row.get::<_, bool>(0),
        )
        .map_err(store_err)
    }

    async fn record_dedup(&self, record: &DedupRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO outreach_dedup (recipient_id, category, sent_ms, body) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.recipient_id,
                record.category.as_str(),
                record.sent_at.timestamp_millis(),
                record.body,
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }
}

#[async_trait]
impl FollowUpStore for OutreachDb {
    async fn schedule_follow_up(&self, f: &FollowUp) -> Result<()> {
        let conn = self.lock()?;
        // One follow-up per booking; a replayed completion event is a no-op.
        conn.execute(
            "INSERT OR IGNORE INTO follow_ups (id, booking_id, recipient_id, service, due_ms, fired_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                f.id,
                f.booking_id,
                f.recipient_id,
                f.service,
                f.due_at.timestamp_millis(),
                f.fired_at.map(|t| t.timestamp_millis()),
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn due_follow_ups(&self, now: DateTime<Utc>) -> Result<Vec<FollowUp>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, booking_id, recipient_id, service, due_ms FROM follow_ups
                 WHERE fired_ms IS NULL AND due_ms <= ?1 ORDER BY due_ms, id",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([now.timestamp_millis()], |row| {
                Ok(FollowUp {
                    id: row.get(0)?,
                    booking_id: row.get(1)?,
                    recipient_id: row.get(2)?,
                    service: row.get(3)?,
                    due_at: from_ms(row.get(4)?),
                    fired_at: None,
                })
            })
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    async fn mark_follow_up_fired(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE follow_ups SET fired_ms = ?1 WHERE id = ?2",
            params![at.timestamp_millis(), id],
        )
        .map_err(store_err)?;
        Ok(())
    }
}

#[async_trait]
impl MetricSource for OutreachDb {
    async fn current_value(&self, recipient_id: &str, metric: Metric) -> Result<f64> {
        let conn = self.lock()?;
        let value = match metric {
            Metric::LoyaltyPoints => conn
                .query_row(
                    "SELECT loyalty_points FROM recipients WHERE id = ?1",
                    [recipient_id],
                    |row| row.get::<_, f64>(0),
                )
                .optional(),
            Metric::CertificationCount => conn
                .query_row(
                    "SELECT certification_count FROM pro_profiles WHERE recipient_id = ?1",
                    [recipient_id],
                    |row| row.get::<_, i64>(0).map(|c| c as f64),
                )
                .optional(),
        }
        .map_err(store_err)?;
        value.ok_or_else(|| OutreachError::RecipientNotFound(recipient_id.to_string()))
    }
}

#[async_trait]
impl ReferralLedger for OutreachDb {
    async fn credit_referral(&self, referrer_id: &str, referee_id: &str, amount_cents: u32) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(store_err)?;
        let already: bool = tx
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM referral_credits WHERE referee_id = ?1)",
                [referee_id],
                |row| row.get(0),
            )
            .map_err(store_err)?;
        if already {
            return Ok(false);
        }
        let now = self.clock.now().timestamp_millis();
        for (recipient, role) in [(referrer_id, "referrer"), (referee_id, "referee")] {
            tx.execute(
                "INSERT INTO referral_credits (referee_id, recipient_id, role, amount_cents, created_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![referee_id, recipient, role, amount_cents, now],
            )
            .map_err(store_err)?;
        }
        tx.commit().map_err(store_err)?;
        Ok(true)
    }
}

#[async_trait]
impl ProviderPool for OutreachDb {
    async fn emergency_candidates(&self, limit: u32) -> Result<Vec<ProCandidate>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT p.recipient_id, p.display_name, r.phone, p.rating, r.latitude, r.longitude
                 FROM pro_profiles p JOIN recipients r ON r.id = p.recipient_id
                 WHERE p.is_available = 1 AND p.can_accept_jobs = 1 AND p.background_cleared = 1
                 ORDER BY COALESCE(p.rating, 0) DESC, p.recipient_id
                 LIMIT ?1",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([limit], |row| {
                let lat: Option<f64> = row.get(4)?;
                let lon: Option<f64> = row.get(5)?;
                Ok(ProCandidate {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    phone: row.get(2)?,
                    rating: row.get(3)?,
                    location: lat.zip(lon).map(|(lat, lon)| GeoPoint { lat, lon }),
                })
            })
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }
}

#[async_trait]
impl EmergencyLog for OutreachDb {
    async fn save_request(&self, request: &EmergencyDispatchRequest) -> Result<()> {
        let candidates = serde_json::to_string(&request.candidates)?;
        let selected = request.selected.as_ref().map(serde_json::to_string).transpose()?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO emergency_requests
             (id, requester_id, raw_message, location_hint, candidates, selected, eta_minutes, state, created_ms, updated_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                request.id,
                request.requester_id,
                request.raw_message,
                request.location_hint,
                candidates,
                selected,
                request.eta_minutes,
                request.state.as_str(),
                request.created_at.timestamp_millis(),
                request.updated_at.timestamp_millis(),
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn manual_escalations(&self, limit: u32) -> Result<Vec<EmergencyDispatchRequest>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, requester_id, raw_message, location_hint, candidates, selected, eta_minutes,
                        state, created_ms, updated_ms
                 FROM emergency_requests WHERE state = 'manual_escalation'
                 ORDER BY created_ms DESC LIMIT ?1",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([limit], OutreachDb::emergency_from_row)
            .map_err(store_err)?;

        let mut requests = Vec::new();
        for row in rows {
            let (mut request, state) = row.map_err(store_err)?;
            request.state = state.parse()?;
            requests.push(request);
        }
        Ok(requests)
    }
}

impl RateLimitStore for OutreachDb {
    fn last_sent(&self, recipient_id: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT last_sent_ms FROM rate_limits WHERE recipient_id = ?1",
            [recipient_id],
            |row| row.get::<_, i64>(0),
        )
        .optional()
        .map(|ms| ms.map(from_ms))
        .map_err(store_err)
    }

    fn record(&self, recipient_id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO rate_limits (recipient_id, last_sent_ms) VALUES (?1, ?2)
             ON CONFLICT(recipient_id) DO UPDATE SET last_sent_ms = excluded.last_sent_ms",
            params![recipient_id, at.timestamp_millis()],
        )
        .map_err(store_err)?;
        Ok(())
    }

    fn try_acquire(&self, recipient_id: &str, now: DateTime<Utc>, window: Duration) -> Result<bool> {
        let conn = self.lock()?;
        // Single statement: insert, or move the timestamp only if the old one has expired.
        let changed = conn
            .execute(
                "INSERT INTO rate_limits (recipient_id, last_sent_ms) VALUES (?1, ?2)
                 ON CONFLICT(recipient_id) DO UPDATE SET last_sent_ms = excluded.last_sent_ms
                 WHERE rate_limits.last_sent_ms <= ?3",
                params![recipient_id, now.timestamp_millis(), (now - window).timestamp_millis()],
            )
            .map_err(store_err)?;
        Ok(changed == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use outreach_core::types::DispatchState;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 18, 0, 0).unwrap()
    }

    fn consenting(id: &str) -> Recipient {
        let mut r = Recipient::customer(id);
        r.first_name = Some(id.to_uppercase());
        r.phone = Some(format!("+1555{id}"));
        r.consent.proactive = true;
        r
    }

    fn any_campaign(days: u32) -> DedupFilter {
        DedupFilter {
            window_days: days,
            category: None,
        }
    }

    #[test]
    fn test_open_file_and_migrate_twice() {
        let dir = std::env::temp_dir().join("outreach-db-test");
        let path = dir.join("test.db");
        std::fs::remove_file(&path).ok();
        {
            let db = OutreachDb::open(&path).unwrap();
            db.upsert_recipient(&consenting("c1")).unwrap();
        }
        // reopening re-runs migrations without losing data
        let db = OutreachDb::open(&path).unwrap();
        assert!(db.last_sent("c1").unwrap().is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_get_user_round_trip() {
        let db = OutreachDb::open_in_memory().unwrap();
        let mut r = consenting("c1");
        r.timezone = Some("America/Denver".into());
        r.location = Some(GeoPoint { lat: 39.7, lon: -104.9 });
        db.upsert_recipient(&r).unwrap();

        assert_eq!(db.get_user("c1").await.unwrap(), Some(r));
        assert_eq!(db.get_user("nobody").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cohort_excludes_recent_dedup_and_non_consenting() {
        let db = OutreachDb::open_in_memory().unwrap();
        db.upsert_recipient(&consenting("a")).unwrap();
        db.upsert_recipient(&consenting("b")).unwrap();
        db.upsert_recipient(&Recipient::customer("c")).unwrap(); // no consent

        db.record_dedup(&DedupRecord {
            recipient_id: "a".into(),
            category: Category::SeasonalPromo,
            sent_at: t0() - Duration::days(2),
            body: "hi".into(),
        })
        .await
        .unwrap();

        let rows = db
            .select_cohort(&CohortQuery::AllCustomers, &any_campaign(7), t0())
            .await
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.recipient.id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);

        // outside the window the record no longer excludes
        let rows = db
            .select_cohort(&CohortQuery::AllCustomers, &any_campaign(1), t0())
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_same_campaign_scope_only_excludes_that_category() {
        let db = OutreachDb::open_in_memory().unwrap();
        let mut r = consenting("a");
        r.service_zone = Some("WAZ558".into());
        db.upsert_recipient(&r).unwrap();
        db.record_dedup(&DedupRecord {
            recipient_id: "a".into(),
            category: Category::SeasonalPromo,
            sent_at: t0() - Duration::days(1),
            body: "promo".into(),
        })
        .await
        .unwrap();

        let zone = CohortQuery::ServiceZone { zone: "WAZ558".into() };
        let same = DedupFilter {
            window_days: 7,
            category: Some(Category::WeatherHeadsup),
        };
        assert_eq!(db.select_cohort(&zone, &same, t0()).await.unwrap().len(), 1);
        assert!(db.select_cohort(&zone, &any_campaign(7), t0()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_maintenance_cohort_picks_earliest_due_item() {
        let db = OutreachDb::open_in_memory().unwrap();
        db.upsert_recipient(&consenting("a")).unwrap();
        db.insert_maintenance("a", "hvac_filter", t0() + Duration::days(5)).unwrap();
        db.insert_maintenance("a", "gutter_cleaning", t0() + Duration::days(2)).unwrap();
        db.insert_maintenance("a", "dryer_vent", t0() + Duration::days(30)).unwrap();

        let rows = db
            .select_cohort(&CohortQuery::MaintenanceDue { within_days: 7 }, &any_campaign(7), t0())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fields["reminder_type"], "gutter_cleaning");
        assert_eq!(rows[0].fields["due_date"], "Jun 17");
    }

    #[tokio::test]
    async fn test_inactive_cohort() {
        let db = OutreachDb::open_in_memory().unwrap();
        for id in ["old", "recent", "never"] {
            db.upsert_recipient(&consenting(id)).unwrap();
        }
        db.insert_booking("b1", "old", "junk removal", t0() - Duration::days(45)).unwrap();
        db.insert_booking("b2", "recent", "cleaning", t0() - Duration::days(3)).unwrap();

        let rows = db
            .select_cohort(&CohortQuery::Inactive { days: 30 }, &any_campaign(7), t0())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].recipient.id, "old");
        assert_eq!(rows[0].fields["last_service"], "junk removal");
    }

    #[tokio::test]
    async fn test_home_health_cohort() {
        let db = OutreachDb::open_in_memory().unwrap();
        for id in ["dormant", "scanned", "active"] {
            db.upsert_recipient(&consenting(id)).unwrap();
            db.set_last_active(id, t0() - Duration::days(10)).unwrap();
        }
        db.insert_home_scan("scanned", t0() - Duration::days(20)).unwrap();
        db.set_last_active("active", t0() - Duration::days(1)).unwrap();

        let rows = db
            .select_cohort(&CohortQuery::HomeHealthDormant { inactive_days: 7 }, &any_campaign(7), t0())
            .await
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.recipient.id.as_str()).collect();
        assert_eq!(ids, vec!["dormant"]);
    }

    #[tokio::test]
    async fn test_home_health_falls_back_to_creation_time_on_store_clock() {
        let clock = Arc::new(outreach_core::ManualClock::at(t0() - Duration::days(10)));
        let db = OutreachDb::open_in_memory().unwrap().with_clock(clock.clone());
        db.upsert_recipient(&consenting("old")).unwrap();
        clock.set(t0() - Duration::days(2));
        db.upsert_recipient(&consenting("new")).unwrap();

        // neither has activity; created_ms decides
        let rows = db
            .select_cohort(&CohortQuery::HomeHealthDormant { inactive_days: 7 }, &any_campaign(7), t0())
            .await
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.recipient.id.as_str()).collect();
        assert_eq!(ids, vec!["old"]);
    }

    #[tokio::test]
    async fn test_referral_rows_use_store_clock() {
        let db = OutreachDb::open_in_memory()
            .unwrap()
            .with_clock(Arc::new(outreach_core::ManualClock::at(t0())));
        db.credit_referral("alice", "bob", 1000).await.unwrap();
        let stamped: Vec<i64> = {
            let conn = db.lock().unwrap();
            let mut stmt = conn.prepare("SELECT created_ms FROM referral_credits ORDER BY role").unwrap();
            stmt.query_map([], |row| row.get(0)).unwrap().map(|r| r.unwrap()).collect()
        };
        assert_eq!(stamped, vec![t0().timestamp_millis(); 2]);
    }

    #[tokio::test]
    async fn test_has_recent_record() {
        let db = OutreachDb::open_in_memory().unwrap();
        assert!(!db.has_recent_record("a", 7, t0()).await.unwrap());
        db.record_dedup(&DedupRecord {
            recipient_id: "a".into(),
            category: Category::WinBack,
            sent_at: t0() - Duration::days(6),
            body: "x".into(),
        })
        .await
        .unwrap();
        assert!(db.has_recent_record("a", 7, t0()).await.unwrap());
        assert!(!db.has_recent_record("a", 5, t0()).await.unwrap());
    }

    #[test]
    fn test_shared_rate_limit_compare_and_set() {
        let db = OutreachDb::open_in_memory().unwrap();
        let day = Duration::hours(24);
        assert!(db.try_acquire("a", t0(), day).unwrap());
        assert!(!db.try_acquire("a", t0() + Duration::hours(1), day).unwrap());
        assert_eq!(db.last_sent("a").unwrap(), Some(t0()));
        assert!(db.try_acquire("a", t0() + day, day).unwrap());
        db.record("a", t0()).unwrap();
        assert_eq!(db.last_sent("a").unwrap(), Some(t0()));
    }

    #[tokio::test]
    async fn test_follow_ups_due_and_fired() {
        let db = OutreachDb::open_in_memory().unwrap();
        let f = FollowUp {
            id: "f1".into(),
            booking_id: "b1".into(),
            recipient_id: "a".into(),
            service: "cleaning".into(),
            due_at: t0() + Duration::hours(2),
            fired_at: None,
        };
        db.schedule_follow_up(&f).await.unwrap();
        // replayed event for the same booking is ignored
        db.schedule_follow_up(&FollowUp { id: "f2".into(), ..f.clone() }).await.unwrap();

        assert!(db.due_follow_ups(t0()).await.unwrap().is_empty());
        let due = db.due_follow_ups(t0() + Duration::hours(3)).await.unwrap();
        assert_eq!(due, vec![f]);

        db.mark_follow_up_fired("f1", t0() + Duration::hours(3)).await.unwrap();
        assert!(db.due_follow_ups(t0() + Duration::hours(4)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_referral_credit_is_atomic_and_once() {
        let db = OutreachDb::open_in_memory().unwrap();
        assert!(db.credit_referral("alice", "bob", 2500).await.unwrap());
        assert!(!db.credit_referral("alice", "bob", 2500).await.unwrap());
        assert_eq!(db.referral_balance_cents("alice").unwrap(), 2500);
        assert_eq!(db.referral_balance_cents("bob").unwrap(), 2500);
    }

    #[tokio::test]
    async fn test_metrics() {
        let db = OutreachDb::open_in_memory().unwrap();
        db.upsert_recipient(&consenting("a")).unwrap();
        assert_eq!(db.add_loyalty_points("a", 120.0).unwrap(), 120.0);
        assert_eq!(db.current_value("a", Metric::LoyaltyPoints).await.unwrap(), 120.0);
        assert!(matches!(
            db.current_value("ghost", Metric::LoyaltyPoints).await,
            Err(OutreachError::RecipientNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_emergency_candidates_filter() {
        let db = OutreachDb::open_in_memory().unwrap();
        for (id, available, cleared, rating) in [("p1", true, true, 4.9), ("p2", true, false, 5.0), ("p3", false, true, 4.0)] {
            let mut r = Recipient::customer(id);
            r.role = RecipientRole::Pro;
            db.upsert_recipient(&r).unwrap();
            db.upsert_pro_profile(&ProProfile {
                recipient_id: id.into(),
                display_name: format!("Pro {id}"),
                available,
                can_accept_jobs: true,
                background_cleared: cleared,
                rating: Some(rating),
                certification_count: 0,
            })
            .unwrap();
        }
        let candidates = db.emergency_candidates(5).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, "p1");
    }

    #[tokio::test]
    async fn test_emergency_log_lists_escalations() {
        let db = OutreachDb::open_in_memory().unwrap();
        let mut request = EmergencyDispatchRequest {
            id: "e1".into(),
            requester_id: "a".into(),
            raw_message: "burst pipe!".into(),
            location_hint: Some("basement".into()),
            candidates: vec![],
            selected: None,
            eta_minutes: None,
            state: DispatchState::Detected,
            created_at: t0(),
            updated_at: t0(),
        };
        db.save_request(&request).await.unwrap();
        assert!(db.manual_escalations(10).await.unwrap().is_empty());

        request.state = DispatchState::ManualEscalation;
        db.save_request(&request).await.unwrap();
        let escalations = db.manual_escalations(10).await.unwrap();
        assert_eq!(escalations, vec![request]);
    }
}
