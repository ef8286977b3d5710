//! Domain types shared by the engine, its collaborators and the operator binary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::OutreachError;

// ─── Recipients ──────────────────────────────────────────────

/// Whether a recipient books services or performs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecipientRole {
    #[default]
    Customer,
    Pro,
}

impl RecipientRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientRole::Customer => "customer",
            RecipientRole::Pro => "pro",
        }
    }
}

/// Contact consent as recorded at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentFlags {
    /// Opted in to proactive (campaign) outreach.
    #[serde(default)]
    pub proactive: bool,
    /// Accepts SMS at all.
    #[serde(default = "default_true")]
    pub sms: bool,
    /// Accepts email at all.
    #[serde(default = "default_true")]
    pub email: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ConsentFlags {
    fn default() -> Self {
        Self {
            proactive: false,
            sms: true,
            email: true,
        }
    }
}

/// A latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Great-circle distance in kilometres (haversine).
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        const EARTH_RADIUS_KM: f64 = 6371.0;
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lon = (other.lon - self.lon).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

/// A customer or pro addressable for outreach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    #[serde(default)]
    pub role: RecipientRole,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub consent: ConsentFlags,
    /// IANA timezone; falls back to the region clock when absent.
    #[serde(default)]
    pub timezone: Option<String>,
    /// Weather/service zone the recipient's home sits in.
    #[serde(default)]
    pub service_zone: Option<String>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

impl Recipient {
    /// Minimal customer record, mostly useful for fixtures.
    pub fn customer(id: &str) -> Self {
        Self {
            id: id.to_string(),
            role: RecipientRole::Customer,
            first_name: None,
            phone: None,
            email: None,
            consent: ConsentFlags::default(),
            timezone: None,
            service_zone: None,
            location: None,
        }
    }

    /// First name for greetings, or a neutral fallback.
    pub fn greeting_name(&self) -> &str {
        self.first_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or("there")
    }
}

// ─── Messages ────────────────────────────────────────────────

/// Outbound channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Email,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Sms => write!(f, "sms"),
            Channel::Email => write!(f, "email"),
        }
    }
}

/// Message family. Stored in the dedup ledger, so names are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    BookingConfirmed,
    ProEnRoute,
    JobFollowUp,
    LoyaltyTier,
    FeeTier,
    ReferralCredit,
    SmartHomeAlert,
    MaintenanceReminder,
    WeatherHeadsup,
    WinBack,
    HomeHealthNudge,
    SeasonalPromo,
    EmergencyDispatch,
    EmergencyHolding,
}

impl Category {
    pub const ALL: [Category; 14] = [
        Category::BookingConfirmed,
        Category::ProEnRoute,
        Category::JobFollowUp,
        Category::LoyaltyTier,
        Category::FeeTier,
        Category::ReferralCredit,
        Category::SmartHomeAlert,
        Category::MaintenanceReminder,
        Category::WeatherHeadsup,
        Category::WinBack,
        Category::HomeHealthNudge,
        Category::SeasonalPromo,
        Category::EmergencyDispatch,
        Category::EmergencyHolding,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::BookingConfirmed => "booking_confirmed",
            Category::ProEnRoute => "pro_en_route",
            Category::JobFollowUp => "job_follow_up",
            Category::LoyaltyTier => "loyalty_tier",
            Category::FeeTier => "fee_tier",
            Category::ReferralCredit => "referral_credit",
            Category::SmartHomeAlert => "smart_home_alert",
            Category::MaintenanceReminder => "maintenance_reminder",
            Category::WeatherHeadsup => "weather_headsup",
            Category::WinBack => "win_back",
            Category::HomeHealthNudge => "home_health_nudge",
            Category::SeasonalPromo => "seasonal_promo",
            Category::EmergencyDispatch => "emergency_dispatch",
            Category::EmergencyHolding => "emergency_holding",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = OutreachError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| OutreachError::Store(format!("unknown category '{s}'")))
    }
}

/// A composed message, channel-agnostic until dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub category: Category,
    /// Email subject line; ignored for SMS.
    pub subject: String,
    pub body: String,
}

impl OutboundMessage {
    pub fn new(category: Category, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            category,
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// What a transport reports back for one send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub success: bool,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
}

impl DeliveryReceipt {
    pub fn ok(provider_message_id: Option<String>) -> Self {
        Self {
            success: true,
            provider_message_id,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            provider_message_id: None,
            error: Some(error.into()),
        }
    }
}

// ─── Campaign data ───────────────────────────────────────────

/// A persisted "we already contacted this person" row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupRecord {
    pub recipient_id: String,
    pub category: Category,
    pub sent_at: DateTime<Utc>,
    pub body: String,
}

/// One recipient selected by a cohort query, with the contextual fields
/// its template needs.
#[derive(Debug, Clone, PartialEq)]
pub struct CohortRow {
    pub recipient: Recipient,
    pub fields: BTreeMap<String, String>,
}

impl CohortRow {
    pub fn new(recipient: Recipient) -> Self {
        Self {
            recipient,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }
}

/// Result of one scanner run, relayed to whatever triggered it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub campaign: String,
    pub sent: u32,
    pub skipped: u32,
    /// True when the whole batch was held back (quiet hours, disabled).
    #[serde(default)]
    pub deferred: bool,
}

impl ScanSummary {
    pub fn empty(campaign: &str) -> Self {
        Self {
            campaign: campaign.to_string(),
            ..Self::default()
        }
    }

    pub fn deferred(campaign: &str) -> Self {
        Self {
            campaign: campaign.to_string(),
            deferred: true,
            ..Self::default()
        }
    }
}

/// A post-completion follow-up waiting for its due time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUp {
    pub id: String,
    pub booking_id: String,
    pub recipient_id: String,
    pub service: String,
    pub due_at: DateTime<Utc>,
    pub fired_at: Option<DateTime<Utc>>,
}

/// An active weather alert for a zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherAlert {
    pub zone: String,
    pub event: String,
    pub severity: String,
    pub headline: String,
}

impl WeatherAlert {
    /// Only severe and extreme alerts warrant a heads-up.
    pub fn is_severe(&self) -> bool {
        matches!(
            self.severity.to_ascii_lowercase().as_str(),
            "severe" | "extreme"
        )
    }
}

// ─── Tiering ─────────────────────────────────────────────────

/// Monotonic metric a tier ladder is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Cumulative spend in loyalty points.
    LoyaltyPoints,
    /// Active certifications held by a pro.
    CertificationCount,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::LoyaltyPoints => write!(f, "loyalty_points"),
            Metric::CertificationCount => write!(f, "certification_count"),
        }
    }
}

// ─── Emergency dispatch ──────────────────────────────────────

/// A pro that may take an emergency job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProCandidate {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
    pub rating: Option<f64>,
    pub location: Option<GeoPoint>,
}

/// Emergency dispatch lifecycle: `Detected → Searching → {Dispatched | ManualEscalation}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    Detected,
    Searching,
    Dispatched,
    ManualEscalation,
}

impl DispatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchState::Detected => "detected",
            DispatchState::Searching => "searching",
            DispatchState::Dispatched => "dispatched",
            DispatchState::ManualEscalation => "manual_escalation",
        }
    }
}

impl FromStr for DispatchState {
    type Err = OutreachError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "detected" => Ok(DispatchState::Detected),
            "searching" => Ok(DispatchState::Searching),
            "dispatched" => Ok(DispatchState::Dispatched),
            "manual_escalation" => Ok(DispatchState::ManualEscalation),
            other => Err(OutreachError::Store(format!("unknown dispatch state '{other}'"))),
        }
    }
}

/// One emergency detection and what became of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyDispatchRequest {
    pub id: String,
    pub requester_id: String,
    pub raw_message: String,
    pub location_hint: Option<String>,
    pub candidates: Vec<ProCandidate>,
    pub selected: Option<ProCandidate>,
    pub eta_minutes: Option<u32>,
    pub state: DispatchState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_round_trips_through_str() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), category);
        }
        assert!("nope".parse::<Category>().is_err());
    }

    #[test]
    fn test_weather_headsup_name_is_stable() {
        assert_eq!(Category::WeatherHeadsup.as_str(), "weather_headsup");
        let json = serde_json::to_string(&Category::WeatherHeadsup).unwrap();
        assert_eq!(json, "\"weather_headsup\"");
    }

    #[test]
    fn test_distance_km() {
        let seattle = GeoPoint { lat: 47.6062, lon: -122.3321 };
        let tacoma = GeoPoint { lat: 47.2529, lon: -122.4443 };
        let d = seattle.distance_km(&tacoma);
        assert!(d > 38.0 && d < 42.0, "got {d}");
        assert!(seattle.distance_km(&seattle) < 1e-9);
    }

    #[test]
    fn test_greeting_name() {
        let mut r = Recipient::customer("c1");
        assert_eq!(r.greeting_name(), "there");
        r.first_name = Some("  ".into());
        assert_eq!(r.greeting_name(), "there");
        r.first_name = Some("Dana".into());
        assert_eq!(r.greeting_name(), "Dana");
    }

    #[test]
    fn test_severity() {
        let mut alert = WeatherAlert {
            zone: "WAZ558".into(),
            event: "Flood Warning".into(),
            severity: "Severe".into(),
            headline: "Flood Warning until noon".into(),
        };
        assert!(alert.is_severe());
        alert.severity = "Moderate".into();
        assert!(!alert.is_severe());
    }
}
