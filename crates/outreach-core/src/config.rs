//! Outreach configuration system.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{OutreachError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutreachConfig {
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub campaigns: CampaignsConfig,
    #[serde(default)]
    pub follow_up: FollowUpConfig,
    #[serde(default)]
    pub emergency: EmergencyConfig,
    #[serde(default = "TierLadderConfig::loyalty")]
    pub loyalty: TierLadderConfig,
    #[serde(default = "TierLadderConfig::fee")]
    pub fee: TierLadderConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
}

impl Default for OutreachConfig {
    fn default() -> Self {
        Self {
            gate: GateConfig::default(),
            dedup: DedupConfig::default(),
            campaigns: CampaignsConfig::default(),
            follow_up: FollowUpConfig::default(),
            emergency: EmergencyConfig::default(),
            loyalty: TierLadderConfig::loyalty(),
            fee: TierLadderConfig::fee(),
            weather: WeatherConfig::default(),
            transport: TransportConfig::default(),
            store: StoreConfig::default(),
            channel: ChannelConfig::default(),
        }
    }
}

impl OutreachConfig {
    /// Load config from the default path (~/.outreach/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| OutreachError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| OutreachError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| OutreachError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.gate.region_tz()?;
        if self.gate.allowed_start_hour >= self.gate.allowed_end_hour || self.gate.allowed_end_hour > 24 {
            return Err(OutreachError::Config(format!(
                "gate window [{}, {}) is empty or out of range",
                self.gate.allowed_start_hour, self.gate.allowed_end_hour
            )));
        }
        for (name, ladder) in [("loyalty", &self.loyalty), ("fee", &self.fee)] {
            if ladder.tiers.is_empty() {
                return Err(OutreachError::Config(format!("{name} ladder has no tiers")));
            }
            if ladder.tiers.windows(2).any(|w| w[0].min >= w[1].min) {
                return Err(OutreachError::Config(format!(
                    "{name} ladder breakpoints must be strictly increasing"
                )));
            }
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the outreach home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".outreach")
    }
}

fn bool_true() -> bool { true }

/// Delivery gate: quiet hours and the per-recipient rate limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// First local hour at which non-emergency sends are allowed.
    #[serde(default = "default_allowed_start")]
    pub allowed_start_hour: u32,
    /// Local hour at which the allowed window closes (exclusive).
    #[serde(default = "default_allowed_end")]
    pub allowed_end_hour: u32,
    /// Region clock used when a recipient has no timezone of their own.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_rate_limit_hours")]
    pub rate_limit_hours: i64,
    /// Keep the rate-limit map in the shared store instead of process memory.
    #[serde(default)]
    pub shared_rate_limit: bool,
}

fn default_allowed_start() -> u32 { 8 }
fn default_allowed_end() -> u32 { 21 }
fn default_timezone() -> String { "America/Los_Angeles".into() }
fn default_rate_limit_hours() -> i64 { 24 }

impl GateConfig {
    pub fn region_tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| OutreachError::Config(format!("invalid timezone '{}': {e}", self.timezone)))
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            allowed_start_hour: default_allowed_start(),
            allowed_end_hour: default_allowed_end(),
            timezone: default_timezone(),
            rate_limit_hours: default_rate_limit_hours(),
            shared_rate_limit: false,
        }
    }
}

/// Dedup ledger lookback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_window_days")]
    pub window_days: u32,
}

fn default_window_days() -> u32 { 7 }

impl Default for DedupConfig {
    fn default() -> Self {
        Self { window_days: default_window_days() }
    }
}

/// Which prior sends exclude a recipient from a campaign's cohort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupScope {
    /// Any campaign message inside the window excludes the recipient.
    AnyCampaign,
    /// Only a message from the same campaign family does.
    SameCampaign,
}

/// Per-campaign scheduling and dedup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignSettings {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// 5-field cron expression, evaluated on the region clock.
    pub schedule: String,
    /// Overrides `dedup.window_days` for this campaign.
    #[serde(default)]
    pub lookback_days: Option<u32>,
    #[serde(default = "default_scope")]
    pub scope: DedupScope,
}

fn default_scope() -> DedupScope { DedupScope::AnyCampaign }

impl CampaignSettings {
    fn new(schedule: &str, scope: DedupScope) -> Self {
        Self {
            enabled: true,
            schedule: schedule.into(),
            lookback_days: None,
            scope,
        }
    }
}

/// Scheduled campaign scanners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignsConfig {
    #[serde(default = "default_maintenance")]
    pub maintenance_reminder: CampaignSettings,
    #[serde(default = "default_weather")]
    pub weather_headsup: CampaignSettings,
    #[serde(default = "default_win_back")]
    pub win_back: CampaignSettings,
    #[serde(default = "default_home_health")]
    pub home_health_nudge: CampaignSettings,
    #[serde(default = "default_seasonal")]
    pub seasonal_promo: CampaignSettings,
    #[serde(default = "default_follow_up_campaign")]
    pub job_follow_up: CampaignSettings,
    /// Maintenance due within this many days is reminded.
    #[serde(default = "default_maintenance_lead")]
    pub maintenance_lead_days: u32,
    /// No booking for this many days makes a customer a win-back target.
    #[serde(default = "default_inactive_days")]
    pub inactive_days: u32,
    /// Zero home-health scans and inactive for this many days.
    #[serde(default = "default_home_health_inactive")]
    pub home_health_inactive_days: u32,
}

fn default_maintenance() -> CampaignSettings { CampaignSettings::new("0 10 * * *", DedupScope::SameCampaign) }
fn default_weather() -> CampaignSettings { CampaignSettings::new("0 */6 * * *", DedupScope::SameCampaign) }
fn default_win_back() -> CampaignSettings { CampaignSettings::new("0 11 * * 2", DedupScope::AnyCampaign) }
fn default_home_health() -> CampaignSettings { CampaignSettings::new("30 12 * * *", DedupScope::AnyCampaign) }
fn default_seasonal() -> CampaignSettings { CampaignSettings::new("0 10 1 * *", DedupScope::AnyCampaign) }
fn default_follow_up_campaign() -> CampaignSettings { CampaignSettings::new("*/15 * * * *", DedupScope::SameCampaign) }
fn default_maintenance_lead() -> u32 { 7 }
fn default_inactive_days() -> u32 { 30 }
fn default_home_health_inactive() -> u32 { 7 }

impl Default for CampaignsConfig {
    fn default() -> Self {
        Self {
            maintenance_reminder: default_maintenance(),
            weather_headsup: default_weather(),
            win_back: default_win_back(),
            home_health_nudge: default_home_health(),
            seasonal_promo: default_seasonal(),
            job_follow_up: default_follow_up_campaign(),
            maintenance_lead_days: default_maintenance_lead(),
            inactive_days: default_inactive_days(),
            home_health_inactive_days: default_home_health_inactive(),
        }
    }
}

/// Post-completion follow-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpConfig {
    #[serde(default = "default_follow_up_delay")]
    pub delay_minutes: i64,
}

fn default_follow_up_delay() -> i64 { 120 }

impl Default for FollowUpConfig {
    fn default() -> Self {
        Self { delay_minutes: default_follow_up_delay() }
    }
}

/// How one pro is picked among several emergency candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Closest to the requester; unknown locations sort last.
    #[default]
    Nearest,
    /// Best rating first.
    HighestRated,
    /// Uniformly random.
    Arbitrary,
}

/// Emergency dispatch matcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyConfig {
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,
    /// Fixed ETA quoted to both sides.
    #[serde(default = "default_eta")]
    pub eta_minutes: u32,
    /// Upper bound on candidates pulled from the provider pool.
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: u32,
    #[serde(default)]
    pub tie_break: TieBreak,
    /// Customer message is truncated to this many characters for the pro.
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

fn default_keywords() -> Vec<String> {
    vec!["burst pipe", "flooding", "fallen tree", "power outage", "gas smell", "fire damage"]
        .into_iter().map(String::from).collect()
}
fn default_eta() -> u32 { 45 }
fn default_candidate_limit() -> u32 { 3 }
fn default_excerpt_chars() -> usize { 120 }

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            keywords: default_keywords(),
            eta_minutes: default_eta(),
            candidate_limit: default_candidate_limit(),
            tie_break: TieBreak::default(),
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

/// One step of a tier ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    pub name: String,
    /// Inclusive lower bound of the metric for this tier.
    pub min: f64,
    /// What the tier unlocks, quoted in the congratulation.
    #[serde(default)]
    pub perk: String,
}

/// Ordered breakpoints over a monotonic metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierLadderConfig {
    pub tiers: Vec<TierConfig>,
}

impl TierLadderConfig {
    /// Cumulative-spend loyalty tiers.
    pub fn loyalty() -> Self {
        Self {
            tiers: vec![
                tier("Member", 0.0, "points on every booking"),
                tier("Silver", 500.0, "5% off every booking"),
                tier("Gold", 1500.0, "10% off and priority scheduling"),
                tier("Platinum", 5000.0, "15% off and a dedicated concierge"),
            ],
        }
    }

    /// Platform-fee tiers by active certification count.
    pub fn fee() -> Self {
        Self {
            tiers: vec![
                tier("Standard", 0.0, "a 20% platform fee"),
                tier("Certified", 1.0, "a 17% platform fee"),
                tier("Expert", 3.0, "a 14% platform fee"),
                tier("Master", 5.0, "a 10% platform fee"),
            ],
        }
    }
}

fn tier(name: &str, min: f64, perk: &str) -> TierConfig {
    TierConfig {
        name: name.into(),
        min,
        perk: perk.into(),
    }
}

/// Severe-weather alert source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_weather_api")]
    pub api_base: String,
    #[serde(default = "default_weather_agent")]
    pub user_agent: String,
    #[serde(default = "default_weather_timeout")]
    pub timeout_secs: u64,
    /// Service-area zone codes to poll.
    #[serde(default)]
    pub zones: Vec<String>,
}

fn default_weather_api() -> String { "https://api.weather.gov".into() }
fn default_weather_agent() -> String { "outreach-engine (ops@outreach.local)".into() }
fn default_weather_timeout() -> u64 { 8 }

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_base: default_weather_api(),
            user_agent: default_weather_agent(),
            timeout_secs: default_weather_timeout(),
            zones: vec![],
        }
    }
}

/// Outbound transport behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_transport_timeout")]
    pub timeout_secs: u64,
}

fn default_transport_timeout() -> u64 { 15 }

impl Default for TransportConfig {
    fn default() -> Self {
        Self { timeout_secs: default_transport_timeout() }
    }
}

/// Reference SQLite store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String { "~/.outreach/outreach.db".into() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self { db_path: default_db_path() }
    }
}

/// Transport channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelConfig {
    #[serde(default)]
    pub sms: Option<SmsChannelConfig>,
    #[serde(default)]
    pub email: Option<EmailChannelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsChannelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_sms_api")]
    pub api_base: String,
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
}

fn default_sms_api() -> String { "https://api.twilio.com".into() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailChannelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port_cfg")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub from_address: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

fn default_smtp_port_cfg() -> u16 { 587 }
