//! Contracts the engine consumes from the surrounding application.

pub mod directory;
pub mod rate_limit;
pub mod store;
pub mod transport;

pub use directory::{MetricSource, ProviderPool, RecipientDirectory, ReferralLedger, WeatherSource};
pub use rate_limit::RateLimitStore;
pub use store::{CohortQuery, CohortStore, DedupFilter, EmergencyLog, FollowUpStore};
pub use transport::Transport;
