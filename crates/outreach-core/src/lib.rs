//! # Outreach Core
//!
//! Shared vocabulary for the outreach engine: recipients, messages, campaign
//! categories, configuration, and the contracts the engine expects from the
//! surrounding application (transport, persistent store, metric sources).

pub mod clock;
pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::OutreachConfig;
pub use error::{OutreachError, Result};
