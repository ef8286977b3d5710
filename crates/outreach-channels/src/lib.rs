//! # Outreach Channels
//! Transport implementations for outbound outreach.
//!
//! - `sms`: HTTP messaging API (Twilio-compatible Messages endpoint)
//! - `email`: SMTP via async lettre
//! - `log`: dry-run transport that only logs
//!
//! `ChannelTransport` bundles whichever channels are configured behind the
//! engine's `Transport` contract.

pub mod email;
pub mod log;
pub mod sms;

use async_trait::async_trait;
use outreach_core::config::ChannelConfig;
use outreach_core::traits::Transport;
use outreach_core::types::DeliveryReceipt;

pub use email::EmailChannel;
pub use log::LogTransport;
pub use sms::SmsChannel;

/// SMS + email behind one `Transport`.
pub struct ChannelTransport {
    sms: Option<SmsChannel>,
    email: Option<EmailChannel>,
}

impl ChannelTransport {
    pub fn new(sms: Option<SmsChannel>, email: Option<EmailChannel>) -> Self {
        Self { sms, email }
    }

    /// Build from config, skipping disabled or incomplete channels.
    pub fn from_config(config: &ChannelConfig) -> Self {
        let sms = config
            .sms
            .as_ref()
            .filter(|c| c.enabled && !c.account_sid.is_empty() && !c.from_number.is_empty())
            .map(|c| SmsChannel::new(c.clone()));
        let email = config
            .email
            .as_ref()
            .filter(|c| c.enabled && !c.smtp_host.is_empty() && !c.from_address.is_empty())
            .map(|c| EmailChannel::new(c.clone()));
        if sms.is_none() {
            tracing::warn!("⚠️ SMS channel not configured, SMS sends will fail");
        }
        if email.is_none() {
            tracing::warn!("⚠️ Email channel not configured, email sends will fail");
        }
        Self { sms, email }
    }

    pub fn has_sms(&self) -> bool {
        self.sms.is_some()
    }

    pub fn has_email(&self) -> bool {
        self.email.is_some()
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    fn name(&self) -> &str {
        "channels"
    }

    async fn send_sms(&self, to: &str, body: &str) -> DeliveryReceipt {
        match &self.sms {
            Some(sms) => sms.send(to, body).await,
            None => DeliveryReceipt::failed("sms channel not configured"),
        }
    }

    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        html_body: Option<&str>,
        text_body: Option<&str>,
    ) -> DeliveryReceipt {
        match &self.email {
            Some(email) => email.send(to, subject, html_body, text_body).await,
            None => DeliveryReceipt::failed("email channel not configured"),
        }
    }
}
