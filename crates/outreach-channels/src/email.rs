//! Email channel: async SMTP sending via lettre.
//!
//! Builds a text or multipart/alternative message and relays it through a
//! STARTTLS SMTP server. Supports Gmail, Outlook, SES SMTP, custom servers.

use lettre::message::{Mailbox, MultiPart, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message as LettreMessage, Tokio1Executor};
use outreach_core::config::EmailChannelConfig;
use outreach_core::types::DeliveryReceipt;

/// SMTP sending via lettre.
pub struct EmailChannel {
    config: EmailChannelConfig,
}

impl EmailChannel {
    pub fn new(config: EmailChannelConfig) -> Self {
        Self { config }
    }

    fn from_mailbox(&self) -> Result<Mailbox, String> {
        let from_name = self.config.display_name.as_deref().unwrap_or("Home Services");
        format!("{from_name} <{}>", self.config.from_address)
            .parse()
            .map_err(|e| format!("Invalid from: {e}"))
    }

    /// Assemble the message. At least one body must be present.
    fn build(
        &self,
        to: &str,
        subject: &str,
        html_body: Option<&str>,
        text_body: Option<&str>,
    ) -> Result<LettreMessage, String> {
        let to_mailbox: Mailbox = to.parse().map_err(|e| format!("Invalid to: {e}"))?;
        let builder = LettreMessage::builder()
            .from(self.from_mailbox()?)
            .to(to_mailbox)
            .subject(subject);

        match (html_body, text_body) {
            (Some(html), Some(text)) => builder
                .multipart(MultiPart::alternative_plain_html(text.to_string(), html.to_string()))
                .map_err(|e| format!("Build email: {e}")),
            (Some(html), None) => builder
                .header(ContentType::TEXT_HTML)
                .body(html.to_string())
                .map_err(|e| format!("Build email: {e}")),
            (None, Some(text)) => builder
                .header(ContentType::TEXT_PLAIN)
                .body(text.to_string())
                .map_err(|e| format!("Build email: {e}")),
            (None, None) => Err("email has neither html nor text body".to_string()),
        }
    }

    /// Send email via SMTP (async). Never errors; failures land in the receipt.
    pub async fn send(
        &self,
        to: &str,
        subject: &str,
        html_body: Option<&str>,
        text_body: Option<&str>,
    ) -> DeliveryReceipt {
        let email = match self.build(to, subject, html_body, text_body) {
            Ok(m) => m,
            Err(e) => return DeliveryReceipt::failed(e),
        };

        let creds = Credentials::new(self.config.username.clone(), self.config.password.clone());
        let mailer = match AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host) {
            Ok(relay) => relay.port(self.config.smtp_port).credentials(creds).build(),
            Err(e) => return DeliveryReceipt::failed(format!("SMTP relay: {e}")),
        };

        match mailer.send(email).await {
            Ok(response) => {
                tracing::info!("📤 Email sent to: {to}");
                let id = response.message().next().map(String::from);
                DeliveryReceipt::ok(id)
            }
            Err(e) => DeliveryReceipt::failed(format!("SMTP send: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> EmailChannel {
        EmailChannel::new(EmailChannelConfig {
            enabled: true,
            smtp_host: "smtp.example.com".into(),
            smtp_port: 587,
            username: "bot".into(),
            password: "pw".into(),
            from_address: "hello@example.com".into(),
            display_name: Some("Pros".into()),
        })
    }

    #[test]
    fn test_build_text_only() {
        let msg = channel()
            .build("dana@example.com", "Booked!", None, Some("See you Tuesday"))
            .unwrap();
        let raw = String::from_utf8(msg.formatted()).unwrap();
        assert!(raw.contains("Subject: Booked!"));
        assert!(raw.contains("See you Tuesday"));
    }

    #[test]
    fn test_build_requires_a_body() {
        assert!(channel().build("dana@example.com", "x", None, None).is_err());
    }

    #[test]
    fn test_build_rejects_bad_address() {
        assert!(channel().build("not an address", "x", None, Some("y")).is_err());
    }

    #[tokio::test]
    async fn test_send_to_bad_address_fails_without_network() {
        let receipt = channel().send("nope", "x", None, Some("y")).await;
        assert!(!receipt.success);
        assert!(receipt.error.unwrap().contains("Invalid to"));
    }
}
