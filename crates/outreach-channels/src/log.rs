//! Dry-run transport: logs what would have been sent.

use async_trait::async_trait;
use outreach_core::traits::Transport;
use outreach_core::types::DeliveryReceipt;

#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    fn name(&self) -> &str {
        "log"
    }

    async fn send_sms(&self, to: &str, body: &str) -> DeliveryReceipt {
        tracing::info!("📱 [dry-run] SMS → {to}: {body}");
        DeliveryReceipt::ok(None)
    }

    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        _html_body: Option<&str>,
        text_body: Option<&str>,
    ) -> DeliveryReceipt {
        tracing::info!(
            "📧 [dry-run] Email → {to}: {subject} ({} chars)",
            text_body.map(str::len).unwrap_or(0)
        );
        DeliveryReceipt::ok(None)
    }
}
