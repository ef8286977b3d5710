//! Outbound SMS/email transport.

use async_trait::async_trait;

use crate::types::DeliveryReceipt;

/// Delivers a message over SMS or email.
///
/// Failures are reported in the receipt rather than as errors: the engine
/// treats every failure the same way (log and continue).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for logs.
    fn name(&self) -> &str;

    async fn send_sms(&self, to: &str, body: &str) -> DeliveryReceipt;

    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        html_body: Option<&str>,
        text_body: Option<&str>,
    ) -> DeliveryReceipt;
}
