//! SMS channel over an HTTP messaging API.
//!
//! Speaks the Twilio-style Messages endpoint: form-encoded POST to
//! `{api_base}/2010-04-01/Accounts/{sid}/Messages.json` with basic auth.
//! Any compatible gateway can be targeted by changing `api_base`.

use outreach_core::config::SmsChannelConfig;
use outreach_core::types::DeliveryReceipt;
use serde::Deserialize;

/// Subset of the provider response we care about.
#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// SMS channel implementation.
pub struct SmsChannel {
    config: SmsChannelConfig,
    client: reqwest::Client,
}

impl SmsChannel {
    pub fn new(config: SmsChannelConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.api_base.trim_end_matches('/'),
            self.config.account_sid
        )
    }

    /// Send one text message. Never errors; failures land in the receipt.
    pub async fn send(&self, to: &str, body: &str) -> DeliveryReceipt {
        if to.trim().is_empty() {
            return DeliveryReceipt::failed("empty destination number");
        }

        let params = [
            ("To", to),
            ("From", self.config.from_number.as_str()),
            ("Body", body),
        ];

        let response = match self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&params)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return DeliveryReceipt::failed(format!("SMS API request failed: {e}")),
        };

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<MessageResource>(&error_text)
                .ok()
                .and_then(|m| m.message)
                .unwrap_or(error_text);
            return DeliveryReceipt::failed(format!("SMS API error {status}: {detail}"));
        }

        match response.json::<MessageResource>().await {
            Ok(resource) => {
                tracing::debug!(
                    "SMS sent: {} → {}",
                    resource.sid.as_deref().unwrap_or("unknown"),
                    to
                );
                DeliveryReceipt::ok(resource.sid)
            }
            // Accepted but unreadable body: the message still went out.
            Err(e) => {
                tracing::debug!("SMS accepted but response unparsable: {e}");
                DeliveryReceipt::ok(None)
            }
        }
    }
}
