use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

use crate::models::Channel;

use super::{ChannelAdapter, DeliveryReceipt};

/// Hands a message to a downstream delivery service over HTTP. Used for
/// channels the business routes through other tooling (email campaigns,
/// social DMs); the receiver resolves the customer's actual address.
pub struct WebhookAdapter {
    url: String,
    channel: Channel,
    client: reqwest::Client,
}

impl WebhookAdapter {
    pub fn new(url: String, channel: Channel) -> Self {
        Self {
            url,
            channel,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChannelAdapter for WebhookAdapter {
    async fn send(&self, to: &str, body: &str) -> anyhow::Result<DeliveryReceipt> {
        let resp = self
            .client
            .post(&self.url)
            .json(&json!({
                "channel": self.channel.as_str(),
                "to": to,
                "body": body,
            }))
            .send()
            .await
            .context("failed to reach channel webhook")?
            .error_for_status()
            .context("channel webhook returned error")?;

        let data: serde_json::Value = resp.json().await.unwrap_or_default();
        Ok(DeliveryReceipt {
            external_id: data["id"].as_str().map(|s| s.to_string()),
        })
    }
}
