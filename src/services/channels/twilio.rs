use anyhow::Context;
use async_trait::async_trait;

use crate::models::Channel;

use super::{ChannelAdapter, DeliveryReceipt};

/// Twilio adapter covering SMS, WhatsApp and voice. WhatsApp rides the
/// Messages API with address prefixes; voice places a call that reads the
/// message out.
pub struct TwilioAdapter {
    account_sid: String,
    auth_token: String,
    from_number: String,
    channel: Channel,
    client: reqwest::Client,
}

impl TwilioAdapter {
    pub fn new(
        account_sid: String,
        auth_token: String,
        from_number: String,
        channel: Channel,
    ) -> Self {
        Self {
            account_sid,
            auth_token,
            from_number,
            channel,
            client: reqwest::Client::new(),
        }
    }

    fn address(&self, number: &str) -> String {
        match self.channel {
            Channel::Whatsapp => format!("whatsapp:{number}"),
            _ => number.to_string(),
        }
    }
}

#[async_trait]
impl ChannelAdapter for TwilioAdapter {
    async fn send(&self, to: &str, body: &str) -> anyhow::Result<DeliveryReceipt> {
        let (url, form): (String, Vec<(&str, String)>) = match self.channel {
            Channel::Voice => (
                format!(
                    "https://api.twilio.com/2010-04-01/Accounts/{}/Calls.json",
                    self.account_sid
                ),
                vec![
                    ("To", to.to_string()),
                    ("From", self.from_number.clone()),
                    (
                        "Twiml",
                        format!("<Response><Say>{}</Say></Response>", xml_escape(body)),
                    ),
                ],
            ),
            _ => (
                format!(
                    "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
                    self.account_sid
                ),
                vec![
                    ("To", self.address(to)),
                    ("From", self.address(&self.from_number)),
                    ("Body", body.to_string()),
                ],
            ),
        };

        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
            .context("failed to reach Twilio")?
            .error_for_status()
            .context("Twilio API returned error")?;

        let data: serde_json::Value = resp.json().await.unwrap_or_default();
        Ok(DeliveryReceipt {
            external_id: data["sid"].as_str().map(|s| s.to_string()),
        })
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
