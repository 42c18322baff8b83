use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

use super::{clamp_draft, DraftContext, MessageDrafter};

const SYSTEM_PROMPT: &str = "You write one short, friendly proactive message for a booking \
business reaching out to a customer. You receive structured JSON context: who the customer is, \
why we are contacting them (trigger_reason), and any service, slot or product involved. Reply \
with ONLY the message text, no quotes, no explanation. Keep it warm, concise and channel- \
appropriate, and never invent prices or times that are not in the context.";

pub struct GroqDrafter {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GroqDrafter {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl MessageDrafter for GroqDrafter {
    async fn draft(&self, context: &DraftContext) -> anyhow::Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": serde_json::to_string(context)? },
            ],
            "temperature": 0.7,
        });

        let resp = self
            .client
            .post("https://api.groq.com/openai/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to call Groq API")?;

        let status = resp.status();
        let data: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse Groq response")?;

        if !status.is_success() {
            anyhow::bail!("Groq API error ({}): {}", status, data);
        }

        let text = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing content in Groq response"))?;

        Ok(clamp_draft(text, context.max_chars))
    }
}
