pub mod groq;
pub mod template;

use async_trait::async_trait;
use serde::Serialize;

use crate::models::{Channel, TriggerReason, ValueTier};

/// Structured context handed to the drafting collaborator. The engine never
/// builds prose itself; it only supplies these fields.
#[derive(Debug, Clone, Serialize)]
pub struct DraftContext {
    pub business_name: String,
    pub customer_name: Option<String>,
    pub value_tier: ValueTier,
    pub trigger_reason: TriggerReason,
    pub channel: Channel,
    pub last_visit_at: Option<String>,
    pub most_common_service: Option<String>,
    pub desired_service: Option<String>,
    pub slot_at: Option<String>,
    pub product: Option<String>,
    pub max_chars: usize,
}

#[async_trait]
pub trait MessageDrafter: Send + Sync {
    async fn draft(&self, context: &DraftContext) -> anyhow::Result<String>;
}

/// Hard bound on drafted text, whatever the provider returns.
pub fn clamp_draft(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    trimmed.chars().take(max_chars).collect()
}
