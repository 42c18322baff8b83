use async_trait::async_trait;

use crate::models::TriggerReason;

use super::{clamp_draft, DraftContext, MessageDrafter};

/// Deterministic fallback drafter used when no LLM provider is configured.
/// Operators usually edit the suggestion before approving anyway.
pub struct TemplateDrafter;

#[async_trait]
impl MessageDrafter for TemplateDrafter {
    async fn draft(&self, context: &DraftContext) -> anyhow::Result<String> {
        let name = context.customer_name.as_deref().unwrap_or("there");
        let service = context
            .desired_service
            .as_deref()
            .or(context.most_common_service.as_deref())
            .unwrap_or("your usual appointment");
        let business = &context.business_name;

        let text = match context.trigger_reason {
            TriggerReason::OverdueRebook => format!(
                "Hi {name}, it's been a while since your last {service} at {business} — \
                 would you like to book your next visit?"
            ),
            TriggerReason::VipInactive => format!(
                "Hi {name}, we've missed you at {business}! As one of our favourite regulars, \
                 just say the word and we'll find you a great time for {service}."
            ),
            TriggerReason::SeasonalService => format!(
                "Hi {name}, it's the season for {service} again — {business} would love to \
                 get you booked in."
            ),
            TriggerReason::UnexpectedAvailability => match context.slot_at.as_deref() {
                Some(slot) => format!(
                    "Hi {name}, a spot for {service} just opened up at {business} on {slot}. \
                     Want us to hold it for you?"
                ),
                None => format!(
                    "Hi {name}, a spot for {service} just opened up at {business}. \
                     Want us to hold it for you?"
                ),
            },
            TriggerReason::IntentNoBook => format!(
                "Hi {name}, you were so close to booking {service} at {business} — \
                 can we help you pick a time?"
            ),
            TriggerReason::RepeatableService => format!(
                "Hi {name}, it's about time for your next {service} — shall we get you \
                 on the calendar at {business}?"
            ),
            TriggerReason::VipTouch => format!(
                "Hi {name}, just a note from {business} to say thank you for being such a \
                 loyal customer. We're here whenever you need us!"
            ),
        };

        Ok(clamp_draft(&text, context.max_chars))
    }
}
