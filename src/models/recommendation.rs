use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::Channel;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceClass {
    Short,
    Treatment,
}

impl ServiceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceClass::Short => "short",
            ServiceClass::Treatment => "treatment",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "treatment" => ServiceClass::Treatment,
            _ => ServiceClass::Short,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationStatus {
    Pending,
    Sent,
    Accepted,
    Declined,
    Ignored,
}

impl RecommendationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationStatus::Pending => "pending",
            RecommendationStatus::Sent => "sent",
            RecommendationStatus::Accepted => "accepted",
            RecommendationStatus::Declined => "declined",
            RecommendationStatus::Ignored => "ignored",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "sent" => RecommendationStatus::Sent,
            "accepted" => RecommendationStatus::Accepted,
            "declined" => RecommendationStatus::Declined,
            "ignored" => RecommendationStatus::Ignored,
            _ => RecommendationStatus::Pending,
        }
    }
}

/// Post-service retail upsell. Scheduled once inside the class window after
/// service completion; the send instant never changes after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRecommendation {
    pub id: String,
    pub customer_id: String,
    pub product: String,
    pub service_name: String,
    pub service_class: ServiceClass,
    pub service_completed_at: NaiveDateTime,
    pub scheduled_send_at: NaiveDateTime,
    pub channel: Channel,
    pub message: Option<String>,
    pub status: RecommendationStatus,
    pub purchased: bool,
    pub revenue_generated: Option<f64>,
    pub created_at: NaiveDateTime,
    pub sent_at: Option<NaiveDateTime>,
    pub resolved_at: Option<NaiveDateTime>,
}
