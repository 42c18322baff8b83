use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::Channel;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    OverdueRebook,
    VipInactive,
    SeasonalService,
    UnexpectedAvailability,
    IntentNoBook,
    RepeatableService,
    VipTouch,
}

impl TriggerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerReason::OverdueRebook => "overdue_rebook",
            TriggerReason::VipInactive => "vip_inactive",
            TriggerReason::SeasonalService => "seasonal_service",
            TriggerReason::UnexpectedAvailability => "unexpected_availability",
            TriggerReason::IntentNoBook => "intent_no_book",
            TriggerReason::RepeatableService => "repeatable_service",
            TriggerReason::VipTouch => "vip_touch",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "overdue_rebook" => Some(TriggerReason::OverdueRebook),
            "vip_inactive" => Some(TriggerReason::VipInactive),
            "seasonal_service" => Some(TriggerReason::SeasonalService),
            "unexpected_availability" => Some(TriggerReason::UnexpectedAvailability),
            "intent_no_book" => Some(TriggerReason::IntentNoBook),
            "repeatable_service" => Some(TriggerReason::RepeatableService),
            "vip_touch" => Some(TriggerReason::VipTouch),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Pending,
    Sent,
    Responded,
    Booked,
    Declined,
    Ignored,
    Failed,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Pending => "pending",
            ResponseStatus::Sent => "sent",
            ResponseStatus::Responded => "responded",
            ResponseStatus::Booked => "booked",
            ResponseStatus::Declined => "declined",
            ResponseStatus::Ignored => "ignored",
            ResponseStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "sent" => ResponseStatus::Sent,
            "responded" => ResponseStatus::Responded,
            "booked" => ResponseStatus::Booked,
            "declined" => ResponseStatus::Declined,
            "ignored" => ResponseStatus::Ignored,
            "failed" => ResponseStatus::Failed,
            _ => ResponseStatus::Pending,
        }
    }

    /// Pending and sent attempts still await a customer response.
    pub fn is_open(&self) -> bool {
        matches!(self, ResponseStatus::Pending | ResponseStatus::Sent)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutreachAttempt {
    pub id: String,
    pub customer_id: String,
    pub trigger_reason: TriggerReason,
    pub channel: Channel,
    pub draft_message: String,
    pub message_sent: Option<String>,
    pub response_status: ResponseStatus,
    pub conversion_value: Option<f64>,
    pub retry_count: i32,
    pub created_date: NaiveDateTime,
    pub sent_at: Option<NaiveDateTime>,
    pub resolved_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Proposed,
    Approved,
    Rejected,
    Expired,
    Converted,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Proposed => "proposed",
            CandidateStatus::Approved => "approved",
            CandidateStatus::Rejected => "rejected",
            CandidateStatus::Expired => "expired",
            CandidateStatus::Converted => "converted",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "approved" => CandidateStatus::Approved,
            "rejected" => CandidateStatus::Rejected,
            "expired" => CandidateStatus::Expired,
            "converted" => CandidateStatus::Converted,
            _ => CandidateStatus::Proposed,
        }
    }
}

/// Detector output awaiting approval. Candidates never reach a customer
/// directly; approval converts them into a pending OutreachAttempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutreachCandidate {
    pub id: String,
    pub customer_id: String,
    pub trigger_reason: TriggerReason,
    pub channel: Channel,
    pub suggested_message: String,
    pub context: serde_json::Value,
    pub status: CandidateStatus,
    pub created_at: NaiveDateTime,
    pub decided_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenSlot {
    pub id: String,
    pub service_name: String,
    pub slot_at: NaiveDateTime,
    pub opened_at: NaiveDateTime,
    pub consumed: bool,
}
