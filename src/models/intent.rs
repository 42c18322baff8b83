use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::Channel;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntentState {
    Discovery,
    ServiceSelection,
    AvailabilityCheck,
    Booked,
    DroppedIntent,
}

impl IntentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentState::Discovery => "discovery",
            IntentState::ServiceSelection => "service_selection",
            IntentState::AvailabilityCheck => "availability_check",
            IntentState::Booked => "booked",
            IntentState::DroppedIntent => "dropped_intent",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "service_selection" => IntentState::ServiceSelection,
            "availability_check" => IntentState::AvailabilityCheck,
            "booked" => IntentState::Booked,
            "dropped_intent" => IntentState::DroppedIntent,
            _ => IntentState::Discovery,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, IntentState::Booked | IntentState::DroppedIntent)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    ExplicitDecline,
    Cancelled,
    InactivityTimeout,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::ExplicitDecline => "explicit_decline",
            DropReason::Cancelled => "cancelled",
            DropReason::InactivityTimeout => "inactivity_timeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "explicit_decline" => Some(DropReason::ExplicitDecline),
            "cancelled" => Some(DropReason::Cancelled),
            "inactivity_timeout" => Some(DropReason::InactivityTimeout),
            _ => None,
        }
    }
}

/// Attributes accumulated over the conversation. Merging is monotonic: a
/// value already present is never replaced by an absent one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentData {
    #[serde(default)]
    pub desired_service: Option<String>,
    #[serde(default)]
    pub preferred_date: Option<String>,
    #[serde(default)]
    pub preferred_time: Option<String>,
    #[serde(default)]
    pub selected_slot: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub awaiting_contact: bool,
}

impl IntentData {
    pub fn merge(&mut self, other: &IntentData) {
        merge_field(&mut self.desired_service, &other.desired_service);
        merge_field(&mut self.preferred_date, &other.preferred_date);
        merge_field(&mut self.preferred_time, &other.preferred_time);
        merge_field(&mut self.selected_slot, &other.selected_slot);
        merge_field(&mut self.customer_name, &other.customer_name);
        merge_field(&mut self.customer_phone, &other.customer_phone);
        merge_field(&mut self.notes, &other.notes);
    }

    pub fn has_contact(&self) -> bool {
        self.customer_name.is_some() && self.customer_phone.is_some()
    }

    pub fn from_json(s: &str) -> Self {
        serde_json::from_str(s).unwrap_or_default()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

fn merge_field(target: &mut Option<String>, incoming: &Option<String>) {
    if incoming.is_some() {
        *target = incoming.clone();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerIntent {
    pub id: String,
    pub customer_id: String,
    pub channel: Channel,
    pub state: IntentState,
    pub follow_up_sent: bool,
    pub intent_data: IntentData,
    pub drop_reason: Option<DropReason>,
    pub last_interaction: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

impl CustomerIntent {
    pub fn new(customer_id: &str, channel: Channel, now: NaiveDateTime) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            customer_id: customer_id.to_string(),
            channel,
            state: IntentState::Discovery,
            follow_up_sent: false,
            intent_data: IntentData::default(),
            drop_reason: None,
            last_interaction: now,
            created_at: now,
        }
    }

    /// The state as reported outward. A follow-up reminder is a label on top
    /// of the underlying state, which is preserved for resumption.
    pub fn effective_state(&self) -> &'static str {
        if self.follow_up_sent && !self.state.is_terminal() {
            "follow_up_sent"
        } else {
            self.state.as_str()
        }
    }
}

/// Conversation and lifecycle events that drive the intent state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum IntentEvent {
    MessageReceived,
    ServiceNamed {
        service: String,
    },
    SlotsRequested,
    SlotConfirmed {
        slot: String,
        name: Option<String>,
        phone: Option<String>,
    },
    ContactProvided {
        name: String,
        phone: String,
    },
    BookingConfirmed,
    Declined,
    Cancelled,
    InactivityTimeout,
    FollowUpSent,
}

impl IntentEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            IntentEvent::MessageReceived => "message_received",
            IntentEvent::ServiceNamed { .. } => "service_named",
            IntentEvent::SlotsRequested => "slots_requested",
            IntentEvent::SlotConfirmed { .. } => "slot_confirmed",
            IntentEvent::ContactProvided { .. } => "contact_provided",
            IntentEvent::BookingConfirmed => "booking_confirmed",
            IntentEvent::Declined => "declined",
            IntentEvent::Cancelled => "cancelled",
            IntentEvent::InactivityTimeout => "inactivity_timeout",
            IntentEvent::FollowUpSent => "follow_up_sent",
        }
    }
}
