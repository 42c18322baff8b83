use chrono::NaiveDateTime;

use crate::models::{CustomerIntent, DropReason, IntentEvent, IntentState};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransitionError {
    #[error("no transition out of terminal state {state}")]
    Terminal { state: &'static str },

    #[error("event {event} not permitted in state {state}")]
    NotPermitted {
        state: &'static str,
        event: &'static str,
    },
}

/// What a successfully applied event did to the record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Applied {
    /// The state advanced along a funnel edge.
    Progressed(IntentState),
    /// Data merged or a flag changed; the state did not move.
    Stayed,
    /// A slot is confirmed but contact details are missing. The caller must
    /// request the missing fields through a side channel; the machine will
    /// not book on partial information.
    AwaitingContact,
    Booked,
    Dropped(DropReason),
}

/// The single transition authority. Every edge of the funnel lives in this
/// match; any (state, event) pair not listed is rejected, and callers only
/// persist the record when application succeeds.
pub fn apply(
    intent: &mut CustomerIntent,
    event: &IntentEvent,
    now: NaiveDateTime,
) -> Result<Applied, TransitionError> {
    if intent.state.is_terminal() {
        return Err(TransitionError::Terminal {
            state: intent.state.as_str(),
        });
    }

    let applied = match (intent.state, event) {
        // Follow-up reminders label the record without leaving the state;
        // the next customer message resumes the underlying funnel position.
        (_, IntentEvent::FollowUpSent) => {
            intent.follow_up_sent = true;
            Applied::Stayed
        }
        (_, IntentEvent::MessageReceived) => {
            intent.follow_up_sent = false;
            Applied::Stayed
        }

        (_, IntentEvent::Declined) => drop_intent(intent, DropReason::ExplicitDecline),

        (IntentState::Discovery, IntentEvent::ServiceNamed { service }) => {
            intent.intent_data.desired_service = Some(service.clone());
            intent.state = IntentState::ServiceSelection;
            Applied::Progressed(IntentState::ServiceSelection)
        }

        // Re-naming a service later is data accumulation, not an edge.
        (
            IntentState::ServiceSelection | IntentState::AvailabilityCheck,
            IntentEvent::ServiceNamed { service },
        ) => {
            intent.intent_data.desired_service = Some(service.clone());
            Applied::Stayed
        }

        (IntentState::ServiceSelection, IntentEvent::SlotsRequested) => {
            intent.state = IntentState::AvailabilityCheck;
            Applied::Progressed(IntentState::AvailabilityCheck)
        }

        (IntentState::AvailabilityCheck, IntentEvent::SlotConfirmed { slot, name, phone }) => {
            intent.intent_data.selected_slot = Some(slot.clone());
            if let Some(name) = name {
                intent.intent_data.customer_name = Some(name.clone());
            }
            if let Some(phone) = phone {
                intent.intent_data.customer_phone = Some(phone.clone());
            }

            if intent.intent_data.has_contact() {
                intent.intent_data.awaiting_contact = false;
                intent.state = IntentState::Booked;
                Applied::Booked
            } else {
                intent.intent_data.awaiting_contact = true;
                Applied::AwaitingContact
            }
        }

        (_, IntentEvent::ContactProvided { name, phone }) => {
            intent.intent_data.customer_name = Some(name.clone());
            intent.intent_data.customer_phone = Some(phone.clone());

            if intent.state == IntentState::AvailabilityCheck
                && intent.intent_data.selected_slot.is_some()
            {
                intent.intent_data.awaiting_contact = false;
                intent.state = IntentState::Booked;
                Applied::Booked
            } else {
                Applied::Stayed
            }
        }

        (IntentState::AvailabilityCheck, IntentEvent::BookingConfirmed) => {
            intent.intent_data.awaiting_contact = false;
            intent.state = IntentState::Booked;
            Applied::Booked
        }

        (IntentState::AvailabilityCheck, IntentEvent::Cancelled) => {
            drop_intent(intent, DropReason::Cancelled)
        }

        (IntentState::AvailabilityCheck, IntentEvent::InactivityTimeout)
            if intent.intent_data.selected_slot.is_none() =>
        {
            drop_intent(intent, DropReason::InactivityTimeout)
        }

        _ => {
            return Err(TransitionError::NotPermitted {
                state: intent.state.as_str(),
                event: event.kind(),
            })
        }
    };

    intent.last_interaction = now;
    Ok(applied)
}

fn drop_intent(intent: &mut CustomerIntent, reason: DropReason) -> Applied {
    intent.state = IntentState::DroppedIntent;
    intent.drop_reason = Some(reason);
    Applied::Dropped(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Channel;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn fresh() -> CustomerIntent {
        CustomerIntent::new("c1", Channel::Sms, dt("2025-03-01 10:00"))
    }

    #[test]
    fn test_full_funnel_to_booked() {
        let mut intent = fresh();
        let now = dt("2025-03-01 10:05");

        apply(
            &mut intent,
            &IntentEvent::ServiceNamed {
                service: "haircut".to_string(),
            },
            now,
        )
        .unwrap();
        assert_eq!(intent.state, IntentState::ServiceSelection);

        apply(&mut intent, &IntentEvent::SlotsRequested, now).unwrap();
        assert_eq!(intent.state, IntentState::AvailabilityCheck);

        let applied = apply(
            &mut intent,
            &IntentEvent::SlotConfirmed {
                slot: "2025-03-05 14:00".to_string(),
                name: Some("Jane Doe".to_string()),
                phone: Some("555-0100".to_string()),
            },
            now,
        )
        .unwrap();
        assert_eq!(applied, Applied::Booked);
        assert_eq!(intent.state, IntentState::Booked);
    }

    #[test]
    fn test_slot_without_contact_stays_and_awaits() {
        let mut intent = fresh();
        intent.state = IntentState::AvailabilityCheck;

        let applied = apply(
            &mut intent,
            &IntentEvent::SlotConfirmed {
                slot: "2025-03-05 14:00".to_string(),
                name: None,
                phone: None,
            },
            dt("2025-03-01 10:05"),
        )
        .unwrap();

        assert_eq!(applied, Applied::AwaitingContact);
        assert_eq!(intent.state, IntentState::AvailabilityCheck);
        assert!(intent.intent_data.awaiting_contact);
        assert_eq!(
            intent.intent_data.selected_slot.as_deref(),
            Some("2025-03-05 14:00")
        );

        // Next message supplies the missing fields; the cached slot completes
        // the booking.
        let applied = apply(
            &mut intent,
            &IntentEvent::ContactProvided {
                name: "Jane Doe".to_string(),
                phone: "555-0100".to_string(),
            },
            dt("2025-03-01 10:10"),
        )
        .unwrap();
        assert_eq!(applied, Applied::Booked);
        assert_eq!(intent.state, IntentState::Booked);
        assert_eq!(intent.intent_data.customer_name.as_deref(), Some("Jane Doe"));
        assert_eq!(
            intent.intent_data.customer_phone.as_deref(),
            Some("555-0100")
        );
        assert!(!intent.intent_data.awaiting_contact);
    }

    #[test]
    fn test_contact_without_slot_does_not_book() {
        let mut intent = fresh();
        intent.state = IntentState::AvailabilityCheck;

        let applied = apply(
            &mut intent,
            &IntentEvent::ContactProvided {
                name: "Jane".to_string(),
                phone: "555-0100".to_string(),
            },
            dt("2025-03-01 10:05"),
        )
        .unwrap();
        assert_eq!(applied, Applied::Stayed);
        assert_eq!(intent.state, IntentState::AvailabilityCheck);
    }

    #[test]
    fn test_decline_drops_from_any_state() {
        for state in [
            IntentState::Discovery,
            IntentState::ServiceSelection,
            IntentState::AvailabilityCheck,
        ] {
            let mut intent = fresh();
            intent.state = state;
            let applied =
                apply(&mut intent, &IntentEvent::Declined, dt("2025-03-01 10:05")).unwrap();
            assert_eq!(applied, Applied::Dropped(DropReason::ExplicitDecline));
            assert_eq!(intent.state, IntentState::DroppedIntent);
            assert_eq!(intent.drop_reason, Some(DropReason::ExplicitDecline));
        }
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        for state in [IntentState::Booked, IntentState::DroppedIntent] {
            let mut intent = fresh();
            intent.state = state;
            let err =
                apply(&mut intent, &IntentEvent::MessageReceived, dt("2025-03-01 10:05"))
                    .unwrap_err();
            assert!(matches!(err, TransitionError::Terminal { .. }));
        }
    }

    #[test]
    fn test_no_shortcut_edges() {
        // Discovery cannot jump straight to availability
        let mut intent = fresh();
        let err = apply(&mut intent, &IntentEvent::SlotsRequested, dt("2025-03-01 10:05"))
            .unwrap_err();
        assert!(matches!(err, TransitionError::NotPermitted { .. }));

        // Slot confirmation only means something during the availability check
        let mut intent = fresh();
        let err = apply(
            &mut intent,
            &IntentEvent::SlotConfirmed {
                slot: "x".to_string(),
                name: None,
                phone: None,
            },
            dt("2025-03-01 10:05"),
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::NotPermitted { .. }));
    }

    #[test]
    fn test_follow_up_is_a_label_not_a_state() {
        let mut intent = fresh();
        intent.state = IntentState::ServiceSelection;

        apply(&mut intent, &IntentEvent::FollowUpSent, dt("2025-03-02 09:00")).unwrap();
        assert!(intent.follow_up_sent);
        assert_eq!(intent.effective_state(), "follow_up_sent");
        assert_eq!(intent.state, IntentState::ServiceSelection);

        // The next customer message resumes service selection, not discovery
        apply(&mut intent, &IntentEvent::MessageReceived, dt("2025-03-02 12:00")).unwrap();
        assert!(!intent.follow_up_sent);
        assert_eq!(intent.state, IntentState::ServiceSelection);

        apply(&mut intent, &IntentEvent::SlotsRequested, dt("2025-03-02 12:01")).unwrap();
        assert_eq!(intent.state, IntentState::AvailabilityCheck);
    }

    #[test]
    fn test_inactivity_only_drops_without_confirmed_slot() {
        let mut intent = fresh();
        intent.state = IntentState::AvailabilityCheck;

        let applied = apply(
            &mut intent,
            &IntentEvent::InactivityTimeout,
            dt("2025-03-02 11:00"),
        )
        .unwrap();
        assert_eq!(applied, Applied::Dropped(DropReason::InactivityTimeout));

        let mut intent = fresh();
        intent.state = IntentState::AvailabilityCheck;
        intent.intent_data.selected_slot = Some("2025-03-05 14:00".to_string());
        let err = apply(
            &mut intent,
            &IntentEvent::InactivityTimeout,
            dt("2025-03-02 11:00"),
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::NotPermitted { .. }));
    }

    #[test]
    fn test_cancel_only_from_availability_check() {
        let mut intent = fresh();
        intent.state = IntentState::AvailabilityCheck;
        let applied =
            apply(&mut intent, &IntentEvent::Cancelled, dt("2025-03-01 12:00")).unwrap();
        assert_eq!(applied, Applied::Dropped(DropReason::Cancelled));

        let mut intent = fresh();
        let err = apply(&mut intent, &IntentEvent::Cancelled, dt("2025-03-01 12:00"))
            .unwrap_err();
        assert!(matches!(err, TransitionError::NotPermitted { .. }));
    }

    #[test]
    fn test_events_refresh_last_interaction() {
        let mut intent = fresh();
        let later = dt("2025-03-01 18:00");
        apply(
            &mut intent,
            &IntentEvent::ServiceNamed {
                service: "color".to_string(),
            },
            later,
        )
        .unwrap();
        assert_eq!(intent.last_interaction, later);
    }
}
