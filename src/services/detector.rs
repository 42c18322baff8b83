use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDateTime, Utc};
use serde::Serialize;

use crate::config::AppConfig;
use crate::db::queries;
use crate::models::{
    CatalogService, Channel, Customer, CustomerIntent, IntentState, OpenSlot, OutreachAttempt,
    OutreachCandidate, ProductRecommendation, TriggerReason, ValueTier,
};
use crate::services::dispatcher;
use crate::services::drafting::DraftContext;
use crate::services::throttle::{self, ThrottlePolicy};
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct DetectorPolicy {
    pub vip_inactive_days: i64,
    pub standard_inactive_days: i64,
    pub vip_touch_interval_days: i64,
    pub seasonal_min_gap_days: i64,
    pub dropped_intent_lookback_days: i64,
    pub intent_timeout_hours: i64,
    pub active_conversation_hours: i64,
    pub default_channel: Channel,
}

impl Default for DetectorPolicy {
    fn default() -> Self {
        Self {
            vip_inactive_days: 60,
            standard_inactive_days: 120,
            vip_touch_interval_days: 90,
            seasonal_min_gap_days: 30,
            dropped_intent_lookback_days: 30,
            intent_timeout_hours: 24,
            active_conversation_hours: 24,
            default_channel: Channel::Sms,
        }
    }
}

impl DetectorPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            vip_inactive_days: config.vip_inactive_days,
            standard_inactive_days: config.standard_inactive_days,
            vip_touch_interval_days: config.vip_touch_interval_days,
            seasonal_min_gap_days: config.seasonal_min_gap_days,
            dropped_intent_lookback_days: config.dropped_intent_lookback_days,
            intent_timeout_hours: config.intent_timeout_hours,
            active_conversation_hours: config.active_conversation_hours,
            default_channel: Channel::parse(&config.default_channel).unwrap_or(Channel::Sms),
        }
    }
}

/// Everything the predicates may look at for one customer. Assembled from
/// storage before evaluation; the predicates themselves never touch the
/// database.
pub struct CustomerHistory {
    pub customer: Customer,
    pub live_intents: Vec<CustomerIntent>,
    pub recent_attempts: Vec<OutreachAttempt>,
    pub recent_recommendations: Vec<ProductRecommendation>,
    pub recent_drops: Vec<CustomerIntent>,
}

#[derive(Debug, Clone)]
pub struct CandidateSeed {
    pub trigger_reason: TriggerReason,
    pub service: Option<String>,
    pub matched_slot: Option<OpenSlot>,
}

impl CandidateSeed {
    fn reason(trigger_reason: TriggerReason, service: Option<String>) -> Option<Self> {
        Some(Self {
            trigger_reason,
            service,
            matched_slot: None,
        })
    }
}

/// Evaluates the trigger predicates in fixed priority order and stops at the
/// first match, so one run proposes at most one candidate per customer.
/// Customers in an active conversation are skipped outright; the intent
/// store is read here only for that suppression and for the aged-intent
/// triggers, never mutated.
pub fn evaluate_customer(
    history: &CustomerHistory,
    open_slots: &[OpenSlot],
    catalog: &[CatalogService],
    policy: &DetectorPolicy,
    now: NaiveDateTime,
) -> Option<CandidateSeed> {
    let active_cutoff = now - Duration::hours(policy.active_conversation_hours);
    if history
        .live_intents
        .iter()
        .any(|i| i.last_interaction >= active_cutoff)
    {
        return None;
    }

    vip_inactive(history, policy, now)
        .or_else(|| overdue_rebook(history, policy, now))
        .or_else(|| unexpected_availability(history, open_slots, policy, now))
        .or_else(|| seasonal_service(history, catalog, policy, now))
        .or_else(|| repeatable_service(history, catalog, now))
        .or_else(|| intent_no_book(history, policy, now))
        .or_else(|| vip_touch(history, policy, now))
}

fn days_since(then: NaiveDateTime, now: NaiveDateTime) -> i64 {
    (now - then).num_days()
}

fn vip_inactive(
    history: &CustomerHistory,
    policy: &DetectorPolicy,
    now: NaiveDateTime,
) -> Option<CandidateSeed> {
    if history.customer.value_tier != ValueTier::Vip {
        return None;
    }
    let last_visit = history.customer.last_visit_at?;
    if days_since(last_visit, now) > policy.vip_inactive_days {
        CandidateSeed::reason(
            TriggerReason::VipInactive,
            history.customer.most_common_service.clone(),
        )
    } else {
        None
    }
}

fn overdue_rebook(
    history: &CustomerHistory,
    policy: &DetectorPolicy,
    now: NaiveDateTime,
) -> Option<CandidateSeed> {
    let last_visit = history.customer.last_visit_at?;
    let interval = history
        .customer
        .typical_rebook_days
        .unwrap_or(policy.standard_inactive_days);
    if days_since(last_visit, now) > interval {
        CandidateSeed::reason(
            TriggerReason::OverdueRebook,
            history.customer.most_common_service.clone(),
        )
    } else {
        None
    }
}

/// A cancellation opened a slot the customer previously wanted: either a
/// recently dropped intent for that service, or a live availability check
/// that went stale without booking.
fn unexpected_availability(
    history: &CustomerHistory,
    open_slots: &[OpenSlot],
    policy: &DetectorPolicy,
    now: NaiveDateTime,
) -> Option<CandidateSeed> {
    let stale_cutoff = now - Duration::hours(policy.intent_timeout_hours);

    for slot in open_slots.iter().filter(|s| s.slot_at > now) {
        let dropped_match = history.recent_drops.iter().any(|i| {
            i.intent_data.desired_service.as_deref() == Some(slot.service_name.as_str())
        });
        let stale_match = history.live_intents.iter().any(|i| {
            i.state == IntentState::AvailabilityCheck
                && i.last_interaction < stale_cutoff
                && i.intent_data.desired_service.as_deref() == Some(slot.service_name.as_str())
        });

        if dropped_match || stale_match {
            return Some(CandidateSeed {
                trigger_reason: TriggerReason::UnexpectedAvailability,
                service: Some(slot.service_name.clone()),
                matched_slot: Some(slot.clone()),
            });
        }
    }
    None
}

fn seasonal_service(
    history: &CustomerHistory,
    catalog: &[CatalogService],
    policy: &DetectorPolicy,
    now: NaiveDateTime,
) -> Option<CandidateSeed> {
    let service_name = history.customer.most_common_service.as_deref()?;
    let service = catalog.iter().find(|s| s.name == service_name)?;
    if !service.in_season(now.month()) {
        return None;
    }

    let last_visit = history.customer.last_visit_at?;
    if days_since(last_visit, now) > policy.seasonal_min_gap_days {
        CandidateSeed::reason(
            TriggerReason::SeasonalService,
            Some(service.name.clone()),
        )
    } else {
        None
    }
}

fn repeatable_service(
    history: &CustomerHistory,
    catalog: &[CatalogService],
    now: NaiveDateTime,
) -> Option<CandidateSeed> {
    let service_name = history.customer.most_common_service.as_deref()?;
    let service = catalog.iter().find(|s| s.name == service_name)?;
    let interval = service.repeat_interval_days?;
    let last_visit = history.customer.last_visit_at?;

    if days_since(last_visit, now) > interval {
        CandidateSeed::reason(
            TriggerReason::RepeatableService,
            Some(service.name.clone()),
        )
    } else {
        None
    }
}

fn intent_no_book(
    history: &CustomerHistory,
    policy: &DetectorPolicy,
    now: NaiveDateTime,
) -> Option<CandidateSeed> {
    let stale_cutoff = now - Duration::hours(policy.intent_timeout_hours);
    let stale = history.live_intents.iter().find(|i| {
        i.state == IntentState::AvailabilityCheck && i.last_interaction < stale_cutoff
    })?;

    CandidateSeed::reason(
        TriggerReason::IntentNoBook,
        stale.intent_data.desired_service.clone(),
    )
}

fn vip_touch(
    history: &CustomerHistory,
    policy: &DetectorPolicy,
    now: NaiveDateTime,
) -> Option<CandidateSeed> {
    if history.customer.value_tier != ValueTier::Vip {
        return None;
    }

    let touch_cutoff = now - Duration::days(policy.vip_touch_interval_days);
    let recently_touched = history
        .recent_attempts
        .iter()
        .any(|a| a.trigger_reason == TriggerReason::VipTouch && a.created_date >= touch_cutoff);

    if recently_touched {
        None
    } else {
        CandidateSeed::reason(
            TriggerReason::VipTouch,
            history.customer.most_common_service.clone(),
        )
    }
}

pub fn resolve_channel(customer: &Customer, policy: &DetectorPolicy) -> Channel {
    customer
        .preferred_channel
        .or(customer.last_channel)
        .unwrap_or(policy.default_channel)
}

#[derive(Debug, Default, Serialize)]
pub struct DetectionSummary {
    pub examined: usize,
    pub proposed: usize,
    pub suppressed: usize,
    pub drafting_failures: usize,
    pub auto_approved: usize,
}

enum EvalOutcome {
    NoTrigger,
    AlreadyQueued,
    Suppressed,
    DraftFailed,
    Proposed { auto_approved: bool },
}

/// One detector batch pass. Per-customer failures are logged and isolated;
/// a single bad record never takes the run down.
pub async fn run_detection(state: &Arc<AppState>) -> anyhow::Result<DetectionSummary> {
    let policy = DetectorPolicy::from_config(&state.config);
    let throttle_policy = ThrottlePolicy::from_config(&state.config);
    let now = Utc::now().naive_utc();

    let (customers, catalog, open_slots) = {
        let db = state.db.lock().unwrap();
        (
            queries::list_customers(&db)?,
            queries::list_services(&db)?,
            queries::unconsumed_slots(&db)?,
        )
    };

    let mut summary = DetectionSummary::default();
    for customer in customers {
        summary.examined += 1;
        match evaluate_one(
            state,
            &customer,
            &catalog,
            &open_slots,
            &policy,
            &throttle_policy,
            now,
        )
        .await
        {
            Ok(EvalOutcome::Proposed { auto_approved }) => {
                summary.proposed += 1;
                if auto_approved {
                    summary.auto_approved += 1;
                }
            }
            Ok(EvalOutcome::Suppressed) => summary.suppressed += 1,
            Ok(EvalOutcome::DraftFailed) => summary.drafting_failures += 1,
            Ok(EvalOutcome::NoTrigger | EvalOutcome::AlreadyQueued) => {}
            Err(e) => {
                tracing::warn!(customer = %customer.id, error = %e, "detector pass failed for customer");
            }
        }
    }

    tracing::info!(
        examined = summary.examined,
        proposed = summary.proposed,
        suppressed = summary.suppressed,
        drafting_failures = summary.drafting_failures,
        "detector run complete"
    );
    Ok(summary)
}

async fn evaluate_one(
    state: &Arc<AppState>,
    customer: &Customer,
    catalog: &[CatalogService],
    open_slots: &[OpenSlot],
    policy: &DetectorPolicy,
    throttle_policy: &ThrottlePolicy,
    now: NaiveDateTime,
) -> anyhow::Result<EvalOutcome> {
    let history = {
        let db = state.db.lock().unwrap();

        if queries::has_proposed_candidate(&db, &customer.id)? {
            return Ok(EvalOutcome::AlreadyQueued);
        }

        let drop_cutoff = now - Duration::days(policy.dropped_intent_lookback_days);
        CustomerHistory {
            customer: customer.clone(),
            live_intents: queries::live_intents_for_customer(&db, &customer.id)?,
            recent_attempts: queries::recent_attempts(&db, &customer.id, 20)?,
            recent_recommendations: queries::recent_recommendations(&db, &customer.id, 20)?,
            recent_drops: queries::recent_dropped_intents(&db, &customer.id, &drop_cutoff)?,
        }
    };

    let Some(seed) = evaluate_customer(&history, open_slots, catalog, policy, now) else {
        return Ok(EvalOutcome::NoTrigger);
    };

    let verdict = throttle::check_outreach(
        throttle_policy,
        now,
        seed.trigger_reason,
        &history.recent_attempts,
        &history.recent_recommendations,
    );
    if !verdict.is_allowed() {
        tracing::debug!(
            customer = %customer.id,
            trigger = seed.trigger_reason.as_str(),
            verdict = %verdict,
            "candidate suppressed by throttle"
        );
        return Ok(EvalOutcome::Suppressed);
    }

    let channel = resolve_channel(customer, policy);
    let context = DraftContext {
        business_name: state.config.business_name.clone(),
        customer_name: customer.name.clone(),
        value_tier: customer.value_tier,
        trigger_reason: seed.trigger_reason,
        channel,
        last_visit_at: customer
            .last_visit_at
            .map(|dt| dt.format("%Y-%m-%d").to_string()),
        most_common_service: customer.most_common_service.clone(),
        desired_service: seed.service.clone(),
        slot_at: seed
            .matched_slot
            .as_ref()
            .map(|s| s.slot_at.format("%Y-%m-%d %H:%M").to_string()),
        product: None,
        max_chars: state.config.max_draft_chars,
    };

    // Drafting is network; a failure skips this customer for the cycle and
    // the next run retries.
    let suggested_message = match state.drafter.draft(&context).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(
                customer = %customer.id,
                trigger = seed.trigger_reason.as_str(),
                error = %e,
                "drafting failed, skipping candidate this cycle"
            );
            return Ok(EvalOutcome::DraftFailed);
        }
    };

    let candidate = OutreachCandidate {
        id: uuid::Uuid::new_v4().to_string(),
        customer_id: customer.id.clone(),
        trigger_reason: seed.trigger_reason,
        channel,
        suggested_message,
        context: serde_json::to_value(&context)?,
        status: crate::models::CandidateStatus::Proposed,
        created_at: now,
        decided_at: None,
    };

    {
        let db = state.db.lock().unwrap();
        // Re-check under the lock; another run may have queued one meanwhile.
        if queries::has_proposed_candidate(&db, &customer.id)? {
            return Ok(EvalOutcome::AlreadyQueued);
        }
        queries::insert_candidate(&db, &candidate)?;
        if let Some(slot) = &seed.matched_slot {
            queries::consume_slot(&db, &slot.id)?;
        }
    }

    tracing::info!(
        customer = %customer.id,
        trigger = candidate.trigger_reason.as_str(),
        channel = candidate.channel.as_str(),
        "outreach candidate proposed"
    );
    let _ = state.candidate_tx.send(candidate.clone());

    let mut auto_approved = false;
    if state.config.auto_approve {
        match dispatcher::approve_candidate(state, &candidate.id, None) {
            Ok(_) => auto_approved = true,
            Err(e) => {
                tracing::warn!(candidate = %candidate.id, error = %e, "auto-approval failed");
            }
        }
    }

    Ok(EvalOutcome::Proposed { auto_approved })
}
