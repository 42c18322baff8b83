use std::sync::Arc;

use chrono::{Duration, NaiveDateTime, Utc};
use serde::Serialize;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{
    CandidateStatus, Channel, Customer, OutreachAttempt, ProductRecommendation, ResponseStatus,
    TriggerReason,
};
use crate::services::drafting::DraftContext;
use crate::services::throttle::{self, ThrottlePolicy};
use crate::state::AppState;

/// Converts a proposed candidate into a pending attempt, under the same
/// per-(customer, trigger_reason) uniqueness guard the detector relies on.
/// This is the only way an attempt comes into existence.
pub fn approve_candidate(
    state: &Arc<AppState>,
    candidate_id: &str,
    edited_message: Option<String>,
) -> Result<OutreachAttempt, AppError> {
    let now = Utc::now().naive_utc();
    let throttle_policy = ThrottlePolicy::from_config(&state.config);

    let mut db = state.db.lock().unwrap();

    let candidate = queries::get_candidate(&db, candidate_id)?
        .ok_or_else(|| AppError::NotFound(format!("candidate {candidate_id}")))?;
    if candidate.status != CandidateStatus::Proposed {
        return Err(AppError::InvariantViolation(format!(
            "candidate {candidate_id} already {}",
            candidate.status.as_str()
        )));
    }

    let attempts = queries::recent_attempts(&db, &candidate.customer_id, 20)?;
    let recommendations = queries::recent_recommendations(&db, &candidate.customer_id, 20)?;
    let verdict = throttle::check_outreach(
        &throttle_policy,
        now,
        candidate.trigger_reason,
        &attempts,
        &recommendations,
    );
    if !verdict.is_allowed() {
        return Err(AppError::Throttled(verdict.to_string()));
    }

    let message = edited_message.unwrap_or_else(|| candidate.suggested_message.clone());
    let attempt = OutreachAttempt {
        id: uuid::Uuid::new_v4().to_string(),
        customer_id: candidate.customer_id.clone(),
        trigger_reason: candidate.trigger_reason,
        channel: candidate.channel,
        draft_message: message,
        message_sent: None,
        response_status: ResponseStatus::Pending,
        conversion_value: None,
        retry_count: 0,
        created_date: now,
        sent_at: None,
        resolved_at: None,
    };

    if !queries::create_attempt(&mut db, &attempt)? {
        // An attempt for this reason is still open; the stale candidate is
        // retired so it cannot be approved again later.
        queries::decide_candidate(&db, candidate_id, CandidateStatus::Expired, &now)?;
        return Err(AppError::InvariantViolation(format!(
            "open {} attempt already exists for customer {}",
            candidate.trigger_reason.as_str(),
            candidate.customer_id
        )));
    }
    queries::decide_candidate(&db, candidate_id, CandidateStatus::Converted, &now)?;

    tracing::info!(
        candidate = %candidate_id,
        customer = %attempt.customer_id,
        trigger = attempt.trigger_reason.as_str(),
        "candidate approved"
    );
    Ok(attempt)
}

pub fn reject_candidate(state: &Arc<AppState>, candidate_id: &str) -> Result<(), AppError> {
    let now = Utc::now().naive_utc();
    let db = state.db.lock().unwrap();
    if !queries::decide_candidate(&db, candidate_id, CandidateStatus::Rejected, &now)? {
        return Err(AppError::NotFound(format!(
            "no proposed candidate {candidate_id}"
        )));
    }
    Ok(())
}

#[derive(Debug, Default, Serialize)]
pub struct DispatchSummary {
    pub attempts_sent: usize,
    pub attempts_failed: usize,
    pub attempts_retried: usize,
    pub recommendations_sent: usize,
    pub skipped: usize,
}

enum SendOutcome {
    Sent,
    Retried,
    Failed,
    Skipped,
}

/// Sends everything that is due: pending attempts and recommendations whose
/// scheduled instant has passed. Network sends happen with no lock held; the
/// connection is only taken to read due work and to record outcomes.
pub async fn dispatch_due(state: &Arc<AppState>) -> anyhow::Result<DispatchSummary> {
    let now = Utc::now().naive_utc();
    let throttle_policy = ThrottlePolicy::from_config(&state.config);
    let mut summary = DispatchSummary::default();

    let pending = {
        let db = state.db.lock().unwrap();
        queries::pending_attempts(&db)?
    };
    for attempt in pending {
        match send_attempt(state, &attempt, &throttle_policy, now).await {
            Ok(SendOutcome::Sent) => summary.attempts_sent += 1,
            Ok(SendOutcome::Retried) => summary.attempts_retried += 1,
            Ok(SendOutcome::Failed) => summary.attempts_failed += 1,
            Ok(SendOutcome::Skipped) => summary.skipped += 1,
            Err(e) => {
                tracing::warn!(attempt = %attempt.id, error = %e, "dispatch failed for attempt");
            }
        }
    }

    let due = {
        let db = state.db.lock().unwrap();
        queries::due_recommendations(&db, &now)?
    };
    for rec in due {
        match send_recommendation(state, &rec, &throttle_policy, now).await {
            Ok(SendOutcome::Sent) => summary.recommendations_sent += 1,
            Ok(_) => summary.skipped += 1,
            Err(e) => {
                tracing::warn!(recommendation = %rec.id, error = %e, "dispatch failed for recommendation");
            }
        }
    }

    Ok(summary)
}

async fn send_attempt(
    state: &Arc<AppState>,
    attempt: &OutreachAttempt,
    throttle_policy: &ThrottlePolicy,
    now: NaiveDateTime,
) -> anyhow::Result<SendOutcome> {
    let (customer, mut attempts, recommendations) = {
        let db = state.db.lock().unwrap();
        (
            queries::get_customer(&db, &attempt.customer_id)?,
            queries::recent_attempts(&db, &attempt.customer_id, 20)?,
            queries::recent_recommendations(&db, &attempt.customer_id, 20)?,
        )
    };

    // The attempt being dispatched is itself an open row; the re-check is
    // about everything else (cap, cooldown).
    attempts.retain(|a| a.id != attempt.id);
    let verdict = throttle::check_outreach(
        throttle_policy,
        now,
        attempt.trigger_reason,
        &attempts,
        &recommendations,
    );
    if !verdict.is_allowed() {
        tracing::debug!(attempt = %attempt.id, verdict = %verdict, "send deferred by throttle");
        return Ok(SendOutcome::Skipped);
    }

    let Some(customer) = customer else {
        tracing::error!(attempt = %attempt.id, customer = %attempt.customer_id, "customer record missing, failing attempt");
        let db = state.db.lock().unwrap();
        queries::mark_attempt_failed(&db, &attempt.id, &now)?;
        return Ok(SendOutcome::Failed);
    };

    let Some(to) = contact_address(&customer, attempt.channel) else {
        tracing::error!(attempt = %attempt.id, channel = attempt.channel.as_str(), "no contact address, failing attempt");
        let db = state.db.lock().unwrap();
        queries::mark_attempt_failed(&db, &attempt.id, &now)?;
        return Ok(SendOutcome::Failed);
    };

    let Some(adapter) = state.channels.resolve(attempt.channel) else {
        return fail_or_retry(
            state,
            attempt,
            now,
            &anyhow::anyhow!("channel {} not configured", attempt.channel.as_str()),
        );
    };

    match adapter.send(&to, &attempt.draft_message).await {
        Ok(receipt) => {
            let db = state.db.lock().unwrap();
            queries::mark_attempt_sent(&db, &attempt.id, &attempt.draft_message, &now)?;
            // A reminder went out while the customer was away; label any live
            // intent so the conversation resumes rather than restarts.
            queries::set_follow_up_flag(&db, &attempt.customer_id, &now)?;
            tracing::info!(
                attempt = %attempt.id,
                customer = %attempt.customer_id,
                channel = attempt.channel.as_str(),
                external_id = receipt.external_id.as_deref().unwrap_or("-"),
                "outreach sent"
            );
            Ok(SendOutcome::Sent)
        }
        Err(e) => fail_or_retry(state, attempt, now, &e),
    }
}

fn fail_or_retry(
    state: &Arc<AppState>,
    attempt: &OutreachAttempt,
    now: NaiveDateTime,
    error: &anyhow::Error,
) -> anyhow::Result<SendOutcome> {
    let db = state.db.lock().unwrap();
    let retries = queries::bump_attempt_retry(&db, &attempt.id)?;
    if retries >= state.config.max_send_retries {
        queries::mark_attempt_failed(&db, &attempt.id, &now)?;
        tracing::error!(
            attempt = %attempt.id,
            customer = %attempt.customer_id,
            retries,
            error = %error,
            "send failed permanently"
        );
        Ok(SendOutcome::Failed)
    } else {
        tracing::warn!(
            attempt = %attempt.id,
            retries,
            error = %error,
            "send failed, will retry"
        );
        Ok(SendOutcome::Retried)
    }
}

async fn send_recommendation(
    state: &Arc<AppState>,
    rec: &ProductRecommendation,
    throttle_policy: &ThrottlePolicy,
    now: NaiveDateTime,
) -> anyhow::Result<SendOutcome> {
    let (customer, attempts, mut recommendations) = {
        let db = state.db.lock().unwrap();
        (
            queries::get_customer(&db, &rec.customer_id)?,
            queries::recent_attempts(&db, &rec.customer_id, 20)?,
            queries::recent_recommendations(&db, &rec.customer_id, 20)?,
        )
    };

    recommendations.retain(|r| r.id != rec.id);
    let verdict =
        throttle::check_recommendation(throttle_policy, now, &attempts, &recommendations);
    if !verdict.is_allowed() {
        tracing::debug!(recommendation = %rec.id, verdict = %verdict, "upsell deferred by throttle");
        return Ok(SendOutcome::Skipped);
    }

    let Some(customer) = customer else {
        tracing::warn!(recommendation = %rec.id, "customer record missing, skipping");
        return Ok(SendOutcome::Skipped);
    };
    let Some(to) = contact_address(&customer, rec.channel) else {
        tracing::warn!(recommendation = %rec.id, "no contact address, skipping");
        return Ok(SendOutcome::Skipped);
    };

    let message = match &rec.message {
        Some(text) => text.clone(),
        None => {
            let context = DraftContext {
                business_name: state.config.business_name.clone(),
                customer_name: customer.name.clone(),
                value_tier: customer.value_tier,
                trigger_reason: TriggerReason::RepeatableService,
                channel: rec.channel,
                last_visit_at: customer
                    .last_visit_at
                    .map(|dt| dt.format("%Y-%m-%d").to_string()),
                most_common_service: customer.most_common_service.clone(),
                desired_service: Some(rec.service_name.clone()),
                slot_at: None,
                product: Some(rec.product.clone()),
                max_chars: state.config.max_draft_chars,
            };
            match state.drafter.draft(&context).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(recommendation = %rec.id, error = %e, "drafting failed, retrying next cycle");
                    return Ok(SendOutcome::Skipped);
                }
            }
        }
    };

    let Some(adapter) = state.channels.resolve(rec.channel) else {
        tracing::warn!(recommendation = %rec.id, channel = rec.channel.as_str(), "channel not configured, skipping");
        return Ok(SendOutcome::Skipped);
    };

    match adapter.send(&to, &message).await {
        Ok(receipt) => {
            let db = state.db.lock().unwrap();
            queries::mark_recommendation_sent(&db, &rec.id, &message, &now)?;
            tracing::info!(
                recommendation = %rec.id,
                customer = %rec.customer_id,
                external_id = receipt.external_id.as_deref().unwrap_or("-"),
                "recommendation sent"
            );
            Ok(SendOutcome::Sent)
        }
        Err(e) => {
            tracing::warn!(recommendation = %rec.id, error = %e, "recommendation send failed, retrying next cycle");
            Ok(SendOutcome::Retried)
        }
    }
}

fn contact_address(customer: &Customer, channel: Channel) -> Option<String> {
    match channel {
        Channel::Sms | Channel::Whatsapp | Channel::Voice => customer.phone.clone(),
        // Downstream delivery services resolve their own addresses.
        Channel::Email | Channel::Social => Some(customer.id.clone()),
    }
}

/// An inbound reply is credited to the most recent sent attempt.
pub fn record_reply(
    state: &Arc<AppState>,
    customer_id: &str,
) -> anyhow::Result<Option<OutreachAttempt>> {
    let now = Utc::now().naive_utc();
    let db = state.db.lock().unwrap();

    let Some(attempt) = queries::latest_sent_attempt(&db, customer_id)? else {
        return Ok(None);
    };
    queries::resolve_attempt(&db, &attempt.id, ResponseStatus::Responded, None, &now)?;
    tracing::info!(attempt = %attempt.id, customer = %customer_id, "reply matched to outreach");
    Ok(Some(attempt))
}

/// The customer booked (possibly through another channel). Open attempts are
/// settled as booked — messages already in flight are never recalled.
pub fn settle_booked(
    state: &Arc<AppState>,
    customer_id: &str,
    conversion_value: Option<f64>,
) -> anyhow::Result<usize> {
    let now = Utc::now().naive_utc();
    let db = state.db.lock().unwrap();

    let open = queries::open_attempts_for_customer(&db, customer_id)?;
    let mut settled = 0;
    for attempt in &open {
        if queries::resolve_attempt(
            &db,
            &attempt.id,
            ResponseStatus::Booked,
            conversion_value,
            &now,
        )? {
            settled += 1;
        }
    }
    if settled > 0 {
        tracing::info!(customer = %customer_id, settled, "open attempts settled as booked");
    }
    Ok(settled)
}

/// Time-based fallback: sent items with no response inside the window are
/// resolved as ignored, which is what the cooldown rules key on.
pub fn sweep_ignored(state: &Arc<AppState>, now: NaiveDateTime) -> anyhow::Result<(usize, usize)> {
    let cutoff = now - Duration::days(state.config.response_timeout_days);
    let db = state.db.lock().unwrap();
    let attempts = queries::sweep_ignored_attempts(&db, &cutoff, &now)?;
    let recommendations = queries::sweep_ignored_recommendations(&db, &cutoff, &now)?;
    if attempts > 0 || recommendations > 0 {
        tracing::info!(attempts, recommendations, "unanswered sends marked ignored");
    }
    Ok((attempts, recommendations))
}
