use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime, Utc};
use serde::Serialize;

use crate::db::queries;
use crate::models::IntentEvent;
use crate::services::{detector, dispatcher, intent_machine};
use crate::state::AppState;

#[derive(Debug, Default, Serialize)]
pub struct BatchSummary {
    pub intents_dropped: usize,
    pub ignored_attempts: usize,
    pub ignored_recommendations: usize,
    pub candidates_expired: usize,
    pub detection: detector::DetectionSummary,
    pub dispatch: dispatcher::DispatchSummary,
}

/// The periodic batch job. Inbound handlers keep mutating intents while this
/// runs; the two write paths touch different rows and the attempt uniqueness
/// guard runs transactionally, so no coordination is needed here.
pub fn spawn(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let period =
            std::time::Duration::from_secs(state.config.detector_interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if state.paused.load(Ordering::SeqCst) {
                tracing::debug!("engine paused, skipping batch run");
                continue;
            }

            match run_batch(&state).await {
                Ok(summary) => {
                    tracing::debug!(
                        intents_dropped = summary.intents_dropped,
                        proposed = summary.detection.proposed,
                        sent = summary.dispatch.attempts_sent,
                        "batch run complete"
                    );
                }
                Err(e) => tracing::error!(error = %e, "batch run failed"),
            }
        }
    })
}

/// One full pass: sweeps, detection, dispatch. Each phase isolates its own
/// failures so one broken record cannot starve the others.
pub async fn run_batch(state: &Arc<AppState>) -> anyhow::Result<BatchSummary> {
    let now = Utc::now().naive_utc();
    let mut summary = BatchSummary::default();

    match expire_stale_intents(state, now) {
        Ok(count) => summary.intents_dropped = count,
        Err(e) => tracing::warn!(error = %e, "intent inactivity sweep failed"),
    }

    match dispatcher::sweep_ignored(state, now) {
        Ok((attempts, recommendations)) => {
            summary.ignored_attempts = attempts;
            summary.ignored_recommendations = recommendations;
        }
        Err(e) => tracing::warn!(error = %e, "ignored sweep failed"),
    }

    match expire_candidates(state, now) {
        Ok(count) => summary.candidates_expired = count,
        Err(e) => tracing::warn!(error = %e, "candidate expiry failed"),
    }

    match detector::run_detection(state).await {
        Ok(detection) => summary.detection = detection,
        Err(e) => tracing::warn!(error = %e, "detector run failed"),
    }

    match dispatcher::dispatch_due(state).await {
        Ok(dispatch) => summary.dispatch = dispatch,
        Err(e) => tracing::warn!(error = %e, "dispatch pass failed"),
    }

    Ok(summary)
}

/// Availability checks that went quiet past the timeout are dropped — unless
/// a slot is already confirmed, in which case the machine refuses and the
/// record stays live awaiting contact details.
fn expire_stale_intents(state: &Arc<AppState>, now: NaiveDateTime) -> anyhow::Result<usize> {
    let cutoff = now - Duration::hours(state.config.intent_timeout_hours);
    let stale = {
        let db = state.db.lock().unwrap();
        queries::stale_availability_intents(&db, &cutoff)?
    };

    let mut dropped = 0;
    for mut intent in stale {
        match intent_machine::apply(&mut intent, &IntentEvent::InactivityTimeout, now) {
            Ok(_) => {
                let db = state.db.lock().unwrap();
                if queries::update_intent(&db, &intent)? {
                    dropped += 1;
                    tracing::info!(
                        intent = %intent.id,
                        customer = %intent.customer_id,
                        "intent dropped after inactivity"
                    );
                }
            }
            Err(intent_machine::TransitionError::NotPermitted { .. }) => {}
            Err(e) => {
                tracing::warn!(intent = %intent.id, error = %e, "inactivity transition rejected");
            }
        }
    }
    Ok(dropped)
}

fn expire_candidates(state: &Arc<AppState>, now: NaiveDateTime) -> anyhow::Result<usize> {
    let cutoff = now - Duration::hours(state.config.candidate_ttl_hours);
    let db = state.db.lock().unwrap();
    let expired = queries::expire_candidates(&db, &cutoff)?;
    if expired > 0 {
        tracing::info!(expired, "stale candidates expired");
    }
    Ok(expired)
}
