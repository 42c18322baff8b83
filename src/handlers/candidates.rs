use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use axum::Json;
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::CandidateStatus;
use crate::services::dispatcher;
use crate::state::AppState;

use super::check_auth;

// GET /api/candidates
#[derive(Deserialize)]
pub struct CandidatesQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

pub async fn get_candidates(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<CandidatesQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let status = query
        .status
        .as_deref()
        .map(CandidateStatus::parse)
        .unwrap_or(CandidateStatus::Proposed);
    let limit = query.limit.unwrap_or(100);

    let candidates = {
        let db = state.db.lock().unwrap();
        queries::list_candidates(&db, status, limit)?
    };

    Ok(Json(serde_json::to_value(candidates).unwrap_or_default()))
}

// POST /api/candidates/:id/approve
#[derive(Deserialize, Default)]
pub struct ApproveRequest {
    pub message: Option<String>,
}

pub async fn approve_candidate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<ApproveRequest>>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let edited_message = body.and_then(|Json(b)| b.message);
    let attempt = dispatcher::approve_candidate(&state, &id, edited_message)?;

    Ok(Json(serde_json::json!({
        "attempt_id": attempt.id,
        "customer_id": attempt.customer_id,
        "trigger_reason": attempt.trigger_reason.as_str(),
        "channel": attempt.channel.as_str(),
        "response_status": attempt.response_status.as_str(),
    })))
}

// POST /api/candidates/:id/reject
pub async fn reject_candidate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    dispatcher::reject_candidate(&state, &id)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

// GET /api/candidates/stream — SSE feed for the approval surface
#[derive(Deserialize)]
pub struct SseQuery {
    pub token: Option<String>,
}

pub async fn candidates_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SseQuery>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, AppError> {
    // Auth via query param (EventSource can't set headers)
    let token = query.token.as_deref().unwrap_or("");
    if token != state.config.admin_token {
        return Err(AppError::Unauthorized);
    }

    // Snapshot of what is already waiting, then live proposals
    let backlog = {
        let db = state.db.lock().unwrap();
        queries::list_candidates(&db, CandidateStatus::Proposed, 200).unwrap_or_default()
    };

    let rx = state.candidate_tx.subscribe();

    let backlog_stream = tokio_stream::iter(backlog.into_iter().map(|candidate| {
        let data = serde_json::to_string(&candidate).unwrap_or_default();
        Ok::<_, Infallible>(Event::default().data(data).event("candidate"))
    }));

    let live_stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(candidate) => {
            let data = serde_json::to_string(&candidate).unwrap_or_default();
            Some(Ok(Event::default().data(data).event("candidate")))
        }
        Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(_)) => None,
    });

    let keepalive_stream = tokio_stream::StreamExt::map(
        tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(Duration::from_secs(
            30,
        ))),
        |_| Ok(Event::default().comment("keepalive")),
    );

    let combined = backlog_stream.chain(live_stream);
    let merged = StreamExt::merge(combined, keepalive_stream);

    Ok(Sse::new(merged))
}
