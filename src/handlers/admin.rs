use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{CatalogService, Channel, Customer, ServiceClass, ValueTier};
use crate::services::scheduler;
use crate::state::AppState;

use super::check_auth;

// GET /api/admin/status
#[derive(Serialize)]
pub struct StatusResponse {
    paused: bool,
    customers: i64,
    live_intents: i64,
    proposed_candidates: i64,
    open_attempts: i64,
}

pub async fn get_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let paused = state.paused.load(Ordering::SeqCst);
    let (customers, live_intents, proposed_candidates, open_attempts) = {
        let db = state.db.lock().unwrap();
        (
            queries::count_customers(&db)?,
            queries::count_live_intents(&db)?,
            queries::count_proposed_candidates(&db)?,
            queries::count_open_attempts(&db)?,
        )
    };

    Ok(Json(StatusResponse {
        paused,
        customers,
        live_intents,
        proposed_candidates,
        open_attempts,
    }))
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

// GET /api/admin/attempts
pub async fn get_attempts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let attempts = {
        let db = state.db.lock().unwrap();
        queries::list_attempts(&db, query.status.as_deref(), query.limit.unwrap_or(50))?
    };
    Ok(Json(serde_json::to_value(attempts).unwrap_or_default()))
}

// GET /api/admin/recommendations
pub async fn get_recommendations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let recommendations = {
        let db = state.db.lock().unwrap();
        queries::list_recommendations(&db, query.status.as_deref(), query.limit.unwrap_or(50))?
    };
    Ok(Json(serde_json::to_value(recommendations).unwrap_or_default()))
}

// GET /api/admin/intents/:customer_id
#[derive(Serialize)]
pub struct IntentResponse {
    id: String,
    channel: String,
    state: String,
    underlying_state: String,
    awaiting_contact: bool,
    drop_reason: Option<String>,
    intent_data: serde_json::Value,
    last_interaction: String,
    created_at: String,
}

pub async fn get_intents(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(customer_id): Path<String>,
) -> Result<Json<Vec<IntentResponse>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let intents = {
        let db = state.db.lock().unwrap();
        queries::intents_for_customer(&db, &customer_id)?
    };

    let response = intents
        .into_iter()
        .map(|intent| IntentResponse {
            state: intent.effective_state().to_string(),
            underlying_state: intent.state.as_str().to_string(),
            awaiting_contact: intent.intent_data.awaiting_contact,
            drop_reason: intent.drop_reason.map(|r| r.as_str().to_string()),
            intent_data: serde_json::to_value(&intent.intent_data).unwrap_or_default(),
            channel: intent.channel.as_str().to_string(),
            last_interaction: queries::fmt_dt(&intent.last_interaction),
            created_at: queries::fmt_dt(&intent.created_at),
            id: intent.id,
        })
        .collect();

    Ok(Json(response))
}

// POST /api/admin/pause
pub async fn pause_engine(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    state.paused.store(true, Ordering::SeqCst);
    tracing::info!("engine paused");
    Ok(Json(serde_json::json!({ "paused": true })))
}

// POST /api/admin/resume
pub async fn resume_engine(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    state.paused.store(false, Ordering::SeqCst);
    tracing::info!("engine resumed");
    Ok(Json(serde_json::json!({ "paused": false })))
}

// POST /api/admin/detector/run — manual batch trigger
pub async fn run_detector(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<scheduler::BatchSummary>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let summary = scheduler::run_batch(&state).await?;
    Ok(Json(summary))
}

// PUT /api/customers — snapshot sync from the booking provider
#[derive(Deserialize)]
pub struct CustomerSync {
    pub id: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub value_tier: Option<String>,
    pub preferred_channel: Option<String>,
    pub last_channel: Option<String>,
    pub last_visit_at: Option<String>,
    pub visit_count: Option<i64>,
    pub typical_rebook_days: Option<i64>,
    pub most_common_service: Option<String>,
}

pub async fn sync_customers(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Vec<CustomerSync>>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let mut synced = 0;
    {
        let db = state.db.lock().unwrap();
        for row in &body {
            let last_visit_at = match &row.last_visit_at {
                Some(raw) => Some(
                    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                        .map_err(|_| AppError::BadRequest(format!("bad last_visit_at: {raw}")))?,
                ),
                None => None,
            };
            let customer = Customer {
                id: row.id.clone(),
                name: row.name.clone(),
                phone: row.phone.clone(),
                value_tier: row
                    .value_tier
                    .as_deref()
                    .map(ValueTier::parse)
                    .unwrap_or(ValueTier::Standard),
                preferred_channel: row.preferred_channel.as_deref().and_then(Channel::parse),
                last_channel: row.last_channel.as_deref().and_then(Channel::parse),
                last_visit_at,
                visit_count: row.visit_count.unwrap_or(0),
                typical_rebook_days: row.typical_rebook_days,
                most_common_service: row.most_common_service.clone(),
            };
            queries::upsert_customer(&db, &customer)?;
            synced += 1;
        }
    }

    tracing::info!(synced, "customer snapshot synced");
    Ok(Json(serde_json::json!({ "synced": synced })))
}

// PUT /api/services — service catalog upsert
#[derive(Deserialize)]
pub struct ServiceSync {
    pub name: String,
    pub class: Option<String>,
    pub repeat_interval_days: Option<i64>,
    pub seasonal_months: Option<Vec<u32>>,
}

pub async fn sync_services(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Vec<ServiceSync>>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let mut synced = 0;
    {
        let db = state.db.lock().unwrap();
        for row in &body {
            let service = CatalogService {
                name: row.name.clone(),
                class: row
                    .class
                    .as_deref()
                    .map(ServiceClass::parse)
                    .unwrap_or(ServiceClass::Short),
                repeat_interval_days: row.repeat_interval_days,
                seasonal_months: row.seasonal_months.clone(),
            };
            queries::upsert_service(&db, &service)?;
            synced += 1;
        }
    }

    Ok(Json(serde_json::json!({ "synced": synced })))
}
