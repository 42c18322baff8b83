use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use base64::Engine;
use chrono::{NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha1::Sha1;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{
    Channel, CustomerIntent, IntentEvent, OpenSlot, ProductRecommendation, RecommendationStatus,
    ServiceClass,
};
use crate::services::detector::{self, DetectorPolicy};
use crate::services::intent_machine::{self, Applied};
use crate::services::throttle::{self, ThrottlePolicy};
use crate::state::AppState;

use super::check_auth;

// ── Conversation events ──

#[derive(Deserialize)]
pub struct ConversationEventRequest {
    pub customer_id: String,
    pub channel: String,
    pub kind: String,
    pub service: Option<String>,
    pub slot: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
}

fn parse_event(body: &ConversationEventRequest) -> Result<IntentEvent, AppError> {
    let event = match body.kind.as_str() {
        "message_received" => IntentEvent::MessageReceived,
        "service_named" => IntentEvent::ServiceNamed {
            service: body
                .service
                .clone()
                .ok_or_else(|| AppError::BadRequest("service_named requires service".into()))?,
        },
        "slots_requested" => IntentEvent::SlotsRequested,
        "slot_confirmed" => IntentEvent::SlotConfirmed {
            slot: body
                .slot
                .clone()
                .ok_or_else(|| AppError::BadRequest("slot_confirmed requires slot".into()))?,
            name: body.name.clone(),
            phone: body.phone.clone(),
        },
        "contact_provided" => IntentEvent::ContactProvided {
            name: body
                .name
                .clone()
                .ok_or_else(|| AppError::BadRequest("contact_provided requires name".into()))?,
            phone: body
                .phone
                .clone()
                .ok_or_else(|| AppError::BadRequest("contact_provided requires phone".into()))?,
        },
        "declined" => IntentEvent::Declined,
        "cancelled" => IntentEvent::Cancelled,
        other => {
            return Err(AppError::BadRequest(format!(
                "unknown conversation event kind: {other}"
            )))
        }
    };
    Ok(event)
}

// POST /api/events/conversation
pub async fn conversation_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ConversationEventRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let channel = Channel::parse(&body.channel)
        .ok_or_else(|| AppError::BadRequest(format!("unknown channel: {}", body.channel)))?;
    let event = parse_event(&body)?;
    let now = Utc::now().naive_utc();

    let (intent, applied) = {
        let db = state.db.lock().unwrap();
        let existing = queries::get_live_intent(&db, &body.customer_id, channel)?;

        let (mut intent, is_new) = match existing {
            Some(intent) => (intent, false),
            None => {
                // Declining with nothing live is a no-op, not a new funnel.
                if matches!(event, IntentEvent::Declined | IntentEvent::Cancelled) {
                    return Ok(Json(json!({ "intent": null, "note": "no live intent" })));
                }
                // First conversational signal opens a fresh record; a prior
                // booked/dropped record stays untouched in the audit trail.
                (CustomerIntent::new(&body.customer_id, channel, now), true)
            }
        };

        let applied = intent_machine::apply(&mut intent, &event, now)
            .map_err(|e| AppError::InvalidTransition(e.to_string()))?;

        if is_new {
            queries::insert_intent(&db, &intent)?;
        } else if !queries::update_intent(&db, &intent)? {
            return Err(AppError::InvariantViolation(format!(
                "intent {} is terminal and cannot change",
                intent.id
            )));
        }
        queries::set_last_channel(&db, &body.customer_id, channel)?;

        (intent, applied)
    };

    tracing::info!(
        customer = %body.customer_id,
        kind = %body.kind,
        state = intent.effective_state(),
        "conversation event applied"
    );

    // Booking through the conversation settles any outreach still in flight.
    if matches!(applied, Applied::Booked) {
        crate::services::dispatcher::settle_booked(&state, &body.customer_id, None)?;
    }

    let outcome = match applied {
        Applied::Booked => "booked",
        Applied::AwaitingContact => "awaiting_contact",
        Applied::Dropped(_) => "dropped",
        Applied::Progressed(_) | Applied::Stayed => "ok",
    };

    Ok(Json(json!({
        "intent_id": intent.id,
        "state": intent.effective_state(),
        "awaiting_contact": intent.intent_data.awaiting_contact,
        "outcome": outcome,
    })))
}

// ── Booking provider signals ──

#[derive(Deserialize)]
pub struct BookingCompletedRequest {
    pub customer_id: String,
    pub channel: Option<String>,
    pub conversion_value: Option<f64>,
}

// POST /api/events/booking-completed
pub async fn booking_completed(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<BookingCompletedRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let now = Utc::now().naive_utc();

    // Settle first: messages already sent are not recalled, they just get
    // credited. The intent transition may still be rejected independently.
    let settled =
        crate::services::dispatcher::settle_booked(&state, &body.customer_id, body.conversion_value)?;

    let transition = {
        let db = state.db.lock().unwrap();
        let channel = body.channel.as_deref().and_then(Channel::parse);
        let live = match channel {
            Some(channel) => queries::get_live_intent(&db, &body.customer_id, channel)?,
            None => queries::live_intents_for_customer(&db, &body.customer_id)?
                .into_iter()
                .next(),
        };

        match live {
            None => json!("no_live_intent"),
            Some(mut intent) => {
                match intent_machine::apply(&mut intent, &IntentEvent::BookingConfirmed, now) {
                    Ok(_) => {
                        queries::update_intent(&db, &intent)?;
                        json!({ "intent_id": intent.id, "state": intent.state.as_str() })
                    }
                    Err(e) => {
                        tracing::warn!(
                            customer = %body.customer_id,
                            error = %e,
                            "booking completion could not advance intent"
                        );
                        json!({ "rejected": e.to_string() })
                    }
                }
            }
        }
    };

    Ok(Json(json!({
        "attempts_settled": settled,
        "intent_transition": transition,
    })))
}

// ── Service completion → product recommendation ──

#[derive(Deserialize)]
pub struct ServiceCompletedRequest {
    pub customer_id: String,
    pub service_name: String,
    pub product: String,
    pub completed_at: Option<String>,
    pub channel: Option<String>,
}

// POST /api/events/service-completed
pub async fn service_completed(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ServiceCompletedRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let now = Utc::now().naive_utc();

    let completed_at = match &body.completed_at {
        Some(raw) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .map_err(|_| AppError::BadRequest(format!("bad completed_at: {raw}")))?,
        None => now,
    };

    let db = state.db.lock().unwrap();
    let customer = queries::get_customer(&db, &body.customer_id)?
        .ok_or_else(|| AppError::NotFound(format!("customer {}", body.customer_id)))?;

    queries::record_visit(&db, &body.customer_id, &completed_at)?;

    // Recomputing for the same completed service must land on the same
    // instant, so an already-scheduled recommendation is simply returned.
    if let Some(existing) = queries::find_recommendation_for_service(
        &db,
        &body.customer_id,
        &body.service_name,
        &completed_at,
    )? {
        return Ok(Json(json!({
            "recommendation_id": existing.id,
            "scheduled_send_at": queries::fmt_dt(&existing.scheduled_send_at),
            "already_scheduled": true,
        })));
    }

    let class = queries::get_service(&db, &body.service_name)?
        .map(|s| s.class)
        .unwrap_or(ServiceClass::Short);

    let throttle_policy = ThrottlePolicy::from_config(&state.config);
    let scheduled_send_at = throttle::scheduled_send_time(
        &throttle_policy,
        class,
        &body.customer_id,
        &body.service_name,
        completed_at,
    );

    let channel = body
        .channel
        .as_deref()
        .and_then(Channel::parse)
        .unwrap_or_else(|| {
            detector::resolve_channel(&customer, &DetectorPolicy::from_config(&state.config))
        });

    let rec = ProductRecommendation {
        id: uuid::Uuid::new_v4().to_string(),
        customer_id: body.customer_id.clone(),
        product: body.product.clone(),
        service_name: body.service_name.clone(),
        service_class: class,
        service_completed_at: completed_at,
        scheduled_send_at,
        channel,
        message: None,
        status: RecommendationStatus::Pending,
        purchased: false,
        revenue_generated: None,
        created_at: now,
        sent_at: None,
        resolved_at: None,
    };
    queries::insert_recommendation(&db, &rec)?;

    tracing::info!(
        customer = %rec.customer_id,
        service = %rec.service_name,
        class = class.as_str(),
        send_at = %queries::fmt_dt(&scheduled_send_at),
        "recommendation scheduled"
    );

    Ok(Json(json!({
        "recommendation_id": rec.id,
        "scheduled_send_at": queries::fmt_dt(&scheduled_send_at),
        "already_scheduled": false,
    })))
}

// ── Cancellation-opened availability ──

#[derive(Deserialize)]
pub struct SlotOpenedRequest {
    pub service_name: String,
    pub slot_at: String,
}

// POST /api/events/slot-opened
pub async fn slot_opened(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SlotOpenedRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let now = Utc::now().naive_utc();

    let slot_at = NaiveDateTime::parse_from_str(&body.slot_at, "%Y-%m-%d %H:%M:%S")
        .map_err(|_| AppError::BadRequest(format!("bad slot_at: {}", body.slot_at)))?;

    let slot = OpenSlot {
        id: uuid::Uuid::new_v4().to_string(),
        service_name: body.service_name.clone(),
        slot_at,
        opened_at: now,
        consumed: false,
    };

    {
        let db = state.db.lock().unwrap();
        queries::insert_open_slot(&db, &slot)?;
    }

    Ok(Json(json!({ "slot_id": slot.id })))
}

// ── Recommendation settlement ──

#[derive(Deserialize)]
pub struct PurchaseRequest {
    pub customer_id: String,
    pub accepted: bool,
    pub revenue: Option<f64>,
}

// POST /api/events/purchase
pub async fn purchase(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PurchaseRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let now = Utc::now().naive_utc();

    let db = state.db.lock().unwrap();
    let Some(rec) = queries::latest_sent_recommendation(&db, &body.customer_id)? else {
        return Err(AppError::NotFound(format!(
            "no sent recommendation for customer {}",
            body.customer_id
        )));
    };

    let status = if body.accepted {
        RecommendationStatus::Accepted
    } else {
        RecommendationStatus::Declined
    };
    queries::resolve_recommendation(&db, &rec.id, status, body.accepted, body.revenue, &now)?;

    tracing::info!(
        recommendation = %rec.id,
        customer = %body.customer_id,
        accepted = body.accepted,
        "recommendation settled"
    );

    Ok(Json(json!({ "recommendation_id": rec.id, "status": status.as_str() })))
}

// ── Inbound channel reply webhook ──

#[derive(Deserialize)]
#[allow(dead_code)]
pub struct ReplyWebhookForm {
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "To")]
    pub to: String,
    #[serde(rename = "Body")]
    pub body: String,
    #[serde(rename = "MessageSid")]
    pub message_sid: Option<String>,
}

fn validate_twilio_signature(
    auth_token: &str,
    signature: &str,
    url: &str,
    params: &[(&str, &str)],
) -> bool {
    // Data to sign: URL + params concatenated in key order
    let mut data = url.to_string();
    let mut sorted_params = params.to_vec();
    sorted_params.sort_by(|a, b| a.0.cmp(b.0));
    for (key, value) in &sorted_params {
        data.push_str(key);
        data.push_str(value);
    }

    let mut mac = match Hmac::<Sha1>::new_from_slice(auth_token.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(data.as_bytes());
    let result = mac.finalize().into_bytes();
    let expected = base64::engine::general_purpose::STANDARD.encode(result);

    expected == signature
}

// POST /webhook/reply
pub async fn reply_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<ReplyWebhookForm>,
) -> Response {
    let from = form.from.trim().to_string();
    let body = form.body.trim().to_string();

    tracing::info!(from = %from, "incoming channel reply");

    // Signature check is skipped when no auth token is configured (dev mode)
    if !state.config.twilio_auth_token.is_empty() {
        let signature = headers
            .get("x-twilio-signature")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if signature.is_empty() {
            tracing::warn!("missing X-Twilio-Signature header");
            return (axum::http::StatusCode::FORBIDDEN, "Missing signature").into_response();
        }

        let proto = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("https");
        let host = headers
            .get("x-forwarded-host")
            .or_else(|| headers.get("host"))
            .and_then(|v| v.to_str().ok())
            .unwrap_or("localhost");
        let url = format!("{proto}://{host}/webhook/reply");

        let params = [
            ("From", from.as_str()),
            ("To", form.to.as_str()),
            ("Body", body.as_str()),
            ("MessageSid", form.message_sid.as_deref().unwrap_or("")),
        ];

        if !validate_twilio_signature(&state.config.twilio_auth_token, signature, &url, &params) {
            tracing::warn!("invalid Twilio signature");
            return (axum::http::StatusCode::FORBIDDEN, "Invalid signature").into_response();
        }
    }

    let customer = {
        let db = state.db.lock().unwrap();
        queries::find_customer_by_phone(&db, &from).unwrap_or(None)
    };
    let Some(customer) = customer else {
        tracing::info!(from = %from, "reply from unknown number, ignoring");
        return twiml_response();
    };

    match crate::services::dispatcher::record_reply(&state, &customer.id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            tracing::info!(customer = %customer.id, "reply with no outstanding outreach");
        }
        Err(e) => {
            tracing::error!(customer = %customer.id, error = %e, "failed to record reply");
        }
    }

    // A reply is also a conversation signal: live intents resume from where
    // they were before any follow-up label.
    {
        let now = Utc::now().naive_utc();
        let db = state.db.lock().unwrap();
        if let Ok(intents) = queries::live_intents_for_customer(&db, &customer.id) {
            for mut intent in intents {
                if intent_machine::apply(&mut intent, &IntentEvent::MessageReceived, now).is_ok() {
                    let _ = queries::update_intent(&db, &intent);
                }
            }
        }
    }

    twiml_response()
}

fn twiml_response() -> Response {
    (
        [(header::CONTENT_TYPE, "application/xml")],
        "<Response></Response>",
    )
        .into_response()
}
