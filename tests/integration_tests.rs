use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::{get, post, put};
use axum::Router;
use chrono::{Duration, Utc};
use tower::ServiceExt;

use outreach::config::AppConfig;
use outreach::db;
use outreach::handlers;
use outreach::models::Channel;
use outreach::services::channels::{ChannelAdapter, ChannelRegistry, DeliveryReceipt};
use outreach::services::dispatcher;
use outreach::services::drafting::{DraftContext, MessageDrafter};
use outreach::state::AppState;

// ── Mock Providers ──

struct MockDrafter;

#[async_trait]
impl MessageDrafter for MockDrafter {
    async fn draft(&self, context: &DraftContext) -> anyhow::Result<String> {
        Ok(format!(
            "Draft for {} via {}",
            context.trigger_reason.as_str(),
            context.channel.as_str()
        ))
    }
}

struct MockChannel {
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl ChannelAdapter for MockChannel {
    async fn send(&self, to: &str, body: &str) -> anyhow::Result<DeliveryReceipt> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        Ok(DeliveryReceipt {
            external_id: Some("MSG123".to_string()),
        })
    }
}

struct FailingChannel;

#[async_trait]
impl ChannelAdapter for FailingChannel {
    async fn send(&self, _to: &str, _body: &str) -> anyhow::Result<DeliveryReceipt> {
        anyhow::bail!("provider unavailable")
    }
}

// ── Helpers ──

fn test_config() -> AppConfig {
    AppConfig {
        port: 3000,
        database_url: ":memory:".to_string(),
        admin_token: "test-token".to_string(),
        business_name: "Test Studio".to_string(),
        default_channel: "sms".to_string(),
        groq_api_key: "".to_string(),
        groq_model: "".to_string(),
        twilio_account_sid: "".to_string(),
        twilio_auth_token: "".to_string(), // empty = skip signature validation
        twilio_phone_number: "".to_string(),
        channel_webhook_url: "".to_string(),
        detector_interval_secs: 3600,
        auto_approve: false,
        vip_inactive_days: 60,
        standard_inactive_days: 120,
        vip_touch_interval_days: 90,
        seasonal_min_gap_days: 30,
        dropped_intent_lookback_days: 30,
        intent_timeout_hours: 24,
        active_conversation_hours: 24,
        candidate_ttl_hours: 48,
        daily_outreach_cap: 2,
        rebook_cooldown_days: 30,
        recommendation_cooldown_days: 60,
        response_timeout_days: 7,
        max_send_retries: 3,
        max_draft_chars: 480,
    }
}

fn test_state_with(
    registry: ChannelRegistry,
    config: AppConfig,
) -> (Arc<AppState>, Arc<Mutex<Vec<(String, String)>>>) {
    let conn = db::init_db(":memory:").unwrap();
    let sent = Arc::new(Mutex::new(vec![]));
    let mut channels = registry;
    if channels.resolve(Channel::Sms).is_none() {
        channels.register(
            Channel::Sms,
            Arc::new(MockChannel {
                sent: Arc::clone(&sent),
            }),
        );
    }
    let (candidate_tx, _) = tokio::sync::broadcast::channel(64);
    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config,
        drafter: Box::new(MockDrafter),
        channels,
        paused: AtomicBool::new(false),
        candidate_tx,
    });
    (state, sent)
}

fn test_state() -> (Arc<AppState>, Arc<Mutex<Vec<(String, String)>>>) {
    test_state_with(ChannelRegistry::new(), test_config())
}

fn test_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/webhook/reply", post(handlers::events::reply_webhook))
        .route(
            "/api/events/conversation",
            post(handlers::events::conversation_event),
        )
        .route(
            "/api/events/booking-completed",
            post(handlers::events::booking_completed),
        )
        .route(
            "/api/events/service-completed",
            post(handlers::events::service_completed),
        )
        .route("/api/events/slot-opened", post(handlers::events::slot_opened))
        .route("/api/events/purchase", post(handlers::events::purchase))
        .route("/api/candidates", get(handlers::candidates::get_candidates))
        .route(
            "/api/candidates/:id/approve",
            post(handlers::candidates::approve_candidate),
        )
        .route(
            "/api/candidates/:id/reject",
            post(handlers::candidates::reject_candidate),
        )
        .route("/api/admin/status", get(handlers::admin::get_status))
        .route("/api/admin/attempts", get(handlers::admin::get_attempts))
        .route(
            "/api/admin/recommendations",
            get(handlers::admin::get_recommendations),
        )
        .route(
            "/api/admin/intents/:customer_id",
            get(handlers::admin::get_intents),
        )
        .route("/api/admin/pause", post(handlers::admin::pause_engine))
        .route("/api/admin/resume", post(handlers::admin::resume_engine))
        .route("/api/admin/detector/run", post(handlers::admin::run_detector))
        .route("/api/customers", put(handlers::admin::sync_customers))
        .route("/api/services", put(handlers::admin::sync_services))
        .with_state(state)
}

fn authed(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", "Bearer test-token")
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn authed_get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("Authorization", "Bearer test-token")
        .body(Body::empty())
        .unwrap()
}

async fn json_body(res: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn days_ago(days: i64) -> String {
    (Utc::now().naive_utc() - Duration::days(days))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

async fn sync_customer(state: &Arc<AppState>, body: serde_json::Value) {
    let app = test_app(state.clone());
    let res = app
        .oneshot(authed("PUT", "/api/customers", serde_json::json!([body])))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

async fn conversation_event(
    state: &Arc<AppState>,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let app = test_app(state.clone());
    let res = app
        .oneshot(authed("POST", "/api/events/conversation", body))
        .await
        .unwrap();
    let status = res.status();
    (status, json_body(res).await)
}

// ── Auth ──

#[tokio::test]
async fn test_admin_requires_auth() {
    let (state, _) = test_state();
    let app = test_app(state);

    let res = app
        .oneshot(
            Request::builder()
                .uri("/api/admin/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_wrong_token() {
    let (state, _) = test_state();
    let app = test_app(state);

    let res = app
        .oneshot(
            Request::builder()
                .uri("/api/admin/status")
                .header("Authorization", "Bearer wrong-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_health() {
    let (state, _) = test_state();
    let app = test_app(state);

    let res = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
}

// ── Intent funnel over the API ──

#[tokio::test]
async fn test_funnel_booking_with_missing_contact() {
    let (state, _) = test_state();

    let (status, body) = conversation_event(
        &state,
        serde_json::json!({
            "customer_id": "c1", "channel": "sms",
            "kind": "service_named", "service": "haircut"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "service_selection");

    let (status, body) = conversation_event(
        &state,
        serde_json::json!({
            "customer_id": "c1", "channel": "sms", "kind": "slots_requested"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "availability_check");

    // Slot confirmed without contact details: no transition, side-channel ask
    let (status, body) = conversation_event(
        &state,
        serde_json::json!({
            "customer_id": "c1", "channel": "sms",
            "kind": "slot_confirmed", "slot": "2025-06-15 14:00"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "availability_check");
    assert_eq!(body["outcome"], "awaiting_contact");
    assert_eq!(body["awaiting_contact"], true);

    // "Jane Doe, 555-0100" arrives → booked with both fields populated
    let (status, body) = conversation_event(
        &state,
        serde_json::json!({
            "customer_id": "c1", "channel": "sms",
            "kind": "contact_provided", "name": "Jane Doe", "phone": "555-0100"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "booked");
    assert_eq!(body["outcome"], "booked");

    // Audit trail shows the terminal record with the collected data
    let app = test_app(state.clone());
    let res = app.oneshot(authed_get("/api/admin/intents/c1")).await.unwrap();
    let intents = json_body(res).await;
    assert_eq!(intents[0]["underlying_state"], "booked");
    assert_eq!(intents[0]["intent_data"]["customer_name"], "Jane Doe");
    assert_eq!(intents[0]["intent_data"]["customer_phone"], "555-0100");
}

#[tokio::test]
async fn test_invalid_transition_is_rejected() {
    let (state, _) = test_state();

    // A slot confirmation with no funnel under way is a 409, and nothing is
    // partially applied.
    let (status, _) = conversation_event(
        &state,
        serde_json::json!({
            "customer_id": "c2", "channel": "sms",
            "kind": "slot_confirmed", "slot": "2025-06-15 14:00"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let app = test_app(state.clone());
    let res = app.oneshot(authed_get("/api/admin/intents/c2")).await.unwrap();
    let intents = json_body(res).await;
    assert_eq!(intents.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_terminal_intent_reopens_as_new_record() {
    let (state, _) = test_state();

    conversation_event(
        &state,
        serde_json::json!({
            "customer_id": "c3", "channel": "sms",
            "kind": "service_named", "service": "color"
        }),
    )
    .await;
    conversation_event(
        &state,
        serde_json::json!({ "customer_id": "c3", "channel": "sms", "kind": "declined" }),
    )
    .await;

    // A later signal opens a fresh discovery record; the dropped one stays
    let (status, body) = conversation_event(
        &state,
        serde_json::json!({
            "customer_id": "c3", "channel": "sms",
            "kind": "service_named", "service": "massage"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "service_selection");

    let app = test_app(state.clone());
    let res = app.oneshot(authed_get("/api/admin/intents/c3")).await.unwrap();
    let intents = json_body(res).await;
    let records = intents.as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert!(records
        .iter()
        .any(|r| r["underlying_state"] == "dropped_intent"
            && r["drop_reason"] == "explicit_decline"));
}

#[tokio::test]
async fn test_decline_without_live_intent_is_noop() {
    let (state, _) = test_state();
    let (status, body) = conversation_event(
        &state,
        serde_json::json!({ "customer_id": "c4", "channel": "sms", "kind": "declined" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["note"], "no live intent");
}

// ── Detector → approval → dispatch ──

#[tokio::test]
async fn test_vip_inactive_detected_and_dispatched() {
    let (state, sent) = test_state();

    sync_customer(
        &state,
        serde_json::json!({
            "id": "vip1", "name": "Ada", "phone": "+15550001111",
            "value_tier": "vip", "last_visit_at": days_ago(95), "visit_count": 12,
            "most_common_service": "haircut"
        }),
    )
    .await;

    // Batch run proposes a candidate (95 days > VIP threshold of 60)
    let app = test_app(state.clone());
    let res = app
        .oneshot(authed("POST", "/api/admin/detector/run", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let summary = json_body(res).await;
    assert_eq!(summary["detection"]["proposed"], 1);

    let app = test_app(state.clone());
    let res = app.oneshot(authed_get("/api/candidates")).await.unwrap();
    let candidates = json_body(res).await;
    assert_eq!(candidates.as_array().unwrap().len(), 1);
    assert_eq!(candidates[0]["trigger_reason"], "vip_inactive");
    let candidate_id = candidates[0]["id"].as_str().unwrap().to_string();

    // Nothing was sent yet: detection never contacts anyone
    assert!(sent.lock().unwrap().is_empty());

    // Operator approves with an edited message
    let app = test_app(state.clone());
    let res = app
        .oneshot(authed(
            "POST",
            &format!("/api/candidates/{candidate_id}/approve"),
            serde_json::json!({ "message": "We miss you Ada!" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // Dispatch sends the literal approved text
    dispatcher::dispatch_due(&state).await.unwrap();
    {
        let messages = sent.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, "+15550001111");
        assert_eq!(messages[0].1, "We miss you Ada!");
    }

    let app = test_app(state.clone());
    let res = app
        .oneshot(authed_get("/api/admin/attempts?status=sent"))
        .await
        .unwrap();
    let attempts = json_body(res).await;
    assert_eq!(attempts.as_array().unwrap().len(), 1);
    assert_eq!(attempts[0]["message_sent"], "We miss you Ada!");
}

#[tokio::test]
async fn test_outstanding_attempt_suppresses_rerun() {
    let (state, _sent) = test_state();

    sync_customer(
        &state,
        serde_json::json!({
            "id": "vip2", "name": "Bea", "phone": "+15550002222",
            "value_tier": "vip", "last_visit_at": days_ago(95), "visit_count": 4
        }),
    )
    .await;

    // First run: propose + approve + dispatch
    let app = test_app(state.clone());
    app.oneshot(authed("POST", "/api/admin/detector/run", serde_json::json!({})))
        .await
        .unwrap();

    let app = test_app(state.clone());
    let res = app.oneshot(authed_get("/api/candidates")).await.unwrap();
    let candidates = json_body(res).await;
    let candidate_id = candidates[0]["id"].as_str().unwrap().to_string();

    let app = test_app(state.clone());
    app.oneshot(authed(
        "POST",
        &format!("/api/candidates/{candidate_id}/approve"),
        serde_json::json!({}),
    ))
    .await
    .unwrap();
    dispatcher::dispatch_due(&state).await.unwrap();

    // Second run: the sent, unanswered attempt suppresses a new candidate
    let app = test_app(state.clone());
    let res = app
        .oneshot(authed("POST", "/api/admin/detector/run", serde_json::json!({})))
        .await
        .unwrap();
    let summary = json_body(res).await;
    assert_eq!(summary["detection"]["proposed"], 0);
    assert_eq!(summary["detection"]["suppressed"], 1);

    let app = test_app(state.clone());
    let res = app.oneshot(authed_get("/api/candidates")).await.unwrap();
    let candidates = json_body(res).await;
    assert_eq!(candidates.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_reject_candidate() {
    let (state, sent) = test_state();

    sync_customer(
        &state,
        serde_json::json!({
            "id": "vip3", "phone": "+15550003333",
            "value_tier": "vip", "last_visit_at": days_ago(95), "visit_count": 2
        }),
    )
    .await;

    let app = test_app(state.clone());
    app.oneshot(authed("POST", "/api/admin/detector/run", serde_json::json!({})))
        .await
        .unwrap();

    let app = test_app(state.clone());
    let res = app.oneshot(authed_get("/api/candidates")).await.unwrap();
    let candidates = json_body(res).await;
    let candidate_id = candidates[0]["id"].as_str().unwrap().to_string();

    let app = test_app(state.clone());
    let res = app
        .oneshot(authed(
            "POST",
            &format!("/api/candidates/{candidate_id}/reject"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    dispatcher::dispatch_due(&state).await.unwrap();
    assert!(sent.lock().unwrap().is_empty());

    // Rejecting twice is a 404: the candidate is no longer proposed
    let app = test_app(state.clone());
    let res = app
        .oneshot(authed(
            "POST",
            &format!("/api/candidates/{candidate_id}/reject"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_active_conversation_suppresses_detection() {
    let (state, _) = test_state();

    sync_customer(
        &state,
        serde_json::json!({
            "id": "vip4", "phone": "+15550004444",
            "value_tier": "vip", "last_visit_at": days_ago(95), "visit_count": 2
        }),
    )
    .await;

    // The customer is mid-conversation right now
    conversation_event(
        &state,
        serde_json::json!({
            "customer_id": "vip4", "channel": "sms",
            "kind": "service_named", "service": "haircut"
        }),
    )
    .await;

    let app = test_app(state.clone());
    let res = app
        .oneshot(authed("POST", "/api/admin/detector/run", serde_json::json!({})))
        .await
        .unwrap();
    let summary = json_body(res).await;
    assert_eq!(summary["detection"]["proposed"], 0);
}

#[tokio::test]
async fn test_send_failure_retries_then_fails() {
    let mut registry = ChannelRegistry::new();
    registry.register(Channel::Sms, Arc::new(FailingChannel));
    let (state, _) = test_state_with(registry, test_config());

    sync_customer(
        &state,
        serde_json::json!({
            "id": "vip5", "phone": "+15550005555",
            "value_tier": "vip", "last_visit_at": days_ago(95), "visit_count": 2
        }),
    )
    .await;

    let app = test_app(state.clone());
    app.oneshot(authed("POST", "/api/admin/detector/run", serde_json::json!({})))
        .await
        .unwrap();

    let app = test_app(state.clone());
    let res = app.oneshot(authed_get("/api/candidates")).await.unwrap();
    let candidates = json_body(res).await;
    let candidate_id = candidates[0]["id"].as_str().unwrap().to_string();

    let app = test_app(state.clone());
    app.oneshot(authed(
        "POST",
        &format!("/api/candidates/{candidate_id}/approve"),
        serde_json::json!({}),
    ))
    .await
    .unwrap();

    // Two failed passes leave it pending with a retry count
    dispatcher::dispatch_due(&state).await.unwrap();
    dispatcher::dispatch_due(&state).await.unwrap();

    let app = test_app(state.clone());
    let res = app
        .oneshot(authed_get("/api/admin/attempts?status=pending"))
        .await
        .unwrap();
    let attempts = json_body(res).await;
    assert_eq!(attempts[0]["retry_count"], 2);

    // The third pass exhausts the retry budget
    dispatcher::dispatch_due(&state).await.unwrap();
    let app = test_app(state.clone());
    let res = app
        .oneshot(authed_get("/api/admin/attempts?status=failed"))
        .await
        .unwrap();
    let attempts = json_body(res).await;
    assert_eq!(attempts.as_array().unwrap().len(), 1);
}

// ── Recommendations ──

#[tokio::test]
async fn test_recommendation_scheduling_is_idempotent() {
    let (state, _) = test_state();

    sync_customer(
        &state,
        serde_json::json!({ "id": "c10", "phone": "+15550006666", "visit_count": 3 }),
    )
    .await;

    let app = test_app(state.clone());
    app.oneshot(authed(
        "PUT",
        "/api/services",
        serde_json::json!([{ "name": "color", "class": "treatment" }]),
    ))
    .await
    .unwrap();

    let completed_at = days_ago(0);
    let request = serde_json::json!({
        "customer_id": "c10", "service_name": "color",
        "product": "color-protect shampoo", "completed_at": completed_at
    });

    let app = test_app(state.clone());
    let res = app
        .oneshot(authed("POST", "/api/events/service-completed", request.clone()))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let first = json_body(res).await;
    assert_eq!(first["already_scheduled"], false);

    // Treatment class: send time falls 12–24h after completion
    let completed = chrono::NaiveDateTime::parse_from_str(&completed_at, "%Y-%m-%d %H:%M:%S").unwrap();
    let send_at = chrono::NaiveDateTime::parse_from_str(
        first["scheduled_send_at"].as_str().unwrap(),
        "%Y-%m-%d %H:%M:%S",
    )
    .unwrap();
    assert!(send_at >= completed + Duration::hours(12));
    assert!(send_at < completed + Duration::hours(24));

    // Replaying the completion returns the same recommendation and instant
    let app = test_app(state.clone());
    let res = app
        .oneshot(authed("POST", "/api/events/service-completed", request))
        .await
        .unwrap();
    let second = json_body(res).await;
    assert_eq!(second["already_scheduled"], true);
    assert_eq!(second["recommendation_id"], first["recommendation_id"]);
    assert_eq!(second["scheduled_send_at"], first["scheduled_send_at"]);
}

#[tokio::test]
async fn test_recommendation_dispatch_and_purchase() {
    let (state, sent) = test_state();

    sync_customer(
        &state,
        serde_json::json!({ "id": "c11", "phone": "+15550007777", "visit_count": 3 }),
    )
    .await;

    // Completed yesterday: the short-class window has already passed, so the
    // recommendation is due immediately.
    let app = test_app(state.clone());
    let res = app
        .oneshot(authed(
            "POST",
            "/api/events/service-completed",
            serde_json::json!({
                "customer_id": "c11", "service_name": "trim",
                "product": "texture spray", "completed_at": days_ago(1)
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    dispatcher::dispatch_due(&state).await.unwrap();
    {
        let messages = sent.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].1.contains("Draft for"));
    }

    // The purchase settles the sent recommendation with revenue
    let app = test_app(state.clone());
    let res = app
        .oneshot(authed(
            "POST",
            "/api/events/purchase",
            serde_json::json!({ "customer_id": "c11", "accepted": true, "revenue": 24.5 }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let app = test_app(state.clone());
    let res = app
        .oneshot(authed_get("/api/admin/recommendations?status=accepted"))
        .await
        .unwrap();
    let recs = json_body(res).await;
    assert_eq!(recs.as_array().unwrap().len(), 1);
    assert_eq!(recs[0]["purchased"], true);
    assert_eq!(recs[0]["revenue_generated"], 24.5);
}

// ── Booking completion and replies ──

#[tokio::test]
async fn test_booking_elsewhere_settles_open_attempt() {
    let (state, _sent) = test_state();

    sync_customer(
        &state,
        serde_json::json!({
            "id": "vip6", "phone": "+15550008888",
            "value_tier": "vip", "last_visit_at": days_ago(95), "visit_count": 2
        }),
    )
    .await;

    let app = test_app(state.clone());
    app.oneshot(authed("POST", "/api/admin/detector/run", serde_json::json!({})))
        .await
        .unwrap();
    let app = test_app(state.clone());
    let res = app.oneshot(authed_get("/api/candidates")).await.unwrap();
    let candidates = json_body(res).await;
    let candidate_id = candidates[0]["id"].as_str().unwrap().to_string();
    let app = test_app(state.clone());
    app.oneshot(authed(
        "POST",
        &format!("/api/candidates/{candidate_id}/approve"),
        serde_json::json!({}),
    ))
    .await
    .unwrap();
    dispatcher::dispatch_due(&state).await.unwrap();

    // Customer books through another channel while the message is in flight
    let app = test_app(state.clone());
    let res = app
        .oneshot(authed(
            "POST",
            "/api/events/booking-completed",
            serde_json::json!({ "customer_id": "vip6", "conversion_value": 85.0 }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    assert_eq!(body["attempts_settled"], 1);

    let app = test_app(state.clone());
    let res = app
        .oneshot(authed_get("/api/admin/attempts?status=booked"))
        .await
        .unwrap();
    let attempts = json_body(res).await;
    assert_eq!(attempts.as_array().unwrap().len(), 1);
    assert_eq!(attempts[0]["conversion_value"], 85.0);
}

#[tokio::test]
async fn test_reply_webhook_matches_latest_sent_attempt() {
    let (state, _sent) = test_state();

    sync_customer(
        &state,
        serde_json::json!({
            "id": "vip7", "phone": "+15550009999",
            "value_tier": "vip", "last_visit_at": days_ago(95), "visit_count": 2
        }),
    )
    .await;

    let app = test_app(state.clone());
    app.oneshot(authed("POST", "/api/admin/detector/run", serde_json::json!({})))
        .await
        .unwrap();
    let app = test_app(state.clone());
    let res = app.oneshot(authed_get("/api/candidates")).await.unwrap();
    let candidates = json_body(res).await;
    let candidate_id = candidates[0]["id"].as_str().unwrap().to_string();
    let app = test_app(state.clone());
    app.oneshot(authed(
        "POST",
        &format!("/api/candidates/{candidate_id}/approve"),
        serde_json::json!({}),
    ))
    .await
    .unwrap();
    dispatcher::dispatch_due(&state).await.unwrap();

    // Inbound SMS reply (empty auth token skips signature validation)
    let app = test_app(state.clone());
    let res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/reply")
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(Body::from(
                    "From=%2B15550009999&To=%2B15551230000&Body=yes%20please&MessageSid=SM1",
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let app = test_app(state.clone());
    let res = app
        .oneshot(authed_get("/api/admin/attempts?status=responded"))
        .await
        .unwrap();
    let attempts = json_body(res).await;
    assert_eq!(attempts.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_reply_from_unknown_number_is_ignored() {
    let (state, _) = test_state();
    let app = test_app(state);

    let res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/reply")
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(Body::from(
                    "From=%2B15559990000&To=%2B15551230000&Body=hello&MessageSid=SM2",
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("<Response>"));
}

// ── Pause / status ──

#[tokio::test]
async fn test_pause_resume_roundtrip() {
    let (state, _) = test_state();

    let app = test_app(state.clone());
    let res = app
        .oneshot(authed("POST", "/api/admin/pause", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let app = test_app(state.clone());
    let res = app.oneshot(authed_get("/api/admin/status")).await.unwrap();
    let status = json_body(res).await;
    assert_eq!(status["paused"], true);

    let app = test_app(state.clone());
    app.oneshot(authed("POST", "/api/admin/resume", serde_json::json!({})))
        .await
        .unwrap();

    let app = test_app(state.clone());
    let res = app.oneshot(authed_get("/api/admin/status")).await.unwrap();
    let status = json_body(res).await;
    assert_eq!(status["paused"], false);
}

#[tokio::test]
async fn test_status_counts() {
    let (state, _) = test_state();

    sync_customer(
        &state,
        serde_json::json!({ "id": "c20", "phone": "+15550010000", "visit_count": 1 }),
    )
    .await;
    conversation_event(
        &state,
        serde_json::json!({
            "customer_id": "c20", "channel": "sms",
            "kind": "service_named", "service": "haircut"
        }),
    )
    .await;

    let app = test_app(state.clone());
    let res = app.oneshot(authed_get("/api/admin/status")).await.unwrap();
    let status = json_body(res).await;
    assert_eq!(status["customers"], 1);
    assert_eq!(status["live_intents"], 1);
    assert_eq!(status["open_attempts"], 0);
    assert_eq!(status["proposed_candidates"], 0);
}
