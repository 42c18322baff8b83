use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use axum::routing::{get, post, put};
use axum::Router;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use outreach::config::AppConfig;
use outreach::db;
use outreach::handlers;
use outreach::models::Channel;
use outreach::services::channels::twilio::TwilioAdapter;
use outreach::services::channels::webhook::WebhookAdapter;
use outreach::services::channels::ChannelRegistry;
use outreach::services::drafting::groq::GroqDrafter;
use outreach::services::drafting::template::TemplateDrafter;
use outreach::services::drafting::MessageDrafter;
use outreach::services::scheduler;
use outreach::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;

    let drafter: Box<dyn MessageDrafter> = if !config.groq_api_key.is_empty() {
        tracing::info!("using Groq message drafter (model: {})", config.groq_model);
        Box::new(GroqDrafter::new(
            config.groq_api_key.clone(),
            config.groq_model.clone(),
        ))
    } else {
        tracing::info!("no drafting provider configured, using templates");
        Box::new(TemplateDrafter)
    };

    let mut channels = ChannelRegistry::new();
    if !config.twilio_account_sid.is_empty() {
        for channel in [Channel::Sms, Channel::Whatsapp, Channel::Voice] {
            channels.register(
                channel,
                Arc::new(TwilioAdapter::new(
                    config.twilio_account_sid.clone(),
                    config.twilio_auth_token.clone(),
                    config.twilio_phone_number.clone(),
                    channel,
                )),
            );
        }
    }
    if !config.channel_webhook_url.is_empty() {
        for channel in [Channel::Email, Channel::Social] {
            channels.register(
                channel,
                Arc::new(WebhookAdapter::new(
                    config.channel_webhook_url.clone(),
                    channel,
                )),
            );
        }
    }
    tracing::info!(
        configured = ?channels.configured().iter().map(|c| c.as_str()).collect::<Vec<_>>(),
        "channel adapters ready"
    );

    let (candidate_tx, _) = broadcast::channel(256);

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        drafter,
        channels,
        paused: AtomicBool::new(false),
        candidate_tx,
    });

    scheduler::spawn(Arc::clone(&state));

    let app = Router::new()
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
        .route(
            "/api/candidates/stream",
            get(handlers::candidates::candidates_stream),
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
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
