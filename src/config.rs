use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub business_name: String,
    pub default_channel: String,

    // Message drafting
    pub groq_api_key: String,
    pub groq_model: String,

    // Channel adapters
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_phone_number: String,
    pub channel_webhook_url: String,

    // Detector / batch
    pub detector_interval_secs: u64,
    pub auto_approve: bool,
    pub vip_inactive_days: i64,
    pub standard_inactive_days: i64,
    pub vip_touch_interval_days: i64,
    pub seasonal_min_gap_days: i64,
    pub dropped_intent_lookback_days: i64,
    pub intent_timeout_hours: i64,
    pub active_conversation_hours: i64,
    pub candidate_ttl_hours: i64,

    // Throttle
    pub daily_outreach_cap: i64,
    pub rebook_cooldown_days: i64,
    pub recommendation_cooldown_days: i64,
    pub response_timeout_days: i64,

    // Dispatch
    pub max_send_retries: i32,
    pub max_draft_chars: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: parse_env("PORT", 3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "outreach.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            business_name: env::var("BUSINESS_NAME").unwrap_or_else(|_| "our studio".to_string()),
            default_channel: env::var("DEFAULT_CHANNEL").unwrap_or_else(|_| "sms".to_string()),
            groq_api_key: env::var("GROQ_API_KEY").unwrap_or_default(),
            groq_model: env::var("GROQ_MODEL")
                .unwrap_or_else(|_| "llama-3.3-70b-versatile".to_string()),
            twilio_account_sid: env::var("TWILIO_ACCOUNT_SID").unwrap_or_default(),
            twilio_auth_token: env::var("TWILIO_AUTH_TOKEN").unwrap_or_default(),
            twilio_phone_number: env::var("TWILIO_PHONE_NUMBER").unwrap_or_default(),
            channel_webhook_url: env::var("CHANNEL_WEBHOOK_URL").unwrap_or_default(),
            detector_interval_secs: parse_env("DETECTOR_INTERVAL_SECS", 3600),
            auto_approve: parse_env("AUTO_APPROVE", false),
            vip_inactive_days: parse_env("VIP_INACTIVE_DAYS", 60),
            standard_inactive_days: parse_env("STANDARD_INACTIVE_DAYS", 120),
            vip_touch_interval_days: parse_env("VIP_TOUCH_INTERVAL_DAYS", 90),
            seasonal_min_gap_days: parse_env("SEASONAL_MIN_GAP_DAYS", 30),
            dropped_intent_lookback_days: parse_env("DROPPED_INTENT_LOOKBACK_DAYS", 30),
            intent_timeout_hours: parse_env("INTENT_TIMEOUT_HOURS", 24),
            active_conversation_hours: parse_env("ACTIVE_CONVERSATION_HOURS", 24),
            candidate_ttl_hours: parse_env("CANDIDATE_TTL_HOURS", 48),
            daily_outreach_cap: parse_env("DAILY_OUTREACH_CAP", 2),
            rebook_cooldown_days: parse_env("REBOOK_COOLDOWN_DAYS", 30),
            recommendation_cooldown_days: parse_env("RECOMMENDATION_COOLDOWN_DAYS", 60),
            response_timeout_days: parse_env("RESPONSE_TIMEOUT_DAYS", 7),
            max_send_retries: parse_env("MAX_SEND_RETRIES", 3),
            max_draft_chars: parse_env("MAX_DRAFT_CHARS", 480),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
