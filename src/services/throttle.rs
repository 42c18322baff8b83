use chrono::{Duration, NaiveDateTime};

use crate::config::AppConfig;
use crate::models::{
    OutreachAttempt, ProductRecommendation, ResponseStatus, ServiceClass, TriggerReason,
};

/// Every numeric anti-spam rule lives here and nowhere else. The guard is
/// pure: verdicts are computed from history slices the caller queried, never
/// from in-memory counters, so restarts and parallel instances agree.
#[derive(Debug, Clone)]
pub struct ThrottlePolicy {
    pub daily_cap: i64,
    pub window_hours: i64,
    pub outreach_cooldown_days: i64,
    pub recommendation_cooldown_days: i64,
    pub short_window_hours: (i64, i64),
    pub treatment_window_hours: (i64, i64),
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            daily_cap: 2,
            window_hours: 24,
            outreach_cooldown_days: 30,
            recommendation_cooldown_days: 60,
            short_window_hours: (2, 6),
            treatment_window_hours: (12, 24),
        }
    }
}

impl ThrottlePolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            daily_cap: config.daily_outreach_cap,
            window_hours: 24,
            outreach_cooldown_days: config.rebook_cooldown_days,
            recommendation_cooldown_days: config.recommendation_cooldown_days,
            short_window_hours: (2, 6),
            treatment_window_hours: (12, 24),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ThrottleVerdict {
    Allow,
    DailyCapReached { sent_in_window: i64 },
    CoolingDown { until: NaiveDateTime },
    OutstandingAttempt { trigger_reason: TriggerReason },
}

impl ThrottleVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ThrottleVerdict::Allow)
    }
}

impl std::fmt::Display for ThrottleVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThrottleVerdict::Allow => write!(f, "allow"),
            ThrottleVerdict::DailyCapReached { sent_in_window } => {
                write!(f, "daily cap reached ({sent_in_window} in window)")
            }
            ThrottleVerdict::CoolingDown { until } => {
                write!(f, "cooling down until {}", until.format("%Y-%m-%d %H:%M"))
            }
            ThrottleVerdict::OutstandingAttempt { trigger_reason } => {
                write!(f, "outstanding {} attempt", trigger_reason.as_str())
            }
        }
    }
}

/// Gate for a new outreach attempt. `attempts` must be the customer's recent
/// attempts, newest first.
pub fn check_outreach(
    policy: &ThrottlePolicy,
    now: NaiveDateTime,
    trigger_reason: TriggerReason,
    attempts: &[OutreachAttempt],
    recommendations: &[ProductRecommendation],
) -> ThrottleVerdict {
    if let Some(open) = attempts
        .iter()
        .find(|a| a.trigger_reason == trigger_reason && a.response_status.is_open())
    {
        return ThrottleVerdict::OutstandingAttempt {
            trigger_reason: open.trigger_reason,
        };
    }

    if let Some(until) = ignored_twice_until(attempts, policy.outreach_cooldown_days) {
        if until > now {
            return ThrottleVerdict::CoolingDown { until };
        }
    }

    let sent_in_window = messages_in_window(policy, now, attempts, recommendations);
    if sent_in_window >= policy.daily_cap {
        return ThrottleVerdict::DailyCapReached { sent_in_window };
    }

    ThrottleVerdict::Allow
}

/// Gate for sending a product recommendation. Shares the rolling daily cap
/// with outreach; the ignored-twice cooldown runs on the longer window.
pub fn check_recommendation(
    policy: &ThrottlePolicy,
    now: NaiveDateTime,
    attempts: &[OutreachAttempt],
    recommendations: &[ProductRecommendation],
) -> ThrottleVerdict {
    if let Some(until) = ignored_twice_until(attempts, policy.recommendation_cooldown_days) {
        if until > now {
            return ThrottleVerdict::CoolingDown { until };
        }
    }

    let sent_in_window = messages_in_window(policy, now, attempts, recommendations);
    if sent_in_window >= policy.daily_cap {
        return ThrottleVerdict::DailyCapReached { sent_in_window };
    }

    ThrottleVerdict::Allow
}

/// The two most recent attempts both ignored puts the customer on ice,
/// counted from the second ignore.
fn ignored_twice_until(
    attempts: &[OutreachAttempt],
    cooldown_days: i64,
) -> Option<NaiveDateTime> {
    let latest = attempts.first()?;
    let previous = attempts.get(1)?;

    if latest.response_status == ResponseStatus::Ignored
        && previous.response_status == ResponseStatus::Ignored
    {
        let anchor = latest
            .resolved_at
            .or(latest.sent_at)
            .unwrap_or(latest.created_date);
        Some(anchor + Duration::days(cooldown_days))
    } else {
        None
    }
}

fn messages_in_window(
    policy: &ThrottlePolicy,
    now: NaiveDateTime,
    attempts: &[OutreachAttempt],
    recommendations: &[ProductRecommendation],
) -> i64 {
    let cutoff = now - Duration::hours(policy.window_hours);
    let outreach = attempts
        .iter()
        .filter(|a| a.sent_at.map(|at| at >= cutoff).unwrap_or(false))
        .count();
    let recs = recommendations
        .iter()
        .filter(|r| r.sent_at.map(|at| at >= cutoff).unwrap_or(false))
        .count();
    (outreach + recs) as i64
}

/// Where inside the post-service window a recommendation goes out. The offset
/// is keyed on the completed service itself, so recomputing it always lands
/// on the same instant and nothing random needs to be stored.
pub fn scheduled_send_time(
    policy: &ThrottlePolicy,
    class: ServiceClass,
    customer_id: &str,
    service_name: &str,
    completed_at: NaiveDateTime,
) -> NaiveDateTime {
    let (start_hours, end_hours) = match class {
        ServiceClass::Short => policy.short_window_hours,
        ServiceClass::Treatment => policy.treatment_window_hours,
    };

    let span_secs = (end_hours - start_hours) * 3600;
    let key = format!(
        "{customer_id}|{service_name}|{}",
        completed_at.format("%Y-%m-%d %H:%M:%S")
    );
    let offset_secs = (fnv1a(key.as_bytes()) % span_secs.max(1) as u64) as i64;

    completed_at + Duration::hours(start_hours) + Duration::seconds(offset_secs)
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
