use chrono::NaiveDateTime;
use rusqlite::{params, Connection};

use crate::models::{
    CandidateStatus, CatalogService, Channel, Customer, CustomerIntent, DropReason, IntentData,
    IntentState, OpenSlot, OutreachAttempt, OutreachCandidate, ProductRecommendation,
    RecommendationStatus, ResponseStatus, ServiceClass, TriggerReason, ValueTier,
};

const DT_FMT: &str = "%Y-%m-%d %H:%M:%S";

pub fn fmt_dt(dt: &NaiveDateTime) -> String {
    dt.format(DT_FMT).to_string()
}

fn parse_dt(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, DT_FMT)
        .unwrap_or_else(|_| chrono::Utc::now().naive_utc())
}

fn parse_opt_dt(s: Option<String>) -> Option<NaiveDateTime> {
    s.map(|v| parse_dt(&v))
}

// ── Customers ──

pub fn upsert_customer(conn: &Connection, customer: &Customer) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO customers (id, name, phone, value_tier, preferred_channel, last_channel,
                                last_visit_at, visit_count, typical_rebook_days, most_common_service)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           phone = excluded.phone,
           value_tier = excluded.value_tier,
           preferred_channel = excluded.preferred_channel,
           last_channel = excluded.last_channel,
           last_visit_at = excluded.last_visit_at,
           visit_count = excluded.visit_count,
           typical_rebook_days = excluded.typical_rebook_days,
           most_common_service = excluded.most_common_service,
           updated_at = datetime('now')",
        params![
            customer.id,
            customer.name,
            customer.phone,
            customer.value_tier.as_str(),
            customer.preferred_channel.map(|c| c.as_str()),
            customer.last_channel.map(|c| c.as_str()),
            customer.last_visit_at.map(|dt| fmt_dt(&dt)),
            customer.visit_count,
            customer.typical_rebook_days,
            customer.most_common_service,
        ],
    )?;
    Ok(())
}

fn parse_customer_row(row: &rusqlite::Row) -> anyhow::Result<Customer> {
    let value_tier: String = row.get(3)?;
    let preferred_channel: Option<String> = row.get(4)?;
    let last_channel: Option<String> = row.get(5)?;
    let last_visit_at: Option<String> = row.get(6)?;

    Ok(Customer {
        id: row.get(0)?,
        name: row.get(1)?,
        phone: row.get(2)?,
        value_tier: ValueTier::parse(&value_tier),
        preferred_channel: preferred_channel.as_deref().and_then(Channel::parse),
        last_channel: last_channel.as_deref().and_then(Channel::parse),
        last_visit_at: parse_opt_dt(last_visit_at),
        visit_count: row.get(7)?,
        typical_rebook_days: row.get(8)?,
        most_common_service: row.get(9)?,
    })
}

const CUSTOMER_COLS: &str = "id, name, phone, value_tier, preferred_channel, last_channel, \
                             last_visit_at, visit_count, typical_rebook_days, most_common_service";

pub fn get_customer(conn: &Connection, id: &str) -> anyhow::Result<Option<Customer>> {
    let result = conn.query_row(
        &format!("SELECT {CUSTOMER_COLS} FROM customers WHERE id = ?1"),
        params![id],
        |row| Ok(parse_customer_row(row)),
    );

    match result {
        Ok(customer) => Ok(Some(customer?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn find_customer_by_phone(conn: &Connection, phone: &str) -> anyhow::Result<Option<Customer>> {
    let result = conn.query_row(
        &format!("SELECT {CUSTOMER_COLS} FROM customers WHERE phone = ?1"),
        params![phone],
        |row| Ok(parse_customer_row(row)),
    );

    match result {
        Ok(customer) => Ok(Some(customer?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn list_customers(conn: &Connection) -> anyhow::Result<Vec<Customer>> {
    let mut stmt =
        conn.prepare(&format!("SELECT {CUSTOMER_COLS} FROM customers ORDER BY id"))?;
    let rows = stmt.query_map([], |row| Ok(parse_customer_row(row)))?;

    let mut customers = vec![];
    for row in rows {
        customers.push(row??);
    }
    Ok(customers)
}

pub fn count_customers(conn: &Connection) -> anyhow::Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM customers", [], |row| row.get(0))?;
    Ok(count)
}

pub fn set_last_channel(
    conn: &Connection,
    customer_id: &str,
    channel: Channel,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE customers SET last_channel = ?1, updated_at = datetime('now') WHERE id = ?2",
        params![channel.as_str(), customer_id],
    )?;
    Ok(())
}

pub fn record_visit(
    conn: &Connection,
    customer_id: &str,
    visited_at: &NaiveDateTime,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE customers SET last_visit_at = ?1, visit_count = visit_count + 1,
                              updated_at = datetime('now')
         WHERE id = ?2 AND (last_visit_at IS NULL OR last_visit_at < ?1)",
        params![fmt_dt(visited_at), customer_id],
    )?;
    Ok(())
}

// ── Service catalog ──

pub fn upsert_service(conn: &Connection, service: &CatalogService) -> anyhow::Result<()> {
    let seasonal = service
        .seasonal_months
        .as_ref()
        .map(|m| serde_json::to_string(m))
        .transpose()?;
    conn.execute(
        "INSERT INTO service_catalog (name, class, repeat_interval_days, seasonal_months)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(name) DO UPDATE SET
           class = excluded.class,
           repeat_interval_days = excluded.repeat_interval_days,
           seasonal_months = excluded.seasonal_months",
        params![
            service.name,
            service.class.as_str(),
            service.repeat_interval_days,
            seasonal,
        ],
    )?;
    Ok(())
}

pub fn list_services(conn: &Connection) -> anyhow::Result<Vec<CatalogService>> {
    let mut stmt = conn.prepare(
        "SELECT name, class, repeat_interval_days, seasonal_months FROM service_catalog",
    )?;
    let rows = stmt.query_map([], |row| {
        let name: String = row.get(0)?;
        let class: String = row.get(1)?;
        let repeat_interval_days: Option<i64> = row.get(2)?;
        let seasonal: Option<String> = row.get(3)?;
        Ok((name, class, repeat_interval_days, seasonal))
    })?;

    let mut services = vec![];
    for row in rows {
        let (name, class, repeat_interval_days, seasonal) = row?;
        services.push(CatalogService {
            name,
            class: ServiceClass::parse(&class),
            repeat_interval_days,
            seasonal_months: seasonal.and_then(|s| serde_json::from_str(&s).ok()),
        });
    }
    Ok(services)
}

pub fn get_service(conn: &Connection, name: &str) -> anyhow::Result<Option<CatalogService>> {
    Ok(list_services(conn)?.into_iter().find(|s| s.name == name))
}

// ── Customer intents ──

const INTENT_COLS: &str = "id, customer_id, channel, state, follow_up_sent, intent_data, \
                           drop_reason, last_interaction, created_at";

fn parse_intent_row(row: &rusqlite::Row) -> anyhow::Result<CustomerIntent> {
    let channel: String = row.get(2)?;
    let state: String = row.get(3)?;
    let follow_up_sent: i32 = row.get(4)?;
    let intent_data: String = row.get(5)?;
    let drop_reason: Option<String> = row.get(6)?;
    let last_interaction: String = row.get(7)?;
    let created_at: String = row.get(8)?;

    Ok(CustomerIntent {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        channel: Channel::parse(&channel).unwrap_or(Channel::Sms),
        state: IntentState::parse(&state),
        follow_up_sent: follow_up_sent != 0,
        intent_data: IntentData::from_json(&intent_data),
        drop_reason: drop_reason.as_deref().and_then(DropReason::parse),
        last_interaction: parse_dt(&last_interaction),
        created_at: parse_dt(&created_at),
    })
}

pub fn insert_intent(conn: &Connection, intent: &CustomerIntent) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO customer_intents (id, customer_id, channel, state, follow_up_sent,
                                       intent_data, drop_reason, last_interaction, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            intent.id,
            intent.customer_id,
            intent.channel.as_str(),
            intent.state.as_str(),
            intent.follow_up_sent as i32,
            intent.intent_data.to_json(),
            intent.drop_reason.map(|r| r.as_str()),
            fmt_dt(&intent.last_interaction),
            fmt_dt(&intent.created_at),
        ],
    )?;
    Ok(())
}

/// Persists a live intent. The guard clause makes terminal rows immutable at
/// the write boundary; returns false when the row was terminal (or gone).
pub fn update_intent(conn: &Connection, intent: &CustomerIntent) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE customer_intents
         SET state = ?1, follow_up_sent = ?2, intent_data = ?3, drop_reason = ?4,
             last_interaction = ?5
         WHERE id = ?6 AND state NOT IN ('booked', 'dropped_intent')",
        params![
            intent.state.as_str(),
            intent.follow_up_sent as i32,
            intent.intent_data.to_json(),
            intent.drop_reason.map(|r| r.as_str()),
            fmt_dt(&intent.last_interaction),
            intent.id,
        ],
    )?;
    Ok(count > 0)
}

pub fn get_live_intent(
    conn: &Connection,
    customer_id: &str,
    channel: Channel,
) -> anyhow::Result<Option<CustomerIntent>> {
    let result = conn.query_row(
        &format!(
            "SELECT {INTENT_COLS} FROM customer_intents
             WHERE customer_id = ?1 AND channel = ?2
               AND state NOT IN ('booked', 'dropped_intent')"
        ),
        params![customer_id, channel.as_str()],
        |row| Ok(parse_intent_row(row)),
    );

    match result {
        Ok(intent) => Ok(Some(intent?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn live_intents_for_customer(
    conn: &Connection,
    customer_id: &str,
) -> anyhow::Result<Vec<CustomerIntent>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {INTENT_COLS} FROM customer_intents
         WHERE customer_id = ?1 AND state NOT IN ('booked', 'dropped_intent')
         ORDER BY last_interaction DESC"
    ))?;
    let rows = stmt.query_map(params![customer_id], |row| Ok(parse_intent_row(row)))?;

    let mut intents = vec![];
    for row in rows {
        intents.push(row??);
    }
    Ok(intents)
}

pub fn intents_for_customer(
    conn: &Connection,
    customer_id: &str,
) -> anyhow::Result<Vec<CustomerIntent>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {INTENT_COLS} FROM customer_intents
         WHERE customer_id = ?1 ORDER BY created_at DESC"
    ))?;
    let rows = stmt.query_map(params![customer_id], |row| Ok(parse_intent_row(row)))?;

    let mut intents = vec![];
    for row in rows {
        intents.push(row??);
    }
    Ok(intents)
}

pub fn count_live_intents(conn: &Connection) -> anyhow::Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM customer_intents WHERE state NOT IN ('booked', 'dropped_intent')",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn stale_availability_intents(
    conn: &Connection,
    cutoff: &NaiveDateTime,
) -> anyhow::Result<Vec<CustomerIntent>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {INTENT_COLS} FROM customer_intents
         WHERE state = 'availability_check' AND last_interaction < ?1"
    ))?;
    let rows = stmt.query_map(params![fmt_dt(cutoff)], |row| Ok(parse_intent_row(row)))?;

    let mut intents = vec![];
    for row in rows {
        intents.push(row??);
    }
    Ok(intents)
}

pub fn recent_dropped_intents(
    conn: &Connection,
    customer_id: &str,
    since: &NaiveDateTime,
) -> anyhow::Result<Vec<CustomerIntent>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {INTENT_COLS} FROM customer_intents
         WHERE customer_id = ?1 AND state = 'dropped_intent' AND last_interaction >= ?2
         ORDER BY last_interaction DESC"
    ))?;
    let rows = stmt.query_map(params![customer_id, fmt_dt(since)], |row| {
        Ok(parse_intent_row(row))
    })?;

    let mut intents = vec![];
    for row in rows {
        intents.push(row??);
    }
    Ok(intents)
}

/// Flags every live intent of the customer after a follow-up went out.
pub fn set_follow_up_flag(
    conn: &Connection,
    customer_id: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<usize> {
    let count = conn.execute(
        "UPDATE customer_intents SET follow_up_sent = 1, last_interaction = ?1
         WHERE customer_id = ?2 AND state NOT IN ('booked', 'dropped_intent')",
        params![fmt_dt(now), customer_id],
    )?;
    Ok(count)
}

// ── Outreach candidates ──

const CANDIDATE_COLS: &str =
    "id, customer_id, trigger_reason, channel, suggested_message, context, status, \
     created_at, decided_at";

fn parse_candidate_row(row: &rusqlite::Row) -> anyhow::Result<OutreachCandidate> {
    let trigger_reason: String = row.get(2)?;
    let channel: String = row.get(3)?;
    let context: String = row.get(5)?;
    let status: String = row.get(6)?;
    let created_at: String = row.get(7)?;
    let decided_at: Option<String> = row.get(8)?;

    Ok(OutreachCandidate {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        trigger_reason: TriggerReason::parse(&trigger_reason)
            .ok_or_else(|| anyhow::anyhow!("unknown trigger reason: {trigger_reason}"))?,
        channel: Channel::parse(&channel).unwrap_or(Channel::Sms),
        suggested_message: row.get(4)?,
        context: serde_json::from_str(&context).unwrap_or(serde_json::Value::Null),
        status: CandidateStatus::parse(&status),
        created_at: parse_dt(&created_at),
        decided_at: parse_opt_dt(decided_at),
    })
}

pub fn insert_candidate(conn: &Connection, candidate: &OutreachCandidate) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO outreach_candidates (id, customer_id, trigger_reason, channel,
                                          suggested_message, context, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            candidate.id,
            candidate.customer_id,
            candidate.trigger_reason.as_str(),
            candidate.channel.as_str(),
            candidate.suggested_message,
            candidate.context.to_string(),
            candidate.status.as_str(),
            fmt_dt(&candidate.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_candidate(conn: &Connection, id: &str) -> anyhow::Result<Option<OutreachCandidate>> {
    let result = conn.query_row(
        &format!("SELECT {CANDIDATE_COLS} FROM outreach_candidates WHERE id = ?1"),
        params![id],
        |row| Ok(parse_candidate_row(row)),
    );

    match result {
        Ok(candidate) => Ok(Some(candidate?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn list_candidates(
    conn: &Connection,
    status: CandidateStatus,
    limit: i64,
) -> anyhow::Result<Vec<OutreachCandidate>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CANDIDATE_COLS} FROM outreach_candidates
         WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![status.as_str(), limit], |row| {
        Ok(parse_candidate_row(row))
    })?;

    let mut candidates = vec![];
    for row in rows {
        candidates.push(row??);
    }
    Ok(candidates)
}

pub fn count_proposed_candidates(conn: &Connection) -> anyhow::Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM outreach_candidates WHERE status = 'proposed'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn has_proposed_candidate(conn: &Connection, customer_id: &str) -> anyhow::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM outreach_candidates WHERE customer_id = ?1 AND status = 'proposed'",
        params![customer_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Moves a candidate out of `proposed`; false when it was already decided.
pub fn decide_candidate(
    conn: &Connection,
    id: &str,
    status: CandidateStatus,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE outreach_candidates SET status = ?1, decided_at = ?2
         WHERE id = ?3 AND status = 'proposed'",
        params![status.as_str(), fmt_dt(now), id],
    )?;
    Ok(count > 0)
}

pub fn expire_candidates(conn: &Connection, cutoff: &NaiveDateTime) -> anyhow::Result<usize> {
    let count = conn.execute(
        "UPDATE outreach_candidates SET status = 'expired', decided_at = datetime('now')
         WHERE status = 'proposed' AND created_at < ?1",
        params![fmt_dt(cutoff)],
    )?;
    Ok(count)
}

// ── Outreach attempts ──

const ATTEMPT_COLS: &str =
    "id, customer_id, trigger_reason, channel, draft_message, message_sent, response_status, \
     conversion_value, retry_count, created_date, sent_at, resolved_at";

fn parse_attempt_row(row: &rusqlite::Row) -> anyhow::Result<OutreachAttempt> {
    let trigger_reason: String = row.get(2)?;
    let channel: String = row.get(3)?;
    let response_status: String = row.get(6)?;
    let created_date: String = row.get(9)?;
    let sent_at: Option<String> = row.get(10)?;
    let resolved_at: Option<String> = row.get(11)?;

    Ok(OutreachAttempt {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        trigger_reason: TriggerReason::parse(&trigger_reason)
            .ok_or_else(|| anyhow::anyhow!("unknown trigger reason: {trigger_reason}"))?,
        channel: Channel::parse(&channel).unwrap_or(Channel::Sms),
        draft_message: row.get(4)?,
        message_sent: row.get(5)?,
        response_status: ResponseStatus::parse(&response_status),
        conversion_value: row.get(7)?,
        retry_count: row.get(8)?,
        created_date: parse_dt(&created_date),
        sent_at: parse_opt_dt(sent_at),
        resolved_at: parse_opt_dt(resolved_at),
    })
}

/// Creates an attempt unless one is already open for the same
/// (customer, trigger_reason). Read-check-insert runs inside one transaction
/// so concurrent detector runs cannot both pass the check; the partial
/// unique index backs this up at the storage layer.
pub fn create_attempt(
    conn: &mut Connection,
    attempt: &OutreachAttempt,
) -> anyhow::Result<bool> {
    let tx = conn.transaction()?;

    let open: i64 = tx.query_row(
        "SELECT COUNT(*) FROM outreach_attempts
         WHERE customer_id = ?1 AND trigger_reason = ?2
           AND response_status IN ('pending', 'sent')",
        params![attempt.customer_id, attempt.trigger_reason.as_str()],
        |row| row.get(0),
    )?;
    if open > 0 {
        return Ok(false);
    }

    tx.execute(
        "INSERT INTO outreach_attempts (id, customer_id, trigger_reason, channel, draft_message,
                                        message_sent, response_status, conversion_value,
                                        retry_count, created_date, sent_at, resolved_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            attempt.id,
            attempt.customer_id,
            attempt.trigger_reason.as_str(),
            attempt.channel.as_str(),
            attempt.draft_message,
            attempt.message_sent,
            attempt.response_status.as_str(),
            attempt.conversion_value,
            attempt.retry_count,
            fmt_dt(&attempt.created_date),
            attempt.sent_at.map(|dt| fmt_dt(&dt)),
            attempt.resolved_at.map(|dt| fmt_dt(&dt)),
        ],
    )?;

    tx.commit()?;
    Ok(true)
}

pub fn list_attempts(
    conn: &Connection,
    status_filter: Option<&str>,
    limit: i64,
) -> anyhow::Result<Vec<OutreachAttempt>> {
    let mut attempts = vec![];
    match status_filter {
        Some(status) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ATTEMPT_COLS} FROM outreach_attempts
                 WHERE response_status = ?1 ORDER BY created_date DESC LIMIT ?2"
            ))?;
            let rows =
                stmt.query_map(params![status, limit], |row| Ok(parse_attempt_row(row)))?;
            for row in rows {
                attempts.push(row??);
            }
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ATTEMPT_COLS} FROM outreach_attempts
                 ORDER BY created_date DESC LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit], |row| Ok(parse_attempt_row(row)))?;
            for row in rows {
                attempts.push(row??);
            }
        }
    }
    Ok(attempts)
}

pub fn pending_attempts(conn: &Connection) -> anyhow::Result<Vec<OutreachAttempt>> {
    list_attempts(conn, Some("pending"), i64::MAX)
}

/// Recent attempts, newest first. This is the history slice the throttle
/// guard computes its verdicts from.
pub fn recent_attempts(
    conn: &Connection,
    customer_id: &str,
    limit: i64,
) -> anyhow::Result<Vec<OutreachAttempt>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ATTEMPT_COLS} FROM outreach_attempts
         WHERE customer_id = ?1 ORDER BY created_date DESC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![customer_id, limit], |row| {
        Ok(parse_attempt_row(row))
    })?;

    let mut attempts = vec![];
    for row in rows {
        attempts.push(row??);
    }
    Ok(attempts)
}

pub fn mark_attempt_sent(
    conn: &Connection,
    id: &str,
    message: &str,
    sent_at: &NaiveDateTime,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE outreach_attempts SET response_status = 'sent', message_sent = ?1, sent_at = ?2
         WHERE id = ?3 AND response_status = 'pending'",
        params![message, fmt_dt(sent_at), id],
    )?;
    Ok(())
}

pub fn bump_attempt_retry(conn: &Connection, id: &str) -> anyhow::Result<i32> {
    conn.execute(
        "UPDATE outreach_attempts SET retry_count = retry_count + 1
         WHERE id = ?1 AND response_status = 'pending'",
        params![id],
    )?;
    let count: i32 = conn.query_row(
        "SELECT retry_count FROM outreach_attempts WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn mark_attempt_failed(
    conn: &Connection,
    id: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE outreach_attempts SET response_status = 'failed', resolved_at = ?1
         WHERE id = ?2 AND response_status = 'pending'",
        params![fmt_dt(now), id],
    )?;
    Ok(())
}

/// Moves an open attempt to a terminal response status. Terminal rows are
/// immutable; false means there was nothing open to resolve.
pub fn resolve_attempt(
    conn: &Connection,
    id: &str,
    status: ResponseStatus,
    conversion_value: Option<f64>,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE outreach_attempts
         SET response_status = ?1, conversion_value = ?2, resolved_at = ?3
         WHERE id = ?4 AND response_status IN ('pending', 'sent')",
        params![status.as_str(), conversion_value, fmt_dt(now), id],
    )?;
    Ok(count > 0)
}

pub fn latest_sent_attempt(
    conn: &Connection,
    customer_id: &str,
) -> anyhow::Result<Option<OutreachAttempt>> {
    let result = conn.query_row(
        &format!(
            "SELECT {ATTEMPT_COLS} FROM outreach_attempts
             WHERE customer_id = ?1 AND response_status = 'sent'
             ORDER BY sent_at DESC LIMIT 1"
        ),
        params![customer_id],
        |row| Ok(parse_attempt_row(row)),
    );

    match result {
        Ok(attempt) => Ok(Some(attempt?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn open_attempts_for_customer(
    conn: &Connection,
    customer_id: &str,
) -> anyhow::Result<Vec<OutreachAttempt>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ATTEMPT_COLS} FROM outreach_attempts
         WHERE customer_id = ?1 AND response_status IN ('pending', 'sent')"
    ))?;
    let rows = stmt.query_map(params![customer_id], |row| Ok(parse_attempt_row(row)))?;

    let mut attempts = vec![];
    for row in rows {
        attempts.push(row??);
    }
    Ok(attempts)
}

pub fn count_open_attempts(conn: &Connection) -> anyhow::Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM outreach_attempts WHERE response_status IN ('pending', 'sent')",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn sweep_ignored_attempts(
    conn: &Connection,
    cutoff: &NaiveDateTime,
    now: &NaiveDateTime,
) -> anyhow::Result<usize> {
    let count = conn.execute(
        "UPDATE outreach_attempts SET response_status = 'ignored', resolved_at = ?1
         WHERE response_status = 'sent' AND sent_at < ?2",
        params![fmt_dt(now), fmt_dt(cutoff)],
    )?;
    Ok(count)
}

// ── Product recommendations ──

const RECOMMENDATION_COLS: &str =
    "id, customer_id, product, service_name, service_class, service_completed_at, \
     scheduled_send_at, channel, message, status, purchased, revenue_generated, created_at, \
     sent_at, resolved_at";

fn parse_recommendation_row(row: &rusqlite::Row) -> anyhow::Result<ProductRecommendation> {
    let service_class: String = row.get(4)?;
    let service_completed_at: String = row.get(5)?;
    let scheduled_send_at: String = row.get(6)?;
    let channel: String = row.get(7)?;
    let status: String = row.get(9)?;
    let purchased: i32 = row.get(10)?;
    let created_at: String = row.get(12)?;
    let sent_at: Option<String> = row.get(13)?;
    let resolved_at: Option<String> = row.get(14)?;

    Ok(ProductRecommendation {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        product: row.get(2)?,
        service_name: row.get(3)?,
        service_class: ServiceClass::parse(&service_class),
        service_completed_at: parse_dt(&service_completed_at),
        scheduled_send_at: parse_dt(&scheduled_send_at),
        channel: Channel::parse(&channel).unwrap_or(Channel::Sms),
        message: row.get(8)?,
        status: RecommendationStatus::parse(&status),
        purchased: purchased != 0,
        revenue_generated: row.get(11)?,
        created_at: parse_dt(&created_at),
        sent_at: parse_opt_dt(sent_at),
        resolved_at: parse_opt_dt(resolved_at),
    })
}

pub fn insert_recommendation(
    conn: &Connection,
    rec: &ProductRecommendation,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO product_recommendations (id, customer_id, product, service_name,
                service_class, service_completed_at, scheduled_send_at, channel, message,
                status, purchased, revenue_generated, created_at, sent_at, resolved_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            rec.id,
            rec.customer_id,
            rec.product,
            rec.service_name,
            rec.service_class.as_str(),
            fmt_dt(&rec.service_completed_at),
            fmt_dt(&rec.scheduled_send_at),
            rec.channel.as_str(),
            rec.message,
            rec.status.as_str(),
            rec.purchased as i32,
            rec.revenue_generated,
            fmt_dt(&rec.created_at),
            rec.sent_at.map(|dt| fmt_dt(&dt)),
            rec.resolved_at.map(|dt| fmt_dt(&dt)),
        ],
    )?;
    Ok(())
}

pub fn find_recommendation_for_service(
    conn: &Connection,
    customer_id: &str,
    service_name: &str,
    completed_at: &NaiveDateTime,
) -> anyhow::Result<Option<ProductRecommendation>> {
    let result = conn.query_row(
        &format!(
            "SELECT {RECOMMENDATION_COLS} FROM product_recommendations
             WHERE customer_id = ?1 AND service_name = ?2 AND service_completed_at = ?3"
        ),
        params![customer_id, service_name, fmt_dt(completed_at)],
        |row| Ok(parse_recommendation_row(row)),
    );

    match result {
        Ok(rec) => Ok(Some(rec?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn due_recommendations(
    conn: &Connection,
    now: &NaiveDateTime,
) -> anyhow::Result<Vec<ProductRecommendation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECOMMENDATION_COLS} FROM product_recommendations
         WHERE status = 'pending' AND scheduled_send_at <= ?1
         ORDER BY scheduled_send_at ASC"
    ))?;
    let rows = stmt.query_map(params![fmt_dt(now)], |row| {
        Ok(parse_recommendation_row(row))
    })?;

    let mut recs = vec![];
    for row in rows {
        recs.push(row??);
    }
    Ok(recs)
}

pub fn list_recommendations(
    conn: &Connection,
    status_filter: Option<&str>,
    limit: i64,
) -> anyhow::Result<Vec<ProductRecommendation>> {
    let mut recs = vec![];
    match status_filter {
        Some(status) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECOMMENDATION_COLS} FROM product_recommendations
                 WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![status, limit], |row| {
                Ok(parse_recommendation_row(row))
            })?;
            for row in rows {
                recs.push(row??);
            }
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECOMMENDATION_COLS} FROM product_recommendations
                 ORDER BY created_at DESC LIMIT ?1"
            ))?;
            let rows =
                stmt.query_map(params![limit], |row| Ok(parse_recommendation_row(row)))?;
            for row in rows {
                recs.push(row??);
            }
        }
    }
    Ok(recs)
}

pub fn recent_recommendations(
    conn: &Connection,
    customer_id: &str,
    limit: i64,
) -> anyhow::Result<Vec<ProductRecommendation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECOMMENDATION_COLS} FROM product_recommendations
         WHERE customer_id = ?1 ORDER BY created_at DESC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![customer_id, limit], |row| {
        Ok(parse_recommendation_row(row))
    })?;

    let mut recs = vec![];
    for row in rows {
        recs.push(row??);
    }
    Ok(recs)
}

pub fn mark_recommendation_sent(
    conn: &Connection,
    id: &str,
    message: &str,
    sent_at: &NaiveDateTime,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE product_recommendations
         SET status = 'sent', message = ?1, sent_at = ?2
         WHERE id = ?3 AND status = 'pending'",
        params![message, fmt_dt(sent_at), id],
    )?;
    Ok(())
}

pub fn resolve_recommendation(
    conn: &Connection,
    id: &str,
    status: RecommendationStatus,
    purchased: bool,
    revenue: Option<f64>,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE product_recommendations
         SET status = ?1, purchased = ?2, revenue_generated = ?3, resolved_at = ?4
         WHERE id = ?5 AND status IN ('pending', 'sent')",
        params![status.as_str(), purchased as i32, revenue, fmt_dt(now), id],
    )?;
    Ok(count > 0)
}

pub fn latest_sent_recommendation(
    conn: &Connection,
    customer_id: &str,
) -> anyhow::Result<Option<ProductRecommendation>> {
    let result = conn.query_row(
        &format!(
            "SELECT {RECOMMENDATION_COLS} FROM product_recommendations
             WHERE customer_id = ?1 AND status = 'sent'
             ORDER BY sent_at DESC LIMIT 1"
        ),
        params![customer_id],
        |row| Ok(parse_recommendation_row(row)),
    );

    match result {
        Ok(rec) => Ok(Some(rec?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn sweep_ignored_recommendations(
    conn: &Connection,
    cutoff: &NaiveDateTime,
    now: &NaiveDateTime,
) -> anyhow::Result<usize> {
    let count = conn.execute(
        "UPDATE product_recommendations SET status = 'ignored', resolved_at = ?1
         WHERE status = 'sent' AND sent_at < ?2",
        params![fmt_dt(now), fmt_dt(cutoff)],
    )?;
    Ok(count)
}

// ── Open slots ──

pub fn insert_open_slot(conn: &Connection, slot: &OpenSlot) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO open_slots (id, service_name, slot_at, opened_at, consumed)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            slot.id,
            slot.service_name,
            fmt_dt(&slot.slot_at),
            fmt_dt(&slot.opened_at),
            slot.consumed as i32,
        ],
    )?;
    Ok(())
}

pub fn unconsumed_slots(conn: &Connection) -> anyhow::Result<Vec<OpenSlot>> {
    let mut stmt = conn.prepare(
        "SELECT id, service_name, slot_at, opened_at, consumed FROM open_slots
         WHERE consumed = 0 ORDER BY slot_at ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        let slot_at: String = row.get(2)?;
        let opened_at: String = row.get(3)?;
        let consumed: i32 = row.get(4)?;
        Ok(OpenSlot {
            id: row.get(0)?,
            service_name: row.get(1)?,
            slot_at: parse_dt(&slot_at),
            opened_at: parse_dt(&opened_at),
            consumed: consumed != 0,
        })
    })?;

    let mut slots = vec![];
    for row in rows {
        slots.push(row?);
    }
    Ok(slots)
}

pub fn consume_slot(conn: &Connection, id: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE open_slots SET consumed = 1 WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}
