/**
 * ============================================================================
 * EVENT BUILDER MODULE
 * ============================================================================
 *
 * PURPOSE: Convert caller fields plus request context into flat warehouse rows
 *
 * RULES:
 * - Builders are pure and never fail; malformed input becomes a safe default
 * - Every column of the destination table is present (missing -> null)
 * - The timestamp is stamped here, never taken from the caller
 *
 * USER-AGENT CLASSIFICATION (ordered, case-insensitive):
 * platform: android -> mobile, iphone/ipad -> mobile, "mobile" -> mobile_web,
 *           otherwise web
 * device:   ipad/tablet or android without "mobile" -> tablet,
 *           android/iphone/"mobile" -> mobile, otherwise desktop
 *
 * ============================================================================
 */

use crate::collector::types::{
    ActivityFields, Ambient, DestinationTable, ErrorFields, EventFields, EventKind, PaymentFields,
    PerformanceFields, QueueEntry, RequestContext, Row, SearchFields, TelemetryEvent,
};
use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value, json};
use std::net::IpAddr;

/// Longest string stored in a single column (characters)
pub const MAX_FIELD_CHARS: usize = 8192;

/// Placeholder for required text columns that arrived empty
pub const UNKNOWN: &str = "unknown";

static ANDROID_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?i)android").ok());
static IOS_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?i)iphone|ipad").ok());
static MOBILE_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?i)mobile").ok());
static TABLET_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?i)ipad|tablet").ok());

fn matches(re: &Lazy<Option<Regex>>, text: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(text))
}

const ACTIVITY_COLUMNS: &[&str] = &[
    "timestamp", "session_id", "platform", "device_type", "ip_address",
    "user_id", "action_type", "action_category", "success", "duration_ms", "details",
    "error_message",
];

const ERROR_COLUMNS: &[&str] = &[
    "timestamp", "session_id", "platform", "device_type", "ip_address",
    "user_id", "error_type", "error_message", "stack_trace", "endpoint", "http_method",
    "status_code", "severity", "context",
];

const PERFORMANCE_COLUMNS: &[&str] = &[
    "timestamp", "session_id", "platform", "device_type", "ip_address",
    "user_id", "metric_name", "endpoint", "http_method", "duration_ms", "status_code",
    "response_size_bytes", "db_query_count",
];

const SEARCH_COLUMNS: &[&str] = &[
    "timestamp", "session_id", "platform", "device_type", "ip_address",
    "user_id", "query", "search_type", "filters", "results_count", "response_time_ms",
    "clicked_position",
];

const PAYMENT_COLUMNS: &[&str] = &[
    "timestamp", "session_id", "platform", "device_type", "ip_address",
    "user_id", "payment_id", "quote_id", "amount", "currency", "payment_method", "provider",
    "status", "failure_reason", "processing_time_ms",
];

/**
 * Fixed column set of a destination table
 */
pub fn columns(table: DestinationTable) -> &'static [&'static str] {
    match table {
        DestinationTable::UserActivityLogs => ACTIVITY_COLUMNS,
        DestinationTable::ErrorLogs => ERROR_COLUMNS,
        DestinationTable::PerformanceMetrics => PERFORMANCE_COLUMNS,
        DestinationTable::SearchAnalytics => SEARCH_COLUMNS,
        DestinationTable::PaymentAnalytics => PAYMENT_COLUMNS,
    }
}

// =============================================================================
// Classification
// =============================================================================

/**
 * Classify a user-agent string into (platform, device_class)
 * A missing user agent matches no marker and classifies as web/desktop
 */
pub fn classify_user_agent(user_agent: Option<&str>) -> (&'static str, &'static str) {
    let ua = user_agent.map(str::trim).unwrap_or_default();

    let android = matches(&ANDROID_RE, ua);
    let ios = matches(&IOS_RE, ua);
    let mobile = matches(&MOBILE_RE, ua);

    let platform = if android || ios {
        "mobile"
    } else if mobile {
        "mobile_web"
    } else {
        "web"
    };

    // Tablet markers win when both tablet and mobile markers are present
    let device_class = if matches(&TABLET_RE, ua) || (android && !mobile) {
        "tablet"
    } else if android || ios || mobile {
        "mobile"
    } else {
        "desktop"
    };

    (platform, device_class)
}

/**
 * Map an explicit client platform onto the platform vocabulary
 */
fn platform_hint(hint: Option<&str>) -> Option<&'static str> {
    match hint?.trim().to_ascii_lowercase().as_str() {
        "ios" | "android" | "mobile" => Some("mobile"),
        "mobile_web" => Some("mobile_web"),
        "web" => Some("web"),
        _ => None,
    }
}

/**
 * Client address: first X-Forwarded-For entry, else the socket address
 * Addresses that do not parse are dropped
 */
pub fn resolve_ip(ctx: &RequestContext) -> Option<String> {
    let forwarded = ctx
        .forwarded_for
        .as_deref()
        .and_then(|header| header.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    forwarded
        .or(ctx.ip_address.as_deref().map(str::trim))
        .and_then(|raw| raw.parse::<IpAddr>().ok())
        .map(|ip| ip.to_string())
}

fn ambient(ctx: &RequestContext, timestamp: DateTime<Utc>) -> Ambient {
    let (ua_platform, device_class) = classify_user_agent(ctx.user_agent.as_deref());
    let platform = platform_hint(ctx.client_platform.as_deref()).unwrap_or(ua_platform);

    Ambient {
        timestamp,
        session_id: opt_text(ctx.session_id.as_deref()),
        platform: platform.to_string(),
        device_class: device_class.to_string(),
        ip_address: resolve_ip(ctx),
    }
}

// =============================================================================
// Builders
// =============================================================================

/**
 * Normalize caller fields into a TelemetryEvent stamped with the current time
 */
pub fn build_event(fields: EventFields, ctx: &RequestContext) -> TelemetryEvent {
    TelemetryEvent {
        fields,
        ambient: ambient(ctx, Utc::now()),
    }
}

/**
 * Build the queue entry for any event kind
 */
pub fn build(fields: EventFields, ctx: &RequestContext) -> QueueEntry {
    let event = build_event(fields, ctx);
    QueueEntry {
        table: event.table(),
        row: to_row(&event),
    }
}

pub fn build_activity(fields: ActivityFields, ctx: &RequestContext) -> QueueEntry {
    build(EventFields::Activity(fields), ctx)
}

pub fn build_error(fields: ErrorFields, ctx: &RequestContext) -> QueueEntry {
    build(EventFields::Error(fields), ctx)
}

pub fn build_performance(fields: PerformanceFields, ctx: &RequestContext) -> QueueEntry {
    build(EventFields::Performance(fields), ctx)
}

pub fn build_search(fields: SearchFields, ctx: &RequestContext) -> QueueEntry {
    build(EventFields::Search(fields), ctx)
}

pub fn build_payment(fields: PaymentFields, ctx: &RequestContext) -> QueueEntry {
    build(EventFields::Payment(fields), ctx)
}

/**
 * Build from an untyped field map (e.g. decoded request JSON)
 */
pub fn build_raw(kind: EventKind, fields: &Map<String, Value>, ctx: &RequestContext) -> QueueEntry {
    build(fields_from_map(kind, fields), ctx)
}

/**
 * Flatten a normalized event into a row with the table's fixed columns
 */
pub fn to_row(event: &TelemetryEvent) -> Row {
    let a = &event.ambient;
    let mut row = Map::new();
    row.insert(
        "timestamp".to_string(),
        json!(a.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)),
    );
    row.insert("session_id".to_string(), json!(a.session_id));
    row.insert("platform".to_string(), json!(a.platform));
    row.insert("device_type".to_string(), json!(a.device_class));
    row.insert("ip_address".to_string(), json!(a.ip_address));

    let specific = match &event.fields {
        EventFields::Activity(f) => json!({
            "user_id": opt_text(f.user_id.as_deref()),
            "action_type": required_text(&f.action_type),
            "action_category": required_text(&f.action_category),
            "success": f.success,
            "duration_ms": f.duration_ms,
            "details": json_text(f.details.as_ref()),
            "error_message": opt_text(f.error_message.as_deref()),
        }),
        EventFields::Error(f) => json!({
            "user_id": opt_text(f.user_id.as_deref()),
            "error_type": required_text(&f.error_type),
            "error_message": required_text(&f.error_message),
            "stack_trace": opt_text(f.stack_trace.as_deref()),
            "endpoint": opt_text(f.endpoint.as_deref()),
            "http_method": opt_text(f.http_method.as_deref()).map(|m| m.to_ascii_uppercase()),
            "status_code": f.status_code,
            "severity": severity(&f.severity),
            "context": json_text(f.context.as_ref()),
        }),
        EventFields::Performance(f) => json!({
            "user_id": opt_text(f.user_id.as_deref()),
            "metric_name": required_text(&f.metric_name),
            "endpoint": opt_text(f.endpoint.as_deref()),
            "http_method": opt_text(f.http_method.as_deref()).map(|m| m.to_ascii_uppercase()),
            "duration_ms": non_negative(f.duration_ms),
            "status_code": f.status_code,
            "response_size_bytes": f.response_size_bytes,
            "db_query_count": f.db_query_count,
        }),
        EventFields::Search(f) => json!({
            "user_id": opt_text(f.user_id.as_deref()),
            "query": truncate(f.query.trim()),
            "search_type": required_text(&f.search_type),
            "filters": json_text(f.filters.as_ref()),
            "results_count": f.results_count,
            "response_time_ms": f.response_time_ms.map(non_negative),
            "clicked_position": f.clicked_position,
        }),
        EventFields::Payment(f) => json!({
            "user_id": opt_text(f.user_id.as_deref()),
            "payment_id": opt_text(f.payment_id.as_deref()),
            "quote_id": opt_text(f.quote_id.as_deref()),
            "amount": finite(f.amount),
            "currency": currency(&f.currency),
            "payment_method": opt_text(f.payment_method.as_deref()),
            "provider": opt_text(f.provider.as_deref()),
            "status": required_text(&f.status),
            "failure_reason": opt_text(f.failure_reason.as_deref()),
            "processing_time_ms": f.processing_time_ms.map(non_negative),
        }),
    };

    if let Value::Object(specific) = specific {
        row.extend(specific);
    }
    row
}

// =============================================================================
// Normalization helpers
// =============================================================================

fn truncate(value: &str) -> String {
    match value.char_indices().nth(MAX_FIELD_CHARS) {
        Some((cut, _)) => value[..cut].to_string(),
        None => value.to_string(),
    }
}

fn required_text(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        UNKNOWN.to_string()
    } else {
        truncate(trimmed)
    }
}

fn opt_text(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(truncate)
}

fn json_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => opt_text(Some(s)),
        other => Some(truncate(&other.to_string())),
    }
}

fn finite(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

fn non_negative(value: f64) -> f64 {
    finite(value).max(0.0)
}

fn severity(value: &str) -> String {
    match value.trim().to_ascii_lowercase().as_str() {
        s @ ("debug" | "info" | "warning" | "error" | "critical") => s.to_string(),
        "warn" => "warning".to_string(),
        "fatal" => "critical".to_string(),
        _ => "error".to_string(),
    }
}

fn currency(value: &str) -> String {
    let code = value.trim().to_ascii_uppercase();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        code
    } else {
        UNKNOWN.to_string()
    }
}

// =============================================================================
// Untyped field coercion
// =============================================================================

fn get_string(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

fn get_f64(map: &Map<String, Value>, key: &str) -> Option<f64> {
    let value = match map.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }?;
    value.is_finite().then_some(value)
}

fn get_u64(map: &Map<String, Value>, key: &str) -> Option<u64> {
    match map.get(key)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.is_finite()).map(|f| f as u64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| *f >= 0.0 && f.is_finite())
                    .map(|f| f as u64)
            })
        }
        _ => None,
    }
}

fn get_u32(map: &Map<String, Value>, key: &str) -> Option<u32> {
    get_u64(map, key).and_then(|v| u32::try_from(v).ok())
}

fn get_u16(map: &Map<String, Value>, key: &str) -> Option<u16> {
    get_u64(map, key).and_then(|v| u16::try_from(v).ok())
}

fn get_bool(map: &Map<String, Value>, key: &str) -> Option<bool> {
    match map.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn get_json(map: &Map<String, Value>, key: &str) -> Option<Value> {
    map.get(key).filter(|v| !v.is_null()).cloned()
}

/**
 * Coerce an untyped map into typed fields for the given kind
 * Unknown keys are ignored; wrong types fall back to defaults
 */
pub fn fields_from_map(kind: EventKind, map: &Map<String, Value>) -> EventFields {
    match kind {
        EventKind::Activity => EventFields::Activity(ActivityFields {
            action_type: get_string(map, "action_type").unwrap_or_default(),
            action_category: get_string(map, "action_category").unwrap_or_default(),
            user_id: get_string(map, "user_id"),
            success: get_bool(map, "success").unwrap_or(true),
            duration_ms: get_u64(map, "duration_ms"),
            details: get_json(map, "details"),
            error_message: get_string(map, "error_message"),
        }),
        EventKind::Error => EventFields::Error(ErrorFields {
            error_type: get_string(map, "error_type").unwrap_or_default(),
            error_message: get_string(map, "error_message").unwrap_or_default(),
            stack_trace: get_string(map, "stack_trace"),
            endpoint: get_string(map, "endpoint"),
            http_method: get_string(map, "http_method"),
            status_code: get_u16(map, "status_code"),
            user_id: get_string(map, "user_id"),
            severity: get_string(map, "severity").unwrap_or_else(|| "error".to_string()),
            context: get_json(map, "context"),
        }),
        EventKind::Performance => EventFields::Performance(PerformanceFields {
            metric_name: get_string(map, "metric_name").unwrap_or_default(),
            endpoint: get_string(map, "endpoint"),
            http_method: get_string(map, "http_method"),
            duration_ms: get_f64(map, "duration_ms").unwrap_or(0.0),
            status_code: get_u16(map, "status_code"),
            response_size_bytes: get_u64(map, "response_size_bytes"),
            db_query_count: get_u32(map, "db_query_count"),
            user_id: get_string(map, "user_id"),
        }),
        EventKind::Search => EventFields::Search(SearchFields {
            query: get_string(map, "query").unwrap_or_default(),
            search_type: get_string(map, "search_type").unwrap_or_default(),
            filters: get_json(map, "filters"),
            results_count: get_u64(map, "results_count").unwrap_or(0),
            response_time_ms: get_f64(map, "response_time_ms"),
            clicked_position: get_u32(map, "clicked_position"),
            user_id: get_string(map, "user_id"),
        }),
        EventKind::Payment => EventFields::Payment(PaymentFields {
            payment_id: get_string(map, "payment_id"),
            quote_id: get_string(map, "quote_id"),
            user_id: get_string(map, "user_id"),
            amount: get_f64(map, "amount").unwrap_or(0.0),
            currency: get_string(map, "currency").unwrap_or_default(),
            payment_method: get_string(map, "payment_method"),
            provider: get_string(map, "provider"),
            status: get_string(map, "status").unwrap_or_default(),
            failure_reason: get_string(map, "failure_reason"),
            processing_time_ms: get_f64(map, "processing_time_ms"),
        }),
    }
}
