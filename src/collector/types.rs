/**
 * ============================================================================
 * COLLECTOR TYPES MODULE
 * ============================================================================
 *
 * PURPOSE: Define all data structures used across the collector system
 *
 * TYPES DEFINED:
 * - EventKind / DestinationTable: Event variant and its warehouse table
 * - ActivityFields .. PaymentFields: Caller-supplied fields per event kind
 * - EventFields: Tagged union over the caller field sets
 * - RequestContext: Ambient request data supplied by the host
 * - Ambient / TelemetryEvent: Normalized event with builder-stamped ambient data
 * - Row / QueueEntry: Flat warehouse record and its queue envelope
 * - TelemetryStats: Counters for monitoring shipping health
 *
 * ============================================================================
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Flat warehouse record; every key of the table schema is always present
pub type Row = Map<String, Value>;

/**
 * Event kind as named by callers
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Activity,
    Error,
    Performance,
    Search,
    Payment,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Activity,
        EventKind::Error,
        EventKind::Performance,
        EventKind::Search,
        EventKind::Payment,
    ];

    /**
     * Destination table for this kind (1:1)
     */
    pub fn table(self) -> DestinationTable {
        match self {
            EventKind::Activity => DestinationTable::UserActivityLogs,
            EventKind::Error => DestinationTable::ErrorLogs,
            EventKind::Performance => DestinationTable::PerformanceMetrics,
            EventKind::Search => DestinationTable::SearchAnalytics,
            EventKind::Payment => DestinationTable::PaymentAnalytics,
        }
    }
}

/**
 * Warehouse table a record is shipped to
 * Assigned by the event builder; nothing downstream reinterprets it
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationTable {
    UserActivityLogs,
    ErrorLogs,
    PerformanceMetrics,
    SearchAnalytics,
    PaymentAnalytics,
}

impl DestinationTable {
    pub const ALL: [DestinationTable; 5] = [
        DestinationTable::UserActivityLogs,
        DestinationTable::ErrorLogs,
        DestinationTable::PerformanceMetrics,
        DestinationTable::SearchAnalytics,
        DestinationTable::PaymentAnalytics,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DestinationTable::UserActivityLogs => "user_activity_logs",
            DestinationTable::ErrorLogs => "error_logs",
            DestinationTable::PerformanceMetrics => "performance_metrics",
            DestinationTable::SearchAnalytics => "search_analytics",
            DestinationTable::PaymentAnalytics => "payment_analytics",
        }
    }
}

impl fmt::Display for DestinationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/**
 * User activity (login, quote viewed, message sent, ...)
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityFields {
    pub action_type: String,
    pub action_category: String,
    pub user_id: Option<String>,
    pub success: bool,
    pub duration_ms: Option<u64>,
    pub details: Option<Value>,
    pub error_message: Option<String>,
}

impl Default for ActivityFields {
    fn default() -> Self {
        Self {
            action_type: String::new(),
            action_category: String::new(),
            user_id: None,
            success: true,
            duration_ms: None,
            details: None,
            error_message: None,
        }
    }
}

/**
 * Application error observed while handling a request
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorFields {
    pub error_type: String,
    pub error_message: String,
    pub stack_trace: Option<String>,
    pub endpoint: Option<String>,
    pub http_method: Option<String>,
    pub status_code: Option<u16>,
    pub user_id: Option<String>,
    pub severity: String,
    pub context: Option<Value>,
}

impl Default for ErrorFields {
    fn default() -> Self {
        Self {
            error_type: String::new(),
            error_message: String::new(),
            stack_trace: None,
            endpoint: None,
            http_method: None,
            status_code: None,
            user_id: None,
            severity: "error".to_string(),
            context: None,
        }
    }
}

/**
 * Request or operation timing
 */
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceFields {
    pub metric_name: String,
    pub endpoint: Option<String>,
    pub http_method: Option<String>,
    pub duration_ms: f64,
    pub status_code: Option<u16>,
    pub response_size_bytes: Option<u64>,
    pub db_query_count: Option<u32>,
    pub user_id: Option<String>,
}

/**
 * Search query and its outcome
 */
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFields {
    pub query: String,
    pub search_type: String,
    pub filters: Option<Value>,
    pub results_count: u64,
    pub response_time_ms: Option<f64>,
    pub clicked_position: Option<u32>,
    pub user_id: Option<String>,
}

/**
 * Payment attempt and its outcome
 */
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentFields {
    pub payment_id: Option<String>,
    pub quote_id: Option<String>,
    pub user_id: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub payment_method: Option<String>,
    pub provider: Option<String>,
    pub status: String,
    pub failure_reason: Option<String>,
    pub processing_time_ms: Option<f64>,
}

/**
 * Caller-supplied fields, tagged by event kind
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventFields {
    Activity(ActivityFields),
    Error(ErrorFields),
    Performance(PerformanceFields),
    Search(SearchFields),
    Payment(PaymentFields),
}

impl EventFields {
    pub fn kind(&self) -> EventKind {
        match self {
            EventFields::Activity(_) => EventKind::Activity,
            EventFields::Error(_) => EventKind::Error,
            EventFields::Performance(_) => EventKind::Performance,
            EventFields::Search(_) => EventKind::Search,
            EventFields::Payment(_) => EventKind::Payment,
        }
    }
}

/**
 * Ambient request data, supplied by the host's request layer
 * Every field is optional; builders fill in safe defaults
 */
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestContext {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    // Raw X-Forwarded-For header; first entry wins over ip_address
    pub forwarded_for: Option<String>,
    pub session_id: Option<String>,
    // Explicit platform reported by a native client (e.g. "ios", "android")
    pub client_platform: Option<String>,
}

/**
 * Ambient fields shared by every event variant
 * The timestamp is always stamped by the builder
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ambient {
    pub timestamp: DateTime<Utc>,
    pub session_id: Option<String>,
    pub platform: String,
    pub device_class: String,
    pub ip_address: Option<String>,
}

/**
 * Normalized telemetry event
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub fields: EventFields,
    pub ambient: Ambient,
}

impl TelemetryEvent {
    pub fn kind(&self) -> EventKind {
        self.fields.kind()
    }

    pub fn table(&self) -> DestinationTable {
        self.kind().table()
    }
}

/**
 * Queue envelope: destination table plus the flat record
 * Owned by the queue until the dispatcher dequeues it
 */
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub table: DestinationTable,
    pub row: Row,
}

/**
 * Shipping statistics for monitoring
 * Snapshot returned by TelemetryHandle::stats()
 */
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryStats {
    pub running: bool,
    pub events_submitted: u64,
    pub events_enqueued: u64,
    pub events_dropped: u64,
    pub flushes: u64,
    pub failed_flushes: u64,
    pub rows_sent: u64,
    pub rows_rejected: u64,
    pub rows_discarded: u64,
    pub last_flush_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}
