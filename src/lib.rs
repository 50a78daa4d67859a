/**
 * ============================================================================
 * TELEMETRY SHIPPER
 * ============================================================================
 *
 * PURPOSE: Accept observability events from request handlers and ship them,
 * in per-table batches, to a remote analytics warehouse
 *
 * ENTRY POINT:
 * let handle = telemetry_shipper::start(TelemetryConfig::from_env()).await;
 * handle.submit(EventFields::Activity(fields), &request_context);
 * handle.shutdown().await;
 *
 * SUBMODULES:
 * - collector: Configuration, event builders, queue, batching, dispatcher,
 *   lifecycle handle
 * - warehouse: Credential resolution and the warehouse client
 *
 * ============================================================================
 */

pub mod collector;
pub mod warehouse;

pub use collector::config::{EnabledMode, TelemetryConfig};
pub use collector::manager::{TelemetryHandle, start, start_with_warehouse};
pub use collector::types::{
    ActivityFields, DestinationTable, ErrorFields, EventFields, EventKind, PaymentFields,
    PerformanceFields, QueueEntry, RequestContext, Row, SearchFields, TelemetryEvent,
    TelemetryStats,
};
pub use warehouse::client::{HttpWarehouse, Warehouse};
pub use warehouse::credentials::CredentialState;
pub use warehouse::types::{RowError, WarehouseError};
