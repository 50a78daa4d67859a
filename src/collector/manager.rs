/**
 * ============================================================================
 * TELEMETRY MANAGER MODULE
 * ============================================================================
 *
 * PURPOSE: Make the enable/disable decision once and hand the host a handle
 *
 * STARTUP SEQUENCE:
 * 1. Validate configuration (invalid -> disabled)
 * 2. Resolve credentials (not usable -> disabled)
 * 3. Construct the warehouse client (failure -> disabled)
 * 4. Create the bounded queue and spawn the dispatcher task
 *
 * DISABLED MODE:
 * - submit still runs the event builders, then discards the row
 * - No queue, no background task, no network
 *
 * The handle is cheap to clone; all clones share one queue and one
 * dispatcher. Dropping every clone also stops the dispatcher.
 *
 * ============================================================================
 */

use crate::collector::builder;
use crate::collector::config::{EnabledMode, TelemetryConfig};
use crate::collector::dispatcher::{DispatchStats, Dispatcher, DispatcherSettings};
use crate::collector::queue::{QueueProducer, bounded};
use crate::collector::types::{
    DestinationTable, EventFields, EventKind, QueueEntry, RequestContext, TelemetryStats,
};
use crate::warehouse::client::{self, Warehouse};
use crate::warehouse::credentials;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/**
 * Running pipeline: queue producer plus the dispatcher task
 */
struct Pipeline {
    producer: QueueProducer,
    stats: Arc<DispatchStats>,
    shutdown: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

struct Inner {
    pipeline: Option<Pipeline>,
    submitted: AtomicU64,
}

/**
 * Host-facing telemetry handle
 * submit never blocks, never panics, and never reports an error to the caller
 */
#[derive(Clone)]
pub struct TelemetryHandle {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TelemetryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryHandle")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl TelemetryHandle {
    /**
     * Handle that builds events and discards them
     */
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(Inner {
                pipeline: None,
                submitted: AtomicU64::new(0),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.pipeline.is_some()
    }

    /**
     * Build and enqueue a typed event
     * Returns true if the row was queued for shipping
     */
    pub fn submit(&self, fields: EventFields, ctx: &RequestContext) -> bool {
        self.offer(builder::build(fields, ctx))
    }

    /**
     * Build and enqueue an event from an untyped field map
     * Values are coerced to the kind's field types
     */
    pub fn submit_raw(&self, kind: EventKind, fields: &Map<String, Value>, ctx: &RequestContext) -> bool {
        self.offer(builder::build_raw(kind, fields, ctx))
    }

    fn offer(&self, entry: QueueEntry) -> bool {
        self.inner.submitted.fetch_add(1, Ordering::Relaxed);
        match &self.inner.pipeline {
            Some(pipeline) => pipeline.producer.enqueue(entry),
            None => false,
        }
    }

    /**
     * Snapshot of intake and shipping counters
     */
    pub fn stats(&self) -> TelemetryStats {
        let mut stats = TelemetryStats {
            events_submitted: self.inner.submitted.load(Ordering::Relaxed),
            ..Default::default()
        };
        if let Some(pipeline) = &self.inner.pipeline {
            stats.events_enqueued = pipeline.producer.accepted();
            stats.events_dropped = pipeline.producer.dropped();
            pipeline.stats.fill(&mut stats);
        }
        stats
    }

    /**
     * Stop accepting events, flush what is pending, wait for the dispatcher
     * Safe to call more than once and from any clone
     */
    pub async fn shutdown(&self) {
        let Some(pipeline) = &self.inner.pipeline else {
            return;
        };

        pipeline.producer.close();
        pipeline.shutdown.notify_one();

        let task = {
            let mut guard = pipeline.task.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        let Some(task) = task else {
            return;
        };

        log::info!("Stopping telemetry");
        match tokio::time::timeout(pipeline.shutdown_timeout, task).await {
            Ok(Ok(())) => {
                log::info!("Telemetry dispatcher stopped cleanly");
            }
            Ok(Err(e)) => {
                log::error!("Telemetry dispatcher panicked: {:?}", e);
            }
            Err(_) => {
                log::warn!(
                    "Telemetry dispatcher stop timeout after {}s",
                    pipeline.shutdown_timeout.as_secs()
                );
            }
        }
    }
}

/**
 * Start telemetry from configuration
 * Resolves credentials and builds the HTTP warehouse client; any failure
 * yields a disabled handle
 */
pub async fn start(config: TelemetryConfig) -> TelemetryHandle {
    log::info!("Starting telemetry (enabled={})", config.enabled);

    if let Err(e) = config.validate() {
        log::error!("Invalid telemetry configuration, telemetry disabled: {}", e);
        return TelemetryHandle::disabled();
    }

    let state = credentials::resolve(&config);
    match client::initialize(&state, &config).await {
        Some(warehouse) => spawn_pipeline(&config, warehouse),
        None => {
            log::info!("Telemetry running in disabled mode");
            TelemetryHandle::disabled()
        }
    }
}

/**
 * Start telemetry with a caller-supplied warehouse
 * Skips credential resolution; the master flag and validation still apply
 */
pub fn start_with_warehouse<W: Warehouse>(config: TelemetryConfig, warehouse: W) -> TelemetryHandle {
    if config.enabled == EnabledMode::False {
        log::info!("Telemetry disabled by configuration");
        return TelemetryHandle::disabled();
    }
    if let Err(e) = config.validate() {
        log::error!("Invalid telemetry configuration, telemetry disabled: {}", e);
        return TelemetryHandle::disabled();
    }
    spawn_pipeline(&config, warehouse)
}

fn spawn_pipeline<W: Warehouse>(config: &TelemetryConfig, warehouse: W) -> TelemetryHandle {
    let runtime = match tokio::runtime::Handle::try_current() {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("No async runtime available, telemetry disabled: {}", e);
            return TelemetryHandle::disabled();
        }
    };

    let (producer, consumer) = bounded(config.queue_capacity);
    let stats = Arc::new(DispatchStats::default());
    let shutdown = Arc::new(Notify::new());

    let dispatcher = Dispatcher::new(
        consumer,
        Arc::new(warehouse),
        DispatcherSettings::from(config),
        Arc::clone(&stats),
        Arc::clone(&shutdown),
    );
    let task = runtime.spawn(dispatcher.run());

    let shutdown_timeout = shutdown_timeout(config);

    log::info!(
        "Telemetry started (queue_capacity={}, batch_size={}, flush_interval={}s)",
        config.queue_capacity,
        config.batch_size,
        config.flush_interval_seconds
    );

    TelemetryHandle {
        inner: Arc::new(Inner {
            pipeline: Some(Pipeline {
                producer,
                stats,
                shutdown,
                task: Mutex::new(Some(task)),
                shutdown_timeout,
            }),
            submitted: AtomicU64::new(0),
        }),
    }
}

/**
 * Upper bound on waiting for the dispatcher at shutdown
 * The final flush may touch every table once, each bounded by the request timeout
 */
fn shutdown_timeout(config: &TelemetryConfig) -> Duration {
    let tables = DestinationTable::ALL.len() as u32 + 1;
    config
        .request_timeout()
        .checked_mul(tables)
        .unwrap_or(Duration::MAX)
        .saturating_add(config.dequeue_timeout())
}
