/**
 * ============================================================================
 * DISPATCHER MODULE
 * ============================================================================
 *
 * PURPOSE: Single background consumer that drains the queue into per-table
 * batches and ships them to the warehouse
 *
 * LOOP:
 * 1. Wait up to dequeue_timeout for the next entry (or a shutdown signal)
 * 2. Append it to its table's accumulator
 * 3. Flush every table whose size or time threshold is met
 * 4. Report queue drops at most once per drop_report_interval
 *
 * FAILURE MODEL:
 * - Each table flush is isolated: an error, or a panic inside the sink,
 *   is logged and counted, and the other tables still flush
 * - A failed batch is discarded; there is no retry
 *
 * SHUTDOWN:
 * - Queue is closed by the handle, loop exits after its current iteration
 * - Entries already queued are drained, every non-empty table is flushed
 *   once, outstanding drops are reported
 *
 * ============================================================================
 */

use crate::collector::batch::Batches;
use crate::collector::config::TelemetryConfig;
use crate::collector::queue::{Dequeued, DropReporter, QueueConsumer};
use crate::collector::types::{DestinationTable, Row, TelemetryStats};
use crate::warehouse::client::Warehouse;
use crate::warehouse::types::{RowError, WarehouseError, summarize_row_errors};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Row errors included in a partial-failure log line
const LOGGED_ROW_ERRORS: usize = 3;

/**
 * Timing and sizing for the dispatch loop
 * Plain durations so tests can run on sub-second intervals
 */
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherSettings {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub dequeue_timeout: Duration,
    pub drop_report_interval: Duration,
}

impl From<&TelemetryConfig> for DispatcherSettings {
    fn from(config: &TelemetryConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            flush_interval: config.flush_interval(),
            dequeue_timeout: config.dequeue_timeout(),
            drop_report_interval: config.drop_report_interval(),
        }
    }
}

/**
 * Flush counters written by the dispatcher, read by the handle
 */
#[derive(Debug, Default)]
pub struct DispatchStats {
    running: AtomicBool,
    flushes: AtomicU64,
    failed_flushes: AtomicU64,
    rows_sent: AtomicU64,
    rows_rejected: AtomicU64,
    rows_discarded: AtomicU64,
    last_flush_time: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
}

impl DispatchStats {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    fn record_success(&self, rows: usize, rejected: usize) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.rows_sent.fetch_add((rows - rejected) as u64, Ordering::Relaxed);
        self.rows_rejected.fetch_add(rejected as u64, Ordering::Relaxed);
        let mut last = self.last_flush_time.lock().unwrap_or_else(|e| e.into_inner());
        *last = Some(Utc::now());
    }

    fn record_failure(&self, rows: usize, error: &WarehouseError) {
        self.failed_flushes.fetch_add(1, Ordering::Relaxed);
        self.rows_discarded.fetch_add(rows as u64, Ordering::Relaxed);
        let mut last = self.last_error.lock().unwrap_or_else(|e| e.into_inner());
        *last = Some(error.to_string());
    }

    /**
     * Copy the flush counters into a stats snapshot
     */
    pub fn fill(&self, stats: &mut TelemetryStats) {
        stats.running = self.is_running();
        stats.flushes = self.flushes.load(Ordering::Relaxed);
        stats.failed_flushes = self.failed_flushes.load(Ordering::Relaxed);
        stats.rows_sent = self.rows_sent.load(Ordering::Relaxed);
        stats.rows_rejected = self.rows_rejected.load(Ordering::Relaxed);
        stats.rows_discarded = self.rows_discarded.load(Ordering::Relaxed);
        stats.last_flush_time = *self.last_flush_time.lock().unwrap_or_else(|e| e.into_inner());
        stats.last_error = self
            .last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
    }
}

/**
 * Background consumer state
 * Exclusively owns the accumulators; only the queue is shared
 */
pub struct Dispatcher<W: Warehouse> {
    consumer: QueueConsumer,
    warehouse: Arc<W>,
    batches: Batches,
    settings: DispatcherSettings,
    drop_reporter: DropReporter,
    stats: Arc<DispatchStats>,
    shutdown: Arc<Notify>,
}

impl<W: Warehouse> Dispatcher<W> {
    pub fn new(
        consumer: QueueConsumer,
        warehouse: Arc<W>,
        settings: DispatcherSettings,
        stats: Arc<DispatchStats>,
        shutdown: Arc<Notify>,
    ) -> Self {
        let now = Instant::now();
        Self {
            consumer,
            warehouse,
            batches: Batches::new(settings.batch_size, settings.flush_interval, now),
            drop_reporter: DropReporter::new(settings.drop_report_interval, now),
            settings,
            stats,
            shutdown,
        }
    }

    /**
     * Run until the queue is closed or every producer is gone
     */
    pub async fn run(mut self) {
        log::info!(
            "Telemetry dispatcher started (batch_size={}, flush_interval={}s)",
            self.settings.batch_size,
            self.settings.flush_interval.as_secs_f64()
        );
        self.stats.set_running(true);

        loop {
            if self.consumer.is_closed() {
                log::info!("Shutdown signal received, stopping dispatcher");
                break;
            }

            let next = tokio::select! {
                dequeued = self.consumer.dequeue_blocking(self.settings.dequeue_timeout) => dequeued,
                _ = self.shutdown.notified() => Dequeued::Timeout,
            };

            match next {
                Dequeued::Entry(entry) => self.batches.push(entry),
                Dequeued::Timeout => {}
                Dequeued::Disconnected => {
                    log::info!("All telemetry producers gone, stopping dispatcher");
                    break;
                }
            }

            let now = Instant::now();
            for table in self.batches.due(now) {
                self.flush_table(table, now).await;
            }
            self.drop_reporter.poll(Instant::now(), self.consumer.dropped());
        }

        self.finish().await;
        self.stats.set_running(false);
        log::info!("Telemetry dispatcher stopped");
    }

    /**
     * Drain what is already queued and flush every non-empty table once
     */
    async fn finish(&mut self) {
        let mut drained = 0usize;
        while let Some(entry) = self.consumer.try_dequeue() {
            self.batches.push(entry);
            drained += 1;
        }
        if drained > 0 {
            log::debug!("Drained {} queued telemetry events on shutdown", drained);
        }

        let pending = self.batches.total_pending();
        if pending > 0 {
            log::info!("Flushing {} pending telemetry rows on shutdown", pending);
        }

        let now = Instant::now();
        for table in self.batches.non_empty() {
            self.flush_table(table, now).await;
        }
        self.drop_reporter.report(self.consumer.dropped());
    }

    /**
     * Ship one table's batch; the batch is cleared whatever the outcome
     */
    async fn flush_table(&mut self, table: DestinationTable, now: Instant) {
        let rows = self.batches.take(table, now);
        if rows.is_empty() {
            return;
        }

        let count = rows.len();
        match insert_isolated(Arc::clone(&self.warehouse), table, rows).await {
            Ok(errors) if errors.is_empty() => {
                log::info!("Flushed {} rows to {}", count, table);
                self.stats.record_success(count, 0);
            }
            Ok(errors) => {
                let rejected = errors.len().min(count);
                log::warn!(
                    "{} of {} rows rejected by {}: {}",
                    rejected,
                    count,
                    table,
                    summarize_row_errors(&errors, LOGGED_ROW_ERRORS)
                );
                self.stats.record_success(count, rejected);
            }
            Err(e) => {
                log::error!("Flush of {} rows to {} failed, batch dropped: {}", count, table, e);
                self.stats.record_failure(count, &e);
            }
        }
    }
}

/**
 * Run the insert on its own task so a panicking sink only costs this batch
 */
async fn insert_isolated<W: Warehouse>(
    warehouse: Arc<W>,
    table: DestinationTable,
    rows: Vec<Row>,
) -> Result<Vec<RowError>, WarehouseError> {
    let task = tokio::spawn(async move { warehouse.batch_insert(table, rows).await });
    match task.await {
        Ok(result) => result,
        Err(e) => Err(WarehouseError::Aborted {
            message: if e.is_panic() {
                "warehouse client panicked".to_string()
            } else {
                e.to_string()
            },
        }),
    }
}
