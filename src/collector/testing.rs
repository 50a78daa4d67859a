/**
 * In-memory warehouse fakes and helpers shared by the collector tests
 */

use crate::collector::types::{DestinationTable, QueueEntry, Row};
use crate::warehouse::client::Warehouse;
use crate::warehouse::types::{RowError, WarehouseError};
use log::{Level, LevelFilter, Log, Metadata, Record};
use once_cell::sync::Lazy;
use serde_json::json;
use std::future::{Future, ready};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub fn entry(table: DestinationTable, n: u64) -> QueueEntry {
    let mut row = Row::new();
    row.insert("n".to_string(), json!(n));
    QueueEntry { table, row }
}

/**
 * Poll `condition` every 10ms until it holds or `timeout` passes
 */
pub async fn wait_until<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Process-wide logger that keeps every record for assertions
struct CapturingLogger {
    records: Mutex<Vec<(Level, String)>>,
}

impl Log for CapturingLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let line = record.args().to_string();
        self.records.lock().unwrap().push((record.level(), line));
    }

    fn flush(&self) {}
}

static LOGGER: CapturingLogger = CapturingLogger {
    records: Mutex::new(Vec::new()),
};

static INSTALL: Lazy<()> = Lazy::new(|| {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Trace);
    }
});

/**
 * Install the capturing logger (idempotent)
 * Tests run in parallel, so assertions should match on a unique marker
 */
pub fn capture_logs() {
    Lazy::force(&INSTALL);
}

/// Captured records at `level` whose message contains `needle`
pub fn logged(level: Level, needle: &str) -> usize {
    LOGGER
        .records
        .lock()
        .unwrap()
        .iter()
        .filter(|(l, line)| *l == level && line.contains(needle))
        .count()
}

/// Accepts everything and remembers each call
#[derive(Debug, Clone, Default)]
pub struct RecordingWarehouse {
    batches: Arc<Mutex<Vec<(DestinationTable, Vec<Row>)>>>,
}

impl RecordingWarehouse {
    fn record(&self, table: DestinationTable, rows: Vec<Row>) {
        self.batches.lock().unwrap().push((table, rows));
    }

    pub fn calls(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(|(_, rows)| rows.len()).collect()
    }

    pub fn rows_for(&self, table: DestinationTable) -> Vec<Row> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| *t == table)
            .flat_map(|(_, rows)| rows.clone())
            .collect()
    }

    /// The "n" marker of every row shipped to `table`, in shipping order
    pub fn values_for(&self, table: DestinationTable) -> Vec<u64> {
        self.rows_for(table)
            .iter()
            .filter_map(|row| row.get("n").and_then(|v| v.as_u64()))
            .collect()
    }
}

impl Warehouse for RecordingWarehouse {
    fn batch_insert(
        &self,
        table: DestinationTable,
        rows: Vec<Row>,
    ) -> impl Future<Output = Result<Vec<RowError>, WarehouseError>> + Send {
        self.record(table, rows);
        ready(Ok(Vec::new()))
    }
}

/// Fails every call as unreachable
#[derive(Debug, Clone)]
pub struct FailingWarehouse {
    attempts: Arc<AtomicUsize>,
    message: String,
}

impl FailingWarehouse {
    pub fn new(message: &str) -> Self {
        Self {
            attempts: Arc::new(AtomicUsize::new(0)),
            message: message.to_string(),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Warehouse for FailingWarehouse {
    fn batch_insert(
        &self,
        _table: DestinationTable,
        _rows: Vec<Row>,
    ) -> impl Future<Output = Result<Vec<RowError>, WarehouseError>> + Send {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        ready(Err(WarehouseError::Unreachable {
            message: self.message.clone(),
        }))
    }
}

/// Panics for one table, records the rest
#[derive(Debug, Clone)]
pub struct PanickingWarehouse {
    table: DestinationTable,
    recorded: RecordingWarehouse,
}

impl PanickingWarehouse {
    pub fn new(table: DestinationTable) -> Self {
        Self {
            table,
            recorded: RecordingWarehouse::default(),
        }
    }

    pub fn recorded(&self) -> &RecordingWarehouse {
        &self.recorded
    }
}

impl Warehouse for PanickingWarehouse {
    fn batch_insert(
        &self,
        table: DestinationTable,
        rows: Vec<Row>,
    ) -> impl Future<Output = Result<Vec<RowError>, WarehouseError>> + Send {
        if table == self.table {
            panic!("sink exploded on {}", table);
        }
        self.recorded.record(table, rows);
        ready(Ok(Vec::new()))
    }
}

/// Rejects the first `per_call` rows of every batch
#[derive(Debug, Clone)]
pub struct RejectingWarehouse {
    per_call: usize,
}

impl RejectingWarehouse {
    pub fn new(per_call: usize) -> Self {
        Self { per_call }
    }
}

impl Warehouse for RejectingWarehouse {
    fn batch_insert(
        &self,
        _table: DestinationTable,
        rows: Vec<Row>,
    ) -> impl Future<Output = Result<Vec<RowError>, WarehouseError>> + Send {
        let errors = (0..self.per_call.min(rows.len()))
            .map(|index| RowError {
                index,
                reason: "invalid".to_string(),
                message: "no such field: bogus".to_string(),
            })
            .collect();
        ready(Ok(errors))
    }
}
