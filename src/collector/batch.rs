/**
 * ============================================================================
 * BATCH ACCUMULATOR MODULE
 * ============================================================================
 *
 * PURPOSE: Accumulate rows per destination table and decide when to flush
 *
 * BATCHING STRATEGY:
 * - Size-based: Flush when a table holds batch_size rows
 * - Time-based: Flush a non-empty table once flush_interval has passed
 *   since its last flush (or since the dispatcher started)
 * - Shutdown: Flush every non-empty table once, regardless of thresholds
 *
 * OWNERSHIP:
 * - Owned by the dispatcher task only; no locking
 * - Taking a batch resets the table's flush clock, success or not
 *
 * ============================================================================
 */

use crate::collector::types::{DestinationTable, QueueEntry, Row};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/**
 * Pending rows for one table
 */
#[derive(Debug)]
pub struct BatchAccumulator {
    rows: Vec<Row>,
    last_flush: Instant,
}

impl BatchAccumulator {
    pub fn new(now: Instant) -> Self {
        Self {
            rows: Vec::new(),
            last_flush: now,
        }
    }

    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /**
     * Check if this table should be flushed
     * Returns true if non-empty and the size or time threshold is met
     */
    pub fn should_flush(&self, now: Instant, batch_size: usize, interval: Duration) -> bool {
        if self.rows.is_empty() {
            return false;
        }
        self.rows.len() >= batch_size || now.duration_since(self.last_flush) >= interval
    }

    /**
     * Hand over the pending rows and restart the flush clock
     */
    pub fn take(&mut self, now: Instant) -> Vec<Row> {
        self.last_flush = now;
        std::mem::take(&mut self.rows)
    }
}

/**
 * Accumulators for every destination table
 */
#[derive(Debug)]
pub struct Batches {
    tables: BTreeMap<DestinationTable, BatchAccumulator>,
    batch_size: usize,
    flush_interval: Duration,
}

impl Batches {
    pub fn new(batch_size: usize, flush_interval: Duration, now: Instant) -> Self {
        let tables = DestinationTable::ALL
            .iter()
            .map(|table| (*table, BatchAccumulator::new(now)))
            .collect();
        Self {
            tables,
            batch_size: batch_size.max(1),
            flush_interval,
        }
    }

    pub fn push(&mut self, entry: QueueEntry) {
        self.tables
            .entry(entry.table)
            .or_insert_with(|| BatchAccumulator::new(Instant::now()))
            .push(entry.row);
    }

    /**
     * Tables whose size or time threshold is met, in table order
     */
    pub fn due(&self, now: Instant) -> Vec<DestinationTable> {
        self.tables
            .iter()
            .filter(|(_, acc)| acc.should_flush(now, self.batch_size, self.flush_interval))
            .map(|(table, _)| *table)
            .collect()
    }

    /**
     * Every table with pending rows (shutdown flush)
     */
    pub fn non_empty(&self) -> Vec<DestinationTable> {
        self.tables
            .iter()
            .filter(|(_, acc)| !acc.is_empty())
            .map(|(table, _)| *table)
            .collect()
    }

    pub fn take(&mut self, table: DestinationTable, now: Instant) -> Vec<Row> {
        self.tables
            .get_mut(&table)
            .map(|acc| acc.take(now))
            .unwrap_or_default()
    }

    pub fn pending(&self, table: DestinationTable) -> usize {
        self.tables.get(&table).map(BatchAccumulator::len).unwrap_or(0)
    }

    pub fn total_pending(&self) -> usize {
        self.tables.values().map(BatchAccumulator::len).sum()
    }
}
