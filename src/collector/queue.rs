/**
 * ============================================================================
 * BOUNDED QUEUE MODULE
 * ============================================================================
 *
 * PURPOSE: Hand entries from request handlers to the single dispatcher
 *
 * QUEUE BEHAVIOR:
 * - Fixed capacity, FIFO
 * - enqueue never blocks: a full queue rejects the entry and counts the drop
 * - Once closed, enqueue rejects everything
 * - dequeue_blocking waits at most `timeout`, giving the dispatcher its tick
 *
 * DROP REPORTING:
 * - Drops are counted per entry but logged as a rate, at most once per
 *   report interval, to avoid log amplification
 *
 * ============================================================================
 */

use crate::collector::types::QueueEntry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

/**
 * Counters shared between producers and the dispatcher
 */
#[derive(Debug, Default)]
struct QueueState {
    closed: AtomicBool,
    accepted: AtomicU64,
    dropped: AtomicU64,
}

/**
 * Producer side; cheap to clone, safe to call from any thread
 */
#[derive(Debug, Clone)]
pub struct QueueProducer {
    tx: mpsc::Sender<QueueEntry>,
    state: Arc<QueueState>,
}

/**
 * Consumer side; owned by the dispatcher task only
 */
#[derive(Debug)]
pub struct QueueConsumer {
    rx: mpsc::Receiver<QueueEntry>,
    state: Arc<QueueState>,
}

/**
 * Outcome of one dequeue attempt
 */
#[derive(Debug, PartialEq)]
pub enum Dequeued {
    Entry(QueueEntry),
    /// Nothing arrived within the timeout
    Timeout,
    /// Every producer is gone and the queue is drained
    Disconnected,
}

/**
 * Create a bounded queue with the given capacity (must be >= 1)
 */
pub fn bounded(capacity: usize) -> (QueueProducer, QueueConsumer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let state = Arc::new(QueueState::default());
    (
        QueueProducer {
            tx,
            state: Arc::clone(&state),
        },
        QueueConsumer { rx, state },
    )
}

impl QueueProducer {
    /**
     * Offer an entry without blocking
     * Returns true if accepted; a full queue counts a dropped event
     */
    pub fn enqueue(&self, entry: QueueEntry) -> bool {
        if self.state.closed.load(Ordering::Acquire) {
            return false;
        }

        match self.tx.try_send(entry) {
            Ok(()) => {
                self.state.accepted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.state.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /**
     * Stop accepting entries; already queued entries stay dequeueable
     */
    pub fn close(&self) {
        self.state.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    pub fn accepted(&self) -> u64 {
        self.state.accepted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }

    /**
     * Entries currently waiting in the queue
     */
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl QueueConsumer {
    /**
     * Wait up to `timeout` for the next entry
     */
    pub async fn dequeue_blocking(&mut self, timeout: Duration) -> Dequeued {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(entry)) => Dequeued::Entry(entry),
            Ok(None) => Dequeued::Disconnected,
            Err(_) => Dequeued::Timeout,
        }
    }

    /**
     * Take the next entry if one is immediately available
     */
    pub fn try_dequeue(&mut self) -> Option<QueueEntry> {
        match self.rx.try_recv() {
            Ok(entry) => Some(entry),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }
}

/**
 * Periodic "N events dropped" reporting
 * Owned by the dispatcher; compares the running drop total between reports
 */
#[derive(Debug)]
pub struct DropReporter {
    interval: Duration,
    last_report: Instant,
    reported_total: u64,
}

impl DropReporter {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_report: now,
            reported_total: 0,
        }
    }

    /**
     * Log the drops since the last report if the interval elapsed
     * Returns the number reported, if any
     */
    pub fn poll(&mut self, now: Instant, total_dropped: u64) -> Option<u64> {
        if now.duration_since(self.last_report) < self.interval {
            return None;
        }
        self.last_report = now;
        self.emit(total_dropped, Some(self.interval))
    }

    /**
     * Report outstanding drops regardless of the interval (shutdown path)
     */
    pub fn report(&mut self, total_dropped: u64) -> Option<u64> {
        self.emit(total_dropped, None)
    }

    fn emit(&mut self, total_dropped: u64, window: Option<Duration>) -> Option<u64> {
        let delta = total_dropped.saturating_sub(self.reported_total);
        self.reported_total = total_dropped;
        if delta == 0 {
            return None;
        }
        log::warn!("{}", drop_message(delta, window));
        Some(delta)
    }
}

/**
 * Drop report line; `window` is None when the span is not a full interval
 */
fn drop_message(delta: u64, window: Option<Duration>) -> String {
    match window {
        Some(window) => format!(
            "{} telemetry events dropped in the last {}s (queue full)",
            delta,
            window.as_secs()
        ),
        None => format!(
            "{} telemetry events dropped since the last report (queue full)",
            delta
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::DestinationTable;
    use serde_json::{Map, json};

    fn entry(n: u64) -> QueueEntry {
        let mut row = Map::new();
        row.insert("n".to_string(), json!(n));
        QueueEntry {
            table: DestinationTable::UserActivityLogs,
            row,
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (producer, mut consumer) = bounded(10);
        for n in 0..3 {
            assert!(producer.enqueue(entry(n)));
        }
        assert_eq!(producer.len(), 3);

        for n in 0..3 {
            match consumer.dequeue_blocking(Duration::from_millis(50)).await {
                Dequeued::Entry(e) => assert_eq!(e.row["n"], n),
                other => panic!("expected entry, got {:?}", other),
            }
        }
        assert!(producer.is_empty());
    }

    #[test]
    fn test_overflow_counts_exact_drops() {
        let (producer, _consumer) = bounded(5);
        let accepted = (0..12).filter(|n| producer.enqueue(entry(*n))).count();

        assert_eq!(accepted, 5);
        assert_eq!(producer.accepted(), 5);
        assert_eq!(producer.dropped(), 7);
    }

    #[test]
    fn test_enqueue_never_blocks_when_full() {
        let (producer, _consumer) = bounded(1);
        assert!(producer.enqueue(entry(0)));

        let started = Instant::now();
        for n in 0..10_000 {
            assert!(!producer.enqueue(entry(n)));
        }
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(producer.dropped(), 10_000);
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_but_drains() {
        let (producer, mut consumer) = bounded(4);
        assert!(producer.enqueue(entry(1)));
        producer.close();

        assert!(!producer.enqueue(entry(2)));
        assert_eq!(producer.dropped(), 0);
        assert!(consumer.is_closed());
        assert!(consumer.try_dequeue().is_some());
        assert!(consumer.try_dequeue().is_none());
    }

    #[tokio::test]
    async fn test_dequeue_timeout_and_disconnect() {
        let (producer, mut consumer) = bounded(4);
        assert_eq!(
            consumer.dequeue_blocking(Duration::from_millis(20)).await,
            Dequeued::Timeout
        );

        drop(producer);
        assert_eq!(
            consumer.dequeue_blocking(Duration::from_millis(20)).await,
            Dequeued::Disconnected
        );
    }

    #[test]
    fn test_drop_reporter_rate() {
        let start = Instant::now();
        let mut reporter = DropReporter::new(Duration::from_secs(60), start);

        // Interval not elapsed
        assert_eq!(reporter.poll(start + Duration::from_secs(10), 5), None);
        // Elapsed: reports everything since the last report
        assert_eq!(reporter.poll(start + Duration::from_secs(61), 5), Some(5));
        // Nothing new
        assert_eq!(reporter.poll(start + Duration::from_secs(130), 5), None);
        assert_eq!(reporter.poll(start + Duration::from_secs(200), 9), Some(4));
        assert_eq!(reporter.report(12), Some(3));
    }

    #[test]
    fn test_drop_message_wording() {
        assert_eq!(
            drop_message(5, Some(Duration::from_secs(60))),
            "5 telemetry events dropped in the last 60s (queue full)"
        );
        // Shutdown covers an arbitrary span, so no interval is claimed
        let shutdown = drop_message(3, None);
        assert_eq!(shutdown, "3 telemetry events dropped since the last report (queue full)");
        assert!(!shutdown.contains("last 60s"));
    }
}
