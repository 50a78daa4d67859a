/**
 * ============================================================================
 * COLLECTOR MODULE
 * ============================================================================
 *
 * PURPOSE: Event intake and batched transmission to the analytics warehouse
 *
 * ARCHITECTURE:
 * - config: Configuration schema, environment loading and validation
 * - types: Event fields, destination tables, rows, statistics
 * - builder: Per-kind event builders and user-agent classification
 * - queue: Bounded non-blocking queue with drop accounting
 * - batch: Per-table batch accumulation and flush thresholds
 * - dispatcher: Background loop that drains the queue and flushes batches
 * - manager: Startup decision and the handle exposed to the host
 *
 * ============================================================================
 */

pub mod config;
pub mod types;
pub mod builder;
pub mod queue;
pub mod batch;
pub mod dispatcher;
pub mod manager;

#[cfg(test)]
pub(crate) mod testing;
