/**
 * ============================================================================
 * WAREHOUSE MODULE
 * ============================================================================
 *
 * PURPOSE: Everything that talks to (or decides whether to talk to) the
 * remote analytics warehouse
 *
 * ARCHITECTURE:
 * - types: Error taxonomy and per-row insert errors
 * - credentials: One-shot credential resolution (usable / required / off)
 * - client: Warehouse trait and the HTTP insertAll client
 *
 * ============================================================================
 */

pub mod types;
pub mod credentials;
pub mod client;
