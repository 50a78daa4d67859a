/**
 * ============================================================================
 * WAREHOUSE TYPES MODULE
 * ============================================================================
 *
 * PURPOSE: Failure reasons at the warehouse boundary
 *
 * TAXONOMY:
 * - Configuration: Credentials (bad/unreadable credential file)
 * - Construction: AuthRejected, NotFound, Unreachable
 * - Delivery: Unreachable, Http, Decode, Aborted
 * - Partial failure is not an error: it is a non-empty Vec<RowError>
 *
 * ============================================================================
 */

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Error Types
// =============================================================================

/**
 * Warehouse error types
 * Lets call sites tell configuration failures from delivery failures in logs
 */
#[derive(Debug, Clone, PartialEq)]
pub enum WarehouseError {
    /// Credential file missing, unreadable, or malformed
    Credentials { message: String },

    /// Credentials were rejected (401/403)
    AuthRejected { message: String },

    /// Project, dataset, or table does not exist (404)
    NotFound { message: String },

    /// Transport failure: DNS, connect, TLS, timeout
    Unreachable { message: String },

    /// Any other non-success HTTP status
    Http { status: u16, message: String },

    /// Response body could not be understood
    Decode { message: String },

    /// The insert call did not complete (panicked or was cancelled)
    Aborted { message: String },
}

impl WarehouseError {
    /**
     * True for failures caused by configuration rather than a transient outage
     */
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            WarehouseError::Credentials { .. }
                | WarehouseError::AuthRejected { .. }
                | WarehouseError::NotFound { .. }
        )
    }
}

impl fmt::Display for WarehouseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarehouseError::Credentials { message } => {
                write!(f, "Invalid credentials: {}", message)
            }
            WarehouseError::AuthRejected { message } => {
                write!(f, "Authentication rejected: {}", message)
            }
            WarehouseError::NotFound { message } => write!(f, "Not found: {}", message),
            WarehouseError::Unreachable { message } => {
                write!(f, "Warehouse unreachable: {}", message)
            }
            WarehouseError::Http { status, message } => {
                write!(f, "HTTP {}: {}", status, message)
            }
            WarehouseError::Decode { message } => {
                write!(f, "Unexpected response: {}", message)
            }
            WarehouseError::Aborted { message } => write!(f, "Insert aborted: {}", message),
        }
    }
}

impl std::error::Error for WarehouseError {}

/**
 * A row the warehouse refused during a batch insert
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    /// Position of the row within the submitted batch
    pub index: usize,
    pub reason: String,
    pub message: String,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {} ({})", self.index, self.message, self.reason)
    }
}

/**
 * Short summary of the first few row errors for a log line
 */
pub fn summarize_row_errors(errors: &[RowError], limit: usize) -> String {
    let mut parts: Vec<String> = errors.iter().take(limit).map(|e| e.to_string()).collect();
    if errors.len() > limit {
        parts.push(format!("... and {} more", errors.len() - limit));
    }
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_error(index: usize) -> RowError {
        RowError {
            index,
            reason: "invalid".to_string(),
            message: "no such field".to_string(),
        }
    }

    #[test]
    fn test_error_display() {
        let err = WarehouseError::Http {
            status: 503,
            message: "backend error".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 503: backend error");
        assert!(!err.is_configuration());

        let err = WarehouseError::AuthRejected {
            message: "token expired".to_string(),
        };
        assert!(err.to_string().contains("token expired"));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_summarize_row_errors_limits_output() {
        let errors: Vec<RowError> = (0..5).map(row_error).collect();
        let summary = summarize_row_errors(&errors, 3);
        assert!(summary.starts_with("row 0: no such field (invalid)"));
        assert!(summary.contains("row 2"));
        assert!(!summary.contains("row 3"));
        assert!(summary.ends_with("... and 2 more"));

        assert_eq!(summarize_row_errors(&errors[..1], 3), "row 0: no such field (invalid)");
    }
}
