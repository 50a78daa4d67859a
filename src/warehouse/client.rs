/**
 * ============================================================================
 * WAREHOUSE CLIENT MODULE
 * ============================================================================
 *
 * PURPOSE: Thin wrapper over the warehouse's streaming insert API
 *
 * API ENDPOINTS:
 * GET  {endpoint}/projects/{project}/datasets/{dataset}
 * POST {endpoint}/projects/{project}/datasets/{dataset}/tables/{table}/insertAll
 *
 * CONSTRUCTION FLOW:
 * 1. Read the credential file (endpoint, project, dataset, token)
 * 2. Build the HTTP client with the request timeout
 * 3. Optionally verify the dataset is reachable with these credentials
 *
 * FAILURE MODEL:
 * - Construction failure is reported, never raised; the caller runs disabled
 * - A failed insert surfaces as WarehouseError; no retry at this layer
 * - Rejected rows surface as Vec<RowError> on an otherwise successful call
 *
 * ============================================================================
 */

use crate::collector::config::TelemetryConfig;
use crate::collector::types::{DestinationTable, Row};
use crate::warehouse::credentials::CredentialState;
use crate::warehouse::types::{RowError, WarehouseError, summarize_row_errors};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::time::Duration;

/// Default API base when the credential file does not name one
const DEFAULT_ENDPOINT: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Row errors included in a single log line
const LOGGED_ROW_ERRORS: usize = 3;

// =============================================================================
// Warehouse Trait
// =============================================================================

/**
 * Batch-insert sink used by the dispatcher
 * Implemented by HttpWarehouse; tests supply in-memory fakes
 */
pub trait Warehouse: Send + Sync + 'static {
    /**
     * Insert rows into a table
     *
     * # Returns
     * * `Ok(vec![])` when every row was accepted
     * * `Ok(errors)` when some rows were rejected
     * * `Err(WarehouseError)` when the call itself failed
     */
    fn batch_insert(
        &self,
        table: DestinationTable,
        rows: Vec<Row>,
    ) -> impl Future<Output = Result<Vec<RowError>, WarehouseError>> + Send;
}

// =============================================================================
// Credential File
// =============================================================================

/**
 * Contents of the credential file
 */
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WarehouseCredentials {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    pub project_id: String,
    pub dataset: String,
    pub access_token: String,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

impl WarehouseCredentials {
    /**
     * Read and validate a credential file
     */
    pub fn load(path: &Path) -> Result<Self, WarehouseError> {
        let content = std::fs::read_to_string(path).map_err(|e| WarehouseError::Credentials {
            message: format!("Failed to read {}: {}", path.display(), e),
        })?;

        let credentials: WarehouseCredentials =
            serde_json::from_str(&content).map_err(|e| WarehouseError::Credentials {
                message: format!("Failed to parse {}: {}", path.display(), e),
            })?;

        for (name, value) in [
            ("endpoint", &credentials.endpoint),
            ("project_id", &credentials.project_id),
            ("dataset", &credentials.dataset),
            ("access_token", &credentials.access_token),
        ] {
            if value.trim().is_empty() {
                return Err(WarehouseError::Credentials {
                    message: format!("{} is empty in {}", name, path.display()),
                });
            }
        }

        Ok(credentials)
    }
}

// =============================================================================
// API Request/Response Structures
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllRequest<'a> {
    skip_invalid_rows: bool,
    ignore_unknown_values: bool,
    rows: Vec<InsertRow<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertRow<'a> {
    insert_id: String,
    json: &'a Row,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<InsertErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct InsertErrorEntry {
    index: usize,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

// =============================================================================
// HTTP Warehouse
// =============================================================================

/**
 * Warehouse client over HTTP
 * Stateless between calls; safe to share across tasks
 */
#[derive(Debug, Clone)]
pub struct HttpWarehouse {
    http: Client,
    credentials: WarehouseCredentials,
}

impl HttpWarehouse {
    /**
     * Build a client from a credential file without touching the network
     */
    pub fn from_credentials_file(path: &Path, timeout: Duration) -> Result<Self, WarehouseError> {
        let credentials = WarehouseCredentials::load(path)?;
        Self::new(credentials, timeout)
    }

    pub fn new(credentials: WarehouseCredentials, timeout: Duration) -> Result<Self, WarehouseError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WarehouseError::Unreachable {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { http, credentials })
    }

    /**
     * Build a client and, if configured, verify the dataset is reachable
     */
    pub async fn connect(path: &Path, config: &TelemetryConfig) -> Result<Self, WarehouseError> {
        let warehouse = Self::from_credentials_file(path, config.request_timeout())?;
        if config.verify_on_connect {
            warehouse.verify().await?;
        }
        log::info!(
            "Connected to warehouse project {} dataset {}",
            warehouse.credentials.project_id,
            warehouse.credentials.dataset
        );
        Ok(warehouse)
    }

    /**
     * Check that the dataset exists and the token is accepted
     */
    pub async fn verify(&self) -> Result<(), WarehouseError> {
        let response = self
            .http
            .get(self.dataset_url())
            .bearer_auth(&self.credentials.access_token)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }

    fn dataset_url(&self) -> String {
        format!(
            "{}/projects/{}/datasets/{}",
            self.credentials.endpoint.trim_end_matches('/'),
            self.credentials.project_id,
            self.credentials.dataset
        )
    }

    fn insert_url(&self, table: DestinationTable) -> String {
        format!("{}/tables/{}/insertAll", self.dataset_url(), table.as_str())
    }

    async fn insert_rows(
        &self,
        table: DestinationTable,
        rows: Vec<Row>,
    ) -> Result<Vec<RowError>, WarehouseError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let request = InsertAllRequest {
            skip_invalid_rows: true,
            ignore_unknown_values: false,
            rows: rows
                .iter()
                .map(|row| InsertRow {
                    insert_id: uuid::Uuid::new_v4().to_string(),
                    json: row,
                })
                .collect(),
        };

        log::debug!("Inserting {} rows into {}", rows.len(), table);

        let response = self
            .http
            .post(self.insert_url(table))
            .bearer_auth(&self.credentials.access_token)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(|e| WarehouseError::Decode {
            message: format!("Failed to read response: {}", e),
        })?;

        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let errors = parse_insert_errors(&body)?;
        if !errors.is_empty() {
            log::debug!(
                "{} rows rejected by {}: {}",
                errors.len(),
                table,
                summarize_row_errors(&errors, LOGGED_ROW_ERRORS)
            );
        }
        Ok(errors)
    }
}

impl Warehouse for HttpWarehouse {
    fn batch_insert(
        &self,
        table: DestinationTable,
        rows: Vec<Row>,
    ) -> impl Future<Output = Result<Vec<RowError>, WarehouseError>> + Send {
        self.insert_rows(table, rows)
    }
}

/**
 * Construct the client for a resolved credential state
 * Logs the reason and returns None when telemetry must run disabled
 */
pub async fn initialize(state: &CredentialState, config: &TelemetryConfig) -> Option<HttpWarehouse> {
    let path = match state {
        CredentialState::Usable { path } => path,
        CredentialState::AbsentButRequired { reason } => {
            log::error!("Telemetry required but credentials are absent: {}", reason);
            return None;
        }
        CredentialState::NotConfigured => return None,
    };

    match HttpWarehouse::connect(path, config).await {
        Ok(warehouse) => Some(warehouse),
        Err(e) if e.is_configuration() => {
            log::error!("Warehouse client setup failed, telemetry disabled: {}", e);
            None
        }
        Err(e) => {
            log::warn!("Warehouse not reachable, telemetry disabled: {}", e);
            None
        }
    }
}

// =============================================================================
// Internal Functions
// =============================================================================

fn transport_error(e: reqwest::Error) -> WarehouseError {
    let kind = if e.is_timeout() {
        "timed out"
    } else if e.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    WarehouseError::Unreachable {
        message: format!("{}: {}", kind, e),
    }
}

/**
 * Map a non-success status to an error, preferring the API's own message
 */
fn classify_status(status: StatusCode, body: &str) -> WarehouseError {
    let message = serde_json::from_str::<ApiErrorResponse>(body)
        .map(|r| r.error.message)
        .unwrap_or_else(|_| {
            if body.trim().is_empty() {
                status.to_string()
            } else {
                body.chars().take(200).collect()
            }
        });

    match status.as_u16() {
        401 | 403 => WarehouseError::AuthRejected { message },
        404 => WarehouseError::NotFound { message },
        code => WarehouseError::Http {
            status: code,
            message,
        },
    }
}

/**
 * Parse per-row failures out of an insertAll response body
 * One RowError per rejected row, carrying its first reported cause
 */
fn parse_insert_errors(body: &str) -> Result<Vec<RowError>, WarehouseError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }

    let response: InsertAllResponse =
        serde_json::from_str(body).map_err(|e| WarehouseError::Decode {
            message: format!("Failed to parse insertAll response: {}", e),
        })?;

    Ok(response
        .insert_errors
        .into_iter()
        .map(|entry| {
            let first = entry.errors.into_iter().next();
            match first {
                Some(err) => RowError {
                    index: entry.index,
                    reason: err.reason,
                    message: if err.location.is_empty() {
                        err.message
                    } else {
                        format!("{}: {}", err.location, err.message)
                    },
                },
                None => RowError {
                    index: entry.index,
                    reason: "unknown".to_string(),
                    message: "row rejected without detail".to_string(),
                },
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_file(dir: &Path, content: &str) -> std::path::PathBuf {
        let path = dir.join("credentials.json");
        fs::write(&path, content).unwrap();
        path
    }

    fn credentials(endpoint: &str) -> WarehouseCredentials {
        WarehouseCredentials {
            endpoint: endpoint.to_string(),
            project_id: "acme".to_string(),
            dataset: "analytics".to_string(),
            access_token: "token".to_string(),
        }
    }

    #[test]
    fn test_load_credentials_with_default_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            r#"{"project_id":"acme","dataset":"analytics","access_token":"t0k"}"#,
        );

        let creds = WarehouseCredentials::load(&path).unwrap();
        assert_eq!(creds.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(creds.project_id, "acme");
    }

    #[test]
    fn test_load_credentials_rejects_bad_files() {
        let dir = tempfile::tempdir().unwrap();

        let path = write_file(dir.path(), "not json");
        assert!(matches!(
            WarehouseCredentials::load(&path),
            Err(WarehouseError::Credentials { .. })
        ));

        let path = write_file(
            dir.path(),
            r#"{"project_id":"acme","dataset":"","access_token":"t0k"}"#,
        );
        let err = WarehouseCredentials::load(&path).unwrap_err();
        assert!(err.to_string().contains("dataset"));

        let missing = dir.path().join("missing.json");
        assert!(WarehouseCredentials::load(&missing).is_err());
    }

    #[test]
    fn test_urls() {
        let warehouse =
            HttpWarehouse::new(credentials("https://wh.example.com/v2/"), Duration::from_secs(5))
                .unwrap();
        assert_eq!(
            warehouse.insert_url(DestinationTable::SearchAnalytics),
            "https://wh.example.com/v2/projects/acme/datasets/analytics/tables/search_analytics/insertAll"
        );
    }

    #[test]
    fn test_parse_insert_errors() {
        assert!(parse_insert_errors("").unwrap().is_empty());
        assert!(parse_insert_errors(r#"{"kind":"insertAllResponse"}"#).unwrap().is_empty());

        let body = r#"{
            "insertErrors": [
                {"index": 2, "errors": [{"reason": "invalid", "location": "amount", "message": "bad value"}]},
                {"index": 7, "errors": []}
            ]
        }"#;
        let errors = parse_insert_errors(body).unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].index, 2);
        assert_eq!(errors[0].reason, "invalid");
        assert_eq!(errors[0].message, "amount: bad value");
        assert_eq!(errors[1].reason, "unknown");

        assert!(matches!(
            parse_insert_errors("{oops"),
            Err(WarehouseError::Decode { .. })
        ));
    }

    #[test]
    fn test_classify_status() {
        let body = r#"{"error":{"code":403,"message":"Access Denied"}}"#;
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN, body),
            WarehouseError::AuthRejected {
                message: "Access Denied".to_string()
            }
        );
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, ""),
            WarehouseError::NotFound { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, "busy"),
            WarehouseError::Http { status: 503, .. }
        ));
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_endpoint_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            r#"{"endpoint":"http://127.0.0.1:1","project_id":"acme","dataset":"analytics","access_token":"t0k"}"#,
        );
        let config = TelemetryConfig {
            request_timeout_seconds: 2,
            ..Default::default()
        };

        let result = HttpWarehouse::connect(&path, &config).await;
        assert!(matches!(result, Err(WarehouseError::Unreachable { .. })));

        let state = CredentialState::Usable { path };
        assert!(initialize(&state, &config).await.is_none());
    }

    #[tokio::test]
    async fn test_initialize_without_credentials() {
        let config = TelemetryConfig::default();
        assert!(initialize(&CredentialState::NotConfigured, &config).await.is_none());
        let required = CredentialState::AbsentButRequired {
            reason: "none".to_string(),
        };
        assert!(initialize(&required, &config).await.is_none());
    }
}
