/**
 * ============================================================================
 * COLLECTOR CONFIGURATION MODULE
 * ============================================================================
 *
 * PURPOSE: Configuration schema, environment loading, and validation
 *
 * SOURCES (later wins):
 * 1. Built-in defaults
 * 2. Optional JSON file (load_config)
 * 3. Environment variables (from_env / from_env_with_base)
 *
 * ENVIRONMENT:
 * - TELEMETRY_ENABLED: true | false | auto (default auto)
 * - CREDENTIALS_PATH: explicit credential file
 * - WAREHOUSE_DEFAULT_CREDENTIALS: ambient default credential file
 * - BATCH_SIZE (50), FLUSH_INTERVAL_SECONDS (30), QUEUE_CAPACITY (1000)
 *
 * ============================================================================
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_ENABLED: &str = "TELEMETRY_ENABLED";
pub const ENV_CREDENTIALS_PATH: &str = "CREDENTIALS_PATH";
pub const ENV_DEFAULT_CREDENTIALS: &str = "WAREHOUSE_DEFAULT_CREDENTIALS";
pub const ENV_BATCH_SIZE: &str = "BATCH_SIZE";
pub const ENV_FLUSH_INTERVAL_SECONDS: &str = "FLUSH_INTERVAL_SECONDS";
pub const ENV_QUEUE_CAPACITY: &str = "QUEUE_CAPACITY";

/**
 * Master enable flag
 * Parsed once at startup; never re-read as a string afterwards
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnabledMode {
    /// Telemetry must work; missing credentials are a configuration error
    True,
    /// Explicit opt-out
    False,
    /// Use telemetry when credentials are available, otherwise degrade silently
    #[default]
    Auto,
}

impl EnabledMode {
    /**
     * Parse the flag value, case-insensitive
     * Returns None for unrecognized values
     */
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "true" => Some(EnabledMode::True),
            "false" => Some(EnabledMode::False),
            "auto" => Some(EnabledMode::Auto),
            _ => None,
        }
    }
}

impl fmt::Display for EnabledMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnabledMode::True => "true",
            EnabledMode::False => "false",
            EnabledMode::Auto => "auto",
        };
        write!(f, "{}", s)
    }
}

/**
 * Complete telemetry configuration
 * All shipping behavior is controlled through these settings
 */
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelemetryConfig {
    // Master enable flag
    pub enabled: EnabledMode,

    // Explicit credential file; must exist when set
    pub credentials_path: Option<PathBuf>,

    // Ambient default credential file (environment-provided)
    pub default_credentials_path: Option<PathBuf>,

    // Rows per table that force a flush
    pub batch_size: usize,

    // Maximum seconds a non-empty batch may wait before flushing
    pub flush_interval_seconds: u64,

    // Bounded queue capacity
    pub queue_capacity: usize,

    // Dispatcher wait per dequeue attempt (also the flush-check tick)
    pub dequeue_timeout_ms: u64,

    // How often the dropped-event rate is logged
    pub drop_report_interval_seconds: u64,

    // HTTP timeout for warehouse calls
    pub request_timeout_seconds: u64,

    // Verify the dataset when constructing the warehouse client
    pub verify_on_connect: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: EnabledMode::Auto,
            credentials_path: None,
            default_credentials_path: None,
            batch_size: 50,
            flush_interval_seconds: 30,
            queue_capacity: 1000,
            dequeue_timeout_ms: 1000,
            drop_report_interval_seconds: 60,
            request_timeout_seconds: 10,
            verify_on_connect: true,
        }
    }
}

impl TelemetryConfig {
    /**
     * Build configuration from the process environment
     */
    pub fn from_env() -> Self {
        Self::from_env_with_base(Self::default())
    }

    /**
     * Apply environment overrides on top of an existing configuration
     * Used after load_config so the environment wins over the file
     */
    pub fn from_env_with_base(base: Self) -> Self {
        Self::apply_lookup(base, |key| std::env::var(key).ok())
    }

    /**
     * Build configuration from an arbitrary key lookup
     * Unparseable values keep the default and log a warning
     */
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::apply_lookup(Self::default(), lookup)
    }

    fn apply_lookup<F>(mut config: Self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = non_empty(lookup(ENV_ENABLED)) {
            match EnabledMode::parse(&raw) {
                Some(mode) => config.enabled = mode,
                None => log::warn!(
                    "Unrecognized {}={:?}, keeping {}",
                    ENV_ENABLED,
                    raw,
                    config.enabled
                ),
            }
        }

        if let Some(path) = non_empty(lookup(ENV_CREDENTIALS_PATH)) {
            config.credentials_path = Some(PathBuf::from(path));
        }

        if let Some(path) = non_empty(lookup(ENV_DEFAULT_CREDENTIALS)) {
            config.default_credentials_path = Some(PathBuf::from(path));
        }

        parse_into(&lookup, ENV_BATCH_SIZE, &mut config.batch_size);
        parse_into(&lookup, ENV_FLUSH_INTERVAL_SECONDS, &mut config.flush_interval_seconds);
        parse_into(&lookup, ENV_QUEUE_CAPACITY, &mut config.queue_capacity);

        config
    }

    /**
     * Validate configuration values
     * Returns Ok(()) if valid, Err(String) with validation message if invalid
     */
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size < 1 || self.batch_size > 10_000 {
            return Err("batch_size must be between 1 and 10000".to_string());
        }
        if self.queue_capacity < 1 || self.queue_capacity > 1_000_000 {
            return Err("queue_capacity must be between 1 and 1000000".to_string());
        }
        if self.flush_interval_seconds < 1 || self.flush_interval_seconds > 3600 {
            return Err("flush_interval_seconds must be between 1 and 3600".to_string());
        }
        if self.dequeue_timeout_ms < 10 || self.dequeue_timeout_ms > 60_000 {
            return Err("dequeue_timeout_ms must be between 10 and 60000".to_string());
        }
        if self.drop_report_interval_seconds < 1 || self.drop_report_interval_seconds > 86_400 {
            return Err("drop_report_interval_seconds must be between 1 and 86400".to_string());
        }
        if self.request_timeout_seconds < 1 || self.request_timeout_seconds > 600 {
            return Err("request_timeout_seconds must be between 1 and 600".to_string());
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_seconds)
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn drop_report_interval(&self) -> Duration {
        Duration::from_secs(self.drop_report_interval_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_into<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + fmt::Display,
{
    let Some(raw) = non_empty(lookup(key)) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => log::warn!("Invalid {}={:?}, keeping {}", key, raw, target),
    }
}

/**
 * Load configuration from a JSON file
 * Returns default configuration if the file doesn't exist
 */
pub fn load_config(path: &Path) -> Result<TelemetryConfig, String> {
    if !path.exists() {
        log::info!("Telemetry config not found at {}, using defaults", path.display());
        return Ok(TelemetryConfig::default());
    }

    let json_str = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file: {}", e))?;

    let config: TelemetryConfig = serde_json::from_str(&json_str)
        .map_err(|e| format!("Failed to parse config JSON: {}", e))?;

    config.validate()?;

    log::info!("Loaded telemetry config from {}", path.display());
    Ok(config)
}
