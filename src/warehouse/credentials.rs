/**
 * ============================================================================
 * CREDENTIAL RESOLUTION MODULE
 * ============================================================================
 *
 * PURPOSE: Decide once, at startup, whether warehouse credentials are usable
 *
 * RESOLUTION ORDER:
 * 1. TELEMETRY_ENABLED=false -> NotConfigured (no filesystem access)
 * 2. Explicit CREDENTIALS_PATH -> must exist and be readable
 *    - missing under `true` -> AbsentButRequired
 *    - missing under `auto` -> NotConfigured (warning)
 * 3. Ambient discovery: WAREHOUSE_DEFAULT_CREDENTIALS, then the per-user
 *    well-known file
 *    - nothing under `true` -> AbsentButRequired (error log)
 *    - nothing under `auto` -> NotConfigured (silent)
 *
 * Never panics; always returns a state.
 *
 * ============================================================================
 */

use crate::collector::config::{EnabledMode, TelemetryConfig};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Per-user well-known credential location, relative to the config dir
const WELL_KNOWN_RELATIVE: &str = "telemetry-shipper/credentials.json";

/**
 * Outcome of credential resolution
 * Computed once; downstream components hold a copy and never re-query
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialState {
    /// A readable credential file was found
    Usable { path: PathBuf },
    /// Telemetry is required but no usable credentials exist
    AbsentButRequired { reason: String },
    /// Telemetry is off, or optional and unconfigured
    NotConfigured,
}

/**
 * Per-user well-known credential file, if a config dir exists
 */
pub fn well_known_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(WELL_KNOWN_RELATIVE))
}

/**
 * Resolve credentials using the configured paths and the well-known location
 */
pub fn resolve(config: &TelemetryConfig) -> CredentialState {
    if config.enabled == EnabledMode::False {
        log::info!("Telemetry disabled by configuration");
        return CredentialState::NotConfigured;
    }
    resolve_with_discovery(config, well_known_path())
}

/**
 * Resolve with an explicit well-known candidate
 */
pub fn resolve_with_discovery(
    config: &TelemetryConfig,
    well_known: Option<PathBuf>,
) -> CredentialState {
    let mode = config.enabled;
    if mode == EnabledMode::False {
        return CredentialState::NotConfigured;
    }

    if let Some(path) = config.credentials_path.as_deref() {
        return match check_readable(path) {
            Ok(()) => {
                log::info!("Using warehouse credentials from {}", path.display());
                CredentialState::Usable {
                    path: path.to_path_buf(),
                }
            }
            Err(reason) if mode == EnabledMode::True => {
                log::error!(
                    "Telemetry is required but credentials at {} are unusable: {}",
                    path.display(),
                    reason
                );
                CredentialState::AbsentButRequired { reason }
            }
            Err(reason) => {
                log::warn!(
                    "Credentials at {} are unusable ({}), telemetry disabled",
                    path.display(),
                    reason
                );
                CredentialState::NotConfigured
            }
        };
    }

    let candidates = config.default_credentials_path.iter().cloned().chain(well_known);
    for candidate in candidates {
        match check_readable(&candidate) {
            Ok(()) => {
                log::info!("Discovered warehouse credentials at {}", candidate.display());
                return CredentialState::Usable { path: candidate };
            }
            Err(reason) => {
                log::debug!("Credential candidate {} skipped: {}", candidate.display(), reason);
            }
        }
    }

    if mode == EnabledMode::True {
        let reason = "no explicit credentials path and no default credentials found".to_string();
        log::error!("Telemetry is required but unusable: {}", reason);
        CredentialState::AbsentButRequired { reason }
    } else {
        log::debug!("No warehouse credentials discovered, telemetry disabled");
        CredentialState::NotConfigured
    }
}

/**
 * Existence and readability check; no parsing
 */
fn check_readable(path: &Path) -> Result<(), String> {
    let metadata = path
        .metadata()
        .map_err(|e| format!("cannot stat file: {}", e))?;
    if !metadata.is_file() {
        return Err("not a regular file".to_string());
    }
    File::open(path).map_err(|e| format!("cannot open file: {}", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config(mode: EnabledMode, explicit: Option<PathBuf>) -> TelemetryConfig {
        TelemetryConfig {
            enabled: mode,
            credentials_path: explicit,
            ..Default::default()
        }
    }

    fn write_credentials(dir: &Path) -> PathBuf {
        let path = dir.join("credentials.json");
        fs::write(&path, "{}").unwrap();
        path
    }

    #[test]
    fn test_false_is_not_configured_even_with_valid_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_credentials(dir.path());
        let state = resolve(&config(EnabledMode::False, Some(path)));
        assert_eq!(state, CredentialState::NotConfigured);
    }

    #[test]
    fn test_explicit_path_usable() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_credentials(dir.path());
        for mode in [EnabledMode::True, EnabledMode::Auto] {
            let state = resolve_with_discovery(&config(mode, Some(path.clone())), None);
            assert_eq!(state, CredentialState::Usable { path: path.clone() });
        }
    }

    #[test]
    fn test_explicit_path_missing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");

        let state = resolve_with_discovery(&config(EnabledMode::True, Some(missing.clone())), None);
        assert!(matches!(state, CredentialState::AbsentButRequired { .. }));

        let state = resolve_with_discovery(&config(EnabledMode::Auto, Some(missing)), None);
        assert_eq!(state, CredentialState::NotConfigured);
    }

    #[test]
    fn test_explicit_path_missing_does_not_fall_back_to_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let ambient = write_credentials(dir.path());
        let state = resolve_with_discovery(
            &config(EnabledMode::Auto, Some(dir.path().join("nope.json"))),
            Some(ambient),
        );
        assert_eq!(state, CredentialState::NotConfigured);
    }

    #[test]
    fn test_directory_is_not_a_credential_file() {
        let dir = tempfile::tempdir().unwrap();
        let state = resolve_with_discovery(
            &config(EnabledMode::True, Some(dir.path().to_path_buf())),
            None,
        );
        assert!(matches!(state, CredentialState::AbsentButRequired { .. }));
    }

    #[test]
    fn test_ambient_discovery_order() {
        let env_dir = tempfile::tempdir().unwrap();
        let home_dir = tempfile::tempdir().unwrap();
        let env_path = write_credentials(env_dir.path());
        let home_path = write_credentials(home_dir.path());

        let mut cfg = config(EnabledMode::Auto, None);
        cfg.default_credentials_path = Some(env_path.clone());
        let state = resolve_with_discovery(&cfg, Some(home_path.clone()));
        assert_eq!(state, CredentialState::Usable { path: env_path });

        cfg.default_credentials_path = Some(env_dir.path().join("missing.json"));
        let state = resolve_with_discovery(&cfg, Some(home_path.clone()));
        assert_eq!(state, CredentialState::Usable { path: home_path });
    }

    #[test]
    fn test_discovery_failure_by_mode() {
        let state = resolve_with_discovery(&config(EnabledMode::Auto, None), None);
        assert_eq!(state, CredentialState::NotConfigured);

        let state = resolve_with_discovery(&config(EnabledMode::True, None), None);
        assert!(matches!(state, CredentialState::AbsentButRequired { .. }));
    }
}
