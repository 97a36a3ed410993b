use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::pipeline::derived::{DerivedGroup, Reducer, SetpointBinding, SetpointField};
use crate::pipeline::pivot::ClampRange;

const DEFAULT_DERIVED_GROUPS: &str = "PV1=K1,K2,K3,K4;PV2=K5,K6,K7,K8";
const DEFAULT_SETPOINT_SERIES: &str = "SP1=setpoint_1;SP2=setpoint_2";

#[derive(Debug, Clone)]
pub struct Config {
    // Thermo backend
    pub api_base_url: String,
    pub api_key: Option<String>,
    pub request_timeout_seconds: u64,

    // Device identity polled at startup
    pub device_id: String,

    // Polling
    pub poll_interval_ms: u64,
    pub slow_refresh_every: u32,
    pub history_limit: u32,
    pub summary_window_seconds: u64,

    // Series shaping
    pub clamp: Option<ClampRange>,
    pub derived_groups: Vec<DerivedGroup>,
    pub setpoint_series: Vec<SetpointBinding>,

    // Visibility preferences
    pub preferences_path: PathBuf,

    // Read-model API
    pub api_host: String,
    pub api_port: u16,
    /// Upper bound on one read-model API request
    pub api_timeout_seconds: u64,
}

impl Config {
    /// Load configuration from environment variables (and `.env` if present).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a structured variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    ///
    /// Scalar variables that fail to parse fall back to their defaults; the
    /// derived-group and setpoint lists fail fast.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for malformed `DERIVED_GROUPS`,
    /// `SETPOINT_SERIES` or an inverted clamp range.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let clamp = if parsed_or(&lookup, "CLAMP_ENABLED", true) {
            let min: f64 = parsed_or(&lookup, "CLAMP_MIN", 0.0);
            let max: f64 = parsed_or(&lookup, "CLAMP_MAX", 350.0);
            if min > max {
                return Err(ConfigError::Invalid {
                    key: "CLAMP_MIN",
                    reason: format!("{min} is greater than CLAMP_MAX {max}"),
                });
            }
            Some(ClampRange { min, max })
        } else {
            None
        };

        let derived_groups = parse_derived_groups(
            &lookup("DERIVED_GROUPS").unwrap_or_else(|| DEFAULT_DERIVED_GROUPS.to_string()),
        )?;
        let setpoint_series = parse_setpoint_series(
            &lookup("SETPOINT_SERIES").unwrap_or_else(|| DEFAULT_SETPOINT_SERIES.to_string()),
        )?;

        Ok(Self {
            // Thermo backend
            api_base_url: lookup("THERMO_API_BASE")
                .unwrap_or_else(|| "http://localhost:3000/api".to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: lookup("THERMO_API_KEY").filter(|k| !k.is_empty()),
            request_timeout_seconds: parsed_or(&lookup, "REQUEST_TIMEOUT_SECONDS", 12),

            device_id: lookup("THERMO_DEVICE_ID")
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| "heltec-v3-01".to_string()),

            // Polling
            poll_interval_ms: parsed_or(&lookup, "POLL_INTERVAL_MS", 5000),
            slow_refresh_every: parsed_or(&lookup, "SLOW_REFRESH_EVERY", 12),
            history_limit: parsed_or(&lookup, "HISTORY_LIMIT", 500),
            summary_window_seconds: parsed_or(&lookup, "SUMMARY_WINDOW_SECONDS", 600),

            // Series shaping
            clamp,
            derived_groups,
            setpoint_series,

            preferences_path: lookup("PREFERENCES_PATH")
                .map_or_else(|| PathBuf::from("thermo-dash-preferences.json"), PathBuf::from),

            // Read-model API
            api_host: lookup("API_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            api_port: parsed_or(&lookup, "API_PORT", 8787),
            api_timeout_seconds: parsed_or(&lookup, "API_TIMEOUT_SECONDS", 45),
        })
    }

    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    #[must_use]
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_seconds.max(1))
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        // A zero period would make tokio's interval panic.
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

fn parsed_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

/// Parse `NAME[:reducer]=M1,M2;NAME2=...` into derived groups.
///
/// # Errors
///
/// Returns `ConfigError::Invalid` on a missing `=`, empty name, empty member
/// list or unknown reducer.
pub fn parse_derived_groups(raw: &str) -> Result<Vec<DerivedGroup>, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        key: "DERIVED_GROUPS",
        reason,
    };

    let mut groups = Vec::new();
    for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let (head, members) = entry
            .split_once('=')
            .ok_or_else(|| invalid(format!("'{entry}' has no '='")))?;

        let (name, reducer) = match head.split_once(':') {
            Some((name, reducer)) => (
                name.trim(),
                reducer
                    .trim()
                    .parse::<Reducer>()
                    .map_err(|e| invalid(format!("'{entry}': {e}")))?,
            ),
            None => (head.trim(), Reducer::Mean),
        };
        if name.is_empty() {
            return Err(invalid(format!("'{entry}' has an empty name")));
        }

        let members: Vec<String> = members
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(ToString::to_string)
            .collect();
        if members.is_empty() {
            return Err(invalid(format!("'{entry}' has no members")));
        }

        groups.push(DerivedGroup::new(name, members, reducer));
    }
    Ok(groups)
}

/// Parse `NAME=field;NAME2=field` into setpoint broadcast bindings.
///
/// # Errors
///
/// Returns `ConfigError::Invalid` on a missing `=`, empty name or unknown field.
pub fn parse_setpoint_series(raw: &str) -> Result<Vec<SetpointBinding>, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        key: "SETPOINT_SERIES",
        reason,
    };

    raw.split(';')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(|entry| {
            let (name, field) = entry
                .split_once('=')
                .ok_or_else(|| invalid(format!("'{entry}' has no '='")))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(invalid(format!("'{entry}' has an empty name")));
            }
            let field = field
                .trim()
                .parse::<SetpointField>()
                .map_err(|e| invalid(format!("'{entry}': {e}")))?;
            Ok(SetpointBinding {
                name: name.to_string(),
                field,
            })
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
