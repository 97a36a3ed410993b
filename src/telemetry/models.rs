use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// Reading as returned by `/thermo/latest` and `/thermo/history`.
///
/// The sensor tag arrives nested under `meta.sensor`, flat as `sensor`, or
/// not at all. Only the normalizer looks at these fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReading {
    #[serde(default)]
    pub device_id: Option<String>,
    /// Usually a number, occasionally a numeric string
    #[serde(default)]
    pub celsius: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sensor: Option<String>,
    #[serde(default)]
    pub meta: Option<ReadingMeta>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadingMeta {
    #[serde(default)]
    pub sensor: Option<String>,
}

/// Response from `/thermo/sensors`: a bare list or wrapped in `{ sensors }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SensorsResponse {
    List(Vec<String>),
    Wrapped { sensors: Vec<String> },
}

impl SensorsResponse {
    #[must_use]
    pub fn into_ids(self) -> Vec<String> {
        match self {
            Self::List(ids) | Self::Wrapped { sensors: ids } => ids,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    #[default]
    Auto,
    Manual,
}

impl ControlMode {
    /// Case-insensitive parse of the backend's mode string.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// Supervisory control parameters, serialized with the backend's field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ControlConfig {
    pub mode: ControlMode,
    /// Loop 1 setpoint (°C)
    #[serde(rename = "sp1")]
    pub setpoint_1: f64,
    /// Loop 1 hysteresis (°C)
    #[serde(rename = "h1")]
    pub hysteresis_1: f64,
    /// Loop 1 duty ON window (ms)
    #[serde(rename = "l1_on_ms")]
    pub duty_on_ms_1: u64,
    /// Loop 1 duty OFF window (ms)
    #[serde(rename = "l1_off_ms")]
    pub duty_off_ms_1: u64,
    /// Alternate R1/R2 on loop 1
    #[serde(rename = "l1_alternate")]
    pub alternate: bool,
    /// Loop 2 setpoint (°C)
    #[serde(rename = "sp2")]
    pub setpoint_2: f64,
    /// Loop 2 hysteresis (°C)
    #[serde(rename = "h2")]
    pub hysteresis_2: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            mode: ControlMode::Auto,
            setpoint_1: 45.0,
            hysteresis_1: 5.0,
            duty_on_ms_1: 5 * 60_000,
            duty_off_ms_1: 3 * 60_000,
            alternate: false,
            setpoint_2: 35.0,
            hysteresis_2: 3.0,
        }
    }
}

impl ControlConfig {
    /// Overlay the fields present in `patch`, keeping the rest.
    #[must_use]
    pub fn merged(&self, patch: &ControlPatch) -> Self {
        Self {
            mode: patch
                .mode
                .as_deref()
                .and_then(ControlMode::parse)
                .unwrap_or(self.mode),
            setpoint_1: patch.sp1.unwrap_or(self.setpoint_1),
            hysteresis_1: patch.h1.unwrap_or(self.hysteresis_1),
            duty_on_ms_1: patch.l1_on_ms.unwrap_or(self.duty_on_ms_1),
            duty_off_ms_1: patch.l1_off_ms.unwrap_or(self.duty_off_ms_1),
            alternate: patch.l1_alternate.unwrap_or(self.alternate),
            setpoint_2: patch.sp2.unwrap_or(self.setpoint_2),
            hysteresis_2: patch.h2.unwrap_or(self.hysteresis_2),
        }
    }
}

/// Partial control parameters: the `/control` response and the local edit form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ControlPatch {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub sp1: Option<f64>,
    #[serde(default)]
    pub h1: Option<f64>,
    #[serde(default)]
    pub l1_on_ms: Option<u64>,
    #[serde(default)]
    pub l1_off_ms: Option<u64>,
    #[serde(default)]
    pub l1_alternate: Option<bool>,
    #[serde(default)]
    pub sp2: Option<f64>,
    #[serde(default)]
    pub h2: Option<f64>,
}

impl ControlPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Body of `PUT /control`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlUpdate<'a> {
    pub device_id: &'a str,
    #[serde(flatten)]
    pub control: &'a ControlConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RelayState {
    #[serde(default)]
    pub state: bool,
}

/// Actual relay state as reported by `/relay/<deviceId>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RelayStatus {
    pub relays: BTreeMap<String, RelayState>,
}

impl Default for RelayStatus {
    fn default() -> Self {
        Self {
            relays: ["R1", "R2", "R3"]
                .into_iter()
                .map(|r| (r.to_string(), RelayState::default()))
                .collect(),
        }
    }
}

impl RelayStatus {
    #[must_use]
    pub fn is_on(&self, relay: &str) -> bool {
        self.relays.get(relay).is_some_and(|r| r.state)
    }
}

/// Body of `POST /relay/set`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayCommand {
    pub device_id: String,
    pub relay: String,
    pub state: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_sec: Option<u64>,
}
