//! Single normalization boundary for raw backend readings.
//!
//! The backend tags readings inconsistently: the sensor id may be nested under
//! `meta.sensor`, flat as `sensor`, or missing. Everything downstream of
//! [`normalize`] works with [`Reading::sensor_id`] only.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::telemetry::models::RawReading;

/// Sensor id given to readings that carry no tag.
pub const DEFAULT_SENSOR: &str = "default";

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub device_id: String,
    pub sensor_id: String,
    /// May be non-finite when the source value was malformed
    pub celsius: f64,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    /// The temperature, if it is usable.
    #[must_use]
    pub fn value(&self) -> Option<f64> {
        self.celsius.is_finite().then_some(self.celsius)
    }
}

/// Resolve the sensor tag: `meta.sensor`, then flat `sensor`, then [`DEFAULT_SENSOR`].
#[must_use]
pub fn sensor_tag(raw: &RawReading) -> &str {
    raw.meta
        .as_ref()
        .and_then(|m| m.sensor.as_deref())
        .filter(|s| !s.trim().is_empty())
        .or_else(|| raw.sensor.as_deref().filter(|s| !s.trim().is_empty()))
        .unwrap_or(DEFAULT_SENSOR)
}

/// Numbers pass through, numeric strings are parsed, anything else is NaN.
fn coerce_celsius(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

#[must_use]
pub fn normalize_reading(raw: &RawReading, requested_device: &str) -> Reading {
    Reading {
        device_id: raw
            .device_id
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or(requested_device)
            .to_string(),
        sensor_id: sensor_tag(raw).to_string(),
        celsius: coerce_celsius(&raw.celsius),
        timestamp: raw.created_at,
    }
}

/// Normalize a window. Total: one output per input, in input order.
#[must_use]
pub fn normalize(raw: &[RawReading], requested_device: &str) -> Vec<Reading> {
    raw.iter()
        .map(|r| normalize_reading(r, requested_device))
        .collect()
}
