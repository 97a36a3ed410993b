use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

use super::normalize::Reading;

/// Presentation clamp applied to every pivoted value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ClampRange {
    pub min: f64,
    pub max: f64,
}

impl ClampRange {
    #[must_use]
    pub fn apply(self, value: f64) -> f64 {
        // Not f64::clamp: that panics on a NaN bound.
        value.max(self.min).min(self.max)
    }
}

/// One reconstructed sample: every catalog sensor has a key in `values`,
/// `null` where the sensor did not report at this timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<String, Option<f64>>,
    /// Process values and broadcast setpoints
    pub derived: BTreeMap<String, Option<f64>>,
}

impl SeriesPoint {
    fn empty(timestamp: DateTime<Utc>, catalog: &[String]) -> Self {
        Self {
            timestamp,
            values: catalog.iter().map(|s| (s.clone(), None)).collect(),
            derived: BTreeMap::new(),
        }
    }

    /// Value of a sensor or derived field, sensors first.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<f64> {
        self.values
            .get(key)
            .or_else(|| self.derived.get(key))
            .copied()
            .flatten()
    }

    /// Copy keeping only the listed sensors; derived fields are kept whole.
    #[must_use]
    pub fn restricted_to(&self, sensors: &[&str]) -> Self {
        Self {
            timestamp: self.timestamp,
            values: self
                .values
                .iter()
                .filter(|(k, _)| sensors.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            derived: self.derived.clone(),
        }
    }
}

/// Fold readings into an ascending, one-point-per-timestamp series.
///
/// Readings are ordered by a stable sort, so readings sharing a timestamp keep
/// their input order and the last one for a sensor wins. A reading whose
/// sensor is missing from `catalog` still gets its field.
#[must_use]
pub fn pivot(readings: &[Reading], catalog: &[String], clamp: Option<ClampRange>) -> Vec<SeriesPoint> {
    let mut ordered: Vec<&Reading> = readings.iter().collect();
    ordered.sort_by_key(|r| r.timestamp);

    let mut points: Vec<SeriesPoint> = Vec::new();
    for reading in ordered {
        let value = reading
            .value()
            .map(|v| clamp.map_or(v, |range| range.apply(v)));

        let open_new = points
            .last()
            .is_none_or(|last| last.timestamp != reading.timestamp);
        if open_new {
            points.push(SeriesPoint::empty(reading.timestamp, catalog));
        }
        if let Some(point) = points.last_mut() {
            point.values.insert(reading.sensor_id.clone(), value);
        }
    }
    points
}
