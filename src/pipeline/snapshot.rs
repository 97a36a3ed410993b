use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use utoipa::ToSchema;

use super::PipelineSettings;
use super::derived::setpoint_values;
use super::pivot::SeriesPoint;
use crate::telemetry::models::ControlConfig;

/// Most recent value of every sensor in the window, plus derived values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct LatestSnapshot {
    /// Timestamp of the newest point in the window
    pub as_of: Option<DateTime<Utc>>,
    /// Last non-null value per catalog sensor
    pub values: BTreeMap<String, Option<f64>>,
    /// Groups evaluated over `values`, then the current setpoints
    pub derived: BTreeMap<String, Option<f64>>,
}

#[must_use]
pub fn latest_snapshot(
    series: &[SeriesPoint],
    catalog: &[String],
    settings: &PipelineSettings,
    control: &ControlConfig,
) -> LatestSnapshot {
    let values: BTreeMap<String, Option<f64>> = catalog
        .iter()
        .map(|sensor| {
            let last = series
                .iter()
                .rev()
                .find_map(|p| p.values.get(sensor).copied().flatten());
            (sensor.clone(), last)
        })
        .collect();

    let mut derived: BTreeMap<String, Option<f64>> = settings
        .groups
        .iter()
        .map(|g| (g.name.clone(), g.evaluate(&values)))
        .collect();
    derived.extend(setpoint_values(&settings.setpoints, control));

    LatestSnapshot {
        as_of: series.last().map(|p| p.timestamp),
        values,
        derived,
    }
}
