use std::collections::BTreeSet;

use super::normalize::{DEFAULT_SENSOR, Reading};

/// Order sensor ids: deduplicated, ascending, with [`DEFAULT_SENSOR`] last.
#[must_use]
pub fn sort_catalog<I, S>(ids: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let unique: BTreeSet<String> = ids.into_iter().map(Into::into).collect();
    let has_default = unique.contains(DEFAULT_SENSOR);

    let mut catalog: Vec<String> = unique
        .into_iter()
        .filter(|id| id != DEFAULT_SENSOR)
        .collect();
    if has_default {
        catalog.push(DEFAULT_SENSOR.to_string());
    }
    catalog
}

/// Catalog of the sensors present in the current window.
#[must_use]
pub fn build_catalog(readings: &[Reading]) -> Vec<String> {
    sort_catalog(readings.iter().map(|r| r.sensor_id.as_str()))
}
