//! Pure reconstruction pipeline: normalize → catalog → pivot → aggregate.
//!
//! Nothing here suspends or touches shared state; the facade runs these steps
//! under its write lock once a poll cycle's data is in hand.

pub mod catalog;
pub mod derived;
pub mod normalize;
pub mod pivot;
pub mod snapshot;
pub mod visibility;

use crate::config::Config;
use crate::telemetry::models::{ControlConfig, RawReading};
use derived::{DerivedGroup, SetpointBinding};
use normalize::Reading;
use pivot::{ClampRange, SeriesPoint};

/// The series-shaping part of [`Config`].
#[derive(Debug, Clone, Default)]
pub struct PipelineSettings {
    pub clamp: Option<ClampRange>,
    pub groups: Vec<DerivedGroup>,
    pub setpoints: Vec<SetpointBinding>,
}

impl PipelineSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            clamp: config.clamp,
            groups: config.derived_groups.clone(),
            setpoints: config.setpoint_series.clone(),
        }
    }
}

/// Catalog and series rebuilt from one window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconstruction {
    pub catalog: Vec<String>,
    pub series: Vec<SeriesPoint>,
}

/// Rebuild catalog and series (process values included, setpoints not).
#[must_use]
pub fn reconstruct(readings: &[Reading], settings: &PipelineSettings) -> Reconstruction {
    let catalog = catalog::build_catalog(readings);
    let mut series = pivot::pivot(readings, &catalog, settings.clamp);
    derived::aggregate(&mut series, &settings.groups);
    Reconstruction { catalog, series }
}

/// The whole pipeline from raw backend rows, setpoints included.
#[must_use]
pub fn run(
    raw: &[RawReading],
    device_id: &str,
    settings: &PipelineSettings,
    control: &ControlConfig,
) -> Reconstruction {
    let readings = normalize::normalize(raw, device_id);
    let mut rebuilt = reconstruct(&readings, settings);
    derived::broadcast_setpoints(&mut rebuilt.series, &settings.setpoints, control);
    rebuilt
}
