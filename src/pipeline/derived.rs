//! Derived process values and setpoint overlays.
//!
//! Groups are data-driven: each [`DerivedGroup`] names a subset of sensors and
//! a [`Reducer`]. Reducers only ever see finite member values and yield `None`
//! when there are none, so a missing bank never shows up as `0`.
//!
//! Setpoints are broadcast as they are *now*: every point in the window gets
//! the current value, whatever was in effect when the reading was taken.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

use super::pivot::SeriesPoint;
use crate::telemetry::models::ControlConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    #[default]
    Mean,
    Min,
    Max,
}

impl Reducer {
    /// Reduce the finite entries of `values`; `None` if there are none.
    #[must_use]
    pub fn reduce<I>(self, values: I) -> Option<f64>
    where
        I: IntoIterator<Item = f64>,
    {
        let mut finite = values.into_iter().filter(|v| v.is_finite());
        let first = finite.next()?;
        match self {
            Self::Mean => {
                let (sum, count) = finite.fold((first, 1_u32), |(s, n), v| (s + v, n + 1));
                Some(sum / f64::from(count))
            }
            Self::Min => Some(finite.fold(first, f64::min)),
            Self::Max => Some(finite.fold(first, f64::max)),
        }
    }
}

impl FromStr for Reducer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mean" | "avg" => Ok(Self::Mean),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            other => Err(format!("unknown reducer '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DerivedGroup {
    pub name: String,
    pub members: Vec<String>,
    pub reducer: Reducer,
}

impl DerivedGroup {
    pub fn new(name: impl Into<String>, members: Vec<String>, reducer: Reducer) -> Self {
        Self {
            name: name.into(),
            members,
            reducer,
        }
    }

    /// Apply the reducer over this group's members in `values`.
    #[must_use]
    pub fn evaluate(&self, values: &BTreeMap<String, Option<f64>>) -> Option<f64> {
        self.reducer.reduce(
            self.members
                .iter()
                .filter_map(|m| values.get(m).copied().flatten()),
        )
    }
}

/// Which control parameter a setpoint series mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SetpointField {
    Setpoint1,
    Setpoint2,
}

impl SetpointField {
    #[must_use]
    pub fn read(self, control: &ControlConfig) -> f64 {
        match self {
            Self::Setpoint1 => control.setpoint_1,
            Self::Setpoint2 => control.setpoint_2,
        }
    }
}

impl FromStr for SetpointField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "setpoint_1" | "sp1" => Ok(Self::Setpoint1),
            "setpoint_2" | "sp2" => Ok(Self::Setpoint2),
            other => Err(format!("unknown setpoint field '{other}'")),
        }
    }
}

impl fmt::Display for SetpointField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setpoint1 => f.write_str("setpoint_1"),
            Self::Setpoint2 => f.write_str("setpoint_2"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SetpointBinding {
    pub name: String,
    pub field: SetpointField,
}

/// Compute every group on every point.
pub fn aggregate(points: &mut [SeriesPoint], groups: &[DerivedGroup]) {
    for point in points.iter_mut() {
        for group in groups {
            let value = group.evaluate(&point.values);
            point.derived.insert(group.name.clone(), value);
        }
    }
}

/// Current setpoint values keyed by series name.
#[must_use]
pub fn setpoint_values(
    bindings: &[SetpointBinding],
    control: &ControlConfig,
) -> BTreeMap<String, Option<f64>> {
    bindings
        .iter()
        .map(|b| {
            let value = b.field.read(control);
            (b.name.clone(), value.is_finite().then_some(value))
        })
        .collect()
}

/// Overwrite the setpoint fields of every point with the current values.
pub fn broadcast_setpoints(
    points: &mut [SeriesPoint],
    bindings: &[SetpointBinding],
    control: &ControlConfig,
) {
    let current = setpoint_values(bindings, control);
    for point in points.iter_mut() {
        for (name, value) in &current {
            point.derived.insert(name.clone(), *value);
        }
    }
}
