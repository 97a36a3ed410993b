use chrono::{DateTime, Utc};
use futures::future::OptionFuture;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use utoipa::ToSchema;

use crate::error::AppResult;
use crate::telemetry::TelemetrySource;
use crate::telemetry::models::{ControlPatch, RawReading, RelayStatus};

/// One independently fetched piece of backend state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Latest,
    History,
    Sensors,
    Summary,
    Control,
    Relays,
}

impl Target {
    pub const ALL: [Self; 6] = [
        Self::Latest,
        Self::History,
        Self::Sensors,
        Self::Summary,
        Self::Control,
        Self::Relays,
    ];

    /// Re-fetched on every timer tick.
    pub const FAST: [Self; 4] = [Self::Latest, Self::History, Self::Relays, Self::Control];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Latest => "latest",
            Self::History => "history",
            Self::Sensors => "sensors",
            Self::Summary => "summary",
            Self::Control => "control",
            Self::Relays => "relays",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    #[default]
    Idle,
    Loading,
    Ok,
    Error,
}

/// Status of one target plus what the renderer needs to explain it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetReport {
    pub status: TargetStatus,
    /// Last failure message while `status` is `error`
    pub error: Option<String>,
    /// Time of the last successful fetch
    pub updated_at: Option<DateTime<Utc>>,
}

impl TargetReport {
    pub fn loading(&mut self) {
        self.status = TargetStatus::Loading;
    }

    pub fn succeeded(&mut self, at: DateTime<Utc>) {
        self.status = TargetStatus::Ok;
        self.error = None;
        self.updated_at = Some(at);
    }

    pub fn failed(&mut self, message: String) {
        self.status = TargetStatus::Error;
        self.error = Some(message);
    }
}

#[must_use]
pub fn idle_reports() -> BTreeMap<Target, TargetReport> {
    Target::ALL
        .into_iter()
        .map(|t| (t, TargetReport::default()))
        .collect()
}

/// Parameters shared by every fetch of one cycle.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub device_id: &'a str,
    pub history_limit: u32,
    pub summary_window_seconds: u64,
}

/// Per-target results of one fan-out; `None` for targets not requested.
#[derive(Debug, Default)]
pub struct CycleOutcome {
    pub latest: Option<AppResult<Option<RawReading>>>,
    pub history: Option<AppResult<Vec<RawReading>>>,
    pub sensors: Option<AppResult<Vec<String>>>,
    pub summary: Option<AppResult<Value>>,
    pub control: Option<AppResult<ControlPatch>>,
    pub relays: Option<AppResult<RelayStatus>>,
}

/// Fetch the requested targets concurrently.
///
/// Every leg resolves to its own `Result`, so one failing target never
/// cancels or poisons its siblings.
pub async fn fetch_targets<S: TelemetrySource>(
    source: &S,
    request: FetchRequest<'_>,
    targets: &[Target],
) -> CycleOutcome {
    let wants = |t: Target| targets.contains(&t);
    let device_id = request.device_id;

    let (latest, history, sensors, summary, control, relays) = tokio::join!(
        OptionFuture::from(wants(Target::Latest).then(|| source.latest(device_id))),
        OptionFuture::from(
            wants(Target::History).then(|| source.history(device_id, request.history_limit))
        ),
        OptionFuture::from(wants(Target::Sensors).then(|| source.sensors(device_id))),
        OptionFuture::from(
            wants(Target::Summary)
                .then(|| source.summary(device_id, request.summary_window_seconds))
        ),
        OptionFuture::from(wants(Target::Control).then(|| source.control(device_id))),
        OptionFuture::from(wants(Target::Relays).then(|| source.relays(device_id))),
    );

    CycleOutcome {
        latest,
        history,
        sensors,
        summary,
        control,
        relays,
    }
}

/// Targets currently being fetched, per generation.
///
/// A target already in flight for a generation is skipped by overlapping
/// cycles, so a slow backend never accumulates concurrent requests.
#[derive(Debug, Default)]
pub struct InFlight {
    active: Mutex<HashSet<(u64, Target)>>,
    released: Notify,
}

impl InFlight {
    /// Claim the requested targets that are not already in flight.
    pub fn acquire(&self, generation: u64, targets: &[Target]) -> InFlightGuard<'_> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let claimed = targets
            .iter()
            .copied()
            .filter(|t| active.insert((generation, *t)))
            .collect();
        InFlightGuard {
            owner: self,
            generation,
            targets: claimed,
        }
    }

    /// Resolves the next time any claim is released.
    ///
    /// Create it before trying [`Self::acquire`] so a release in between is not missed.
    pub fn released(&self) -> Notified<'_> {
        self.released.notified()
    }

    #[must_use]
    pub fn is_active(&self, generation: u64, target: Target) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(generation, target))
    }
}

/// Releases its claimed targets on drop.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    owner: &'a InFlight,
    generation: u64,
    targets: Vec<Target>,
}

impl InFlightGuard<'_> {
    #[must_use]
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut active = self
            .owner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for target in &self.targets {
            active.remove(&(self.generation, *target));
        }
        drop(active);
        if !self.targets.is_empty() {
            self.owner.released.notify_waiters();
        }
    }
}
