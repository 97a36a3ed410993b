//! The aggregation facade: single owner of everything the renderer reads.
//!
//! Poll cycles are stamped with the generation current when they started.
//! Switching device bumps the generation, so results that arrive late for
//! an abandoned device are dropped at apply time instead of being merged.
//! All reconstruction happens under one write lock, which makes each cycle's
//! update atomic for readers.
//!
//! Control parameters carry a second stamp, the control revision. It moves on
//! every local edit and every successful push, and a polled control config
//! fetched under an older revision is ignored.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use utoipa::ToSchema;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::pipeline::catalog::sort_catalog;
use crate::pipeline::derived::broadcast_setpoints;
use crate::pipeline::normalize::{Reading, normalize, normalize_reading};
use crate::pipeline::pivot::SeriesPoint;
use crate::pipeline::snapshot::{LatestSnapshot, latest_snapshot};
use crate::pipeline::visibility::{VisibilityMap, merge_visibility, visible_sensors};
use crate::pipeline::{PipelineSettings, reconstruct};
use crate::services::preferences::PreferenceStore;
use crate::sync::scheduler::{CycleRunner, PollHandle, PollSchedule, spawn_poller};
use crate::sync::worker::{
    CycleOutcome, FetchRequest, InFlight, Target, TargetReport, TargetStatus, fetch_targets,
    idle_reports,
};
use crate::telemetry::TelemetrySource;
use crate::telemetry::models::{ControlConfig, ControlPatch, RelayCommand, RelayStatus};

/// Everything the renderer can read, as one consistent snapshot.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReadModel {
    pub device_id: String,
    pub generation: u64,
    #[schema(value_type = Object)]
    pub statuses: BTreeMap<Target, TargetReport>,
    pub latest: Option<Reading>,
    /// Sensors in the current window, `default` last
    pub catalog: Vec<String>,
    #[schema(value_type = Object)]
    pub visibility: VisibilityMap,
    pub series: Vec<SeriesPoint>,
    pub latest_values: LatestSnapshot,
    pub control: ControlConfig,
    /// True while local control edits have not been pushed
    pub control_pending: bool,
    pub relays: RelayStatus,
    /// Sensor list as reported by the backend
    pub reported_sensors: Vec<String>,
    #[schema(value_type = Option<Object>)]
    pub summary: Option<Value>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct EngineState {
    device_id: String,
    generation: u64,
    statuses: BTreeMap<Target, TargetReport>,
    latest: Option<Reading>,
    catalog: Vec<String>,
    visibility: VisibilityMap,
    series: Vec<SeriesPoint>,
    reported_sensors: Vec<String>,
    summary: Option<Value>,
    control: ControlConfig,
    control_pending: bool,
    control_revision: u64,
    relays: RelayStatus,
    updated_at: Option<DateTime<Utc>>,
}

impl EngineState {
    fn fresh(device_id: String, generation: u64) -> Self {
        Self {
            device_id,
            generation,
            statuses: idle_reports(),
            latest: None,
            catalog: Vec::new(),
            visibility: VisibilityMap::new(),
            series: Vec::new(),
            reported_sensors: Vec::new(),
            summary: None,
            control: ControlConfig::default(),
            control_pending: false,
            control_revision: 0,
            relays: RelayStatus::default(),
            updated_at: None,
        }
    }

    fn report(&mut self, target: Target) -> &mut TargetReport {
        self.statuses.entry(target).or_default()
    }

    fn record_failure(&mut self, target: Target, error: &AppError) {
        tracing::warn!(
            device_id = %self.device_id,
            poll_target = %target,
            error = %error,
            "Poll target failed, keeping last known value"
        );
        self.report(target).failed(error.to_string());
    }
}

/// Shared core driven by the poller and by the facade's explicit operations.
pub struct Engine<S> {
    source: S,
    store: Arc<dyn PreferenceStore>,
    settings: PipelineSettings,
    history_limit: u32,
    summary_window_seconds: u64,
    state: RwLock<EngineState>,
    in_flight: InFlight,
}

impl<S: TelemetrySource> Engine<S> {
    /// Generation and device of the current identity.
    async fn identity(&self) -> (u64, String) {
        let state = self.state.read().await;
        (state.generation, state.device_id.clone())
    }

    /// Mark `targets` loading if `generation` is still current.
    async fn begin(&self, generation: u64, targets: &[Target]) -> Option<Started> {
        let mut state = self.state.write().await;
        if state.generation != generation {
            return None;
        }
        let prior = targets
            .iter()
            .map(|target| {
                let report = state.report(*target);
                let prior = report.clone();
                report.loading();
                (*target, prior)
            })
            .collect();
        Some(Started {
            device_id: state.device_id.clone(),
            control_revision: state.control_revision,
            prior,
        })
    }

    /// Run one cycle over whichever of `targets` are not already in flight.
    ///
    /// Returns false when every target was already claimed by another cycle.
    async fn cycle(&self, generation: u64, targets: &[Target]) -> bool {
        let claim = self.in_flight.acquire(generation, targets);
        if claim.targets().is_empty() {
            tracing::debug!(generation, "All requested targets already in flight, skipping");
            return false;
        }

        let Some(started) = self.begin(generation, claim.targets()).await else {
            return true;
        };
        let mut pending = PendingCycle {
            engine: self,
            generation,
            prior: started.prior,
        };

        let request = FetchRequest {
            device_id: &started.device_id,
            history_limit: self.history_limit,
            summary_window_seconds: self.summary_window_seconds,
        };
        let outcome = fetch_targets(&self.source, request, claim.targets()).await;
        self.apply(generation, started.control_revision, outcome).await;
        pending.prior.clear();
        true
    }

    /// Fetch `target` once more, waiting out a fetch of it already in flight.
    async fn refetch(&self, generation: u64, target: Target) {
        loop {
            let released = self.in_flight.released();
            if self.cycle(generation, &[target]).await {
                return;
            }
            released.await;
        }
    }

    fn visibility_seed(&self, device_id: &str, sensor: &str) -> Option<bool> {
        self.store
            .get(device_id, sensor)
            .and_then(|value| value.as_bool())
    }

    /// Apply one cycle's outcome, or drop it if the identity has moved on.
    async fn apply(&self, generation: u64, control_revision: u64, outcome: CycleOutcome) {
        let mut state = self.state.write().await;
        if state.generation != generation {
            tracing::debug!(
                stale_generation = generation,
                current_generation = state.generation,
                "Discarding results for a previous device"
            );
            return;
        }

        let now = Utc::now();
        let device_id = state.device_id.clone();

        if let Some(result) = outcome.latest {
            match result {
                Ok(Some(raw)) => {
                    state.latest = Some(normalize_reading(&raw, &device_id));
                    state.report(Target::Latest).succeeded(now);
                }
                // Nothing new: keep whatever we showed before.
                Ok(None) => state.report(Target::Latest).succeeded(now),
                Err(e) => state.record_failure(Target::Latest, &e),
            }
        }

        // Control before history so a rebuilt series carries fresh setpoints.
        let mut control_changed = false;
        if let Some(result) = outcome.control {
            match result {
                Ok(patch) => {
                    if state.control_pending {
                        tracing::debug!(device_id = %device_id, "Local control edits pending, ignoring polled control");
                    } else if control_revision != state.control_revision {
                        tracing::debug!(
                            device_id = %device_id,
                            fetched_revision = control_revision,
                            current_revision = state.control_revision,
                            "Control changed while fetching, ignoring polled control"
                        );
                    } else {
                        let merged = state.control.merged(&patch);
                        if merged != state.control {
                            state.control = merged;
                            control_changed = true;
                        }
                    }
                    state.report(Target::Control).succeeded(now);
                }
                Err(e) => state.record_failure(Target::Control, &e),
            }
        }

        let mut history_rebuilt = false;
        if let Some(result) = outcome.history {
            match result {
                Ok(raw) => {
                    let readings = normalize(&raw, &device_id);
                    let rebuilt = reconstruct(&readings, &self.settings);
                    state.visibility =
                        merge_visibility(&state.visibility, &rebuilt.catalog, |sensor| {
                            self.visibility_seed(&device_id, sensor)
                        });
                    state.catalog = rebuilt.catalog;
                    state.series = rebuilt.series;
                    history_rebuilt = true;
                    tracing::debug!(
                        device_id = %device_id,
                        readings = readings.len(),
                        points = state.series.len(),
                        sensors = state.catalog.len(),
                        "Series rebuilt"
                    );
                    state.report(Target::History).succeeded(now);
                }
                Err(e) => state.record_failure(Target::History, &e),
            }
        }

        if history_rebuilt || control_changed {
            let EngineState {
                series, control, ..
            } = &mut *state;
            broadcast_setpoints(series, &self.settings.setpoints, control);
        }

        if let Some(result) = outcome.sensors {
            match result {
                Ok(ids) => {
                    state.reported_sensors = sort_catalog(ids);
                    state.report(Target::Sensors).succeeded(now);
                }
                Err(e) => state.record_failure(Target::Sensors, &e),
            }
        }

        if let Some(result) = outcome.summary {
            match result {
                Ok(summary) => {
                    state.summary = Some(summary);
                    state.report(Target::Summary).succeeded(now);
                }
                Err(e) => state.record_failure(Target::Summary, &e),
            }
        }

        if let Some(result) = outcome.relays {
            match result {
                Ok(relays) => {
                    state.relays = relays;
                    state.report(Target::Relays).succeeded(now);
                }
                Err(e) => state.record_failure(Target::Relays, &e),
            }
        }

        state.updated_at = Some(now);
    }
}

impl<S: TelemetrySource> CycleRunner for Engine<S> {
    async fn run_cycle(&self, generation: u64, targets: &[Target]) {
        self.cycle(generation, targets).await;
    }
}

/// What [`Engine::begin`] hands to the fetch stage.
struct Started {
    device_id: String,
    control_revision: u64,
    prior: Vec<(Target, TargetReport)>,
}

/// Puts targets still marked loading back to their prior report if the
/// cycle is dropped before it is applied (e.g. the poller was stopped).
struct PendingCycle<'a, S> {
    engine: &'a Engine<S>,
    generation: u64,
    prior: Vec<(Target, TargetReport)>,
}

impl<S> Drop for PendingCycle<'_, S> {
    fn drop(&mut self) {
        if self.prior.is_empty() {
            return;
        }
        let Ok(mut state) = self.engine.state.try_write() else {
            tracing::debug!(
                generation = self.generation,
                "State busy, leaving abandoned targets as loading"
            );
            return;
        };
        if state.generation != self.generation {
            return;
        }
        for (target, prior) in self.prior.drain(..) {
            if let Some(report) = state.statuses.get_mut(&target)
                && report.status == TargetStatus::Loading
            {
                *report = prior;
            }
        }
        tracing::debug!(generation = self.generation, "Cycle abandoned, statuses restored");
    }
}

/// Read model and operations exposed to the presentation layer.
pub struct Facade<S: TelemetrySource> {
    engine: Arc<Engine<S>>,
    schedule: PollSchedule,
    poller: Mutex<Option<PollHandle>>,
    /// Serializes start and device switches so the installed poller always
    /// carries the current generation.
    switching: AsyncMutex<()>,
}

impl<S: TelemetrySource> Facade<S> {
    pub fn new(config: &Config, source: S, store: Arc<dyn PreferenceStore>) -> Self {
        let engine = Engine {
            source,
            store,
            settings: PipelineSettings::from_config(config),
            history_limit: config.history_limit,
            summary_window_seconds: config.summary_window_seconds,
            state: RwLock::new(EngineState::fresh(config.device_id.clone(), 0)),
            in_flight: InFlight::default(),
        };

        Self {
            engine: Arc::new(engine),
            schedule: PollSchedule {
                every: config.poll_interval(),
                slow_refresh_every: config.slow_refresh_every,
            },
            poller: Mutex::new(None),
            switching: AsyncMutex::new(()),
        }
    }

    fn take_poller(&self) -> Option<PollHandle> {
        self.poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn install_poller(&self, handle: PollHandle) {
        let previous = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.stop();
        }
    }

    /// Start polling the current device. Replaces any running poller.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(&self) {
        let _switching = self.switching.lock().await;
        let (generation, device_id) = self.engine.identity().await;
        tracing::info!(device_id = %device_id, generation, "Polling device");
        self.install_poller(spawn_poller(
            Arc::clone(&self.engine),
            generation,
            self.schedule,
        ));
    }

    /// Stop polling; state is kept as it is.
    pub fn stop(&self) {
        if let Some(handle) = self.take_poller() {
            handle.stop();
        }
    }

    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Generation the running poller fetches for, if any.
    #[must_use]
    pub fn poller_generation(&self) -> Option<u64> {
        self.poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(PollHandle::generation)
    }

    /// Switch to another device identity.
    ///
    /// Stops the current timer, resets all per-device state and, if polling
    /// was active, restarts it with a full fan-out for the new device.
    ///
    /// # Errors
    ///
    /// Returns `AppError::BadRequest` for a blank device id.
    pub async fn switch_device(&self, device_id: &str) -> AppResult<()> {
        let device_id = device_id.trim();
        if device_id.is_empty() {
            return Err(AppError::BadRequest("device id must not be empty".to_string()));
        }

        let _switching = self.switching.lock().await;
        if self.device_id().await == device_id {
            return Ok(());
        }

        let was_polling = self.take_poller().is_some();

        let generation = {
            let mut state = self.engine.state.write().await;
            let generation = state.generation + 1;
            tracing::info!(
                from = %state.device_id,
                to = %device_id,
                generation,
                "Switching device"
            );
            *state = EngineState::fresh(device_id.to_string(), generation);
            generation
        };

        if was_polling {
            self.install_poller(spawn_poller(
                Arc::clone(&self.engine),
                generation,
                self.schedule,
            ));
        }
        Ok(())
    }

    /// Fetch every target once for the current device.
    pub async fn refresh_all(&self) {
        let (generation, _) = self.engine.identity().await;
        self.engine.run_cycle(generation, &Target::ALL).await;
    }

    /// Fetch relay state again, e.g. after a relay command issued elsewhere.
    pub async fn refetch_relays(&self) {
        let (generation, _) = self.engine.identity().await;
        self.engine.refetch(generation, Target::Relays).await;
    }

    pub async fn device_id(&self) -> String {
        self.engine.state.read().await.device_id.clone()
    }

    pub async fn generation(&self) -> u64 {
        self.engine.state.read().await.generation
    }

    pub async fn latest(&self) -> Option<Reading> {
        self.engine.state.read().await.latest.clone()
    }

    pub async fn statuses(&self) -> BTreeMap<Target, TargetReport> {
        self.engine.state.read().await.statuses.clone()
    }

    pub async fn status(&self, target: Target) -> TargetReport {
        self.engine
            .state
            .read()
            .await
            .statuses
            .get(&target)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn catalog(&self) -> Vec<String> {
        self.engine.state.read().await.catalog.clone()
    }

    pub async fn visibility(&self) -> VisibilityMap {
        self.engine.state.read().await.visibility.clone()
    }

    /// Show or hide a sensor and persist the choice for this device.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the sensor is not in the current catalog.
    pub async fn set_visibility(&self, sensor: &str, visible: bool) -> AppResult<()> {
        let mut state = self.engine.state.write().await;
        let Some(entry) = state.visibility.get_mut(sensor) else {
            return Err(AppError::NotFound(format!("Sensor '{sensor}' not in catalog")));
        };
        *entry = visible;

        if let Err(e) = self
            .engine
            .store
            .set(&state.device_id, sensor, Value::Bool(visible))
        {
            tracing::warn!(sensor, error = %e, "Failed to persist visibility");
        }
        Ok(())
    }

    /// Flip a sensor's visibility, returning the new value.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the sensor is not in the current catalog.
    pub async fn toggle_visibility(&self, sensor: &str) -> AppResult<bool> {
        let current = self
            .engine
            .state
            .read()
            .await
            .visibility
            .get(sensor)
            .copied()
            .ok_or_else(|| AppError::NotFound(format!("Sensor '{sensor}' not in catalog")))?;
        self.set_visibility(sensor, !current).await?;
        Ok(!current)
    }

    /// The chart-ready series for every catalog sensor.
    pub async fn series(&self) -> Vec<SeriesPoint> {
        self.engine.state.read().await.series.clone()
    }

    /// The series restricted to visible sensors; derived fields are kept.
    pub async fn visible_series(&self) -> Vec<SeriesPoint> {
        let state = self.engine.state.read().await;
        let shown = visible_sensors(&state.catalog, &state.visibility);
        state.series.iter().map(|p| p.restricted_to(&shown)).collect()
    }

    pub async fn latest_values(&self) -> LatestSnapshot {
        let state = self.engine.state.read().await;
        latest_snapshot(
            &state.series,
            &state.catalog,
            &self.engine.settings,
            &state.control,
        )
    }

    pub async fn reported_sensors(&self) -> Vec<String> {
        self.engine.state.read().await.reported_sensors.clone()
    }

    pub async fn summary(&self) -> Option<Value> {
        self.engine.state.read().await.summary.clone()
    }

    pub async fn control(&self) -> ControlConfig {
        self.engine.state.read().await.control.clone()
    }

    pub async fn control_pending(&self) -> bool {
        self.engine.state.read().await.control_pending
    }

    /// Edit control parameters locally; the setpoint series follow at once.
    ///
    /// Edits stay local (polled values no longer overwrite them) until
    /// [`Self::push_control`] succeeds.
    pub async fn update_control(&self, patch: &ControlPatch) -> ControlConfig {
        let mut state = self.engine.state.write().await;
        let merged = state.control.merged(patch);
        if merged != state.control {
            state.control = merged;
            state.control_pending = true;
            state.control_revision += 1;
            let EngineState {
                series, control, ..
            } = &mut *state;
            broadcast_setpoints(series, &self.engine.settings.setpoints, control);
        }
        state.control.clone()
    }

    /// Push the current control parameters to the backend, then refetch them.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the push fails; local edits are kept.
    pub async fn push_control(&self) -> AppResult<ControlConfig> {
        let (generation, device_id, pushed) = {
            let state = self.engine.state.read().await;
            (state.generation, state.device_id.clone(), state.control.clone())
        };

        self.engine.source.push_control(&device_id, &pushed).await?;
        tracing::info!(device_id = %device_id, "Control parameters pushed");

        {
            let mut state = self.engine.state.write().await;
            if state.generation == generation {
                // Control fetches that started before the push are now stale.
                state.control_revision += 1;
                if state.control == pushed {
                    state.control_pending = false;
                }
            }
        }
        self.engine.refetch(generation, Target::Control).await;
        Ok(self.control().await)
    }

    pub async fn relays(&self) -> RelayStatus {
        self.engine.state.read().await.relays.clone()
    }

    /// Issue a manual relay command, then refetch the actual relay state.
    ///
    /// # Errors
    ///
    /// Returns `AppError::BadRequest` for a blank relay id, or the backend error.
    pub async fn command_relay(
        &self,
        relay: &str,
        on: bool,
        hold_sec: Option<u64>,
    ) -> AppResult<RelayStatus> {
        let relay = relay.trim();
        if relay.is_empty() {
            return Err(AppError::BadRequest("relay id must not be empty".to_string()));
        }

        let (generation, device_id) = self.engine.identity().await;
        let command = RelayCommand {
            device_id,
            relay: relay.to_string(),
            state: on,
            hold_sec,
        };
        self.engine.source.set_relay(&command).await?;
        tracing::info!(
            device_id = %command.device_id,
            relay = %command.relay,
            state = command.state,
            "Relay command sent"
        );

        self.engine.refetch(generation, Target::Relays).await;
        Ok(self.relays().await)
    }

    /// One consistent snapshot of the whole read model.
    pub async fn read_model(&self) -> ReadModel {
        let state = self.engine.state.read().await;
        ReadModel {
            device_id: state.device_id.clone(),
            generation: state.generation,
            statuses: state.statuses.clone(),
            latest: state.latest.clone(),
            catalog: state.catalog.clone(),
            visibility: state.visibility.clone(),
            series: state.series.clone(),
            latest_values: latest_snapshot(
                &state.series,
                &state.catalog,
                &self.engine.settings,
                &state.control,
            ),
            control: state.control.clone(),
            control_pending: state.control_pending,
            relays: state.relays.clone(),
            reported_sensors: state.reported_sensors.clone(),
            summary: state.summary.clone(),
            updated_at: state.updated_at,
        }
    }
}

impl<S: TelemetrySource> Drop for Facade<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
