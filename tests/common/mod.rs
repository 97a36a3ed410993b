//! In-memory telemetry source shared by the integration tests.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thermo_dash::config::Config;
use thermo_dash::error::{AppError, AppResult};
use thermo_dash::telemetry::TelemetrySource;
use thermo_dash::telemetry::models::{
    ControlConfig, ControlPatch, RawReading, RelayCommand, RelayState, RelayStatus,
};

pub fn ts(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_767_225_600 + seconds, 0)
        .single()
        .expect("valid timestamp")
}

/// Reading tagged the nested way (`meta.sensor`).
pub fn reading(sensor: &str, celsius: f64, at: i64) -> RawReading {
    serde_json::from_value(json!({
        "deviceId": "heltec-v3-01",
        "celsius": celsius,
        "createdAt": ts(at),
        "meta": { "sensor": sensor },
    }))
    .expect("valid reading")
}

/// Reading tagged the flat way (`sensor`).
pub fn flat_reading(sensor: &str, celsius: f64, at: i64) -> RawReading {
    serde_json::from_value(json!({
        "celsius": celsius,
        "createdAt": ts(at),
        "sensor": sensor,
    }))
    .expect("valid reading")
}

pub fn untagged_reading(celsius: Value, at: i64) -> RawReading {
    serde_json::from_value(json!({
        "celsius": celsius,
        "createdAt": ts(at),
    }))
    .expect("valid reading")
}

/// Configuration with defaults, a fast poll interval and no clamping surprises.
pub fn test_config(device_id: &str) -> Config {
    let device_id = device_id.to_string();
    Config::from_lookup(move |key| match key {
        "THERMO_DEVICE_ID" => Some(device_id.clone()),
        "POLL_INTERVAL_MS" => Some("20".to_string()),
        _ => None,
    })
    .expect("default configuration parses")
}

#[derive(Debug, Clone, Default)]
pub struct DeviceFixture {
    pub latest: Option<RawReading>,
    pub history: Vec<RawReading>,
    pub sensors: Vec<String>,
    pub summary: Value,
    pub control: ControlPatch,
    pub relays: RelayStatus,
}

impl DeviceFixture {
    /// A device with two banks' worth of sensors and a couple of timestamps.
    pub fn rig() -> Self {
        let history = vec![
            reading("K1", 40.0, 0),
            reading("K2", 42.0, 0),
            reading("K5", 30.0, 0),
            reading("K1", 41.0, 10),
            reading("K2", 43.0, 10),
            untagged_reading(json!(21.5), 10),
        ];
        Self {
            latest: history.last().cloned(),
            sensors: vec!["K1".into(), "K2".into(), "K5".into()],
            summary: json!({ "count": history.len(), "avg": 36.3 }),
            control: ControlPatch {
                mode: Some("auto".into()),
                sp1: Some(45.0),
                sp2: Some(35.0),
                ..ControlPatch::default()
            },
            relays: RelayStatus::default(),
            history,
        }
    }
}

#[derive(Default)]
struct Inner {
    devices: Mutex<HashMap<String, DeviceFixture>>,
    delays: Mutex<HashMap<String, Duration>>,
    endpoint_delays: Mutex<HashMap<&'static str, Duration>>,
    failing: Mutex<HashSet<&'static str>>,
    calls: Mutex<BTreeMap<&'static str, usize>>,
    pushed: Mutex<Vec<(String, ControlConfig)>>,
    relay_commands: Mutex<Vec<RelayCommand>>,
}

/// Cloneable handle; clones share fixtures and counters.
#[derive(Clone, Default)]
pub struct FakeSource {
    inner: Arc<Inner>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(self, device_id: &str, fixture: DeviceFixture) -> Self {
        self.set_device(device_id, fixture);
        self
    }

    pub fn set_device(&self, device_id: &str, fixture: DeviceFixture) {
        self.inner
            .devices
            .lock()
            .unwrap()
            .insert(device_id.to_string(), fixture);
    }

    pub fn update_device(&self, device_id: &str, edit: impl FnOnce(&mut DeviceFixture)) {
        let mut devices = self.inner.devices.lock().unwrap();
        edit(devices.entry(device_id.to_string()).or_default());
    }

    /// Delay every response for `device_id`.
    pub fn delay(&self, device_id: &str, by: Duration) {
        self.inner
            .delays
            .lock()
            .unwrap()
            .insert(device_id.to_string(), by);
    }

    /// Delay one endpoint for every device, on top of any device delay.
    pub fn delay_endpoint(&self, endpoint: &'static str, by: Duration) {
        self.inner.endpoint_delays.lock().unwrap().insert(endpoint, by);
    }

    /// Make one endpoint fail with a backend status error.
    pub fn fail(&self, endpoint: &'static str) {
        self.inner.failing.lock().unwrap().insert(endpoint);
    }

    pub fn recover(&self, endpoint: &'static str) {
        self.inner.failing.lock().unwrap().remove(endpoint);
    }

    pub fn calls(&self, endpoint: &str) -> usize {
        self.inner
            .calls
            .lock()
            .unwrap()
            .get(endpoint)
            .copied()
            .unwrap_or(0)
    }

    pub fn pushed(&self) -> Vec<(String, ControlConfig)> {
        self.inner.pushed.lock().unwrap().clone()
    }

    pub fn relay_commands(&self) -> Vec<RelayCommand> {
        self.inner.relay_commands.lock().unwrap().clone()
    }

    /// Count the call, wait out the delays, then hand back the fixture as it
    /// was when the call arrived, the way a slow backend answers.
    async fn enter(&self, endpoint: &'static str, device_id: &str) -> AppResult<DeviceFixture> {
        *self.inner.calls.lock().unwrap().entry(endpoint).or_default() += 1;
        let fixture = self
            .inner
            .devices
            .lock()
            .unwrap()
            .get(device_id)
            .cloned()
            .unwrap_or_default();

        let delay = self.inner.delays.lock().unwrap().get(device_id).copied();
        let endpoint_delay = self.inner.endpoint_delays.lock().unwrap().get(endpoint).copied();
        for delay in [delay, endpoint_delay].into_iter().flatten() {
            tokio::time::sleep(delay).await;
        }

        if self.inner.failing.lock().unwrap().contains(endpoint) {
            return Err(AppError::Status {
                status: 503,
                body: format!("{endpoint} unavailable"),
            });
        }
        Ok(fixture)
    }
}

impl TelemetrySource for FakeSource {
    async fn latest(&self, device_id: &str) -> AppResult<Option<RawReading>> {
        Ok(self.enter("latest", device_id).await?.latest)
    }

    async fn history(&self, device_id: &str, limit: u32) -> AppResult<Vec<RawReading>> {
        let mut history = self.enter("history", device_id).await?.history;
        history.truncate(limit as usize);
        Ok(history)
    }

    async fn sensors(&self, device_id: &str) -> AppResult<Vec<String>> {
        Ok(self.enter("sensors", device_id).await?.sensors)
    }

    async fn summary(&self, device_id: &str, _window_sec: u64) -> AppResult<Value> {
        let summary = self.enter("summary", device_id).await?.summary;
        if summary.is_null() {
            return Err(AppError::Empty("/thermo/summary"));
        }
        Ok(summary)
    }

    async fn control(&self, device_id: &str) -> AppResult<ControlPatch> {
        let control = self.enter("control", device_id).await?.control;
        if control.is_empty() {
            return Err(AppError::Empty("/control"));
        }
        Ok(control)
    }

    async fn push_control(&self, device_id: &str, control: &ControlConfig) -> AppResult<()> {
        self.enter("push_control", device_id).await?;
        let patch: ControlPatch = serde_json::to_value(control)
            .and_then(serde_json::from_value)
            .map_err(|e| AppError::Decode(e.to_string()))?;
        self.update_device(device_id, |fixture| fixture.control = patch);
        self.inner
            .pushed
            .lock()
            .unwrap()
            .push((device_id.to_string(), control.clone()));
        Ok(())
    }

    async fn relays(&self, device_id: &str) -> AppResult<RelayStatus> {
        Ok(self.enter("relays", device_id).await?.relays)
    }

    async fn set_relay(&self, command: &RelayCommand) -> AppResult<()> {
        self.enter("set_relay", &command.device_id).await?;
        self.update_device(&command.device_id, |fixture| {
            fixture.relays.relays.insert(
                command.relay.clone(),
                RelayState {
                    state: command.state,
                },
            );
        });
        self.inner
            .relay_commands
            .lock()
            .unwrap()
            .push(command.clone());
        Ok(())
    }
}
