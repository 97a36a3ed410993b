pub mod client;
pub mod models;

use std::future::Future;

use crate::error::AppResult;
use models::{ControlConfig, ControlPatch, RawReading, RelayCommand, RelayStatus};

pub use client::ThermoClient;

/// Everything the engine consumes from the thermo backend.
///
/// `ThermoClient` is the HTTP implementation; tests substitute in-memory fakes.
pub trait TelemetrySource: Send + Sync + 'static {
    /// Most recent single reading, `None` when the backend has nothing.
    fn latest(&self, device_id: &str) -> impl Future<Output = AppResult<Option<RawReading>>> + Send;

    /// Rolling window of readings (newest first, but callers must not rely on it).
    fn history(
        &self,
        device_id: &str,
        limit: u32,
    ) -> impl Future<Output = AppResult<Vec<RawReading>>> + Send;

    /// Sensor identifiers the backend knows about for this device.
    fn sensors(&self, device_id: &str) -> impl Future<Output = AppResult<Vec<String>>> + Send;

    /// Backend-computed summary; opaque to the engine.
    fn summary(
        &self,
        device_id: &str,
        window_sec: u64,
    ) -> impl Future<Output = AppResult<serde_json::Value>> + Send;

    fn control(&self, device_id: &str) -> impl Future<Output = AppResult<ControlPatch>> + Send;

    fn push_control(
        &self,
        device_id: &str,
        control: &ControlConfig,
    ) -> impl Future<Output = AppResult<()>> + Send;

    fn relays(&self, device_id: &str) -> impl Future<Output = AppResult<RelayStatus>> + Send;

    fn set_relay(&self, command: &RelayCommand) -> impl Future<Output = AppResult<()>> + Send;
}
