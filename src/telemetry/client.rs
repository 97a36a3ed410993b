use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::telemetry::TelemetrySource;
use crate::telemetry::models::{
    ControlConfig, ControlPatch, ControlUpdate, RawReading, RelayCommand, RelayStatus,
    SensorsResponse,
};

const API_KEY_HEADER: &str = "x-api-key";

pub struct ThermoClient {
    http_client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl ThermoClient {
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the HTTP client cannot be built.
    pub fn new(config: &Config) -> AppResult<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| AppError::Transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            base_url: config.api_base_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    /// Send a request and return its body as JSON, `Value::Null` for an empty body.
    async fn send_json(&self, request: RequestBuilder, path: &str) -> AppResult<Value> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| AppError::Transport(format!("{path}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| AppError::Decode(format!("{path}: failed to read body: {e}")))?;

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&text).map_err(|e| {
            tracing::warn!(
                path,
                error = %e,
                body_preview = %text.chars().take(500).collect::<String>(),
                "Failed to parse backend response"
            );
            AppError::Decode(format!("{path}: {e}"))
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> AppResult<Value> {
        let request = self.http_client.get(self.url(path)).query(query);
        self.send_json(request, path).await
    }
}

/// `null`, `{}` and `[]` carry no data.
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn decode<T: DeserializeOwned>(value: Value, path: &str) -> AppResult<T> {
    serde_json::from_value(value).map_err(|e| AppError::Decode(format!("{path}: {e}")))
}

/// Decode a history window row by row.
///
/// Rows that do not decode (say, a null `createdAt`) are dropped with a
/// warning; only a body that is not a list fails the target.
///
/// # Errors
///
/// `AppError::Empty` for `null` or `{}`, `AppError::Decode` for any other
/// body that is not an array.
pub fn decode_window(body: Value, path: &'static str) -> AppResult<Vec<RawReading>> {
    let rows = match body {
        Value::Array(rows) => rows,
        Value::Null => return Err(AppError::Empty(path)),
        Value::Object(ref map) if map.is_empty() => return Err(AppError::Empty(path)),
        other => {
            return Err(AppError::Decode(format!(
                "{path}: expected a list of readings, got {}",
                json_kind(&other)
            )));
        }
    };

    let total = rows.len();
    let mut first_error = None;
    let readings: Vec<RawReading> = rows
        .into_iter()
        .filter_map(|row| {
            serde_json::from_value(row)
                .map_err(|e| {
                    first_error.get_or_insert_with(|| e.to_string());
                })
                .ok()
        })
        .collect();

    if let Some(error) = first_error {
        tracing::warn!(
            path,
            dropped = total - readings.len(),
            kept = readings.len(),
            first_error = %error,
            "Dropped undecodable history rows"
        );
    }
    Ok(readings)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl TelemetrySource for ThermoClient {
    async fn latest(&self, device_id: &str) -> AppResult<Option<RawReading>> {
        const PATH: &str = "/thermo/latest";
        let body = self
            .get_json(PATH, &[("deviceId", device_id.to_string())])
            .await?;
        if is_blank(&body) {
            return Ok(None);
        }
        decode(body, PATH).map(Some)
    }

    async fn history(&self, device_id: &str, limit: u32) -> AppResult<Vec<RawReading>> {
        const PATH: &str = "/thermo/history";
        let body = self
            .get_json(
                PATH,
                &[
                    ("deviceId", device_id.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        decode_window(body, PATH)
    }

    async fn sensors(&self, device_id: &str) -> AppResult<Vec<String>> {
        const PATH: &str = "/thermo/sensors";
        let body = self
            .get_json(PATH, &[("deviceId", device_id.to_string())])
            .await?;
        if body.is_null() || body.as_object().is_some_and(serde_json::Map::is_empty) {
            return Err(AppError::Empty(PATH));
        }
        decode::<SensorsResponse>(body, PATH).map(SensorsResponse::into_ids)
    }

    async fn summary(&self, device_id: &str, window_sec: u64) -> AppResult<Value> {
        const PATH: &str = "/thermo/summary";
        let body = self
            .get_json(
                PATH,
                &[
                    ("deviceId", device_id.to_string()),
                    ("windowSec", window_sec.to_string()),
                ],
            )
            .await?;
        if is_blank(&body) {
            return Err(AppError::Empty(PATH));
        }
        Ok(body)
    }

    async fn control(&self, device_id: &str) -> AppResult<ControlPatch> {
        const PATH: &str = "/control";
        let body = self
            .get_json(PATH, &[("deviceId", device_id.to_string())])
            .await?;
        if is_blank(&body) {
            return Err(AppError::Empty(PATH));
        }
        let patch: ControlPatch = decode(body, PATH)?;
        if patch.is_empty() {
            return Err(AppError::Empty(PATH));
        }
        Ok(patch)
    }

    async fn push_control(&self, device_id: &str, control: &ControlConfig) -> AppResult<()> {
        const PATH: &str = "/control";
        let request = self
            .http_client
            .put(self.url(PATH))
            .json(&ControlUpdate { device_id, control });
        self.send_json(request, PATH).await.map(drop)
    }

    async fn relays(&self, device_id: &str) -> AppResult<RelayStatus> {
        const PATH: &str = "/relay/{deviceId}";
        // The device id is a path segment here, so it is pushed through the URL
        // builder to get it percent-encoded.
        let mut url = reqwest::Url::parse(&self.url("/relay"))
            .map_err(|e| AppError::Transport(format!("{PATH}: invalid base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| AppError::Transport(format!("{PATH}: base URL cannot hold a path")))?
            .push(device_id);

        let body = self.send_json(self.http_client.get(url), PATH).await?;
        if body.get("relays").is_none_or(Value::is_null) {
            return Err(AppError::Empty(PATH));
        }
        decode(body, PATH)
    }

    async fn set_relay(&self, command: &RelayCommand) -> AppResult<()> {
        const PATH: &str = "/relay/set";
        let request = self.http_client.post(self.url(PATH)).json(command);
        self.send_json(request, PATH).await.map(drop)
    }
}
