//! Tests for the HTTP telemetry client against a local stand-in backend.
//!
//! Run with: cargo test --test client_test

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio_test::{assert_err, assert_ok};

use thermo_dash::config::Config;
use thermo_dash::error::AppError;
use thermo_dash::telemetry::client::decode_window;
use thermo_dash::telemetry::models::{ControlConfig, RelayCommand};
use thermo_dash::telemetry::{TelemetrySource, ThermoClient};

/// One request as the backend received it.
#[derive(Debug, Clone)]
struct Seen {
    method: Method,
    path: String,
    query: String,
    api_key: Option<String>,
    body: String,
}

#[derive(Default)]
struct Replies {
    by_path: Mutex<HashMap<String, (StatusCode, String)>>,
    seen: Mutex<Vec<Seen>>,
}

/// Answers every request from a table keyed by raw request path.
struct Backend {
    replies: Arc<Replies>,
    base_url: String,
}

impl Backend {
    async fn start() -> Self {
        let replies = Arc::new(Replies::default());
        let app = Router::new()
            .fallback(answer)
            .with_state(Arc::clone(&replies));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        Self {
            replies,
            base_url: format!("http://{addr}/api"),
        }
    }

    fn reply(&self, path: &str, status: StatusCode, body: impl Into<String>) {
        self.replies
            .by_path
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body.into()));
    }

    fn reply_json(&self, path: &str, body: Value) {
        self.reply(path, StatusCode::OK, body.to_string());
    }

    fn seen(&self) -> Vec<Seen> {
        self.replies.seen.lock().unwrap().clone()
    }

    fn client(&self, api_key: Option<&str>) -> ThermoClient {
        client_for(&self.base_url, api_key)
    }
}

async fn answer(
    State(replies): State<Arc<Replies>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    replies.seen.lock().unwrap().push(Seen {
        method,
        path: uri.path().to_string(),
        query: uri.query().unwrap_or_default().to_string(),
        api_key: headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });
    replies
        .by_path
        .lock()
        .unwrap()
        .get(uri.path())
        .cloned()
        .unwrap_or((StatusCode::NOT_FOUND, "no such route".to_string()))
}

fn client_for(api_base: &str, api_key: Option<&str>) -> ThermoClient {
    let api_base = api_base.to_string();
    let api_key = api_key.map(str::to_string);
    let config = Config::from_lookup(move |key| match key {
        "THERMO_API_BASE" => Some(api_base.clone()),
        "THERMO_API_KEY" => api_key.clone(),
        "REQUEST_TIMEOUT_SECONDS" => Some("5".to_string()),
        _ => None,
    })
    .unwrap();
    ThermoClient::new(&config).unwrap()
}

fn row(sensor: &str, celsius: f64, created_at: &str) -> Value {
    json!({
        "deviceId": "rig-a",
        "celsius": celsius,
        "createdAt": created_at,
        "meta": { "sensor": sensor },
    })
}

#[tokio::test]
async fn latest_sends_device_and_api_key() {
    let backend = Backend::start().await;
    backend.reply_json(
        "/api/thermo/latest",
        row("K1", 40.5, "2026-01-01T00:00:10Z"),
    );

    let reading = assert_ok!(backend.client(Some("secret")).latest("rig-a").await).unwrap();
    assert_eq!(reading.celsius, json!(40.5));
    assert_eq!(reading.created_at.to_rfc3339(), "2026-01-01T00:00:10+00:00");

    let seen = backend.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, Method::GET);
    assert_eq!(seen[0].query, "deviceId=rig-a");
    assert_eq!(seen[0].api_key.as_deref(), Some("secret"));
}

#[tokio::test]
async fn api_key_is_omitted_when_unset() {
    let backend = Backend::start().await;
    backend.reply_json("/api/thermo/sensors", json!(["K1"]));

    assert_ok!(backend.client(None).sensors("rig-a").await);
    assert_eq!(backend.seen()[0].api_key, None);
}

#[tokio::test]
async fn blank_latest_is_no_reading() {
    let backend = Backend::start().await;
    let client = backend.client(None);

    backend.reply("/api/thermo/latest", StatusCode::OK, "");
    assert!(assert_ok!(client.latest("rig-a").await).is_none());

    backend.reply_json("/api/thermo/latest", json!({}));
    assert!(assert_ok!(client.latest("rig-a").await).is_none());
}

#[tokio::test]
async fn history_drops_undecodable_rows_and_keeps_the_rest() {
    let backend = Backend::start().await;
    backend.reply_json(
        "/api/thermo/history",
        json!([
            row("K1", 40.0, "2026-01-01T00:00:00Z"),
            { "celsius": 41.0, "createdAt": null, "meta": { "sensor": "K1" } },
            { "celsius": 42.0, "meta": { "sensor": "K2" } },
            { "celsius": 43.0, "createdAt": "yesterday" },
            row("K2", 44.0, "2026-01-01T00:00:10Z"),
        ]),
    );

    let readings = assert_ok!(backend.client(None).history("rig-a", 500).await);
    let kept: Vec<Value> = readings.iter().map(|r| r.celsius.clone()).collect();
    assert_eq!(kept, vec![json!(40.0), json!(44.0)]);
    assert_eq!(backend.seen()[0].query, "deviceId=rig-a&limit=500");
}

#[tokio::test]
async fn history_body_that_is_not_a_window() {
    let backend = Backend::start().await;
    let client = backend.client(None);

    for blank in ["null", "{}"] {
        backend.reply("/api/thermo/history", StatusCode::OK, blank);
        let err = assert_err!(client.history("rig-a", 10).await);
        assert!(matches!(err, AppError::Empty(_)), "{blank}: {err}");
    }

    for shape in [json!({ "error": "busy" }), json!("oops"), json!(12)] {
        backend.reply_json("/api/thermo/history", shape.clone());
        let err = assert_err!(client.history("rig-a", 10).await);
        assert!(matches!(err, AppError::Decode(_)), "{shape}: {err}");
    }

    // An empty list is a valid, empty window
    backend.reply_json("/api/thermo/history", json!([]));
    assert!(assert_ok!(client.history("rig-a", 10).await).is_empty());
}

#[test]
fn window_with_only_bad_rows_decodes_to_nothing() {
    let readings = assert_ok!(decode_window(
        json!([{ "celsius": 1.0 }, { "createdAt": 7 }]),
        "/thermo/history",
    ));
    assert!(readings.is_empty());
}

#[tokio::test]
async fn sensors_accepts_bare_and_wrapped_lists() {
    let backend = Backend::start().await;
    let client = backend.client(None);

    backend.reply_json("/api/thermo/sensors", json!(["K1", "K5"]));
    assert_eq!(assert_ok!(client.sensors("rig-a").await), vec!["K1", "K5"]);

    backend.reply_json("/api/thermo/sensors", json!({ "sensors": ["K2"] }));
    assert_eq!(assert_ok!(client.sensors("rig-a").await), vec!["K2"]);

    backend.reply_json("/api/thermo/sensors", json!({}));
    let err = assert_err!(client.sensors("rig-a").await);
    assert!(matches!(err, AppError::Empty(_)));
}

#[tokio::test]
async fn relay_device_id_is_percent_encoded() {
    let backend = Backend::start().await;
    backend.reply_json(
        "/api/relay/rig%20a%2F1",
        json!({ "relays": { "R1": { "state": true }, "R2": { "state": false } } }),
    );

    let relays = assert_ok!(backend.client(None).relays("rig a/1").await);
    assert!(relays.is_on("R1"));
    assert!(!relays.is_on("R2"));
    assert_eq!(backend.seen()[0].path, "/api/relay/rig%20a%2F1");
}

#[tokio::test]
async fn relay_body_without_relays_is_empty() {
    let backend = Backend::start().await;
    let client = backend.client(None);

    backend.reply_json("/api/relay/rig-a", json!({ "deviceId": "rig-a" }));
    let err = assert_err!(client.relays("rig-a").await);
    assert!(matches!(err, AppError::Empty(_)));

    backend.reply_json("/api/relay/rig-a", json!({ "relays": null }));
    let err = assert_err!(client.relays("rig-a").await);
    assert!(matches!(err, AppError::Empty(_)));
}

#[tokio::test]
async fn error_status_carries_code_and_body() {
    let backend = Backend::start().await;
    backend.reply("/api/control", StatusCode::INTERNAL_SERVER_ERROR, "boom");

    let err = assert_err!(backend.client(None).control("rig-a").await);
    match err {
        AppError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("expected a status error, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_json_is_a_decode_error() {
    let backend = Backend::start().await;
    backend.reply("/api/thermo/summary", StatusCode::OK, "{not json");

    let err = assert_err!(backend.client(None).summary("rig-a", 600).await);
    assert!(matches!(err, AppError::Decode(_)));
    assert_eq!(backend.seen()[0].query, "deviceId=rig-a&windowSec=600");
}

#[tokio::test]
async fn control_with_no_known_fields_is_empty() {
    let backend = Backend::start().await;
    backend.reply_json("/api/control", json!({ "firmware": "1.2" }));

    let err = assert_err!(backend.client(None).control("rig-a").await);
    assert!(matches!(err, AppError::Empty(_)));
}

#[tokio::test]
async fn unreachable_backend_is_a_transport_error() {
    let client = client_for("http://127.0.0.1:9/api", None);

    let err = assert_err!(client.latest("rig-a").await);
    assert!(matches!(err, AppError::Transport(_)));
    assert!(err.is_backend());
}

#[tokio::test]
async fn writes_carry_device_and_payload() {
    let backend = Backend::start().await;
    backend.reply("/api/control", StatusCode::OK, "");
    backend.reply_json("/api/relay/set", json!({ "ok": true }));
    let client = backend.client(Some("secret"));

    assert_ok!(client.push_control("rig-a", &ControlConfig::default()).await);
    assert_ok!(
        client
            .set_relay(&RelayCommand {
                device_id: "rig-a".to_string(),
                relay: "R2".to_string(),
                state: true,
                hold_sec: Some(30),
            })
            .await
    );

    let seen = backend.seen();
    assert_eq!(seen[0].method, Method::PUT);
    assert_eq!(seen[0].path, "/api/control");
    let pushed: Value = serde_json::from_str(&seen[0].body).unwrap();
    assert_eq!(pushed["deviceId"], "rig-a");
    assert_eq!(pushed["sp1"], 45.0);
    assert_eq!(pushed["mode"], "auto");

    assert_eq!(seen[1].method, Method::POST);
    assert_eq!(seen[1].path, "/api/relay/set");
    let command: Value = serde_json::from_str(&seen[1].body).unwrap();
    assert_eq!(
        command,
        json!({ "deviceId": "rig-a", "relay": "R2", "state": true, "holdSec": 30 })
    );
    assert!(seen.iter().all(|s| s.api_key.as_deref() == Some("secret")));
}
