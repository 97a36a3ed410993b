use axum::{Json, extract::State};
use serde::Serialize;
use utoipa::ToSchema;

use crate::common::AppState;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub device_id: String,
    pub polling: bool,
    /// Base URL of the thermo backend being polled
    pub backend: String,
    pub poll_interval_ms: u64,
}

/// Health check endpoint
///
/// Returns 200 OK while the service is running, whether or not the
/// thermo backend is reachable. Per-target fetch status is in the snapshot.
#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    ),
    tag = "health"
)]
pub async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        device_id: state.facade.device_id().await,
        polling: state.facade.is_polling(),
        backend: state.config.api_base_url.clone(),
        poll_interval_ms: state.config.poll_interval_ms,
    })
}
