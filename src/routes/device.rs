use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::common::AppState;
use crate::error::AppResult;
use crate::sync::worker::{Target, TargetReport};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SwitchDeviceRequest {
    pub device_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceResponse {
    pub device_id: String,
    /// Bumped on every switch; results from older generations are discarded
    pub generation: u64,
}

/// Switch the dashboard to another device
///
/// Resets all per-device state and, if polling, restarts with a full fetch.
/// Switching to the current device is a no-op.
#[utoipa::path(
    put,
    path = "/api/device",
    request_body = SwitchDeviceRequest,
    responses(
        (status = 200, description = "Device selected", body = DeviceResponse),
        (status = 400, description = "Blank device id"),
    ),
    tag = "device"
)]
pub async fn switch_device(
    State(state): State<AppState>,
    Json(body): Json<SwitchDeviceRequest>,
) -> AppResult<Json<DeviceResponse>> {
    state.facade.switch_device(&body.device_id).await?;

    Ok(Json(DeviceResponse {
        device_id: state.facade.device_id().await,
        generation: state.facade.generation().await,
    }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshResponse {
    /// Per-target status keyed by target name
    #[schema(value_type = Object)]
    pub statuses: BTreeMap<Target, TargetReport>,
}

/// Fetch every target once for the current device
///
/// Targets already being fetched are skipped. Failures show up in the
/// returned per-target statuses, not as an error response.
#[utoipa::path(
    post,
    path = "/api/refresh",
    responses(
        (status = 200, description = "Per-target status after the refresh", body = RefreshResponse),
    ),
    tag = "device"
)]
pub async fn refresh(State(state): State<AppState>) -> Json<RefreshResponse> {
    state.facade.refresh_all().await;
    Json(RefreshResponse {
        statuses: state.facade.statuses().await,
    })
}
