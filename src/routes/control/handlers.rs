use axum::{Json, extract::State};

use crate::common::AppState;
use crate::error::{AppError, AppResult};
use crate::telemetry::models::ControlPatch;

use super::types::ControlResponse;

/// Current control parameters
#[utoipa::path(
    get,
    path = "/api/control",
    responses(
        (status = 200, description = "Control parameters", body = ControlResponse),
    ),
    tag = "control"
)]
pub async fn get_control(State(state): State<AppState>) -> Json<ControlResponse> {
    Json(ControlResponse {
        control: state.facade.control().await,
        pending: state.facade.control_pending().await,
    })
}

/// Edit control parameters locally
///
/// Only the fields present in the body change. Setpoint series follow
/// immediately; nothing reaches the device until `/api/control/apply`.
#[utoipa::path(
    put,
    path = "/api/control",
    request_body = ControlPatch,
    responses(
        (status = 200, description = "Control parameters updated", body = ControlResponse),
        (status = 400, description = "Empty patch"),
    ),
    tag = "control"
)]
pub async fn update_control(
    State(state): State<AppState>,
    Json(patch): Json<ControlPatch>,
) -> AppResult<Json<ControlResponse>> {
    if patch.is_empty() {
        return Err(AppError::BadRequest(
            "patch must set at least one field".to_string(),
        ));
    }

    let control = state.facade.update_control(&patch).await;
    Ok(Json(ControlResponse {
        control,
        pending: state.facade.control_pending().await,
    }))
}

/// Push control parameters to the device
#[utoipa::path(
    post,
    path = "/api/control/apply",
    responses(
        (status = 200, description = "Control parameters applied", body = ControlResponse),
        (status = 502, description = "Thermo backend error"),
    ),
    tag = "control"
)]
pub async fn apply_control(State(state): State<AppState>) -> AppResult<Json<ControlResponse>> {
    let control = state.facade.push_control().await?;
    Ok(Json(ControlResponse {
        control,
        pending: state.facade.control_pending().await,
    }))
}
