use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::common::AppState;
use crate::error::AppResult;

#[derive(Debug, Deserialize, ToSchema)]
pub struct VisibilityRequest {
    pub visible: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VisibilityResponse {
    pub sensor: String,
    pub visible: bool,
}

/// Show or hide a sensor
///
/// The choice is remembered per device and survives restarts.
#[utoipa::path(
    put,
    path = "/api/visibility/{sensor}",
    params(
        ("sensor" = String, Path, description = "Sensor id from the catalog"),
    ),
    request_body = VisibilityRequest,
    responses(
        (status = 200, description = "Visibility updated", body = VisibilityResponse),
        (status = 404, description = "Sensor not in catalog"),
    ),
    tag = "visibility"
)]
pub async fn set_visibility(
    State(state): State<AppState>,
    Path(sensor): Path<String>,
    Json(body): Json<VisibilityRequest>,
) -> AppResult<Json<VisibilityResponse>> {
    state.facade.set_visibility(&sensor, body.visible).await?;
    Ok(Json(VisibilityResponse {
        sensor,
        visible: body.visible,
    }))
}

/// Flip a sensor's visibility
#[utoipa::path(
    post,
    path = "/api/visibility/{sensor}/toggle",
    params(
        ("sensor" = String, Path, description = "Sensor id from the catalog"),
    ),
    responses(
        (status = 200, description = "Visibility toggled", body = VisibilityResponse),
        (status = 404, description = "Sensor not in catalog"),
    ),
    tag = "visibility"
)]
pub async fn toggle_visibility(
    State(state): State<AppState>,
    Path(sensor): Path<String>,
) -> AppResult<Json<VisibilityResponse>> {
    let visible = state.facade.toggle_visibility(&sensor).await?;
    Ok(Json(VisibilityResponse { sensor, visible }))
}
