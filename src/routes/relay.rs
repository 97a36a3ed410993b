use axum::{Json, extract::State};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::common::AppState;
use crate::error::AppResult;
use crate::telemetry::models::RelayStatus;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    /// Relay id, e.g. `R1`
    pub relay: String,
    pub state: bool,
    /// Hold the manual state for this many seconds
    pub hold_sec: Option<u64>,
}

/// Fetch relay state again
#[utoipa::path(
    post,
    path = "/api/relay/refresh",
    responses(
        (status = 200, description = "Relay state", body = RelayStatus),
    ),
    tag = "relay"
)]
pub async fn refresh_relays(State(state): State<AppState>) -> Json<RelayStatus> {
    state.facade.refetch_relays().await;
    Json(state.facade.relays().await)
}

/// Switch a relay manually
///
/// Returns the relay state as re-read from the backend after the command.
#[utoipa::path(
    post,
    path = "/api/relay/set",
    request_body = RelayRequest,
    responses(
        (status = 200, description = "Relay command accepted", body = RelayStatus),
        (status = 400, description = "Blank relay id"),
        (status = 502, description = "Thermo backend error"),
    ),
    tag = "relay"
)]
pub async fn set_relay(
    State(state): State<AppState>,
    Json(body): Json<RelayRequest>,
) -> AppResult<Json<RelayStatus>> {
    let relays = state
        .facade
        .command_relay(&body.relay, body.state, body.hold_sec)
        .await?;
    Ok(Json(relays))
}
