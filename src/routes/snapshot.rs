use axum::{Json, extract::State};

use crate::common::AppState;
use crate::facade::ReadModel;

/// Full read model for the current device
///
/// Statuses, latest reading, catalog, visibility, series, latest values,
/// control parameters, relays, reported sensors and summary, all taken
/// from the same consistent state.
#[utoipa::path(
    get,
    path = "/api/snapshot",
    responses(
        (status = 200, description = "Read model retrieved", body = ReadModel),
    ),
    tag = "read-model"
)]
pub async fn get_snapshot(State(state): State<AppState>) -> Json<ReadModel> {
    Json(state.facade.read_model().await)
}
