use serde::Serialize;
use utoipa::ToSchema;

use crate::telemetry::models::ControlConfig;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControlResponse {
    pub control: ControlConfig,
    /// Local edits not yet pushed to the device
    pub pending: bool,
}
