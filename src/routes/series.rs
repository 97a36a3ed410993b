use axum::{
    Json,
    body::Body,
    extract::{Query, State},
    http::header::{self, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use utoipa::{IntoParams, ToSchema};

use crate::common::AppState;
use crate::error::{AppError, AppResult};
use crate::pipeline::pivot::SeriesPoint;
use crate::pipeline::visibility::visible_sensors;

fn default_format() -> String {
    "json".to_string()
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SeriesQuery {
    /// Response format: json (default), ndjson, csv
    #[serde(default = "default_format")]
    pub format: String,
    /// Drop hidden sensors from each point (derived fields are kept)
    #[serde(default)]
    pub visible_only: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeriesResponse {
    pub device_id: String,
    /// Sensor columns present in `points`, `default` last
    pub sensors: Vec<String>,
    /// Derived columns (groups, then setpoints)
    pub derived: Vec<String>,
    pub points: Vec<SeriesPoint>,
}

fn determine_format(query_format: &str, headers: &HeaderMap) -> AppResult<&'static str> {
    // Query parameter takes precedence
    match query_format.to_lowercase().as_str() {
        "json" => {}
        "csv" => return Ok("csv"),
        "ndjson" => return Ok("ndjson"),
        other => {
            return Err(AppError::BadRequest(format!(
                "unsupported format '{other}', expected json, csv or ndjson"
            )));
        }
    }

    if let Some(accept) = headers.get(header::ACCEPT)
        && let Ok(accept_str) = accept.to_str()
    {
        if accept_str.contains("application/x-ndjson") {
            return Ok("ndjson");
        }
        if accept_str.contains("text/csv") {
            return Ok("csv");
        }
    }

    Ok("json")
}

/// Derived column names in first-seen order across the series.
fn derived_columns(points: &[SeriesPoint]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for point in points {
        for name in point.derived.keys() {
            if !columns.contains(name) {
                columns.push(name.clone());
            }
        }
    }
    columns
}

fn csv_row(fields: &[String]) -> Result<String, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn format_value(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn build_csv_response(series: SeriesResponse) -> AppResult<Response> {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<String, std::io::Error>>(100);

    tokio::spawn(async move {
        let mut header_fields = vec!["timestamp".to_string()];
        header_fields.extend(series.sensors.iter().cloned());
        header_fields.extend(series.derived.iter().cloned());

        let header = csv_row(&header_fields).map_err(std::io::Error::other);
        if tx.send(header).await.is_err() {
            return;
        }

        for point in &series.points {
            let mut fields = vec![point.timestamp.to_rfc3339()];
            fields.extend(
                series
                    .sensors
                    .iter()
                    .map(|s| format_value(point.values.get(s).copied().flatten())),
            );
            fields.extend(
                series
                    .derived
                    .iter()
                    .map(|d| format_value(point.derived.get(d).copied().flatten())),
            );

            let row = csv_row(&fields).map_err(std::io::Error::other);
            if tx.send(row).await.is_err() {
                break;
            }
        }
    });

    Response::builder()
        .header(header::CONTENT_TYPE, HeaderValue::from_static("text/csv"))
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .map_err(|e| AppError::Internal(e.to_string()))
}

fn build_ndjson_response(series: SeriesResponse) -> AppResult<Response> {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<String, std::io::Error>>(100);

    tokio::spawn(async move {
        for point in &series.points {
            let line = serde_json::to_string(point)
                .map(|mut line| {
                    line.push('\n');
                    line
                })
                .map_err(std::io::Error::other);
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });

    Response::builder()
        .header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-ndjson"),
        )
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// Chart-ready series for the current device
///
/// One point per distinct timestamp, ascending. Every point carries every
/// catalog sensor (null where the sensor did not report) plus the derived
/// process values and setpoints. Supports JSON, CSV, and NDJSON formats.
#[utoipa::path(
    get,
    path = "/api/series",
    params(SeriesQuery),
    responses(
        (status = 200, description = "Series retrieved successfully", body = SeriesResponse),
        (status = 400, description = "Unsupported format"),
    ),
    tag = "read-model"
)]
pub async fn get_series(
    State(state): State<AppState>,
    Query(query): Query<SeriesQuery>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let format = determine_format(&query.format, &headers)?;

    let model = state.facade.read_model().await;
    let (sensors, points): (Vec<String>, Vec<SeriesPoint>) = if query.visible_only {
        let shown = visible_sensors(&model.catalog, &model.visibility);
        let points = model.series.iter().map(|p| p.restricted_to(&shown)).collect();
        (shown.into_iter().map(str::to_string).collect(), points)
    } else {
        (model.catalog.clone(), model.series)
    };

    let series = SeriesResponse {
        device_id: model.device_id,
        derived: derived_columns(&points),
        sensors,
        points,
    };

    tracing::debug!(
        format,
        points = series.points.len(),
        sensors = series.sensors.len(),
        "Serving series"
    );

    match format {
        "csv" => build_csv_response(series),
        "ndjson" => build_ndjson_response(series),
        _ => Ok(Json(series).into_response()),
    }
}
