pub mod control;
pub mod device;
pub mod health;
pub mod relay;
pub mod series;
pub mod snapshot;
pub mod visibility;

use axum::{
    BoxError, Router,
    error_handling::HandleErrorLayer,
    routing::{get, post, put},
};
use tower::ServiceBuilder;
use tower::timeout::error::Elapsed;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::common::AppState;
use crate::error::AppError;

#[derive(OpenApi)]
#[openapi(
    paths(
        health::healthz,
        snapshot::get_snapshot,
        series::get_series,
        device::switch_device,
        device::refresh,
        visibility::set_visibility,
        visibility::toggle_visibility,
        control::get_control,
        control::update_control,
        control::apply_control,
        relay::refresh_relays,
        relay::set_relay,
    ),
    components(
        schemas(
            health::HealthResponse,
            crate::facade::ReadModel,
            series::SeriesResponse,
            device::SwitchDeviceRequest,
            device::DeviceResponse,
            device::RefreshResponse,
            visibility::VisibilityRequest,
            visibility::VisibilityResponse,
            control::ControlResponse,
            relay::RelayRequest,
            crate::telemetry::models::ControlPatch,
            crate::telemetry::models::RelayStatus,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "read-model", description = "Reconstructed dashboard state"),
        (name = "device", description = "Device selection and refresh"),
        (name = "visibility", description = "Per-sensor chart visibility"),
        (name = "control", description = "Supervisory control parameters"),
        (name = "relay", description = "Relay state and manual commands"),
    ),
    info(
        title = "Thermo Dash API",
        description = "Telemetry aggregation and time-series reconstruction for a thermal-control rig",
        version = "0.1.0"
    )
)]
struct ApiDoc;

async fn handle_middleware_error(err: BoxError) -> AppError {
    if err.is::<Elapsed>() {
        AppError::Timeout("read-model API".to_string())
    } else {
        AppError::Internal(format!("Unhandled middleware error: {err}"))
    }
}

pub fn build_router(state: AppState) -> Router {
    let api_timeout = state.config.api_timeout();
    let api_routes = Router::new()
        .route("/snapshot", get(snapshot::get_snapshot))
        .route("/series", get(series::get_series))
        .route("/device", put(device::switch_device))
        .route("/refresh", post(device::refresh))
        .route("/visibility/{sensor}", put(visibility::set_visibility))
        .route(
            "/visibility/{sensor}/toggle",
            post(visibility::toggle_visibility),
        )
        .route(
            "/control",
            get(control::get_control).put(control::update_control),
        )
        .route("/control/apply", post(control::apply_control))
        .route("/relay/refresh", post(relay::refresh_relays))
        .route("/relay/set", post(relay::set_relay))
        .layer(RequestBodyLimitLayer::new(64 * 1024))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .timeout(api_timeout),
        );

    let health_routes = Router::new().route("/healthz", get(health::healthz));

    // OpenAPI documentation
    let docs_routes = Router::new().merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .merge(docs_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(CompressionLayer::new()),
        )
        .with_state(state)
}
