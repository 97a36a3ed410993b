use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use thermo_dash::common::AppState;
use thermo_dash::config::Config;
use thermo_dash::facade::Facade;
use thermo_dash::routes;
use thermo_dash::services::preferences::JsonFileStore;
use thermo_dash::telemetry::ThermoClient;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,thermo_dash=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting thermo-dash...");

    // Load configuration (fail-fast)
    let config = Config::from_env()?;
    tracing::info!(
        api_base = %config.api_base_url,
        device_id = %config.device_id,
        poll_interval_ms = config.poll_interval_ms,
        host = %config.api_host,
        port = config.api_port,
        "Configuration loaded"
    );

    let client = ThermoClient::new(&config)?;
    tracing::info!("Thermo client initialized");

    let store = JsonFileStore::open(&config.preferences_path);
    let facade = Facade::new(&config, client, Arc::new(store));

    let state = AppState::new(config.clone(), facade);

    // First fan-out fires immediately, then every poll interval
    state.facade.start().await;

    let app = routes::build_router(state.clone());

    // Start server with graceful shutdown
    let addr = config.bind_address();
    tracing::info!(address = %addr, "Starting server");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.facade.stop();
    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        },
    }
}
