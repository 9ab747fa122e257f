//! Room Controller
//!
//! Coordination service for Huddle rooms, groups and recording uploads.
//!
//! # Servers
//!
//! - HTTP server for health, status and metrics (default: 0.0.0.0:8090)
//!
//! Client connections reach the controller through
//! [`ControllerHandle::open_session`] from the transport layer that embeds
//! this crate.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment and install tracing
//! 2. Initialize Prometheus metrics recorder
//! 3. Start the event bus and the upload observer
//! 4. Initialize actor system (`ControllerHandle`)
//! 5. Start health HTTP server (liveness, readiness, status, metrics)
//! 6. Wait for shutdown signal, then drain sessions and rooms

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use room_controller::actors::{ActorMetrics, ControllerHandle};
use room_controller::bus::EventBus;
use room_controller::config::Config;
use room_controller::observability::{
    health_router, init_metrics_recorder, status_router, HealthState, StatusState,
    UploadObserver,
};
use room_controller::services::Services;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long the bus dispatcher gets to stop after the actors are drained.
const BUS_STOP_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();
    let log_json = config.as_ref().is_ok_and(|c| c.log_json);

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "room_controller=debug,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(filter)
        .with(log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!log_json).then(tracing_subscriber::fmt::layer))
        .init();

    info!("Starting Room Controller");

    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        health_bind_address = %config.health_bind_address,
        max_rooms = config.max_rooms,
        max_sessions = config.max_sessions,
        max_chunk_bytes = config.max_chunk_bytes,
        shutdown_deadline_secs = config.shutdown_deadline.as_secs(),
        status_guarded = config.admin_token.is_some(),
        "Configuration loaded successfully"
    );

    // This must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new());

    let bus_token = CancellationToken::new();
    let (bus, bus_task) = EventBus::spawn(bus_token.clone());
    let upload_observer = UploadObserver::attach(&bus);

    info!("Initializing actor system...");
    let controller =
        ControllerHandle::spawn(&config, bus.clone(), Services::in_memory(), ActorMetrics::new());
    info!("Actor system initialized");

    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );

    let app = health_router(Arc::clone(&health_state))
        .merge(status_router(StatusState {
            controller: controller.clone(),
            uploads: upload_observer.stats(),
            admin_token: config.admin_token.clone().map(Arc::new),
        }))
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http());

    // Bind listener BEFORE spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let server_token = CancellationToken::new();
    let health_shutdown_token = server_token.clone();
    let server_task = tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    health_state.set_ready();
    info!("Room Controller running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so traffic stops arriving
    health_state.set_not_ready();

    if let Err(e) = controller.shutdown(config.shutdown_deadline).await {
        warn!(error = %e, "Actor system shutdown error");
    }
    controller.cancel();

    upload_observer.detach();
    bus_token.cancel();
    if tokio::time::timeout(BUS_STOP_TIMEOUT, bus_task).await.is_err() {
        warn!("Event bus did not stop in time");
    }

    server_token.cancel();
    if let Err(e) = server_task.await {
        warn!(error = %e, "Health server task ended abnormally");
    }

    info!("Room Controller shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. Without them the service
/// cannot shut down gracefully.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
