//! Read-only REST API over the live simulation.
//!
//! Provides these GET endpoints:
//! - `/health`: liveness and uptime
//! - `/api/status`: endpoint and engine status
//! - `/api/pv1/data`, `/api/pv2/data`: the shared solar snapshot
//! - `/api/battery/data`: the battery snapshot
//! - `/api/all/data`: every snapshot at once
//! - `/api/config`: the configuration in effect

mod handlers;
pub mod types;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::get;
use tracing::info;

use crate::config::SimulatorConfig;
use crate::runner::{EndpointMonitors, Simulator};
use crate::sim::clock::Clock;
use crate::sim::engine::{BatteryEngine, SolarEngine};

/// Application state shared across all request handlers.
///
/// Holds `Arc` handles onto the running engines, so every request reads the
/// latest snapshot without touching the endpoints' tables.
pub struct AppState {
    pub config: SimulatorConfig,
    pub solar: Arc<SolarEngine>,
    pub battery: Arc<BatteryEngine>,
    pub monitors: EndpointMonitors,
    pub clock: Arc<dyn Clock>,
    pub started: Instant,
}

impl AppState {
    /// Captures handles from a running simulator.
    pub fn from_simulator(simulator: &Simulator) -> Self {
        let context = simulator.context();
        Self {
            config: simulator.config().clone(),
            solar: Arc::clone(&context.solar),
            battery: Arc::clone(&context.battery),
            monitors: simulator.monitors(),
            clock: Arc::clone(&context.clock),
            started: Instant::now(),
        }
    }
}

/// Builds the axum router with all API routes.
///
/// # Arguments
///
/// * `state` - Shared application state
///
/// # Returns
///
/// Configured `Router` ready to serve.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/status", get(handlers::status))
        .route("/api/pv1/data", get(handlers::solar_data))
        .route("/api/pv2/data", get(handlers::solar_data))
        .route("/api/battery/data", get(handlers::battery_data))
        .route("/api/all/data", get(handlers::all_data))
        .route("/api/config", get(handlers::config))
        .fallback(handlers::not_found)
        .with_state(state)
}

/// Binds to `addr` and serves the API until `shutdown` resolves.
///
/// # Arguments
///
/// * `state` - Shared application state
/// * `addr` - Socket address to bind to
/// * `shutdown` - Resolves when the server should stop accepting requests
///
/// # Errors
///
/// Returns the I/O error if the listener cannot bind or the server fails.
pub async fn serve(
    state: Arc<AppState>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
