//! Request handlers for the API endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, Uri};

use super::AppState;
use super::types::{
    AllDataResponse, DataResponse, EngineStatuses, ErrorResponse, HealthResponse, ServerInfo,
    StatusResponse,
};
use crate::config::SimulatorConfig;
use crate::devices::battery::BatterySnapshot;
use crate::devices::solar::SolarSnapshot;

/// `GET /health` → 200 + `HealthResponse` JSON
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: state.clock.now(),
        uptime_s: state.started.elapsed().as_secs_f64(),
    })
}

/// Reports every endpoint's `{running, port, connections}` and both engines'
/// tick counters.
///
/// `GET /api/status` → 200 + `StatusResponse` JSON
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let modbus = state.monitors.statuses();
    let is_running = modbus.pv1.running && modbus.pv2.running && modbus.battery.running;
    Json(StatusResponse {
        server: ServerInfo {
            is_running,
            uptime_s: state.started.elapsed().as_secs_f64(),
            timestamp: state.clock.now(),
        },
        modbus,
        engines: EngineStatuses {
            solar: state.solar.status(),
            battery: state.battery.status(),
        },
    })
}

/// Serves both `/api/pv1/data` and `/api/pv2/data`; the two inverters share
/// one solar engine.
pub async fn solar_data(State(state): State<Arc<AppState>>) -> Json<DataResponse<SolarSnapshot>> {
    Json(DataResponse {
        timestamp: state.clock.now(),
        data: state.solar.snapshot(),
    })
}

/// `GET /api/battery/data` → 200 + battery snapshot
pub async fn battery_data(
    State(state): State<Arc<AppState>>,
) -> Json<DataResponse<BatterySnapshot>> {
    Json(DataResponse {
        timestamp: state.clock.now(),
        data: state.battery.snapshot(),
    })
}

/// `GET /api/all/data` → 200 + `AllDataResponse` JSON
pub async fn all_data(State(state): State<Arc<AppState>>) -> Json<AllDataResponse> {
    let solar = state.solar.snapshot();
    Json(AllDataResponse {
        timestamp: state.clock.now(),
        pv1: solar.clone(),
        pv2: solar,
        battery: state.battery.snapshot(),
    })
}

/// `GET /api/config` → 200 + the configuration in effect
pub async fn config(State(state): State<Arc<AppState>>) -> Json<SimulatorConfig> {
    Json(state.config.clone())
}

/// Any other path → 404 + `ErrorResponse`
pub async fn not_found(uri: Uri) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("no route for {}", uri.path()),
        }),
    )
}
