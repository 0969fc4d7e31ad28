//! API response types.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::devices::battery::BatterySnapshot;
use crate::devices::solar::SolarSnapshot;
use crate::runner::EndpointStatuses;
use crate::sim::engine::EngineStatus;

/// `GET /health` body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"healthy"` while the process can answer.
    pub status: &'static str,
    pub timestamp: NaiveDateTime,
    /// Seconds since the API state was created.
    pub uptime_s: f64,
}

/// Process-level part of the status report.
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub is_running: bool,
    pub uptime_s: f64,
    pub timestamp: NaiveDateTime,
}

/// Engine part of the status report.
#[derive(Debug, Serialize)]
pub struct EngineStatuses {
    pub solar: EngineStatus,
    pub battery: EngineStatus,
}

/// `GET /api/status` body.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub server: ServerInfo,
    pub modbus: EndpointStatuses,
    pub engines: EngineStatuses,
}

/// One device's latest snapshot, stamped with the time it was served.
#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub timestamp: NaiveDateTime,
    pub data: T,
}

/// `GET /api/all/data` body. PV1 and PV2 carry the same shared snapshot.
#[derive(Debug, Serialize)]
pub struct AllDataResponse {
    pub timestamp: NaiveDateTime,
    pub pv1: SolarSnapshot,
    pub pv2: SolarSnapshot,
    pub battery: BatterySnapshot,
}

/// Error response body for 4xx errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
}
