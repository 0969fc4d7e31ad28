//! Modbus TCP simulator for a small solar-plus-storage site: two PV
//! inverters sharing one solar model and a battery rack with peak shaving
//! and randomised alarms.

/// REST API over the live snapshots.
#[cfg(feature = "api")]
pub mod api;
pub mod cli;
pub mod config;
pub mod devices;
pub mod error;
pub mod logging;
pub mod modbus;
/// Register maps and snapshot publishers.
pub mod registers;
pub mod runner;
/// Clocks, engines, and the shared simulation context.
pub mod sim;
