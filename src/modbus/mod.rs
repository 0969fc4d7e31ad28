//! Modbus TCP slave: register storage, wire codec, request dispatch, and the
//! TCP endpoint that ties them to a register publisher.

pub mod codec;
pub mod dispatch;
pub mod endpoint;
pub mod table;

pub use endpoint::{EndpointConfig, EndpointMonitor, EndpointStatus, ModbusEndpoint};
pub use table::{RegisterTable, SharedTable, TABLE_SIZE};
