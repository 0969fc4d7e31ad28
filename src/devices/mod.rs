//! Device models stepped by the simulation engines.

/// Randomised battery alarm generator.
pub mod alarm;
/// Battery rack, PCS, and peak-shaving model.
pub mod battery;
/// Site demand profile for the battery's controller.
pub mod load_profile;
/// PV array and inverter model.
pub mod solar;
pub mod types;

// Re-export the main types for convenience
pub use alarm::{AlarmKind, AlarmState, AlarmTransition, ProtectionFlags};
pub use battery::{BatteryModel, BatterySnapshot, BatterySummary};
pub use load_profile::LoadProfile;
pub use solar::{SolarModel, SolarSnapshot, SolarSummary};
pub use types::{Model, Tick};
