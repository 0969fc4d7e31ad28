/// Wall-clock and manual time sources.
pub mod clock;
/// Shared engines built from configuration.
pub mod context;
pub mod engine;

pub use clock::{Clock, ManualClock, WallClock};
pub use context::SimulationContext;
pub use engine::{BatteryEngine, Engine, EngineStatus, SolarEngine};
