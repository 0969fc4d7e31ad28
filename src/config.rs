//! TOML-based simulator configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use crate::error::ConfigError;

/// Top-level simulator configuration parsed from TOML.
///
/// Every section and field has a default, so an empty file is a valid
/// configuration. Load with [`SimulatorConfig::from_toml_file`] or use
/// [`SimulatorConfig::defaults`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulatorConfig {
    /// Modbus listeners.
    pub servers: ServersConfig,
    /// PV array parameters.
    pub solar: SolarConfig,
    /// Inverter and grid-side parameters.
    pub inverter: InverterConfig,
    /// Battery rack and PCS parameters.
    pub battery: BatteryConfig,
    /// Peak-shaving controller parameters.
    pub peak_shaving: PeakShavingConfig,
    /// Randomised alarm generator timing.
    pub alarms: AlarmConfig,
    /// Tick period and random seed.
    pub simulation: SimulationConfig,
}

/// The three Modbus listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServersConfig {
    /// First PV inverter.
    pub pv1: ServerConfig,
    /// Second PV inverter.
    pub pv2: ServerConfig,
    /// Battery rack.
    pub battery: ServerConfig,
}

impl Default for ServersConfig {
    fn default() -> Self {
        Self {
            pv1: ServerConfig::on_port(10502),
            pv2: ServerConfig::on_port(10503),
            battery: ServerConfig::on_port(10504),
        }
    }
}

/// One Modbus TCP listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// TCP port; 0 asks the OS for an ephemeral port.
    pub port: u16,
}

impl ServerConfig {
    /// Listener on all interfaces at `port`.
    pub fn on_port(port: u16) -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::on_port(0)
    }
}

/// PV array parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolarConfig {
    /// Rated DC input power (W).
    pub max_power_w: f64,
    /// Nominal string voltage at 25 °C (V).
    pub nominal_voltage_v: f64,
    /// Active MPPT channels out of 24.
    pub mppt_channels: usize,
}

impl Default for SolarConfig {
    fn default() -> Self {
        Self {
            max_power_w: 50_000.0,
            nominal_voltage_v: 600.0,
            mppt_channels: 7,
        }
    }
}

/// Inverter and grid-side parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InverterConfig {
    /// Peak conversion efficiency before derating (0.0–1.0).
    pub base_efficiency: f64,
    /// Nominal grid line voltage (V).
    pub grid_voltage_v: f64,
    /// Nominal grid frequency (Hz).
    pub grid_frequency_hz: f64,
}

impl Default for InverterConfig {
    fn default() -> Self {
        Self {
            base_efficiency: 0.96,
            grid_voltage_v: 240.0,
            grid_frequency_hz: 50.0,
        }
    }
}

/// Battery rack and PCS parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatteryConfig {
    /// Usable energy (kWh).
    pub capacity_kwh: f64,
    /// PCS rating (kW).
    pub pcs_capacity_kw: f64,
    /// Rack voltage before the first tick (V).
    pub nominal_voltage_v: f64,
    /// Modules in the rack.
    pub modules_per_rack: usize,
    /// Cells per module.
    pub cells_per_module: usize,
    /// Starting state of charge (%).
    pub initial_soc_pct: f64,
    /// Starting state of health (%).
    pub initial_soh_pct: f64,
    /// Cell voltage floor (V).
    pub cell_min_voltage_v: f64,
    /// Cell voltage ceiling (V).
    pub cell_max_voltage_v: f64,
    /// Cell temperature floor (°C).
    pub cell_min_temperature_c: f64,
    /// Cell temperature ceiling (°C).
    pub cell_max_temperature_c: f64,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            capacity_kwh: 200.0,
            pcs_capacity_kw: 100.0,
            nominal_voltage_v: 400.0,
            modules_per_rack: 17,
            cells_per_module: 8,
            initial_soc_pct: 50.0,
            initial_soh_pct: 95.0,
            cell_min_voltage_v: 3.0,
            cell_max_voltage_v: 4.2,
            cell_min_temperature_c: -20.0,
            cell_max_temperature_c: 60.0,
        }
    }
}

impl BatteryConfig {
    /// Cells in the rack.
    pub fn total_cells(&self) -> usize {
        self.modules_per_rack * self.cells_per_module
    }
}

/// Peak-shaving controller parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PeakShavingConfig {
    /// Controller on at start-up.
    pub enabled: bool,
    /// Load above which the rack discharges (kW).
    pub threshold_kw: f64,
    /// Discharge power while shaving (kW).
    pub shaving_power_kw: f64,
    /// SOC that must be exceeded before discharging (%).
    pub reserve_soc_pct: f64,
    /// Charge power as a fraction of PCS capacity.
    pub charge_fraction: f64,
}

impl Default for PeakShavingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_kw: 60.0,
            shaving_power_kw: 40.0,
            reserve_soc_pct: 20.0,
            charge_fraction: 0.2,
        }
    }
}

/// Randomised alarm generator timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlarmConfig {
    /// Generate alarms automatically.
    pub enabled: bool,
    /// Minimum time between automatic alarms (ms).
    pub trigger_interval_ms: u64,
    /// How long an alarm stays active (ms).
    pub duration_ms: u64,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger_interval_ms: 120_000,
            duration_ms: 10_000,
        }
    }
}

/// Tick period and random seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Engine tick and register publish period (ms).
    pub tick_ms: u64,
    /// Master random seed; entropy when absent.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            seed: None,
        }
    }
}

impl SimulationConfig {
    /// Tick period as a [`Duration`].
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl SimulatorConfig {
    /// Returns the built-in configuration.
    pub fn defaults() -> Self {
        Self::default()
    }

    /// Parses a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::new("config", format!("cannot read \"{}\": {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::new("toml", e.to_string()))
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        let servers = [
            ("servers.pv1.port", self.servers.pv1.port),
            ("servers.pv2.port", self.servers.pv2.port),
            ("servers.battery.port", self.servers.battery.port),
        ];
        for (i, (field, port)) in servers.iter().enumerate() {
            if servers[..i].iter().any(|(_, other)| *port != 0 && other == port) {
                errors.push(ConfigError::new(*field, format!("port {port} is already in use by another server")));
            }
        }

        let sol = &self.solar;
        if sol.max_power_w <= 0.0 {
            errors.push(ConfigError::new("solar.max_power_w", "must be > 0"));
        }
        if sol.nominal_voltage_v <= 0.0 {
            errors.push(ConfigError::new("solar.nominal_voltage_v", "must be > 0"));
        }
        if !(1..=crate::devices::solar::MPPT_SLOTS).contains(&sol.mppt_channels) {
            errors.push(ConfigError::new("solar.mppt_channels", "must be in [1, 24]"));
        }

        let inv = &self.inverter;
        if !(inv.base_efficiency > 0.0 && inv.base_efficiency <= 1.0) {
            errors.push(ConfigError::new("inverter.base_efficiency", "must be in (0.0, 1.0]"));
        }
        if inv.grid_voltage_v <= 0.0 {
            errors.push(ConfigError::new("inverter.grid_voltage_v", "must be > 0"));
        }

        let bat = &self.battery;
        if bat.capacity_kwh <= 0.0 {
            errors.push(ConfigError::new("battery.capacity_kwh", "must be > 0"));
        }
        if bat.pcs_capacity_kw <= 0.0 {
            errors.push(ConfigError::new("battery.pcs_capacity_kw", "must be > 0"));
        }
        if bat.total_cells() == 0 {
            errors.push(ConfigError::new("battery.cells_per_module", "rack must contain at least one cell"));
        }
        if !(0.0..=100.0).contains(&bat.initial_soc_pct) {
            errors.push(ConfigError::new("battery.initial_soc_pct", "must be in [0, 100]"));
        }
        if !(0.0..=100.0).contains(&bat.initial_soh_pct) {
            errors.push(ConfigError::new("battery.initial_soh_pct", "must be in [0, 100]"));
        }
        if bat.cell_min_voltage_v >= bat.cell_max_voltage_v {
            errors.push(ConfigError::new("battery.cell_min_voltage_v", "must be < battery.cell_max_voltage_v"));
        }
        if bat.cell_min_temperature_c >= bat.cell_max_temperature_c {
            errors.push(ConfigError::new(
                "battery.cell_min_temperature_c",
                "must be < battery.cell_max_temperature_c",
            ));
        }

        let ps = &self.peak_shaving;
        if ps.threshold_kw < 0.0 {
            errors.push(ConfigError::new("peak_shaving.threshold_kw", "must be >= 0"));
        }
        if ps.shaving_power_kw < 0.0 {
            errors.push(ConfigError::new("peak_shaving.shaving_power_kw", "must be >= 0"));
        }
        if !(0.0..=100.0).contains(&ps.reserve_soc_pct) {
            errors.push(ConfigError::new("peak_shaving.reserve_soc_pct", "must be in [0, 100]"));
        }
        if !(0.0..=1.0).contains(&ps.charge_fraction) {
            errors.push(ConfigError::new("peak_shaving.charge_fraction", "must be in [0.0, 1.0]"));
        }

        if self.alarms.trigger_interval_ms == 0 {
            errors.push(ConfigError::new("alarms.trigger_interval_ms", "must be > 0"));
        }
        if self.alarms.duration_ms == 0 {
            errors.push(ConfigError::new("alarms.duration_ms", "must be > 0"));
        }
        if self.simulation.tick_ms == 0 {
            errors.push(ConfigError::new("simulation.tick_ms", "must be > 0"));
        }

        errors
    }
}
