use chrono::{NaiveDateTime, Timelike};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::Serialize;

use crate::config::{AlarmConfig, BatteryConfig, PeakShavingConfig};
use crate::devices::alarm::{AlarmKind, AlarmMachine, AlarmState, AlarmTransition, ProtectionFlags};
use crate::devices::load_profile::LoadProfile;
use crate::devices::types::{Model, Tick, uniform_noise};

/// Cell voltage before the first step (V).
const CELL_NOMINAL_VOLTAGE: f64 = 3.7;
/// Cell and rack temperature before the first step (°C).
const CELL_NOMINAL_TEMPERATURE: f64 = 25.0;
/// SOH never decays below this (%).
const SOH_FLOOR: f64 = 80.0;
/// Per-step probability of a SOH decay step.
const SOH_DECAY_PROBABILITY: f64 = 0.001;
const SOH_DECAY_STEP: f64 = 0.01;
/// Rack mode register value for "online".
const RACK_MODE_ONLINE: u16 = 3;
/// SOC ceiling for opportunistic charging (%).
const CHARGE_SOC_CEILING: f64 = 80.0;
/// Fraction of the threshold below which load counts as low.
const LOW_LOAD_BAND: f64 = 0.8;

/// Branch taken by the peak-shaving controller on a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeakShavingMode {
    /// Controller switched off; rack idle.
    Disabled,
    /// Load above threshold and SOC above reserve; rack discharging.
    Discharging,
    /// Load comfortably below threshold and SOC below 80 %; rack charging.
    Charging,
    /// Neither condition met; rack idle.
    Idle,
}

/// Decides the rack power for one step.
///
/// # Power Convention
/// - Positive: discharging (rack supplies the load)
/// - Negative: charging (rack draws from the grid)
///
/// # Arguments
///
/// * `load_kw` - Site load (sign ignored)
/// * `soc_pct` - Current state of charge
/// * `params` - Threshold, shave power, reserve, and charge fraction
/// * `pcs_capacity_kw` - PCS rating, caps both directions
///
/// # Returns
///
/// The branch taken and the rack power in kW.
pub fn peak_shaving(
    load_kw: f64,
    soc_pct: f64,
    params: &PeakShavingConfig,
    pcs_capacity_kw: f64,
) -> (PeakShavingMode, f64) {
    if !params.enabled {
        return (PeakShavingMode::Disabled, 0.0);
    }

    let demand = load_kw.abs();
    if demand > params.threshold_kw && soc_pct > params.reserve_soc_pct {
        let available = params.shaving_power_kw.min(pcs_capacity_kw);
        let soc_limited = soc_pct / 100.0 * pcs_capacity_kw;
        (PeakShavingMode::Discharging, available.min(soc_limited))
    } else if demand < params.threshold_kw * LOW_LOAD_BAND && soc_pct < CHARGE_SOC_CEILING {
        (
            PeakShavingMode::Charging,
            -(pcs_capacity_kw * params.charge_fraction),
        )
    } else {
        (PeakShavingMode::Idle, 0.0)
    }
}

/// Order statistics over one cell quantity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CellStats {
    pub max: f64,
    pub second_max: f64,
    pub average: f64,
    pub second_min: f64,
    pub min: f64,
}

impl CellStats {
    /// Computes the statistics; with one cell every field equals that cell.
    pub fn from_cells(cells: &[f64]) -> Self {
        if cells.is_empty() {
            return Self::default();
        }
        let mut sorted = cells.to_vec();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        let (first, last) = (sorted[0], sorted[n - 1]);
        Self {
            max: last,
            second_max: if n > 1 { sorted[n - 2] } else { last },
            average: sorted.iter().sum::<f64>() / n as f64,
            second_min: if n > 1 { sorted[1] } else { first },
            min: first,
        }
    }
}

/// Peak-shaving controller settings and the branch last taken.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PeakShavingStatus {
    pub enabled: bool,
    pub mode: PeakShavingMode,
    pub threshold_kw: f64,
    pub shaving_power_kw: f64,
    pub reserve_soc_pct: f64,
}

/// Rack, grid, PCS, and alarm telemetry at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatterySnapshot {
    /// Local time of the last data step.
    pub timestamp: NaiveDateTime,
    /// Seconds since the model was created.
    pub uptime_s: u64,
    /// 1 normal, 2 warning.
    pub system_status: u16,
    /// 1 normal, 2 low SOC, 3 high SOC.
    pub battery_status: u16,
    /// 1 normal, 2 rack over-temperature, 3 PCS over-temperature.
    pub pcs_status: u16,
    pub rack_mode: u16,
    pub soc_pct: f64,
    pub soh_pct: f64,
    pub rack_voltage_v: f64,
    pub rack_current_a: f64,
    /// Positive while discharging.
    pub rack_power_kw: f64,
    pub rack_temperature_c: f64,
    pub cell_voltage: CellStats,
    pub cell_temperature: CellStats,
    pub cell_voltages_v: Vec<f64>,
    pub cell_temperatures_c: Vec<f64>,
    /// Site load; never positive.
    pub load_power_kw: f64,
    pub grid_voltage_v: [f64; 3],
    pub grid_current_a: [f64; 3],
    /// Load plus rack power.
    pub grid_power_kw: f64,
    pub grid_frequency_hz: f64,
    pub grid_power_factor: f64,
    pub pcs_power_kw: f64,
    pub pcs_efficiency_pct: f64,
    pub pcs_temperature_c: f64,
    pub peak_shaving: PeakShavingStatus,
    pub alarm: AlarmState,
    /// 0 while no alarm is active.
    pub alarm_code: u16,
    pub protection: ProtectionFlags,
    /// Random byte refreshed every data step.
    pub watchdog: u8,
}

/// Short battery summary for status reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatterySummary {
    pub soc_pct: f64,
    pub soh_pct: f64,
    pub rack_power_kw: f64,
    pub load_power_kw: f64,
    pub grid_power_kw: f64,
    pub peak_shaving_enabled: bool,
    pub total_cells: usize,
    pub modules_per_rack: usize,
    pub cells_per_module: usize,
}

/// A single-rack battery energy storage system with its PCS, a site load,
/// a peak-shaving controller, and a randomised alarm generator.
///
/// # Power Flow Convention
/// - Rack power positive: discharging, SOC falls
/// - Rack power negative: charging, SOC rises
/// - Load power is reported as a non-positive value (consumption)
#[derive(Debug, Clone)]
pub struct BatteryModel {
    config: BatteryConfig,
    peak: PeakShavingConfig,
    rng: StdRng,
    load: LoadProfile,
    alarm: AlarmMachine,
    started_ms: u64,
    timestamp: NaiveDateTime,
    uptime_s: u64,
    soc_pct: f64,
    soh_pct: f64,
    rack_voltage_v: f64,
    rack_current_a: f64,
    rack_power_kw: f64,
    rack_temperature_c: f64,
    cell_voltages_v: Vec<f64>,
    cell_temperatures_c: Vec<f64>,
    load_power_kw: f64,
    load_override_kw: Option<f64>,
    mode: PeakShavingMode,
    grid_voltage_v: [f64; 3],
    grid_current_a: [f64; 3],
    grid_power_kw: f64,
    grid_frequency_hz: f64,
    grid_power_factor: f64,
    pcs_power_kw: f64,
    pcs_efficiency: f64,
    pcs_temperature_c: f64,
    system_status: u16,
    battery_status: u16,
    pcs_status: u16,
    watchdog: u8,
}

impl BatteryModel {
    /// Creates a rack at its configured initial SOC and SOH.
    ///
    /// # Arguments
    ///
    /// * `config` - Rack, PCS, and cell parameters
    /// * `peak` - Initial peak-shaving settings
    /// * `alarms` - Alarm generator timing
    /// * `now_ms` - Current monotonic time; uptime and the first alarm count from here
    /// * `seed` - Random seed for the load profile, noise, and alarm selection
    pub fn new(
        config: &BatteryConfig,
        peak: &PeakShavingConfig,
        alarms: &AlarmConfig,
        now_ms: u64,
        seed: u64,
    ) -> Self {
        let cells = config.total_cells();
        Self {
            config: config.clone(),
            peak: peak.clone(),
            rng: StdRng::seed_from_u64(seed),
            load: LoadProfile::generate(seed.wrapping_add(1)),
            alarm: AlarmMachine::new(
                alarms.trigger_interval_ms,
                alarms.duration_ms,
                alarms.enabled,
                now_ms,
                seed.wrapping_add(2),
            ),
            started_ms: now_ms,
            timestamp: NaiveDateTime::default(),
            uptime_s: 0,
            soc_pct: config.initial_soc_pct,
            soh_pct: config.initial_soh_pct,
            rack_voltage_v: config.nominal_voltage_v,
            rack_current_a: 0.0,
            rack_power_kw: 0.0,
            rack_temperature_c: CELL_NOMINAL_TEMPERATURE,
            cell_voltages_v: vec![CELL_NOMINAL_VOLTAGE; cells],
            cell_temperatures_c: vec![CELL_NOMINAL_TEMPERATURE; cells],
            load_power_kw: 0.0,
            load_override_kw: None,
            mode: PeakShavingMode::Idle,
            grid_voltage_v: [240.0; 3],
            grid_current_a: [0.0; 3],
            grid_power_kw: 0.0,
            grid_frequency_hz: 50.0,
            grid_power_factor: 0.95,
            pcs_power_kw: 0.0,
            pcs_efficiency: 0.95,
            pcs_temperature_c: 30.0,
            system_status: 1,
            battery_status: 1,
            pcs_status: 1,
            watchdog: 0,
        }
    }

    fn update_load(&mut self, now: &NaiveDateTime) {
        let demand = match self.load_override_kw {
            Some(kw) => kw.max(0.0),
            None => self.load.demand_kw(now.hour(), now.minute()),
        };
        self.load_power_kw = -demand;
    }

    fn update_cells(&mut self) {
        let cfg = &self.config;
        let base_voltage = cfg.cell_min_voltage_v
            + (cfg.cell_max_voltage_v - cfg.cell_min_voltage_v) * (self.soc_pct / 100.0);
        let base_temperature =
            CELL_NOMINAL_TEMPERATURE + self.rack_power_kw / cfg.pcs_capacity_kw * 15.0;

        for (voltage, temperature) in self
            .cell_voltages_v
            .iter_mut()
            .zip(self.cell_temperatures_c.iter_mut())
        {
            *voltage = (base_voltage + uniform_noise(&mut self.rng, 0.1))
                .clamp(cfg.cell_min_voltage_v, cfg.cell_max_voltage_v);
            *temperature = (base_temperature + uniform_noise(&mut self.rng, 5.0))
                .clamp(cfg.cell_min_temperature_c, cfg.cell_max_temperature_c);
        }
    }

    fn update_rack(&mut self, dt_s: f64) {
        self.rack_current_a = if self.rack_voltage_v > 0.0 {
            self.rack_power_kw * 1000.0 / self.rack_voltage_v
        } else {
            0.0
        };

        let energy_kwh = self.rack_power_kw * dt_s / 3600.0;
        self.soc_pct = (self.soc_pct - energy_kwh / self.config.capacity_kwh * 100.0).clamp(0.0, 100.0);

        let voltage = CellStats::from_cells(&self.cell_voltages_v).average;
        self.rack_voltage_v = voltage * self.cell_voltages_v.len() as f64;
        self.rack_temperature_c = CellStats::from_cells(&self.cell_temperatures_c).average;

        // SOH only ever decreases; a rack configured below the floor stays put
        if self.soh_pct > SOH_FLOOR && self.rng.random::<f64>() < SOH_DECAY_PROBABILITY {
            self.soh_pct = (self.soh_pct - SOH_DECAY_STEP).max(SOH_FLOOR);
        }
    }

    fn update_grid(&mut self) {
        self.grid_power_kw = self.load_power_kw + self.rack_power_kw;
        for phase in &mut self.grid_voltage_v {
            *phase = 240.0 + uniform_noise(&mut self.rng, 2.0);
        }
        let avg_voltage = self.grid_voltage_v.iter().sum::<f64>() / 3.0;
        let base_current = self.grid_power_kw.abs() * 1000.0 / (avg_voltage * 3f64.sqrt());
        for phase in &mut self.grid_current_a {
            *phase = base_current + uniform_noise(&mut self.rng, 0.5);
        }
        self.grid_frequency_hz = 50.0 + uniform_noise(&mut self.rng, 0.1);
        self.grid_power_factor = (0.95 + uniform_noise(&mut self.rng, 0.02)).clamp(0.8, 1.0);
    }

    fn update_pcs(&mut self) {
        self.pcs_power_kw = self.rack_power_kw;
        let magnitude = self.pcs_power_kw.abs();
        let capacity = self.config.pcs_capacity_kw;
        self.pcs_efficiency = if magnitude < 10.0 {
            0.85
        } else {
            0.95 - magnitude / capacity * 0.05
        };
        self.pcs_temperature_c = 30.0 + magnitude / capacity * 20.0 + uniform_noise(&mut self.rng, 1.0);
    }

    fn update_status(&mut self) {
        self.battery_status = if self.soc_pct < 5.0 {
            2
        } else if self.soc_pct > 95.0 {
            3
        } else {
            1
        };
        self.pcs_status = if self.rack_temperature_c > 60.0 {
            2
        } else if self.pcs_temperature_c > 70.0 {
            3
        } else {
            1
        };
        self.system_status = if self.battery_status == 1 && self.pcs_status == 1 {
            1
        } else {
            2
        };
    }

    /// Advances the alarm generator to `now_ms`.
    pub fn update_alarm(&mut self, now_ms: u64) -> Option<AlarmTransition> {
        self.alarm.update(now_ms)
    }

    /// Current alarm state.
    pub fn alarm_state(&self) -> AlarmState {
        self.alarm.state()
    }

    /// Overrides the state of charge, clamped to `[0, 100]`.
    pub fn set_soc(&mut self, soc_pct: f64) {
        self.soc_pct = soc_pct.clamp(0.0, 100.0);
    }

    /// Pins the site load to `kw` (consumption magnitude) until cleared with `None`.
    pub fn set_load_override(&mut self, kw: Option<f64>) {
        self.load_override_kw = kw.map(|kw| kw.max(0.0));
        if let Some(kw) = self.load_override_kw {
            self.load_power_kw = -kw;
        }
    }

    /// Turns the peak-shaving controller on or off.
    pub fn set_peak_shaving(&mut self, enabled: bool) {
        self.peak.enabled = enabled;
    }

    /// Sets the discharge threshold, floored at 0.
    pub fn set_peak_threshold(&mut self, kw: f64) {
        self.peak.threshold_kw = kw.max(0.0);
    }

    /// Sets the shave power, clamped to `[0, pcs_capacity]`.
    pub fn set_peak_shaving_power(&mut self, kw: f64) {
        self.peak.shaving_power_kw = kw.clamp(0.0, self.config.pcs_capacity_kw);
    }

    /// Raises `kind` immediately.
    pub fn trigger_alarm(&mut self, kind: AlarmKind, now_ms: u64) {
        self.alarm.trigger(kind, now_ms);
    }

    /// Clears the active alarm, returning its kind.
    pub fn clear_alarm(&mut self) -> Option<AlarmKind> {
        self.alarm.clear()
    }

    /// Restores the initial rack state and restarts the alarm interval.
    ///
    /// Peak-shaving settings, the load profile, and any load override are kept.
    pub fn reset(&mut self, now_ms: u64) {
        let cfg = &self.config;
        self.soc_pct = cfg.initial_soc_pct;
        self.soh_pct = cfg.initial_soh_pct;
        self.rack_voltage_v = cfg.nominal_voltage_v;
        self.rack_current_a = 0.0;
        self.rack_power_kw = 0.0;
        self.rack_temperature_c = CELL_NOMINAL_TEMPERATURE;
        self.cell_voltages_v.fill(CELL_NOMINAL_VOLTAGE);
        self.cell_temperatures_c.fill(CELL_NOMINAL_TEMPERATURE);
        self.grid_current_a = [0.0; 3];
        self.grid_power_kw = 0.0;
        self.grid_power_factor = 0.95;
        self.grid_frequency_hz = 50.0;
        self.load_power_kw = 0.0;
        self.pcs_power_kw = 0.0;
        self.pcs_efficiency = 0.95;
        self.pcs_temperature_c = 30.0;
        self.system_status = 1;
        self.battery_status = 1;
        self.pcs_status = 1;
        self.mode = PeakShavingMode::Idle;
        self.alarm.reset(now_ms);
    }

    /// Short summary for status reports.
    pub fn summary(&self) -> BatterySummary {
        BatterySummary {
            soc_pct: self.soc_pct,
            soh_pct: self.soh_pct,
            rack_power_kw: self.rack_power_kw,
            load_power_kw: self.load_power_kw,
            grid_power_kw: self.grid_power_kw,
            peak_shaving_enabled: self.peak.enabled,
            total_cells: self.cell_voltages_v.len(),
            modules_per_rack: self.config.modules_per_rack,
            cells_per_module: self.config.cells_per_module,
        }
    }
}

impl Model for BatteryModel {
    type Snapshot = BatterySnapshot;

    /// Step order: load, cells, peak shaving, rack, grid, PCS, status.
    fn step(&mut self, tick: &Tick) {
        self.timestamp = tick.now;
        self.uptime_s = tick.monotonic_ms.saturating_sub(self.started_ms) / 1000;

        self.update_load(&tick.now);
        self.update_cells();
        let (mode, power) = peak_shaving(
            self.load_power_kw,
            self.soc_pct,
            &self.peak,
            self.config.pcs_capacity_kw,
        );
        self.mode = mode;
        self.rack_power_kw = power;
        self.update_rack(tick.dt_s);
        self.update_grid();
        self.update_pcs();
        self.update_status();
        self.watchdog = self.rng.random();
    }

    fn snapshot(&self) -> BatterySnapshot {
        let alarm = self.alarm.state();
        BatterySnapshot {
            timestamp: self.timestamp,
            uptime_s: self.uptime_s,
            system_status: self.system_status,
            battery_status: self.battery_status,
            pcs_status: self.pcs_status,
            rack_mode: RACK_MODE_ONLINE,
            soc_pct: self.soc_pct,
            soh_pct: self.soh_pct,
            rack_voltage_v: self.rack_voltage_v,
            rack_current_a: self.rack_current_a,
            rack_power_kw: self.rack_power_kw,
            rack_temperature_c: self.rack_temperature_c,
            cell_voltage: CellStats::from_cells(&self.cell_voltages_v),
            cell_temperature: CellStats::from_cells(&self.cell_temperatures_c),
            cell_voltages_v: self.cell_voltages_v.clone(),
            cell_temperatures_c: self.cell_temperatures_c.clone(),
            load_power_kw: self.load_power_kw,
            grid_voltage_v: self.grid_voltage_v,
            grid_current_a: self.grid_current_a,
            grid_power_kw: self.grid_power_kw,
            grid_frequency_hz: self.grid_frequency_hz,
            grid_power_factor: self.grid_power_factor,
            pcs_power_kw: self.pcs_power_kw,
            pcs_efficiency_pct: self.pcs_efficiency * 100.0,
            pcs_temperature_c: self.pcs_temperature_c,
            peak_shaving: PeakShavingStatus {
                enabled: self.peak.enabled,
                mode: self.mode,
                threshold_kw: self.peak.threshold_kw,
                shaving_power_kw: self.peak.shaving_power_kw,
                reserve_soc_pct: self.peak.reserve_soc_pct,
            },
            alarm,
            alarm_code: alarm.code(),
            protection: alarm.flags(),
            watchdog: self.watchdog,
        }
    }

    fn device_type(&self) -> &'static str {
        "Battery"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .expect("valid timestamp")
    }

    fn model() -> BatteryModel {
        BatteryModel::new(
            &BatteryConfig::default(),
            &PeakShavingConfig::default(),
            &AlarmConfig::default(),
            0,
            42,
        )
    }

    fn step(m: &mut BatteryModel, ms: u64) -> BatterySnapshot {
        m.step(&Tick::new(noon(), ms, 1.0));
        m.snapshot()
    }

    fn model_with_soh(initial_soh_pct: f64) -> BatteryModel {
        let config = BatteryConfig {
            initial_soh_pct,
            ..BatteryConfig::default()
        };
        BatteryModel::new(
            &config,
            &PeakShavingConfig::default(),
            &AlarmConfig::default(),
            0,
            42,
        )
    }

    #[test]
    fn soh_decays_to_floor_and_never_rises() {
        let mut m = model_with_soh(80.03);
        let mut previous = m.snapshot().soh_pct;
        for _ in 0..20_000 {
            let soh = step(&mut m, 0).soh_pct;
            assert!(soh <= previous, "SOH rose from {previous} to {soh}");
            assert!(soh >= SOH_FLOOR, "SOH {soh} below floor");
            previous = soh;
        }
        assert!(previous < 80.03, "expected at least one decay event");
    }

    #[test]
    fn soh_below_floor_is_left_alone() {
        let mut m = model_with_soh(70.0);
        for _ in 0..20_000 {
            assert_eq!(step(&mut m, 0).soh_pct, 70.0);
        }
    }

    #[test]
    fn peak_shaving_branches() {
        let p = PeakShavingConfig::default();
        assert_eq!(peak_shaving(-70.0, 50.0, &p, 100.0), (PeakShavingMode::Discharging, 40.0));
        // SOC-limited discharge
        assert_eq!(peak_shaving(-70.0, 30.0, &p, 100.0).1, 30.0);
        // at or below reserve: no discharge
        assert_eq!(peak_shaving(-70.0, 20.0, &p, 100.0).0, PeakShavingMode::Idle);
        assert_eq!(peak_shaving(-40.0, 50.0, &p, 100.0), (PeakShavingMode::Charging, -20.0));
        // low load but SOC already high
        assert_eq!(peak_shaving(-40.0, 85.0, &p, 100.0), (PeakShavingMode::Idle, 0.0));
        // dead band between 80 % and 100 % of threshold
        assert_eq!(peak_shaving(-55.0, 50.0, &p, 100.0), (PeakShavingMode::Idle, 0.0));

        let off = PeakShavingConfig {
            enabled: false,
            ..PeakShavingConfig::default()
        };
        assert_eq!(peak_shaving(-90.0, 50.0, &off, 100.0), (PeakShavingMode::Disabled, 0.0));
    }

    #[test]
    fn cell_stats_order() {
        let stats = CellStats::from_cells(&[3.5, 3.9, 3.7, 3.6, 4.0]);
        assert_eq!(stats.max, 4.0);
        assert_eq!(stats.second_max, 3.9);
        assert_eq!(stats.second_min, 3.6);
        assert_eq!(stats.min, 3.5);
        assert!((stats.average - 3.74).abs() < 1e-9);

        let single = CellStats::from_cells(&[3.3]);
        assert_eq!(single.second_max, 3.3);
        assert_eq!(single.second_min, 3.3);
    }

    #[test]
    fn discharging_lowers_soc_and_sets_signs() {
        let mut m = model();
        m.set_load_override(Some(90.0));
        let before = m.snapshot().soc_pct;
        let snap = step(&mut m, 1000);

        assert_eq!(snap.peak_shaving.mode, PeakShavingMode::Discharging);
        assert_eq!(snap.rack_power_kw, 40.0);
        assert!(snap.soc_pct < before);
        assert!(snap.rack_current_a > 0.0);
        assert_eq!(snap.load_power_kw, -90.0);
        assert_eq!(snap.grid_power_kw, -50.0);
        assert_eq!(snap.pcs_power_kw, 40.0);
        assert!((snap.pcs_efficiency_pct - 93.0).abs() < 1e-9);
    }

    #[test]
    fn charging_raises_soc() {
        let mut m = model();
        m.set_load_override(Some(30.0));
        let before = m.snapshot().soc_pct;
        let snap = step(&mut m, 1000);
        assert_eq!(snap.peak_shaving.mode, PeakShavingMode::Charging);
        assert_eq!(snap.rack_power_kw, -20.0);
        assert!(snap.soc_pct > before);
    }

    #[test]
    fn soc_stays_bounded() {
        let mut m = model();
        m.set_load_override(Some(95.0));
        m.set_soc(0.5);
        for _ in 0..10 {
            let snap = step(&mut m, 0);
            assert!((0.0..=100.0).contains(&snap.soc_pct));
        }

        let mut m = model();
        m.set_soc(150.0);
        assert_eq!(m.snapshot().soc_pct, 100.0);
        m.set_soc(-3.0);
        assert_eq!(m.snapshot().soc_pct, 0.0);
    }

    #[test]
    fn cells_stay_within_limits() {
        let mut m = model();
        let cfg = BatteryConfig::default();
        for _ in 0..20 {
            let snap = step(&mut m, 0);
            assert_eq!(snap.cell_voltages_v.len(), 136);
            assert!(snap.cell_voltages_v.iter().all(|v| (cfg.cell_min_voltage_v..=cfg.cell_max_voltage_v).contains(v)));
            assert!(snap
                .cell_temperatures_c
                .iter()
                .all(|t| (cfg.cell_min_temperature_c..=cfg.cell_max_temperature_c).contains(t)));
            let expected = snap.cell_voltage.average * 136.0;
            assert!((snap.rack_voltage_v - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn status_codes() {
        let mut m = model();
        m.set_peak_shaving(false);
        m.set_soc(3.0);
        assert_eq!(step(&mut m, 0).battery_status, 2);
        m.set_soc(97.0);
        let snap = step(&mut m, 0);
        assert_eq!(snap.battery_status, 3);
        assert_eq!(snap.system_status, 2);
        m.set_soc(50.0);
        let snap = step(&mut m, 0);
        assert_eq!(snap.battery_status, 1);
        assert_eq!(snap.pcs_status, 1);
        assert_eq!(snap.system_status, 1);
    }

    #[test]
    fn controls_clamp() {
        let mut m = model();
        m.set_peak_shaving_power(500.0);
        m.set_peak_threshold(-5.0);
        let snap = m.snapshot();
        assert_eq!(snap.peak_shaving.shaving_power_kw, 100.0);
        assert_eq!(snap.peak_shaving.threshold_kw, 0.0);
    }

    #[test]
    fn alarm_surfaces_in_snapshot() {
        let mut m = model();
        assert_eq!(m.snapshot().alarm_code, 0);
        m.trigger_alarm(AlarmKind::Overcurrent, 10);
        let snap = m.snapshot();
        assert_eq!(snap.alarm_code, 0x2005);
        assert_eq!(snap.protection.major, [0, 0, 0, 1]);
        assert_eq!(m.clear_alarm(), Some(AlarmKind::Overcurrent));
        assert_eq!(m.snapshot().protection.count_set(), 0);
    }

    #[test]
    fn uptime_counts_from_creation() {
        let mut m = BatteryModel::new(
            &BatteryConfig::default(),
            &PeakShavingConfig::default(),
            &AlarmConfig::default(),
            5_000,
            1,
        );
        assert_eq!(step(&mut m, 17_500).uptime_s, 12);
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut m = model();
        m.set_load_override(Some(90.0));
        for _ in 0..5 {
            step(&mut m, 0);
        }
        m.trigger_alarm(AlarmKind::LowSoc, 0);
        m.reset(0);
        let snap = m.snapshot();
        assert_eq!(snap.soc_pct, 50.0);
        assert_eq!(snap.rack_power_kw, 0.0);
        assert_eq!(snap.alarm, AlarmState::Idle);
        assert!(snap.cell_voltages_v.iter().all(|&v| v == 3.7));
    }
}
