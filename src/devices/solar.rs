use chrono::{NaiveDate, NaiveDateTime, Timelike};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::Serialize;

use crate::config::{InverterConfig, SolarConfig};
use crate::devices::types::{Model, Tick, uniform_between, uniform_noise};

/// MPPT input slots on the inverter; only the configured prefix is active.
pub const MPPT_SLOTS: usize = 24;

/// Irradiance below which the array produces nothing (W/m²).
const CUT_IN_IRRADIANCE: f64 = 100.0;

/// Standard test conditions irradiance (W/m²).
const STC_IRRADIANCE: f64 = 1000.0;

/// Energy accumulators in Wh.
///
/// The daily pair resets at the first step after the local date changes; all
/// other counters only ever grow. The `*_yield_wh` counters track the same
/// integral as their plain twins and are exposed under separate registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EnergyCounters {
    pub daily_wh: f64,
    pub monthly_wh: f64,
    pub yearly_wh: f64,
    pub lifetime_wh: f64,
    pub daily_yield_wh: f64,
    pub monthly_yield_wh: f64,
    pub yearly_yield_wh: f64,
    pub lifetime_yield_wh: f64,
}

impl EnergyCounters {
    fn add(&mut self, wh: f64) {
        self.daily_wh += wh;
        self.monthly_wh += wh;
        self.yearly_wh += wh;
        self.lifetime_wh += wh;
        self.daily_yield_wh += wh;
        self.monthly_yield_wh += wh;
        self.yearly_yield_wh += wh;
        self.lifetime_yield_wh += wh;
    }

    fn reset_daily(&mut self) {
        self.daily_wh = 0.0;
        self.daily_yield_wh = 0.0;
    }
}

/// Inverter telemetry at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolarSnapshot {
    /// Local time of the step that produced this snapshot.
    pub timestamp: NaiveDateTime,
    pub irradiance_w_m2: f64,
    pub ambient_temperature_c: f64,
    pub panel_temperature_c: f64,
    /// Per-slot MPPT voltage; inactive slots are 0.
    pub mppt_voltages_v: [f64; MPPT_SLOTS],
    /// Per-slot MPPT current, capped at 100 A; inactive slots are 0.
    pub mppt_currents_a: [f64; MPPT_SLOTS],
    pub input_power_w: f64,
    pub input_voltage_v: f64,
    pub input_current_a: f64,
    pub output_power_w: f64,
    pub line_voltage_ab_v: f64,
    pub line_voltage_bc_v: f64,
    pub line_voltage_ca_v: f64,
    pub phase_a_current_a: f64,
    pub phase_b_current_a: f64,
    pub phase_c_current_a: f64,
    pub grid_frequency_hz: f64,
    pub grid_voltage_v: f64,
    pub grid_current_a: f64,
    pub grid_power_w: f64,
    pub grid_power_factor: f64,
    pub inverter_temperature_c: f64,
    pub input_temperature_c: f64,
    pub boost_temperature_c: f64,
    pub inverter_efficiency_pct: f64,
    pub input_efficiency_pct: f64,
    pub output_efficiency_pct: f64,
    pub startup_time_s: u32,
    pub shutdown_time_s: u32,
    pub total_runtime_s: u32,
    pub energy: EnergyCounters,
}

/// Short inverter summary for status reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolarSummary {
    pub max_power_w: f64,
    pub mppt_channels: usize,
    pub output_power_w: f64,
    pub daily_energy_kwh: f64,
    pub lifetime_energy_kwh: f64,
    pub total_runtime_s: u32,
}

/// A PV array and string inverter driven by a clipped-sinusoid irradiance
/// profile over 06:00–18:00 with random cloud cover.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use ess_modbus_sim::config::{InverterConfig, SolarConfig};
/// use ess_modbus_sim::devices::solar::SolarModel;
/// use ess_modbus_sim::devices::{Model, Tick};
///
/// let mut pv = SolarModel::new(&SolarConfig::default(), &InverterConfig::default(), 42);
/// let noon = NaiveDate::from_ymd_opt(2024, 6, 1)
///     .and_then(|d| d.and_hms_opt(12, 0, 0))
///     .expect("valid time");
/// pv.step(&Tick::new(noon, 0, 1.0));
/// assert!(pv.snapshot().output_power_w > 0.0);
/// ```
#[derive(Debug, Clone)]
pub struct SolarModel {
    solar: SolarConfig,
    inverter: InverterConfig,
    rng: StdRng,
    energy: EnergyCounters,
    last_date: Option<NaiveDate>,
    startup_time_s: u32,
    shutdown_time_s: u32,
    total_runtime_s: u32,
    latest: SolarSnapshot,
}

impl SolarModel {
    /// Creates a model; the start-up time is drawn once from `[60, 360)` s.
    ///
    /// # Arguments
    ///
    /// * `solar` - Array rating and active MPPT channel count
    /// * `inverter` - Efficiency and grid nominal values
    /// * `seed` - Random seed for reproducible weather and noise
    pub fn new(solar: &SolarConfig, inverter: &InverterConfig, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let startup_time_s = rng.random_range(60..360);
        Self {
            solar: solar.clone(),
            inverter: inverter.clone(),
            rng,
            energy: EnergyCounters::default(),
            last_date: None,
            startup_time_s,
            shutdown_time_s: 0,
            total_runtime_s: startup_time_s,
            latest: SolarSnapshot::idle(NaiveDateTime::default()),
        }
    }

    /// Clears every counter and the start-up/runtime timers.
    pub fn reset(&mut self) {
        self.energy = EnergyCounters::default();
        self.total_runtime_s = 0;
        self.startup_time_s = 0;
        self.shutdown_time_s = 0;
        self.latest.energy = self.energy;
        self.latest.startup_time_s = 0;
        self.latest.shutdown_time_s = 0;
        self.latest.total_runtime_s = 0;
    }

    /// Short summary for status reports.
    pub fn summary(&self) -> SolarSummary {
        SolarSummary {
            max_power_w: self.solar.max_power_w,
            mppt_channels: self.solar.mppt_channels,
            output_power_w: self.latest.output_power_w,
            daily_energy_kwh: self.energy.daily_wh / 1000.0,
            lifetime_energy_kwh: self.energy.lifetime_wh / 1000.0,
            total_runtime_s: self.total_runtime_s,
        }
    }

    /// Irradiance for a time of day, before cloud cover.
    ///
    /// Zero outside 06:00–18:59, a half sine peaking at noon inside.
    pub fn clear_sky_irradiance(now: &NaiveDateTime) -> f64 {
        let hour = now.hour();
        if !(6..=18).contains(&hour) {
            return 0.0;
        }
        let time_of_day =
            f64::from(hour) + f64::from(now.minute()) / 60.0 + f64::from(now.second()) / 3600.0;
        ((time_of_day - 6.0) * std::f64::consts::PI / 12.0).sin().max(0.0) * STC_IRRADIANCE
    }

    fn ambient_temperature(&mut self, hour: u32) -> f64 {
        let daily = 10.0 * ((f64::from(hour) - 6.0) * std::f64::consts::PI / 12.0).sin();
        (20.0 + daily + uniform_noise(&mut self.rng, 2.0)).max(5.0)
    }

    /// Fraction of rated power the array delivers at this irradiance and
    /// panel temperature.
    fn power_factor(irradiance: f64, panel_temperature: f64) -> f64 {
        if irradiance < CUT_IN_IRRADIANCE {
            return 0.0;
        }
        let derating = (1.0 - (panel_temperature - 25.0) * 0.004).max(0.0);
        (irradiance / STC_IRRADIANCE).min(1.0) * derating
    }

    fn efficiency(&self, input_power: f64, panel_temperature: f64) -> f64 {
        let derating = (1.0 - (panel_temperature - 25.0) * 0.002).max(0.85);
        let load = input_power / self.solar.max_power_w;
        self.inverter.base_efficiency * derating * (0.9 + 0.1 * load)
    }

    fn input_voltage(&mut self, irradiance: f64, panel_temperature: f64) -> f64 {
        if irradiance < CUT_IN_IRRADIANCE {
            return 0.0;
        }
        let derating = 1.0 - 0.003 * (panel_temperature - 25.0);
        self.solar.nominal_voltage_v * derating + uniform_noise(&mut self.rng, 5.0)
    }

    fn mppt(&mut self, irradiance: f64, panel_temperature: f64) -> ([f64; MPPT_SLOTS], [f64; MPPT_SLOTS]) {
        let mut voltages = [0.0; MPPT_SLOTS];
        let mut currents = [0.0; MPPT_SLOTS];
        let active = self.solar.mppt_channels.clamp(1, MPPT_SLOTS);
        let per_channel_w = self.solar.max_power_w / active as f64;

        for slot in 0..active {
            let channel_irradiance = irradiance * uniform_between(&mut self.rng, 0.8, 0.4);
            let power = per_channel_w * channel_irradiance / STC_IRRADIANCE;
            let voltage = self.input_voltage(channel_irradiance, panel_temperature) / active as f64;
            let current = if voltage > 0.1 { power / voltage } else { 0.0 };

            voltages[slot] = (voltage + uniform_noise(&mut self.rng, 2.0)).max(0.0);
            currents[slot] = (current + uniform_noise(&mut self.rng, 0.5)).clamp(0.0, 100.0);
        }
        (voltages, currents)
    }

    fn roll_date(&mut self, today: NaiveDate) {
        if self.last_date.is_some_and(|last| last != today) {
            self.energy.reset_daily();
        }
        self.last_date = Some(today);
    }
}

impl SolarSnapshot {
    fn idle(timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp,
            irradiance_w_m2: 0.0,
            ambient_temperature_c: 0.0,
            panel_temperature_c: 0.0,
            mppt_voltages_v: [0.0; MPPT_SLOTS],
            mppt_currents_a: [0.0; MPPT_SLOTS],
            input_power_w: 0.0,
            input_voltage_v: 0.0,
            input_current_a: 0.0,
            output_power_w: 0.0,
            line_voltage_ab_v: 0.0,
            line_voltage_bc_v: 0.0,
            line_voltage_ca_v: 0.0,
            phase_a_current_a: 0.0,
            phase_b_current_a: 0.0,
            phase_c_current_a: 0.0,
            grid_frequency_hz: 0.0,
            grid_voltage_v: 0.0,
            grid_current_a: 0.0,
            grid_power_w: 0.0,
            grid_power_factor: 0.0,
            inverter_temperature_c: 0.0,
            input_temperature_c: 0.0,
            boost_temperature_c: 0.0,
            inverter_efficiency_pct: 0.0,
            input_efficiency_pct: 0.0,
            output_efficiency_pct: 0.0,
            startup_time_s: 0,
            shutdown_time_s: 0,
            total_runtime_s: 0,
            energy: EnergyCounters::default(),
        }
    }
}

impl Model for SolarModel {
    type Snapshot = SolarSnapshot;

    fn step(&mut self, tick: &Tick) {
        let now = tick.now;
        let cloud = uniform_between(&mut self.rng, 0.7, 0.3);
        let irradiance = Self::clear_sky_irradiance(&now) * cloud;
        let ambient = self.ambient_temperature(now.hour());
        let panel = ambient + irradiance * 0.03;

        let max_power = self.solar.max_power_w;
        let input_power = (max_power * Self::power_factor(irradiance, panel)).min(max_power);
        let (mppt_voltages_v, mppt_currents_a) = self.mppt(irradiance, panel);

        let efficiency = self.efficiency(input_power, panel);
        let output_power = input_power * efficiency;
        let grid_v = self.inverter.grid_voltage_v;
        let grid_current = output_power / (grid_v * 3f64.sqrt());

        let input_voltage = self.input_voltage(irradiance, panel);
        let input_current = if input_voltage > 0.0 {
            input_power / input_voltage
        } else {
            0.0
        };

        self.roll_date(now.date());
        self.energy.add(output_power * tick.dt_s / 3600.0);
        self.total_runtime_s = self.total_runtime_s.saturating_add(1);

        let load = output_power / max_power;
        let rng = &mut self.rng;
        self.latest = SolarSnapshot {
            timestamp: now,
            irradiance_w_m2: irradiance,
            ambient_temperature_c: ambient,
            panel_temperature_c: panel,
            mppt_voltages_v,
            mppt_currents_a,
            input_power_w: input_power.round(),
            input_voltage_v: input_voltage,
            input_current_a: input_current,
            output_power_w: output_power.round(),
            line_voltage_ab_v: grid_v + uniform_noise(rng, 2.0),
            line_voltage_bc_v: grid_v + uniform_noise(rng, 2.0),
            line_voltage_ca_v: grid_v + uniform_noise(rng, 2.0),
            phase_a_current_a: grid_current + uniform_noise(rng, 0.1),
            phase_b_current_a: grid_current + uniform_noise(rng, 0.1),
            phase_c_current_a: grid_current + uniform_noise(rng, 0.1),
            grid_frequency_hz: self.inverter.grid_frequency_hz + uniform_noise(rng, 0.1),
            grid_voltage_v: grid_v + uniform_noise(rng, 2.0),
            grid_current_a: grid_current + uniform_noise(rng, 0.1),
            grid_power_w: output_power.round(),
            grid_power_factor: 0.98 + uniform_noise(rng, 0.02),
            inverter_temperature_c: 25.0 + load * 30.0 + uniform_noise(rng, 2.0),
            input_temperature_c: panel + uniform_noise(rng, 1.0),
            boost_temperature_c: 30.0 + load * 25.0 + uniform_noise(rng, 2.0),
            inverter_efficiency_pct: efficiency * 100.0,
            input_efficiency_pct: 95.0 + uniform_noise(rng, 2.0),
            output_efficiency_pct: efficiency * 100.0,
            startup_time_s: self.startup_time_s,
            shutdown_time_s: self.shutdown_time_s,
            total_runtime_s: self.total_runtime_s,
            energy: self.energy,
        };
    }

    fn snapshot(&self) -> SolarSnapshot {
        self.latest.clone()
    }

    fn device_type(&self) -> &'static str {
        "SolarPV"
    }
}
