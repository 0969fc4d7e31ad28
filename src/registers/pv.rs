//! PV inverter register map (32016-32114).

use std::sync::Arc;

use crate::devices::solar::{MPPT_SLOTS, SolarSnapshot};
use crate::error::TableError;
use crate::modbus::table::RegisterTable;
use crate::sim::engine::SolarEngine;

use super::{Field, RegisterPublisher};

/// First MPPT voltage register; slot `i` uses `MPPT_BASE + 2i` (voltage)
/// and `MPPT_BASE + 2i + 1` (current).
pub const MPPT_BASE: u16 = 32016;

pub const INPUT_POWER: Field = Field::u32("input_power", 32064, "W", 1.0);
pub const INPUT_VOLTAGE: Field = Field::u16("input_voltage", 32066, "V", 0.1);
pub const INPUT_CURRENT: Field = Field::u16("input_current", 32067, "A", 0.1);
pub const OUTPUT_POWER: Field = Field::u32("output_power", 32068, "W", 1.0);
pub const LINE_VOLTAGE_AB: Field = Field::u16("line_voltage_ab", 32070, "V", 0.1);
pub const LINE_VOLTAGE_BC: Field = Field::u16("line_voltage_bc", 32071, "V", 0.1);
pub const LINE_VOLTAGE_CA: Field = Field::u16("line_voltage_ca", 32072, "V", 0.1);
pub const PHASE_A_CURRENT: Field = Field::u32("phase_a_current", 32073, "A", 0.1);
pub const PHASE_B_CURRENT: Field = Field::u32("phase_b_current", 32075, "A", 0.1);
pub const PHASE_C_CURRENT: Field = Field::u32("phase_c_current", 32077, "A", 0.1);
pub const FREQUENCY: Field = Field::u16("frequency", 32079, "Hz", 0.01);
pub const INVERTER_TEMPERATURE: Field = Field::u16("inverter_temperature", 32080, "°C", 0.1);
pub const INPUT_TEMPERATURE: Field = Field::u16("input_temperature", 32081, "°C", 0.1);
pub const BOOST_TEMPERATURE: Field = Field::u16("boost_temperature", 32082, "°C", 0.1);
pub const INVERTER_EFFICIENCY: Field = Field::u16("inverter_efficiency", 32083, "%", 0.1);
pub const INPUT_EFFICIENCY: Field = Field::u16("input_efficiency", 32084, "%", 0.1);
pub const OUTPUT_EFFICIENCY: Field = Field::u16("output_efficiency", 32085, "%", 0.1);
pub const GRID_VOLTAGE: Field = Field::u16("grid_voltage", 32086, "V", 0.1);
pub const GRID_CURRENT: Field = Field::u16("grid_current", 32087, "A", 0.1);
pub const GRID_POWER: Field = Field::u16("grid_power", 32088, "W", 1.0);
pub const GRID_FREQUENCY: Field = Field::u16("grid_frequency", 32089, "Hz", 0.01);
pub const POWER_FACTOR: Field = Field::u16("power_factor", 32090, "", 0.01);
pub const STARTUP_TIME: Field = Field::u32("startup_time", 32091, "s", 1.0);
pub const SHUTDOWN_TIME: Field = Field::u32("shutdown_time", 32093, "s", 1.0);
pub const TOTAL_RUNTIME: Field = Field::u32("total_runtime", 32095, "s", 1.0);
pub const TOTAL_ENERGY: Field = Field::u32("total_energy", 32097, "kWh", 0.1);
pub const DAILY_ENERGY: Field = Field::u32("daily_energy", 32099, "kWh", 0.01);
pub const MONTHLY_ENERGY: Field = Field::u32("monthly_energy", 32101, "kWh", 0.1);
pub const YEARLY_ENERGY: Field = Field::u32("yearly_energy", 32103, "kWh", 0.1);
pub const ACCUMULATED_ENERGY: Field = Field::u32("accumulated_energy", 32105, "kWh", 0.1);
pub const DAILY_YIELD: Field = Field::u32("daily_yield", 32107, "kWh", 0.01);
pub const MONTHLY_YIELD: Field = Field::u32("monthly_yield", 32109, "kWh", 0.1);
pub const YEARLY_YIELD: Field = Field::u32("yearly_yield", 32111, "kWh", 0.1);
pub const TOTAL_YIELD: Field = Field::u32("total_yield", 32113, "kWh", 0.1);

/// Every scalar PV field, in address order. MPPT fields come from
/// [`mppt_voltage`] and [`mppt_current`].
pub const PV_FIELDS: [Field; 34] = [
    INPUT_POWER,
    INPUT_VOLTAGE,
    INPUT_CURRENT,
    OUTPUT_POWER,
    LINE_VOLTAGE_AB,
    LINE_VOLTAGE_BC,
    LINE_VOLTAGE_CA,
    PHASE_A_CURRENT,
    PHASE_B_CURRENT,
    PHASE_C_CURRENT,
    FREQUENCY,
    INVERTER_TEMPERATURE,
    INPUT_TEMPERATURE,
    BOOST_TEMPERATURE,
    INVERTER_EFFICIENCY,
    INPUT_EFFICIENCY,
    OUTPUT_EFFICIENCY,
    GRID_VOLTAGE,
    GRID_CURRENT,
    GRID_POWER,
    GRID_FREQUENCY,
    POWER_FACTOR,
    STARTUP_TIME,
    SHUTDOWN_TIME,
    TOTAL_RUNTIME,
    TOTAL_ENERGY,
    DAILY_ENERGY,
    MONTHLY_ENERGY,
    YEARLY_ENERGY,
    ACCUMULATED_ENERGY,
    DAILY_YIELD,
    MONTHLY_YIELD,
    YEARLY_YIELD,
    TOTAL_YIELD,
];

/// MPPT channel `slot` voltage field (0-based slot).
pub const fn mppt_voltage(slot: usize) -> Field {
    Field::u16("mppt_voltage", MPPT_BASE + 2 * slot as u16, "V", 0.1)
}

/// MPPT channel `slot` current field (0-based slot).
pub const fn mppt_current(slot: usize) -> Field {
    Field::u16("mppt_current", MPPT_BASE + 2 * slot as u16 + 1, "A", 0.1)
}

fn scalar_values(s: &SolarSnapshot) -> [(Field, f64); 34] {
    let kwh = |wh: f64| wh / 1000.0;
    let e = &s.energy;
    [
        (INPUT_POWER, s.input_power_w),
        (INPUT_VOLTAGE, s.input_voltage_v),
        (INPUT_CURRENT, s.input_current_a),
        (OUTPUT_POWER, s.output_power_w),
        (LINE_VOLTAGE_AB, s.line_voltage_ab_v),
        (LINE_VOLTAGE_BC, s.line_voltage_bc_v),
        (LINE_VOLTAGE_CA, s.line_voltage_ca_v),
        (PHASE_A_CURRENT, s.phase_a_current_a),
        (PHASE_B_CURRENT, s.phase_b_current_a),
        (PHASE_C_CURRENT, s.phase_c_current_a),
        (FREQUENCY, s.grid_frequency_hz),
        (INVERTER_TEMPERATURE, s.inverter_temperature_c),
        (INPUT_TEMPERATURE, s.input_temperature_c),
        (BOOST_TEMPERATURE, s.boost_temperature_c),
        (INVERTER_EFFICIENCY, s.inverter_efficiency_pct),
        (INPUT_EFFICIENCY, s.input_efficiency_pct),
        (OUTPUT_EFFICIENCY, s.output_efficiency_pct),
        (GRID_VOLTAGE, s.grid_voltage_v),
        (GRID_CURRENT, s.grid_current_a),
        (GRID_POWER, s.grid_power_w),
        (GRID_FREQUENCY, s.grid_frequency_hz),
        (POWER_FACTOR, s.grid_power_factor),
        (STARTUP_TIME, f64::from(s.startup_time_s)),
        (SHUTDOWN_TIME, f64::from(s.shutdown_time_s)),
        (TOTAL_RUNTIME, f64::from(s.total_runtime_s)),
        (TOTAL_ENERGY, kwh(e.lifetime_wh)),
        (DAILY_ENERGY, kwh(e.daily_wh)),
        (MONTHLY_ENERGY, kwh(e.monthly_wh)),
        (YEARLY_ENERGY, kwh(e.yearly_wh)),
        (ACCUMULATED_ENERGY, kwh(e.lifetime_wh)),
        (DAILY_YIELD, kwh(e.daily_yield_wh)),
        (MONTHLY_YIELD, kwh(e.monthly_yield_wh)),
        (YEARLY_YIELD, kwh(e.yearly_yield_wh)),
        (TOTAL_YIELD, kwh(e.lifetime_yield_wh)),
    ]
}

/// Writes a solar snapshot into `table` using the PV map.
///
/// # Errors
///
/// Returns [`TableError::OutOfRange`] if the table is too small for the map.
pub fn write_snapshot(snapshot: &SolarSnapshot, table: &mut RegisterTable) -> Result<(), TableError> {
    for slot in 0..MPPT_SLOTS {
        mppt_voltage(slot).write(table, snapshot.mppt_voltages_v[slot])?;
        mppt_current(slot).write(table, snapshot.mppt_currents_a[slot])?;
    }
    for (field, value) in scalar_values(snapshot) {
        field.write(table, value)?;
    }
    Ok(())
}

/// Publishes the shared solar engine's snapshot into a PV endpoint's table.
pub struct SolarPublisher {
    name: String,
    engine: Arc<SolarEngine>,
}

impl SolarPublisher {
    pub fn new(name: impl Into<String>, engine: Arc<SolarEngine>) -> Self {
        Self {
            name: name.into(),
            engine,
        }
    }
}

impl RegisterPublisher for SolarPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    fn publish(&self, table: &mut RegisterTable) -> Result<(), TableError> {
        write_snapshot(&self.engine.snapshot(), table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InverterConfig, SolarConfig};
    use crate::devices::solar::SolarModel;
    use crate::devices::{Model, Tick};
    use crate::registers::find_overlap;
    use chrono::NaiveDate;

    fn noon_snapshot() -> SolarSnapshot {
        let now = NaiveDate::from_ymd_opt(2024, 6, 1)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .expect("valid timestamp");
        let mut pv = SolarModel::new(&SolarConfig::default(), &InverterConfig::default(), 42);
        pv.step(&Tick::new(now, 0, 3600.0));
        pv.snapshot()
    }

    #[test]
    fn map_has_no_overlaps() {
        let mut fields: Vec<Field> = PV_FIELDS.to_vec();
        for slot in 0..MPPT_SLOTS {
            fields.push(mppt_voltage(slot));
            fields.push(mppt_current(slot));
        }
        assert_eq!(find_overlap(&fields), None);
        assert_eq!(mppt_current(MPPT_SLOTS - 1).end(), u32::from(INPUT_POWER.address));
        assert_eq!(TOTAL_YIELD.end(), 32115);
    }

    #[test]
    fn every_scalar_field_is_published() {
        let snap = noon_snapshot();
        let published: Vec<Field> = scalar_values(&snap).iter().map(|(f, _)| *f).collect();
        assert_eq!(published, PV_FIELDS.to_vec());
    }

    #[test]
    fn snapshot_lands_at_documented_addresses() {
        let snap = noon_snapshot();
        let mut table = RegisterTable::new();
        write_snapshot(&snap, &mut table).unwrap();

        let power = table.get_u32(32064).unwrap();
        assert_eq!(f64::from(power), snap.input_power_w);
        assert_eq!(table.get_u32(32068).unwrap() as f64, snap.output_power_w);
        assert_eq!(table.get(32016).unwrap(), (snap.mppt_voltages_v[0] / 0.1).round() as u16);
        assert_eq!(table.get(32017).unwrap(), (snap.mppt_currents_a[0] / 0.1).round() as u16);
        // inactive channels stay zero
        assert_eq!(table.get(32016 + 2 * 7).unwrap(), 0);
        assert_eq!(table.get_u32(32091).unwrap(), snap.startup_time_s);
        assert_eq!(table.get_u32(32095).unwrap(), snap.total_runtime_s);

        let daily_kwh = snap.energy.daily_wh / 1000.0;
        assert_eq!(table.get_u32(32099).unwrap(), (daily_kwh / 0.01).round() as u32);
        assert_eq!(table.get_u32(32097).unwrap(), (daily_kwh / 0.1).round() as u32);
        assert_eq!(table.get_u32(32113).unwrap(), table.get_u32(32105).unwrap());
    }

    #[test]
    fn small_table_reports_out_of_range() {
        let mut table = RegisterTable::with_size(32_000);
        assert!(matches!(
            write_snapshot(&noon_snapshot(), &mut table),
            Err(TableError::OutOfRange { .. })
        ));
    }
}
