//! Battery register maps: the BMS input block (30002-30090) and the ESS
//! holding block (40001-40027).

use std::sync::Arc;

use crate::devices::alarm::ProtectionFlags;
use crate::devices::battery::BatterySnapshot;
use crate::error::TableError;
use crate::modbus::table::RegisterTable;
use crate::sim::engine::BatteryEngine;

use super::{Field, RegisterPublisher};

/// Value of the connecting-status register: one rack in service of one.
pub const CONNECTING_STATUS: u16 = 0x0101;

pub const SYSTEM_VOLTAGE: Field = Field::u16("system_voltage", 30002, "V", 0.1);
pub const SYSTEM_CURRENT: Field = Field::u16("system_current", 30003, "A", 0.1);
pub const SYSTEM_SOC: Field = Field::u16("system_soc", 30004, "%", 0.1);
pub const SYSTEM_SOH: Field = Field::u16("system_soh", 30005, "%", 0.1);
pub const MAX_CELL_VOLTAGE: Field = Field::u16("max_cell_voltage", 30007, "mV", 1.0);
pub const MIN_CELL_VOLTAGE: Field = Field::u16("min_cell_voltage", 30008, "mV", 1.0);
pub const MAX_CELL_TEMPERATURE: Field = Field::u16("max_cell_temperature", 30009, "°C", 0.01);
pub const MIN_CELL_TEMPERATURE: Field = Field::u16("min_cell_temperature", 30010, "°C", 0.01);
/// First of twelve protection registers: major #4..#1, minor #4..#1, alarm #4..#1.
pub const SYSTEM_PROTECTION_BASE: u16 = 30011;
pub const ALARM_CODE: Field = Field::u16("alarm_code", 30023, "", 1.0);
pub const WATCHDOG: Field = Field::u16("watchdog", 30025, "", 1.0);
pub const SYSTEM_HEARTBEAT: Field = Field::u16("system_heartbeat", 30026, "s", 1.0);
pub const CONNECTING: Field = Field::u16("connecting_status", 30027, "", 1.0);
pub const SERVICE_VOLTAGE: Field = Field::u16("service_voltage", 30028, "V", 0.1);
pub const SERVICE_SOC: Field = Field::u16("service_soc", 30029, "%", 0.1);
pub const DIGITAL_IO: Field = Field::u16("digital_io", 30030, "", 1.0);

pub const RACK_VOLTAGE: Field = Field::u16("rack_voltage", 30041, "V", 0.1);
pub const STRING_VOLTAGE: Field = Field::u16("string_voltage", 30042, "V", 0.1);
pub const RACK_CURRENT: Field = Field::u16("rack_current", 30046, "A", 0.1);
pub const STRING_CURRENT: Field = Field::u16("string_current", 30047, "A", 0.1);
pub const RACK_CURRENT_AVERAGE: Field = Field::u16("rack_current_average", 30049, "A", 0.1);
pub const RACK_MODE: Field = Field::u16("rack_mode", 30050, "", 1.0);
pub const RACK_SOC: Field = Field::u16("rack_soc", 30051, "%", 0.1);
pub const RACK_SOH: Field = Field::u16("rack_soh", 30052, "%", 0.1);
/// Rack copy of the twelve protection registers.
pub const RACK_PROTECTION_BASE: u16 = 30053;
pub const CELL_VOLTAGE_MAX_1: Field = Field::u16("cell_voltage_max_1", 30065, "mV", 1.0);
pub const CELL_VOLTAGE_MAX_2: Field = Field::u16("cell_voltage_max_2", 30067, "mV", 1.0);
pub const CELL_VOLTAGE_AVERAGE: Field = Field::u16("cell_voltage_average", 30069, "mV", 1.0);
pub const CELL_VOLTAGE_MIN_2: Field = Field::u16("cell_voltage_min_2", 30070, "mV", 1.0);
pub const CELL_VOLTAGE_MIN_1: Field = Field::u16("cell_voltage_min_1", 30072, "mV", 1.0);
pub const CELL_TEMPERATURE_MAX_1: Field = Field::u16("cell_temperature_max_1", 30074, "°C", 0.01);
pub const CELL_TEMPERATURE_MAX_2: Field = Field::u16("cell_temperature_max_2", 30076, "°C", 0.01);
pub const CELL_TEMPERATURE_AVERAGE: Field =
    Field::u16("cell_temperature_average", 30078, "°C", 0.01);
pub const CELL_TEMPERATURE_MIN_2: Field = Field::u16("cell_temperature_min_2", 30079, "°C", 0.01);
pub const CELL_TEMPERATURE_MIN_1: Field = Field::u16("cell_temperature_min_1", 30081, "°C", 0.01);
pub const RACK_HEARTBEAT: Field = Field::u16("rack_heartbeat", 30083, "s", 1.0);
pub const RACK_SWITCH_CONTROL: Field = Field::u16("rack_switch_control", 30085, "", 1.0);
pub const RACK_SWITCH_SENSOR: Field = Field::u16("rack_switch_sensor", 30086, "", 1.0);
pub const RACK_EXTERNAL_SENSOR: Field = Field::u16("rack_external_sensor", 30087, "", 1.0);
pub const RACK_EXTERNAL_INDICATOR: Field = Field::u16("rack_external_indicator", 30090, "", 1.0);

pub const SYSTEM_STATUS: Field = Field::u16("system_status", 40001, "", 1.0);
pub const BATTERY_STATUS: Field = Field::u16("battery_status", 40002, "", 1.0);
pub const PCS_STATUS: Field = Field::u16("pcs_status", 40003, "", 1.0);
pub const BATTERY_SOC: Field = Field::u32("battery_soc", 40004, "%", 0.1);
pub const BATTERY_VOLTAGE: Field = Field::u32("battery_voltage", 40006, "V", 0.1);
pub const BATTERY_CURRENT: Field = Field::u32("battery_current", 40008, "A", 0.1);
pub const BATTERY_POWER: Field = Field::u32("battery_power", 40010, "W", 1.0);
pub const BATTERY_TEMPERATURE: Field = Field::u32("battery_temperature", 40012, "°C", 0.1);
pub const GRID_VOLTAGE: Field = Field::u32("grid_voltage", 40014, "V", 0.1);
pub const GRID_CURRENT: Field = Field::u32("grid_current", 40016, "A", 0.1);
pub const GRID_POWER: Field = Field::u32("grid_power", 40018, "W", 1.0);
pub const LOAD_POWER: Field = Field::u32("load_power", 40020, "W", 1.0);
pub const PCS_POWER: Field = Field::u32("pcs_power", 40022, "W", 1.0);
pub const PCS_EFFICIENCY: Field = Field::u32("pcs_efficiency", 40024, "%", 0.1);
pub const PCS_TEMPERATURE: Field = Field::u32("pcs_temperature", 40026, "°C", 0.1);

/// Every scalar battery field, reserved cells last. Protection registers come
/// from [`protection_fields`].
pub const BATTERY_FIELDS: [Field; 57] = [
    SYSTEM_VOLTAGE,
    SYSTEM_CURRENT,
    SYSTEM_SOC,
    SYSTEM_SOH,
    MAX_CELL_VOLTAGE,
    MIN_CELL_VOLTAGE,
    MAX_CELL_TEMPERATURE,
    MIN_CELL_TEMPERATURE,
    ALARM_CODE,
    WATCHDOG,
    SYSTEM_HEARTBEAT,
    CONNECTING,
    SERVICE_VOLTAGE,
    SERVICE_SOC,
    DIGITAL_IO,
    RACK_VOLTAGE,
    STRING_VOLTAGE,
    RACK_CURRENT,
    STRING_CURRENT,
    RACK_CURRENT_AVERAGE,
    RACK_MODE,
    RACK_SOC,
    RACK_SOH,
    CELL_VOLTAGE_MAX_1,
    CELL_VOLTAGE_MAX_2,
    CELL_VOLTAGE_AVERAGE,
    CELL_VOLTAGE_MIN_2,
    CELL_VOLTAGE_MIN_1,
    CELL_TEMPERATURE_MAX_1,
    CELL_TEMPERATURE_MAX_2,
    CELL_TEMPERATURE_AVERAGE,
    CELL_TEMPERATURE_MIN_2,
    CELL_TEMPERATURE_MIN_1,
    RACK_HEARTBEAT,
    RACK_SWITCH_CONTROL,
    RACK_SWITCH_SENSOR,
    RACK_EXTERNAL_SENSOR,
    RACK_EXTERNAL_INDICATOR,
    SYSTEM_STATUS,
    BATTERY_STATUS,
    PCS_STATUS,
    BATTERY_SOC,
    BATTERY_VOLTAGE,
    BATTERY_CURRENT,
    BATTERY_POWER,
    BATTERY_TEMPERATURE,
    GRID_VOLTAGE,
    GRID_CURRENT,
    GRID_POWER,
    LOAD_POWER,
    PCS_POWER,
    PCS_EFFICIENCY,
    PCS_TEMPERATURE,
    // reserved cells are never written and read as 0
    Field::u16("reserved", 30006, "", 1.0),
    Field::u16("reserved", 30024, "", 1.0),
    Field::u16("reserved", 30043, "", 1.0),
    Field::u16("reserved", 30048, "", 1.0),
];

/// Twelve protection fields starting at `base`, ordered major #4..#1,
/// minor #4..#1, alarm #4..#1.
pub fn protection_fields(base: u16) -> [Field; 12] {
    std::array::from_fn(|i| Field::u16("protection", base + i as u16, "", 1.0))
}

/// Protection flag values in register order (`#4` first within each bank).
fn protection_values(flags: &ProtectionFlags) -> [u16; 12] {
    let mut values = [0; 12];
    for (bank, chunk) in [flags.major, flags.minor, flags.alarm]
        .iter()
        .zip(values.chunks_mut(4))
    {
        for (slot, value) in bank.iter().rev().zip(chunk.iter_mut()) {
            *value = *slot;
        }
    }
    values
}

fn scalar_values(s: &BatterySnapshot) -> Vec<(Field, f64)> {
    let mv = |v: f64| v * 1000.0;
    let grid_voltage = s.grid_voltage_v.iter().sum::<f64>() / 3.0;
    let grid_current = s.grid_current_a.iter().sum::<f64>() / 3.0;

    vec![
        (SYSTEM_VOLTAGE, s.rack_voltage_v),
        (SYSTEM_CURRENT, s.rack_current_a),
        (SYSTEM_SOC, s.soc_pct),
        (SYSTEM_SOH, s.soh_pct),
        (MAX_CELL_VOLTAGE, mv(s.cell_voltage.max)),
        (MIN_CELL_VOLTAGE, mv(s.cell_voltage.min)),
        (MAX_CELL_TEMPERATURE, s.cell_temperature.max),
        (MIN_CELL_TEMPERATURE, s.cell_temperature.min),
        (ALARM_CODE, f64::from(s.alarm_code)),
        (WATCHDOG, f64::from(s.watchdog)),
        (SYSTEM_HEARTBEAT, (s.uptime_s % 1000) as f64),
        (CONNECTING, f64::from(CONNECTING_STATUS)),
        (SERVICE_VOLTAGE, s.rack_voltage_v),
        (SERVICE_SOC, s.soc_pct),
        (DIGITAL_IO, 0.0),
        (RACK_VOLTAGE, s.rack_voltage_v),
        (STRING_VOLTAGE, s.rack_voltage_v),
        (RACK_CURRENT, s.rack_current_a),
        (STRING_CURRENT, s.rack_current_a),
        (RACK_CURRENT_AVERAGE, s.rack_current_a),
        (RACK_MODE, f64::from(s.rack_mode)),
        (RACK_SOC, s.soc_pct),
        (RACK_SOH, s.soh_pct),
        (CELL_VOLTAGE_MAX_1, mv(s.cell_voltage.max)),
        (CELL_VOLTAGE_MAX_2, mv(s.cell_voltage.second_max)),
        (CELL_VOLTAGE_AVERAGE, mv(s.cell_voltage.average)),
        (CELL_VOLTAGE_MIN_2, mv(s.cell_voltage.second_min)),
        (CELL_VOLTAGE_MIN_1, mv(s.cell_voltage.min)),
        (CELL_TEMPERATURE_MAX_1, s.cell_temperature.max),
        (CELL_TEMPERATURE_MAX_2, s.cell_temperature.second_max),
        (CELL_TEMPERATURE_AVERAGE, s.cell_temperature.average),
        (CELL_TEMPERATURE_MIN_2, s.cell_temperature.second_min),
        (CELL_TEMPERATURE_MIN_1, s.cell_temperature.min),
        (RACK_HEARTBEAT, (s.uptime_s % 256) as f64),
        (RACK_SWITCH_CONTROL, 0.0),
        (RACK_SWITCH_SENSOR, 0.0),
        (RACK_EXTERNAL_SENSOR, 0.0),
        (RACK_EXTERNAL_INDICATOR, 0.0),
        (SYSTEM_STATUS, f64::from(s.system_status)),
        (BATTERY_STATUS, f64::from(s.battery_status)),
        (PCS_STATUS, f64::from(s.pcs_status)),
        (BATTERY_SOC, s.soc_pct),
        (BATTERY_VOLTAGE, s.rack_voltage_v),
        (BATTERY_CURRENT, s.rack_current_a),
        (BATTERY_POWER, s.rack_power_kw * 1000.0),
        (BATTERY_TEMPERATURE, s.rack_temperature_c),
        (GRID_VOLTAGE, grid_voltage),
        (GRID_CURRENT, grid_current),
        // import and consumption are published as magnitudes
        (GRID_POWER, s.grid_power_kw.abs() * 1000.0),
        (LOAD_POWER, s.load_power_kw.abs() * 1000.0),
        (PCS_POWER, s.pcs_power_kw * 1000.0),
        (PCS_EFFICIENCY, s.pcs_efficiency_pct),
        (PCS_TEMPERATURE, s.pcs_temperature_c),
    ]
}

/// Writes a battery snapshot into `table` using both battery maps.
///
/// # Errors
///
/// Returns [`TableError::OutOfRange`] if the table is too small for the map.
pub fn write_snapshot(snapshot: &BatterySnapshot, table: &mut RegisterTable) -> Result<(), TableError> {
    for (field, value) in scalar_values(snapshot) {
        field.write(table, value)?;
    }

    let flags = protection_values(&snapshot.protection);
    table.write(SYSTEM_PROTECTION_BASE, &flags)?;
    table.write(RACK_PROTECTION_BASE, &flags)?;
    Ok(())
}

/// Publishes the battery engine's snapshot into the battery endpoint's table.
pub struct BatteryPublisher {
    name: String,
    engine: Arc<BatteryEngine>,
}

impl BatteryPublisher {
    pub fn new(name: impl Into<String>, engine: Arc<BatteryEngine>) -> Self {
        Self {
            name: name.into(),
            engine,
        }
    }
}

impl RegisterPublisher for BatteryPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    fn publish(&self, table: &mut RegisterTable) -> Result<(), TableError> {
        write_snapshot(&self.engine.snapshot(), table)
    }
}
