//! Static register maps and the publishers that copy simulation snapshots
//! into an endpoint's [`RegisterTable`].

pub mod battery;
pub mod pv;

use serde::Serialize;

use crate::error::TableError;
use crate::modbus::table::RegisterTable;

pub use battery::BatteryPublisher;
pub use pv::SolarPublisher;

/// Copies the latest snapshot of some simulation into a register table.
///
/// Called with the table lock held, so a publish step is never observed
/// half-applied by a client request.
pub trait RegisterPublisher: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// Writes every mapped field into `table`.
    ///
    /// # Errors
    ///
    /// Returns [`TableError`] if a mapped address lies outside the table.
    fn publish(&self, table: &mut RegisterTable) -> Result<(), TableError>;
}

/// Register footprint of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Width {
    /// One 16-bit cell.
    U16,
    /// Two cells, high word first.
    U32,
}

impl Width {
    /// Number of cells occupied.
    pub const fn cells(self) -> u16 {
        match self {
            Self::U16 => 1,
            Self::U32 => 2,
        }
    }
}

/// One entry of a register map: address, width, engineering unit, and the
/// scale that converts a raw register value back to that unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Field {
    /// Field name as exposed to consumers.
    pub name: &'static str,
    /// First register address.
    pub address: u16,
    /// 16 or 32 bits.
    pub width: Width,
    /// Engineering unit (`"V"`, `"%"`, `"kWh"`, ...).
    pub unit: &'static str,
    /// Engineering value = raw x `scale`.
    pub scale: f64,
}

impl Field {
    /// A 16-bit field.
    pub const fn u16(name: &'static str, address: u16, unit: &'static str, scale: f64) -> Self {
        Self {
            name,
            address,
            width: Width::U16,
            unit,
            scale,
        }
    }

    /// A 32-bit word-pair field.
    pub const fn u32(name: &'static str, address: u16, unit: &'static str, scale: f64) -> Self {
        Self {
            name,
            address,
            width: Width::U32,
            unit,
            scale,
        }
    }

    /// Stores `value` (in engineering units), rounded and clamped to the width.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::OutOfRange`] if the field does not fit in `table`.
    pub fn write(&self, table: &mut RegisterTable, value: f64) -> Result<(), TableError> {
        match self.width {
            Width::U16 => table.set_scaled(self.address, value, self.scale),
            Width::U32 => table.set_scaled_u32(self.address, value, self.scale),
        }
    }

    /// Reads the field back in engineering units.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::OutOfRange`] if the field does not fit in `table`.
    pub fn read(&self, table: &RegisterTable) -> Result<f64, TableError> {
        match self.width {
            Width::U16 => table.get_scaled(self.address, self.scale),
            Width::U32 => table.get_scaled_u32(self.address, self.scale),
        }
    }

    /// One past the last cell used by this field.
    pub const fn end(&self) -> u32 {
        self.address as u32 + self.width.cells() as u32
    }
}

/// Returns the first pair of fields in `fields` whose cells overlap.
pub fn find_overlap(fields: &[Field]) -> Option<(&'static str, &'static str)> {
    let mut sorted: Vec<&Field> = fields.iter().collect();
    sorted.sort_by_key(|f| f.address);
    sorted
        .windows(2)
        .find(|pair| pair[0].end() > u32::from(pair[1].address))
        .map(|pair| (pair[0].name, pair[1].name))
}
