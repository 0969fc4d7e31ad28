//! Fixed-size 16-bit register store with 32-bit word-pair and scaling helpers.

use std::sync::{Arc, Mutex};

use crate::error::TableError;

/// Number of cells in every endpoint's table.
pub const TABLE_SIZE: usize = 50_000;

/// Register table shared between the publisher and connection handlers.
///
/// One lock per table; every protocol operation and every publish step holds
/// it for its whole duration so 32-bit word pairs are never observed torn.
pub type SharedTable = Arc<Mutex<RegisterTable>>;

/// Address-indexed array of unsigned 16-bit cells.
///
/// A 32-bit value occupies two consecutive cells, high word first, and is
/// unsigned. Scaling (0.1, 0.01, ...) is a convention of the reader and writer;
/// only the raw integer is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterTable {
    cells: Vec<u16>,
}

impl Default for RegisterTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterTable {
    /// Creates a zeroed table of [`TABLE_SIZE`] cells.
    pub fn new() -> Self {
        Self::with_size(TABLE_SIZE)
    }

    /// Creates a zeroed table with `size` cells.
    pub fn with_size(size: usize) -> Self {
        Self {
            cells: vec![0; size],
        }
    }

    /// Wraps a new table in the shared handle used by endpoints.
    pub fn shared() -> SharedTable {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Number of addressable cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Returns `true` for a zero-sized table.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Returns `true` when `quantity` cells starting at `start` fit in the table.
    pub fn contains_range(&self, start: u16, quantity: u16) -> bool {
        usize::from(start) + usize::from(quantity) <= self.cells.len()
    }

    fn range(&self, start: u16, quantity: usize) -> Result<std::ops::Range<usize>, TableError> {
        let start = usize::from(start);
        let end = start + quantity;
        if end > self.cells.len() {
            return Err(TableError::OutOfRange {
                start,
                end,
                size: self.cells.len(),
            });
        }
        Ok(start..end)
    }

    /// Borrows `quantity` consecutive cells starting at `start`.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::OutOfRange`] if the range passes the end of the table.
    pub fn read(&self, start: u16, quantity: u16) -> Result<&[u16], TableError> {
        let range = self.range(start, usize::from(quantity))?;
        Ok(&self.cells[range])
    }

    /// Overwrites consecutive cells starting at `start`.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::OutOfRange`] without writing anything if the
    /// values do not fit.
    pub fn write(&mut self, start: u16, values: &[u16]) -> Result<(), TableError> {
        let range = self.range(start, values.len())?;
        self.cells[range].copy_from_slice(values);
        Ok(())
    }

    /// Reads one cell.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::OutOfRange`] for an address past the end.
    pub fn get(&self, address: u16) -> Result<u16, TableError> {
        Ok(self.read(address, 1)?[0])
    }

    /// Writes one cell.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::OutOfRange`] for an address past the end.
    pub fn set(&mut self, address: u16, value: u16) -> Result<(), TableError> {
        self.write(address, &[value])
    }

    /// Reads the word pair at `address` (high word first).
    ///
    /// # Errors
    ///
    /// Returns [`TableError::OutOfRange`] if either word is past the end.
    pub fn get_u32(&self, address: u16) -> Result<u32, TableError> {
        let words = self.read(address, 2)?;
        Ok(join_u32(words[0], words[1]))
    }

    /// Writes `value` as a word pair at `address` (high word first).
    ///
    /// # Errors
    ///
    /// Returns [`TableError::OutOfRange`] if either word is past the end.
    pub fn set_u32(&mut self, address: u16, value: u32) -> Result<(), TableError> {
        self.write(address, &split_u32(value))
    }

    /// Stores `value / scale` as a rounded, clamped 16-bit raw value.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::OutOfRange`] for an address past the end.
    pub fn set_scaled(&mut self, address: u16, value: f64, scale: f64) -> Result<(), TableError> {
        self.set(address, clamp_u16(value / scale))
    }

    /// Stores `value / scale` as a rounded, clamped 32-bit word pair.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::OutOfRange`] if either word is past the end.
    pub fn set_scaled_u32(
        &mut self,
        address: u16,
        value: f64,
        scale: f64,
    ) -> Result<(), TableError> {
        self.set_u32(address, clamp_u32(value / scale))
    }

    /// Reads a 16-bit cell and applies `scale`.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::OutOfRange`] for an address past the end.
    pub fn get_scaled(&self, address: u16, scale: f64) -> Result<f64, TableError> {
        Ok(f64::from(self.get(address)?) * scale)
    }

    /// Reads a 32-bit word pair and applies `scale`.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::OutOfRange`] if either word is past the end.
    pub fn get_scaled_u32(&self, address: u16, scale: f64) -> Result<f64, TableError> {
        Ok(f64::from(self.get_u32(address)?) * scale)
    }
}

/// Rounds to the nearest integer in `[0, 65535]`; non-finite input maps to 0.
pub fn clamp_u16(value: f64) -> u16 {
    if !value.is_finite() {
        return 0;
    }
    value.round().clamp(0.0, f64::from(u16::MAX)) as u16
}

/// Rounds to the nearest integer in `[0, 4294967295]`; non-finite input maps to 0.
pub fn clamp_u32(value: f64) -> u32 {
    if !value.is_finite() {
        return 0;
    }
    value.round().clamp(0.0, f64::from(u32::MAX)) as u32
}

/// Splits a 32-bit value into `[high, low]` words.
pub fn split_u32(value: u32) -> [u16; 2] {
    [(value >> 16) as u16, (value & 0xFFFF) as u16]
}

/// Joins a high and low word into a 32-bit value.
pub fn join_u32(high: u16, low: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_table_is_zeroed_with_fixed_size() {
        let table = RegisterTable::new();
        assert_eq!(table.len(), TABLE_SIZE);
        assert!(table.read(0, 125).unwrap().iter().all(|&v| v == 0));
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut table = RegisterTable::new();
        table.write(100, &[1, 2, 3]).unwrap();
        assert_eq!(table.read(100, 3).unwrap(), &[1, 2, 3]);
        assert_eq!(table.get(101).unwrap(), 2);
    }

    #[test]
    fn range_past_end_is_rejected() {
        let mut table = RegisterTable::with_size(10);
        assert!(table.read(8, 2).is_ok());
        assert_eq!(
            table.read(9, 2),
            Err(TableError::OutOfRange {
                start: 9,
                end: 11,
                size: 10
            })
        );
        assert!(table.write(10, &[1]).is_err());
        assert!(!table.contains_range(5, 6));
        assert!(table.contains_range(5, 5));
    }

    #[test]
    fn failed_write_leaves_table_untouched() {
        let mut table = RegisterTable::with_size(4);
        assert!(table.write(2, &[7, 7, 7]).is_err());
        assert_eq!(table.read(0, 4).unwrap(), &[0, 0, 0, 0]);
    }

    #[test]
    fn u32_is_stored_high_word_first() {
        let mut table = RegisterTable::new();
        table.set_u32(32064, 123_456).unwrap();
        assert_eq!(table.get(32064).unwrap(), 1);
        assert_eq!(table.get(32065).unwrap(), 57_920);
        assert_eq!(table.get_u32(32064).unwrap(), 123_456);
    }

    #[test]
    fn scaled_values_are_rounded_and_clamped() {
        let mut table = RegisterTable::new();
        table.set_scaled(0, 239.96, 0.1).unwrap();
        assert_eq!(table.get(0).unwrap(), 2400);

        table.set_scaled(1, -5.0, 1.0).unwrap();
        assert_eq!(table.get(1).unwrap(), 0);

        table.set_scaled(2, 1.0e9, 1.0).unwrap();
        assert_eq!(table.get(2).unwrap(), u16::MAX);

        table.set_scaled(3, f64::NAN, 1.0).unwrap();
        assert_eq!(table.get(3).unwrap(), 0);

        table.set_scaled_u32(10, 123_456.78, 0.1).unwrap();
        assert_eq!(table.get_u32(10).unwrap(), 1_234_568);
        assert!((table.get_scaled_u32(10, 0.1).unwrap() - 123_456.8).abs() < 1e-6);
    }

    #[test]
    fn clamp_helpers_cover_edges() {
        assert_eq!(clamp_u16(f64::INFINITY), 0);
        assert_eq!(clamp_u16(65_535.4), 65_535);
        assert_eq!(clamp_u16(0.5), 1);
        assert_eq!(clamp_u32(-1.0), 0);
        assert_eq!(clamp_u32(5.0e12), u32::MAX);
        assert_eq!(split_u32(0xDEAD_BEEF), [0xDEAD, 0xBEEF]);
        assert_eq!(join_u32(0xDEAD, 0xBEEF), 0xDEAD_BEEF);
    }
}
