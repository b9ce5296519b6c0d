//! Coordinate-to-storage mapping for one panel.
//!
//! Callers always speak in logical (column, row) coordinates with the
//! origin at the top-left. The mapping turns those into a linear offset
//! into a grid's storage, and rejects anything outside the panel.

use serde::{Deserialize, Serialize};

/// How pixels are laid out in storage relative to logical coordinates.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    utoipa::ToSchema,
)]
#[serde(rename_all = "kebab-case")]
pub enum Wiring {
    /// `offset = row * columns + column`
    #[default]
    RowMajor,
    /// Odd rows run right-to-left, as on zig-zag chained panels.
    Serpentine,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Addressing {
    columns: u32,
    lines: u32,
    wiring: Wiring,
}

impl Addressing {
    pub fn new(columns: u32, lines: u32, wiring: Wiring) -> Self {
        Self {
            columns,
            lines,
            wiring,
        }
    }

    pub fn columns(&self) -> u32 {
        self.columns
    }

    pub fn lines(&self) -> u32 {
        self.lines
    }

    pub fn wiring(&self) -> Wiring {
        self.wiring
    }

    /// Number of addressable cells.
    pub fn len(&self) -> usize {
        self.columns as usize * self.lines as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, column: u32, row: u32) -> bool {
        column < self.columns && row < self.lines
    }

    /// Storage offset of a logical coordinate, or `None` when it lies
    /// outside the panel.
    pub fn offset(&self, column: u32, row: u32) -> Option<usize> {
        if !self.contains(column, row) {
            return None;
        }
        let physical_column = match self.wiring {
            Wiring::RowMajor => column,
            Wiring::Serpentine if row % 2 == 1 => self.columns - 1 - column,
            Wiring::Serpentine => column,
        };
        Some(row as usize * self.columns as usize + physical_column as usize)
    }

    /// Inverse of [`Addressing::offset`].
    pub fn coordinates(&self, offset: usize) -> Option<(u32, u32)> {
        if offset >= self.len() {
            return None;
        }
        let row = (offset / self.columns as usize) as u32;
        let physical_column = (offset % self.columns as usize) as u32;
        let column = match self.wiring {
            Wiring::Serpentine if row % 2 == 1 => self.columns - 1 - physical_column,
            _ => physical_column,
        };
        Some((column, row))
    }
}
