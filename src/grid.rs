//! One frame worth of pixels.
//!
//! Each cell is an `AtomicU32` holding a packed `0x00RRGGBB` word, so a
//! grid can be written by the drawing thread and read by the scan-out
//! thread without locks. Which thread may touch which grid is decided by
//! the buffer roles in [`crate::buffer`], not here.

use crate::Color;
use crate::addressing::Addressing;
use std::sync::atomic::{AtomicU32, Ordering};

pub struct PixelGrid {
    addressing: Addressing,
    cells: Box<[AtomicU32]>,
}

impl PixelGrid {
    /// Allocate a grid with every pixel black.
    pub fn new(addressing: Addressing) -> Self {
        let cells = (0..addressing.len()).map(|_| AtomicU32::new(0)).collect();
        Self { addressing, cells }
    }

    pub fn addressing(&self) -> Addressing {
        self.addressing
    }

    pub fn columns(&self) -> u32 {
        self.addressing.columns()
    }

    pub fn lines(&self) -> u32 {
        self.addressing.lines()
    }

    /// Write one pixel. Returns `false`, touching nothing, when the
    /// coordinate is outside the grid.
    pub fn set(&self, column: u32, row: u32, color: Color) -> bool {
        match self.addressing.offset(column, row) {
            Some(offset) => {
                self.cells[offset].store(color.to_word(), Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, column: u32, row: u32) -> Option<Color> {
        self.addressing
            .offset(column, row)
            .map(|offset| Color::from_word(self.cells[offset].load(Ordering::Relaxed)))
    }

    pub fn fill(&self, color: Color) {
        let word = color.to_word();
        for cell in self.cells.iter() {
            cell.store(word, Ordering::Relaxed);
        }
    }

    /// Iterate pixels in logical row-major order as `(column, row, color)`.
    pub fn pixels(&self) -> impl Iterator<Item = (u32, u32, Color)> + '_ {
        let columns = self.columns();
        (0..self.lines()).flat_map(move |row| {
            (0..columns).filter_map(move |column| self.get(column, row).map(|c| (column, row, c)))
        })
    }

    /// Copy as raw RGB24 bytes in logical row-major order.
    pub fn copy_rgb_into(&self, out: &mut [u8]) {
        for ((_, _, color), chunk) in self.pixels().zip(out.chunks_exact_mut(3)) {
            chunk.copy_from_slice(&[color.r, color.g, color.b]);
        }
    }
}

impl std::fmt::Debug for PixelGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelGrid")
            .field("columns", &self.columns())
            .field("lines", &self.lines())
            .field("wiring", &self.addressing.wiring())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Wiring;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn grid(columns: u32, lines: u32, wiring: Wiring) -> PixelGrid {
        PixelGrid::new(Addressing::new(columns, lines, wiring))
    }

    #[test]
    fn new_grid_is_black() {
        let g = grid(8, 4, Wiring::RowMajor);
        assert!(g.pixels().all(|(_, _, c)| c == Color::BLACK));
        assert_eq!(g.pixels().count(), 32);
    }

    #[rstest]
    #[case(Wiring::RowMajor)]
    #[case(Wiring::Serpentine)]
    fn set_then_get_round_trips_every_cell(#[case] wiring: Wiring) {
        let g = grid(7, 5, wiring);
        for row in 0..5 {
            for column in 0..7 {
                let color = Color::new(column as u8 * 30, row as u8 * 40, (column + row) as u8);
                assert!(g.set(column, row, color));
            }
        }
        for row in 0..5 {
            for column in 0..7 {
                let expected = Color::new(column as u8 * 30, row as u8 * 40, (column + row) as u8);
                assert_eq!(g.get(column, row), Some(expected));
            }
        }
    }

    #[rstest]
    #[case(4, 0)]
    #[case(0, 3)]
    #[case(100, 100)]
    #[case(u32::MAX, u32::MAX)]
    fn out_of_range_set_leaves_grid_untouched(#[case] column: u32, #[case] row: u32) {
        let g = grid(4, 3, Wiring::RowMajor);
        g.fill(Color::new(1, 2, 3));

        assert!(!g.set(column, row, Color::new(255, 255, 255)));

        assert!(g.pixels().all(|(_, _, c)| c == Color::new(1, 2, 3)));
        assert_eq!(g.get(column, row), None);
    }

    #[test]
    fn set_touches_only_one_cell() {
        let g = grid(3, 3, Wiring::Serpentine);
        g.set(2, 1, Color::new(9, 9, 9));
        let lit: Vec<_> = g.pixels().filter(|(_, _, c)| *c != Color::BLACK).collect();
        assert_eq!(lit, vec![(2, 1, Color::new(9, 9, 9))]);
    }

    #[test]
    fn pixels_are_in_logical_order_regardless_of_wiring() {
        let g = grid(2, 2, Wiring::Serpentine);
        g.set(0, 1, Color::new(0, 0, 255));
        g.set(1, 1, Color::new(10, 20, 30));

        let mut rgb = vec![0u8; 12];
        g.copy_rgb_into(&mut rgb);
        assert_eq!(rgb, vec![0, 0, 0, 0, 0, 0, 0, 0, 255, 10, 20, 30]);
    }
}
