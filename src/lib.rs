//! Frame-buffered driver for RGB LED matrix panels.
//!
//! The driver keeps one, two or three framebuffers in memory and hands
//! exactly one of them at a time to a scan-out collaborator (the hardware
//! refresh thread), while the caller draws into another:
//! - [`grid`] holds one frame of color triples
//! - [`addressing`] maps (column, row) onto storage offsets
//! - [`buffer`] owns the framebuffers and rotates their roles
//! - [`driver`] is the caller-facing writer handle
//! - [`scan`] runs the background scan-out cadence
//!
//! The `render` and `server` modules wrap the driver in an HTTP control
//! surface, and [`demo`] reproduces the classic noise demo loop.

pub mod addressing;
pub mod buffer;
pub mod demo;
pub mod driver;
pub mod grid;
pub mod render;
pub mod scan;
pub mod server;

pub use addressing::{Addressing, Wiring};
pub use buffer::{BufferingMode, Rotation, SlotRole};
pub use driver::MatrixDriver;
pub use grid::PixelGrid;
pub use scan::{ScanDriver, ScanFrame, ScanOut, ScanPort};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Largest accepted panel edge, in pixels.
pub const MAX_DIMENSION: u32 = 512;

// ── Panel configuration ────────────────────────────────────────────

/// Configuration for the LED panel and its buffering.
///
/// Fixed once the driver is set up: nothing in the crate changes the
/// dimensions or the buffering mode of a live driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct PanelConfig {
    pub columns: u32,
    pub lines: u32,
    pub mode: BufferingMode,
    pub wiring: Wiring,
}

impl PanelConfig {
    pub fn new(columns: u32, lines: u32, mode: BufferingMode) -> Self {
        Self {
            columns,
            lines,
            mode,
            wiring: Wiring::RowMajor,
        }
    }

    pub fn with_wiring(self, wiring: Wiring) -> Self {
        Self { wiring, ..self }
    }

    /// Total number of pixels on the panel.
    pub fn pixel_count(&self) -> u32 {
        self.lines * self.columns
    }

    /// Number of bytes needed for a raw RGB frame (3 bytes per pixel).
    pub fn frame_byte_count(&self) -> usize {
        (self.lines * self.columns * 3) as usize
    }

    pub fn addressing(&self) -> Addressing {
        Addressing::new(self.columns, self.lines, self.wiring)
    }

    /// Reject panels the driver cannot allocate buffers for.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.columns == 0 || self.lines == 0 {
            return Err(format!(
                "Panel dimensions must be non-zero, got {}x{}",
                self.columns, self.lines
            )
            .into());
        }
        if self.columns > MAX_DIMENSION || self.lines > MAX_DIMENSION {
            return Err(format!(
                "Panel dimensions {}x{} exceed the {}px limit",
                self.columns, self.lines, MAX_DIMENSION
            )
            .into());
        }
        Ok(())
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self::new(32, 32, BufferingMode::Double)
    }
}

// ── Color ──────────────────────────────────────────────────────────

/// One RGB triple, 8 bits per channel.
///
/// Kept independent of the hardware crate so everything above the
/// scan-out boundary builds and tests without `rpi-led-matrix`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Create a color from a hue value (0-360), with full saturation and brightness.
    pub fn from_hue(hue: u16) -> Self {
        let hue = hue % 360;
        let sector = hue / 60;
        let fraction = ((hue % 60) as f32) / 60.0;
        let rising = (fraction * 255.0) as u8;
        let falling = ((1.0 - fraction) * 255.0) as u8;

        match sector {
            0 => Self::new(255, rising, 0),
            1 => Self::new(falling, 255, 0),
            2 => Self::new(0, 255, rising),
            3 => Self::new(0, falling, 255),
            4 => Self::new(rising, 0, 255),
            _ => Self::new(255, 0, falling),
        }
    }

    /// Apply brightness scaling (0-100) to this color.
    pub fn apply_brightness(self, brightness: u8) -> Self {
        if brightness >= 100 {
            return self;
        }
        Self {
            r: ((self.r as u16 * brightness as u16) / 100) as u8,
            g: ((self.g as u16 * brightness as u16) / 100) as u8,
            b: ((self.b as u16 * brightness as u16) / 100) as u8,
        }
    }

    /// Pack into the `0x00RRGGBB` word stored in grid cells.
    pub const fn to_word(self) -> u32 {
        ((self.r as u32) << 16) | ((self.g as u32) << 8) | self.b as u32
    }

    pub const fn from_word(word: u32) -> Self {
        Self::new((word >> 16) as u8, (word >> 8) as u8, word as u8)
    }
}

impl From<(u8, u8, u8)> for Color {
    fn from((r, g, b): (u8, u8, u8)) -> Self {
        Self::new(r, g, b)
    }
}

impl From<Color> for (u8, u8, u8) {
    fn from(c: Color) -> Self {
        (c.r, c.g, c.b)
    }
}

/// Convert our Color to the hardware crate's LedColor at the boundary.
#[cfg(feature = "hardware")]
impl From<Color> for rpi_led_matrix::LedColor {
    fn from(c: Color) -> Self {
        rpi_led_matrix::LedColor {
            red: c.r,
            green: c.g,
            blue: c.b,
        }
    }
}

// ── Shutdown flag ──────────────────────────────────────────────────

/// Set up a Ctrl+C handler that clears the returned `running` flag.
///
/// The same flag is handed to the scan thread, so one Ctrl+C stops both
/// the draw loop and the scan-out cadence.
pub fn setup_signal_handler() -> Result<Arc<AtomicBool>, ctrlc::Error> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    Ok(running)
}

/// Check if the main loop should keep running.
pub fn is_running(running: &AtomicBool) -> bool {
    running.load(Ordering::SeqCst)
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    // ── PanelConfig tests ──────────────────────────────────────────

    #[test]
    fn panel_config_default_is_32x32_double_buffered() {
        let panel = PanelConfig::default();
        assert_eq!(panel.columns, 32);
        assert_eq!(panel.lines, 32);
        assert_eq!(panel.mode, BufferingMode::Double);
        assert_eq!(panel.wiring, Wiring::RowMajor);
    }

    #[rstest]
    #[case(64, 64, 12288)]
    #[case(32, 16, 1536)]
    #[case(2, 2, 12)]
    fn test_frame_byte_count(#[case] columns: u32, #[case] lines: u32, #[case] expected: usize) {
        let panel = PanelConfig::new(columns, lines, BufferingMode::Single);
        assert_eq!(panel.frame_byte_count(), expected);
    }

    #[rstest]
    #[case(64, 64, 4096)]
    #[case(32, 16, 512)]
    #[case(4, 2, 8)]
    fn test_pixel_count(#[case] columns: u32, #[case] lines: u32, #[case] expected: u32) {
        let panel = PanelConfig::new(columns, lines, BufferingMode::Triple);
        assert_eq!(panel.pixel_count(), expected);
    }

    #[rstest]
    #[case(0, 16)]
    #[case(32, 0)]
    #[case(MAX_DIMENSION + 1, 16)]
    #[case(32, MAX_DIMENSION + 1)]
    fn validate_rejects_bad_dimensions(#[case] columns: u32, #[case] lines: u32) {
        let panel = PanelConfig::new(columns, lines, BufferingMode::Double);
        assert!(panel.validate().is_err());
    }

    #[test]
    fn validate_accepts_edge_sizes() {
        assert!(PanelConfig::new(1, 1, BufferingMode::Single).validate().is_ok());
        let big = PanelConfig::new(MAX_DIMENSION, MAX_DIMENSION, BufferingMode::Triple);
        assert!(big.validate().is_ok());
    }

    #[test]
    fn panel_config_serializes_mode_and_wiring() {
        let panel = PanelConfig::new(4, 2, BufferingMode::Triple).with_wiring(Wiring::Serpentine);
        let json = serde_json::to_value(panel).unwrap();
        assert_eq!(json["mode"], "triple");
        assert_eq!(json["wiring"], "serpentine");
        assert_eq!(json["columns"], 4);
    }

    // ── Color tests ────────────────────────────────────────────────

    #[rstest]
    #[case(0, 255, 0, 0)]
    #[case(60, 255, 255, 0)]
    #[case(120, 0, 255, 0)]
    #[case(180, 0, 255, 255)]
    #[case(240, 0, 0, 255)]
    #[case(300, 255, 0, 255)]
    fn test_color_from_hue_primary(#[case] hue: u16, #[case] r: u8, #[case] g: u8, #[case] b: u8) {
        assert_eq!(Color::from_hue(hue), Color::new(r, g, b));
    }

    #[test]
    fn color_from_hue_wraps_at_360() {
        assert_eq!(Color::from_hue(0), Color::from_hue(360));
        assert_eq!(Color::from_hue(90), Color::from_hue(450));
    }

    #[test]
    fn apply_brightness_100_is_identity() {
        let c = Color::new(100, 200, 50);
        assert_eq!(c.apply_brightness(100), c);
        assert_eq!(c.apply_brightness(255), c);
    }

    #[test]
    fn apply_brightness_scales_channels() {
        assert_eq!(Color::new(255, 255, 255).apply_brightness(0), Color::BLACK);
        assert_eq!(Color::new(200, 100, 50).apply_brightness(50), Color::new(100, 50, 25));
    }

    #[rstest]
    #[case(Color::new(0, 0, 0), 0x0000_0000)]
    #[case(Color::new(255, 0, 0), 0x00FF_0000)]
    #[case(Color::new(10, 20, 30), 0x000A_141E)]
    fn color_word_packing(#[case] color: Color, #[case] word: u32) {
        assert_eq!(color.to_word(), word);
        assert_eq!(Color::from_word(word), color);
    }

    #[test]
    fn color_converts_from_tuple() {
        assert_eq!(Color::from((1, 2, 3)), Color::new(1, 2, 3));
        assert_eq!(<(u8, u8, u8)>::from(Color::new(4, 5, 6)), (4, 5, 6));
    }
}
