//! The noise demo: one driver caller among many.
//!
//! Each frame walks the panel line by line. Red is a counter that
//! advances (and wraps) with every pixel drawn, green and blue are
//! pseudo-random in `0..128`. All carried state lives in [`DemoState`].

use crate::buffer::Rotation;
use crate::scan::refresh_period;
use crate::{BufferingMode, Color, MatrixDriver};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DemoState {
    counter: u8,
    rng: u32,
    frames: u64,
}

impl DemoState {
    pub fn new(seed: u32) -> Self {
        Self {
            counter: 0,
            // xorshift has a fixed point at zero
            rng: if seed == 0 { 0x9E37_79B9 } else { seed },
            frames: 0,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn next_random(&mut self) -> u32 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        x
    }

    /// Color of the next pixel in drawing order.
    pub fn next_color(&mut self) -> Color {
        let r = self.counter;
        self.counter = self.counter.wrapping_add(1);
        let g = (self.next_random() % 128) as u8;
        let b = (self.next_random() % 128) as u8;
        Color::new(r, g, b)
    }
}

impl Default for DemoState {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Draw one full frame and publish it.
///
/// Single-buffered panels show the frame while it is drawn, so there is
/// nothing to rotate.
pub fn draw_frame(driver: &mut MatrixDriver, state: &mut DemoState) -> Rotation {
    let config = driver.config();
    for row in 0..config.lines {
        for column in 0..config.columns {
            let color = state.next_color();
            driver.set_pixel_at(column, row, color);
        }
    }
    state.frames += 1;

    match driver.mode() {
        BufferingMode::Single => Rotation::Unchanged,
        BufferingMode::Double | BufferingMode::Triple => driver.rotate_framebuffer(),
    }
}

/// Pause between demo frames.
///
/// Double buffering hands the slot being scanned back to the writer on
/// rotation, so frames must not be published faster than one per scan
/// pass. Other modes take the requested delay as is.
pub fn frame_delay(mode: BufferingMode, requested: Duration, refresh_hz: u32) -> Duration {
    match mode {
        BufferingMode::Double => requested.max(refresh_period(refresh_hz)),
        BufferingMode::Single | BufferingMode::Triple => requested,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PanelConfig;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn red_counts_up_per_pixel_and_wraps() {
        let mut state = DemoState::new(42);
        let reds: Vec<u8> = (0..258).map(|_| state.next_color().r).collect();
        assert_eq!(&reds[..3], &[0, 1, 2]);
        assert_eq!(reds[255], 255);
        assert_eq!(&reds[256..], &[0, 1]);
    }

    #[test]
    fn green_and_blue_stay_below_128() {
        let mut state = DemoState::new(7);
        for _ in 0..1000 {
            let c = state.next_color();
            assert!(c.g < 128 && c.b < 128, "{c:?}");
        }
    }

    #[test]
    fn zero_seed_still_produces_noise() {
        let mut state = DemoState::new(0);
        let colors: Vec<Color> = (0..16).map(|_| state.next_color()).collect();
        assert!(colors.iter().any(|c| c.g != 0 || c.b != 0));
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut a = DemoState::new(99);
        let mut b = DemoState::new(99);
        for _ in 0..50 {
            assert_eq!(a.next_color(), b.next_color());
        }
    }

    #[rstest]
    #[case(BufferingMode::Single, Rotation::Unchanged)]
    #[case(BufferingMode::Double, Rotation::Swapped)]
    #[case(BufferingMode::Triple, Rotation::Promoted { dropped: false })]
    fn draw_frame_rotates_per_mode(#[case] mode: BufferingMode, #[case] expected: Rotation) {
        let (mut driver, mut port) = MatrixDriver::setup(PanelConfig::new(4, 3, mode)).unwrap();
        let mut state = DemoState::default();

        assert_eq!(draw_frame(&mut driver, &mut state), expected);
        assert_eq!(state.frames(), 1);

        let frame = port.begin_frame();
        let reds: Vec<u8> = frame.pixels().map(|(_, _, c)| c.r).collect();
        assert_eq!(reds, (0..12).collect::<Vec<u8>>());
    }

    #[rstest]
    #[case(BufferingMode::Double, 0, 100, 10)]
    #[case(BufferingMode::Double, 50, 100, 50)]
    #[case(BufferingMode::Double, 0, 0, 1000)]
    #[case(BufferingMode::Triple, 0, 100, 0)]
    #[case(BufferingMode::Single, 0, 100, 0)]
    #[case(BufferingMode::Triple, 20, 100, 20)]
    fn double_buffered_demo_waits_for_a_scan_pass(
        #[case] mode: BufferingMode,
        #[case] requested_ms: u64,
        #[case] refresh_hz: u32,
        #[case] expected_ms: u64,
    ) {
        assert_eq!(
            frame_delay(mode, Duration::from_millis(requested_ms), refresh_hz),
            Duration::from_millis(expected_ms)
        );
    }
}
