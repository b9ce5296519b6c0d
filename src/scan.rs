//! Scan-out side: the reader handle and the background refresh thread.
//!
//! A physical panel has to be refreshed continuously whether or not the
//! caller is drawing. [`ScanDriver::spawn`] runs that refresh on its own
//! thread: each pass latches the current scan buffer through a
//! [`ScanFrame`] and hands it to a [`ScanOut`] backend.

use crate::buffer::{FrameBufferPool, PoolStats};
use crate::grid::PixelGrid;
use crate::{Addressing, Color, is_running};
use image::RgbImage;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

// ── Reader handle ────────────────────────────────────────────────────

/// The single reader of a framebuffer pool. Obtained from
/// [`crate::MatrixDriver::setup`].
pub struct ScanPort {
    pool: Arc<FrameBufferPool>,
}

impl ScanPort {
    pub(crate) fn new(pool: Arc<FrameBufferPool>) -> Self {
        Self { pool }
    }

    /// Latch the current scan buffer for one pass. A pending triple-buffer
    /// frame is picked up here. Never blocks.
    pub fn begin_frame(&mut self) -> ScanFrame<'_> {
        let slot = self.pool.begin_scan();
        ScanFrame {
            pool: &self.pool,
            grid: self.pool.scan_grid(slot),
            slot,
        }
    }

    pub fn addressing(&self) -> Addressing {
        self.pool.addressing()
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

/// Read-only view of one frame, held for the length of a scan pass.
///
/// The slot is latched: a rotation during the pass does not move the view
/// to another buffer. With triple buffering the writer never draws into a
/// latched slot. With double buffering a rotation hands this slot back to
/// the writer, so the writer should rotate no faster than the refresh.
pub struct ScanFrame<'a> {
    pool: &'a FrameBufferPool,
    grid: &'a PixelGrid,
    slot: usize,
}

impl ScanFrame<'_> {
    /// Index of the buffer being scanned.
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn columns(&self) -> u32 {
        self.grid.columns()
    }

    pub fn lines(&self) -> u32 {
        self.grid.lines()
    }

    pub fn get(&self, column: u32, row: u32) -> Option<Color> {
        self.grid.get(column, row)
    }

    pub fn pixels(&self) -> impl Iterator<Item = (u32, u32, Color)> + '_ {
        self.grid.pixels()
    }

    pub fn copy_rgb_into(&self, out: &mut [u8]) {
        self.grid.copy_rgb_into(out);
    }

    pub fn to_rgb_image(&self) -> RgbImage {
        let mut img = RgbImage::new(self.columns(), self.lines());
        self.copy_rgb_into(&mut img);
        img
    }
}

impl Drop for ScanFrame<'_> {
    fn drop(&mut self) {
        self.pool.end_scan();
    }
}

// ── Backends ─────────────────────────────────────────────────────────

/// Something that consumes one frame per scan pass.
pub trait ScanOut {
    fn present(&mut self, frame: &ScanFrame<'_>);
}

/// Present to two backends in turn.
impl<A: ScanOut, B: ScanOut> ScanOut for (A, B) {
    fn present(&mut self, frame: &ScanFrame<'_>) {
        self.0.present(frame);
        self.1.present(frame);
    }
}

/// Last scanned frame, shared with whoever wants to look at it.
pub type SharedSnapshot = Arc<Mutex<RgbImage>>;

/// Keeps a copy of the latest scanned frame in memory.
///
/// Uses `try_lock`: if a reader holds the snapshot, the pass skips the
/// copy instead of stalling the refresh.
pub struct MirrorScanOut {
    latest: SharedSnapshot,
}

impl MirrorScanOut {
    pub fn new(columns: u32, lines: u32) -> Self {
        Self {
            latest: Arc::new(Mutex::new(RgbImage::new(columns, lines))),
        }
    }

    pub fn snapshot(&self) -> SharedSnapshot {
        self.latest.clone()
    }
}

impl ScanOut for MirrorScanOut {
    fn present(&mut self, frame: &ScanFrame<'_>) {
        if let Ok(mut img) = self.latest.try_lock() {
            frame.copy_rgb_into(&mut img);
        }
    }
}

// ── Refresh thread ───────────────────────────────────────────────────

/// Time budget of one scan pass at `refresh_hz` (0 is treated as 1 Hz).
pub fn refresh_period(refresh_hz: u32) -> Duration {
    Duration::from_micros(1_000_000 / refresh_hz.max(1) as u64)
}

pub struct ScanDriver;

impl ScanDriver {
    /// Spawn the refresh thread.
    ///
    /// The backend is built on the new thread by `make_out`, since
    /// hardware handles are generally not `Send`. The thread presents one
    /// frame per `1 / refresh_hz` seconds until `running` clears, then
    /// returns the number of passes it made.
    pub fn spawn<O, F>(
        mut port: ScanPort,
        make_out: F,
        refresh_hz: u32,
        running: Arc<AtomicBool>,
    ) -> std::io::Result<JoinHandle<u64>>
    where
        O: ScanOut,
        F: FnOnce() -> Result<O, Box<dyn std::error::Error>> + Send + 'static,
    {
        thread::Builder::new()
            .name("scan-out".to_string())
            .spawn(move || {
                let mut out = match make_out() {
                    Ok(out) => out,
                    Err(e) => {
                        tracing::error!("Failed to initialize scan-out: {}", e);
                        return 0;
                    }
                };

                let period = refresh_period(refresh_hz);
                let mut passes: u64 = 0;
                let mut slow_passes: u64 = 0;

                tracing::info!("Scan-out started at {} Hz", refresh_hz);

                while is_running(&running) {
                    let pass_start = Instant::now();
                    {
                        let frame = port.begin_frame();
                        out.present(&frame);
                    }
                    passes += 1;

                    let elapsed = pass_start.elapsed();
                    if elapsed > period {
                        slow_passes += 1;
                        if slow_passes <= 5 {
                            tracing::warn!(
                                "Scan pass {} took {}µs (target: {}µs)",
                                passes,
                                elapsed.as_micros(),
                                period.as_micros()
                            );
                        }
                    } else {
                        thread::sleep(period - elapsed);
                    }
                }

                if slow_passes > 0 {
                    tracing::warn!("Scan-out had {} slow passes out of {}", slow_passes, passes);
                }
                tracing::info!("Scan-out stopped after {} passes", passes);
                passes
            })
    }
}

// ── Hardware ─────────────────────────────────────────────────────────

#[cfg(feature = "hardware")]
pub use hardware::{RpiScanOut, create_matrix};

#[cfg(feature = "hardware")]
mod hardware {
    use super::{ScanFrame, ScanOut};
    use crate::PanelConfig;
    use rpi_led_matrix::{LedCanvas, LedMatrix, LedMatrixOptions, LedRuntimeOptions};

    /// Create a matrix configured for our hardware:
    /// Pi Zero 2 W + Adafruit Bonnet + configurable panel size.
    pub fn create_matrix(panel: &PanelConfig) -> Result<LedMatrix, Box<dyn std::error::Error>> {
        let mut options = LedMatrixOptions::new();
        options.set_rows(panel.lines);
        options.set_cols(panel.columns);
        options.set_hardware_mapping("adafruit-hat");
        options.set_pwm_bits(8)?;
        options.set_pwm_lsb_nanoseconds(130);

        let mut rt_options = LedRuntimeOptions::new();
        rt_options.set_gpio_slowdown(2); // Pi Zero 2 W requires slowdown=2

        let matrix = LedMatrix::new(Some(options), Some(rt_options))?;
        Ok(matrix)
    }

    /// Pushes each scanned frame to an `rpi-led-matrix` panel.
    pub struct RpiScanOut {
        matrix: LedMatrix,
        canvas: Option<LedCanvas>,
    }

    impl RpiScanOut {
        pub fn new(panel: &PanelConfig) -> Result<Self, Box<dyn std::error::Error>> {
            let matrix = create_matrix(panel)?;
            let canvas = matrix.offscreen_canvas();
            Ok(Self {
                matrix,
                canvas: Some(canvas),
            })
        }
    }

    impl ScanOut for RpiScanOut {
        fn present(&mut self, frame: &ScanFrame<'_>) {
            let Some(mut canvas) = self.canvas.take() else {
                return;
            };
            for (x, y, color) in frame.pixels() {
                canvas.set(x as i32, y as i32, &color.into());
            }
            self.canvas = Some(self.matrix.swap(canvas));
        }
    }
}
