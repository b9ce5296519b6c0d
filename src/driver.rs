//! The caller-facing writer handle.
//!
//! [`MatrixDriver::setup`] is the only way to obtain buffers: it returns
//! the writer (this type) together with the single [`ScanPort`] the
//! scan-out thread reads through. Neither handle is `Clone`, so there is
//! exactly one writer and one reader for the lifetime of the pool.

use crate::buffer::{BufferingMode, FrameBufferPool, PoolStats, RoleSnapshot, Rotation};
use crate::grid::PixelGrid;
use crate::scan::ScanPort;
use crate::{Color, PanelConfig};
use serde::Serialize;
use std::sync::Arc;

/// Counters exposed through the status endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct DriverStats {
    #[serde(flatten)]
    pub pool: PoolStats,
    /// Pixel writes dropped for falling outside the panel
    pub ignored_writes: u64,
}

pub struct MatrixDriver {
    config: PanelConfig,
    pool: Arc<FrameBufferPool>,
    brightness: u8,
    ignored_writes: u64,
}

impl MatrixDriver {
    /// Allocate the framebuffers (all black) for `config`.
    ///
    /// Fails only on a panel the pool cannot be built for; no buffer
    /// memory is allocated after this returns.
    pub fn setup(config: PanelConfig) -> Result<(Self, ScanPort), Box<dyn std::error::Error>> {
        config.validate()?;

        let pool = Arc::new(FrameBufferPool::new(config.addressing(), config.mode));
        tracing::info!(
            "Matrix driver ready: {}x{} panel, {:?} buffering ({} buffers, {:?} wiring)",
            config.columns,
            config.lines,
            config.mode,
            config.mode.buffer_count(),
            config.wiring
        );

        let driver = Self {
            config,
            pool: pool.clone(),
            brightness: 100,
            ignored_writes: 0,
        };
        Ok((driver, ScanPort::new(pool)))
    }

    pub fn config(&self) -> PanelConfig {
        self.config
    }

    pub fn mode(&self) -> BufferingMode {
        self.config.mode
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    /// Brightness (0-100) applied to every subsequent pixel write.
    pub fn set_brightness(&mut self, brightness: u8) {
        self.brightness = brightness.min(100);
    }

    /// Write one pixel into the current write buffer.
    ///
    /// Coordinates outside the panel are ignored; nothing is written.
    pub fn set_pixel_at(&mut self, column: u32, row: u32, color: Color) {
        let color = color.apply_brightness(self.brightness);
        if !self.pool.write_grid().set(column, row, color) {
            self.ignored_writes += 1;
            tracing::trace!("Ignoring out-of-range pixel ({}, {})", column, row);
        }
    }

    /// Publish the write buffer to the scan-out. A no-op in single
    /// buffering; never blocks.
    pub fn rotate_framebuffer(&mut self) -> Rotation {
        let rotation = self.pool.rotate();
        tracing::trace!("Rotated framebuffer: {:?}", rotation);
        rotation
    }

    pub fn fill(&mut self, color: Color) {
        self.pool
            .write_grid()
            .fill(color.apply_brightness(self.brightness));
    }

    pub fn clear(&mut self) {
        self.pool.write_grid().fill(Color::BLACK);
    }

    /// Write a full RGB24 frame (columns*lines*3 bytes, row-major) into
    /// the write buffer. Does not rotate.
    pub fn write_raw_frame(&mut self, data: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
        let expected = self.config.frame_byte_count();
        if data.len() != expected {
            return Err(format!(
                "Expected {} bytes ({}x{}x3 RGB), got {} bytes",
                expected,
                self.config.columns,
                self.config.lines,
                data.len()
            )
            .into());
        }

        let columns = self.config.columns;
        for (index, rgb) in data.chunks_exact(3).enumerate() {
            let column = index as u32 % columns;
            let row = index as u32 / columns;
            self.set_pixel_at(column, row, Color::new(rgb[0], rgb[1], rgb[2]));
        }
        Ok(())
    }

    /// The grid currently being drawn into.
    pub fn write_buffer(&self) -> &PixelGrid {
        self.pool.write_grid()
    }

    pub fn roles(&self) -> RoleSnapshot {
        self.pool.roles()
    }

    pub fn stats(&self) -> DriverStats {
        DriverStats {
            pool: self.pool.stats(),
            ignored_writes: self.ignored_writes,
        }
    }

    /// Read access to any slot, for inspection in tests.
    #[cfg(test)]
    pub(crate) fn slot(&self, index: usize) -> Option<&PixelGrid> {
        self.pool.slot(index)
    }
}

impl std::fmt::Debug for MatrixDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixDriver")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .field("brightness", &self.brightness)
            .finish()
    }
}
