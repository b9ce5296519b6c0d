//! Render thread: owns the [`MatrixDriver`] and processes commands via a channel.
//!
//! The driver has exactly one writer, so every drawing request from the
//! HTTP server is funnelled through an `mpsc` channel into this thread.
//! Scan-out runs on its own thread and never talks to this one.

use crate::demo::{self, DemoState};
use crate::driver::DriverStats;
use crate::{BufferingMode, Color, MatrixDriver, PanelConfig};
use image::RgbImage;
use image::imageops::FilterType;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

// ── Commands ─────────────────────────────────────────────────────────

/// Commands sent from the HTTP server to the render thread.
#[derive(Debug)]
pub enum RenderCommand {
    /// Write one pixel into the write buffer (no rotation)
    SetPixel {
        column: u32,
        row: u32,
        color: (u8, u8, u8),
    },
    /// Publish the write buffer
    Rotate,
    /// Display a raw RGB frame (columns*lines*3 bytes), then rotate
    ShowFrame(Vec<u8>),
    /// Display an image file, resized to the panel, then rotate
    ShowImage(PathBuf),
    /// Fill the whole panel with one color, then rotate
    Fill((u8, u8, u8)),
    /// Clear the display (all pixels off)
    Clear,
    /// Run the noise demo until another command arrives
    RunDemo { frame_delay: Duration },
    /// Stop current playback and go idle
    Stop,
    /// Set display brightness (0-100)
    SetBrightness(u8),
}

// ── Status ───────────────────────────────────────────────────────────

/// What the display is currently doing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DisplayState {
    Idle,
    /// Pixels written since the last rotation
    Drawing,
    ShowingImage,
    ShowingFrame,
    Streaming,
    RunningDemo,
}

/// Shared status that the HTTP server reads to report current state.
#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct DriverStatus {
    /// Current display state
    pub state: DisplayState,
    /// Currently displayed media (if any)
    pub current_media: Option<String>,
    /// Panel dimensions and buffering mode
    pub panel: PanelConfig,
    /// Rotation and write counters
    pub stats: DriverStats,
    /// Current brightness (0-100)
    pub brightness: u8,
    /// Server version
    pub version: String,
}

impl DriverStatus {
    pub fn new(panel: PanelConfig) -> Self {
        Self {
            state: DisplayState::Idle,
            current_media: None,
            panel,
            stats: DriverStats::default(),
            brightness: 100,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn set_idle(&mut self) {
        self.state = DisplayState::Idle;
        self.current_media = None;
    }

    fn set_state(&mut self, state: DisplayState, media: Option<String>) {
        self.state = state;
        self.current_media = media;
    }
}

// ── Helper functions ─────────────────────────────────────────────────

/// Load an image from disk and resize it to the panel dimensions.
pub fn load_and_resize_image(
    path: &Path,
    panel: PanelConfig,
) -> Result<RgbImage, Box<dyn std::error::Error>> {
    let img = image::ImageReader::open(path)?.decode()?;
    let resized = img
        .resize_exact(panel.columns, panel.lines, FilterType::Lanczos3)
        .to_rgb8();
    Ok(resized)
}

/// Draw an RgbImage into the driver's write buffer pixel by pixel.
pub fn draw_image(driver: &mut MatrixDriver, img: &RgbImage) {
    for (x, y, pixel) in img.enumerate_pixels() {
        driver.set_pixel_at(x, y, Color::new(pixel[0], pixel[1], pixel[2]));
    }
}

/// Rotate if the mode has something to rotate, and mirror counters into status.
fn publish(driver: &mut MatrixDriver, status: &Mutex<DriverStatus>) {
    if driver.mode() != BufferingMode::Single {
        driver.rotate_framebuffer();
    }
    status.lock().unwrap().stats = driver.stats();
}

// ── Render loop ──────────────────────────────────────────────────────

/// Main render loop — runs on a dedicated thread, owns the driver.
///
/// Returns when the channel is closed (all senders dropped), including
/// while the demo is running.
///
/// ## Interrupt pattern
/// While the demo runs, `try_recv()` is polled between frames. A new
/// command is stored in `pending_cmd` and handled by the outer loop
/// instead of blocking on `recv()`.
pub fn render_loop(
    rx: Receiver<RenderCommand>,
    status: Arc<Mutex<DriverStatus>>,
    mut driver: MatrixDriver,
) {
    let panel = driver.config();
    let mut pending_cmd: Option<RenderCommand> = None;

    tracing::info!("Render thread started, waiting for commands...");

    'commands: loop {
        let cmd = if let Some(cmd) = pending_cmd.take() {
            cmd
        } else {
            match rx.recv() {
                Ok(cmd) => cmd,
                Err(_) => {
                    tracing::info!("Render thread: channel closed, shutting down.");
                    break;
                }
            }
        };

        match cmd {
            RenderCommand::SetPixel { column, row, color } => {
                driver.set_pixel_at(column, row, color.into());
                let mut s = status.lock().unwrap();
                s.set_state(DisplayState::Drawing, None);
                s.stats = driver.stats();
            }

            RenderCommand::Rotate => {
                let rotation = driver.rotate_framebuffer();
                tracing::debug!("Rotation requested: {:?}", rotation);
                status.lock().unwrap().stats = driver.stats();
            }

            RenderCommand::ShowFrame(data) => match driver.write_raw_frame(&data) {
                Ok(()) => {
                    publish(&mut driver, &status);
                    let mut s = status.lock().unwrap();
                    if s.state != DisplayState::Streaming {
                        s.set_state(DisplayState::ShowingFrame, None);
                    }
                }
                Err(e) => tracing::error!("Invalid frame: {}", e),
            },

            RenderCommand::ShowImage(path) => {
                let path_str = path.display().to_string();
                match load_and_resize_image(&path, panel) {
                    Ok(img) => {
                        draw_image(&mut driver, &img);
                        publish(&mut driver, &status);
                        status
                            .lock()
                            .unwrap()
                            .set_state(DisplayState::ShowingImage, Some(path_str.clone()));
                        tracing::info!("Displaying image: {}", path_str);
                    }
                    Err(e) => {
                        tracing::error!("Failed to load image {}: {}", path_str, e);
                        status.lock().unwrap().set_idle();
                    }
                }
            }

            RenderCommand::Fill(color) => {
                driver.fill(color.into());
                publish(&mut driver, &status);
                status.lock().unwrap().set_state(DisplayState::ShowingFrame, None);
            }

            RenderCommand::Clear => {
                driver.clear();
                publish(&mut driver, &status);
                status.lock().unwrap().set_idle();
            }

            RenderCommand::Stop => {
                status.lock().unwrap().set_idle();
            }

            RenderCommand::SetBrightness(value) => {
                driver.set_brightness(value);
                status.lock().unwrap().brightness = driver.brightness();
            }

            RenderCommand::RunDemo { frame_delay } => {
                status
                    .lock()
                    .unwrap()
                    .set_state(DisplayState::RunningDemo, Some("demo".to_string()));
                tracing::info!("Running demo ({:?} between frames)", frame_delay);

                let mut state = DemoState::default();

                'demo: loop {
                    match rx.try_recv() {
                        Ok(RenderCommand::SetBrightness(value)) => {
                            driver.set_brightness(value);
                            status.lock().unwrap().brightness = driver.brightness();
                        }
                        Ok(new_cmd) => {
                            pending_cmd = Some(new_cmd);
                            break 'demo;
                        }
                        Err(TryRecvError::Empty) => {}
                        Err(TryRecvError::Disconnected) => {
                            tracing::info!(
                                "Render thread: channel closed during demo ({} frames), shutting down.",
                                state.frames()
                            );
                            status.lock().unwrap().set_idle();
                            break 'commands;
                        }
                    }

                    demo::draw_frame(&mut driver, &mut state);
                    status.lock().unwrap().stats = driver.stats();

                    if !frame_delay.is_zero() {
                        thread::sleep(frame_delay);
                    }
                }

                tracing::info!("Demo stopped after {} frames", state.frames());
            }
        }
    }
}
