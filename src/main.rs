//! RGB matrix driver binary.
//!
//! Two ways to drive the panel:
//! - `demo`: draws the noise demo in the foreground until Ctrl+C
//! - `serve`: HTTP API; a render thread owns the driver, axum sends it commands
//!
//! Either way a separate scan-out thread refreshes the panel from the
//! current scan buffer. Without the `hardware` feature the scan-out only
//! mirrors frames in memory, which is enough to exercise the buffering
//! and to serve `/api/v1/snapshot.png`.
//!
//! ## Usage
//! ```sh
//! rgb-matrix-driver --mode triple demo --frame-delay-ms 20
//! sudo ./target/release/rgb-matrix-driver --columns 64 --lines 64 serve --port 8080
//! ```

use clap::{Parser, Subcommand};
use rgb_matrix_driver::demo::{self, DemoState};
use rgb_matrix_driver::render::{DriverStatus, render_loop};
use rgb_matrix_driver::scan::{MirrorScanOut, SharedSnapshot};
use rgb_matrix_driver::server::{self, AppState};
use rgb_matrix_driver::{
    BufferingMode, MatrixDriver, PanelConfig, ScanDriver, ScanPort, Wiring, is_running,
    setup_signal_handler,
};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Buffered RGB LED matrix driver
#[derive(Parser)]
#[command(name = "rgb-matrix-driver")]
#[command(about = "Single, double or triple buffered RGB LED matrix driver")]
#[command(version)]
struct Args {
    /// Number of columns on the LED panel
    #[arg(long, default_value = "32")]
    columns: u32,

    /// Number of lines (rows) on the LED panel
    #[arg(long, default_value = "32")]
    lines: u32,

    /// Framebuffer count: single, double or triple
    #[arg(long, value_enum, default_value_t = BufferingMode::Double)]
    mode: BufferingMode,

    /// How pixels are chained on the panel
    #[arg(long, value_enum, default_value_t = Wiring::RowMajor)]
    wiring: Wiring,

    /// Scan-out refresh rate in Hz
    #[arg(long, default_value = "120")]
    refresh_hz: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Draw the noise demo until Ctrl+C
    Demo {
        /// Pause between frames in milliseconds (double buffering waits at
        /// least one scan pass)
        #[arg(long, default_value = "0")]
        frame_delay_ms: u64,
    },
    /// Run the HTTP control server
    Serve {
        /// Root directory containing image files
        #[arg(long, default_value = ".")]
        media_dir: PathBuf,

        /// Port to listen on
        #[arg(long, default_value = "8080")]
        port: u16,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_ansi(false) // Disable ANSI color codes for systemd/journald
        .compact()
        .init();

    let args = Args::parse();
    let panel = PanelConfig::new(args.columns, args.lines, args.mode).with_wiring(args.wiring);

    tracing::info!("RGB matrix driver v{}", env!("CARGO_PKG_VERSION"));

    let (driver, port) = MatrixDriver::setup(panel)?;
    let running = setup_signal_handler()?;
    let (scan_handle, snapshot) = spawn_scan_out(port, panel, args.refresh_hz, running.clone())?;

    match args.command {
        Command::Demo { frame_delay_ms } => {
            let frame_delay = demo::frame_delay(
                panel.mode,
                Duration::from_millis(frame_delay_ms),
                args.refresh_hz,
            );
            run_demo(driver, &running, frame_delay);
        }
        Command::Serve { media_dir, port } => {
            let server = ServeOptions {
                panel,
                snapshot,
                media_dir,
                port,
                refresh_hz: args.refresh_hz,
            };
            // Joined only once the runtime is gone: its WebSocket tasks hold
            // command senders until then.
            let render_handle = serve(driver, server, running.clone())?;
            if render_handle.join().is_err() {
                tracing::error!("Render thread panicked");
            }
        }
    }

    running.store(false, std::sync::atomic::Ordering::SeqCst);
    if scan_handle.join().is_err() {
        tracing::error!("Scan-out thread panicked");
    }
    Ok(())
}

/// Start the refresh thread. Hardware builds drive the panel and keep the
/// in-memory mirror for snapshots.
fn spawn_scan_out(
    port: ScanPort,
    panel: PanelConfig,
    refresh_hz: u32,
    running: Arc<AtomicBool>,
) -> std::io::Result<(JoinHandle<u64>, SharedSnapshot)> {
    let mirror = MirrorScanOut::new(panel.columns, panel.lines);
    let snapshot = mirror.snapshot();

    #[cfg(feature = "hardware")]
    let handle = ScanDriver::spawn(
        port,
        move || {
            let panel_out = rgb_matrix_driver::scan::RpiScanOut::new(&panel)?;
            Ok((panel_out, mirror))
        },
        refresh_hz,
        running,
    )?;

    #[cfg(not(feature = "hardware"))]
    let handle = {
        tracing::warn!("Built without the 'hardware' feature: frames are only mirrored in memory");
        ScanDriver::spawn(port, move || Ok(mirror), refresh_hz, running)?
    };

    Ok((handle, snapshot))
}

fn run_demo(mut driver: MatrixDriver, running: &AtomicBool, frame_delay: Duration) {
    let mut state = DemoState::default();
    tracing::info!("Running demo, Ctrl+C to stop");

    while is_running(running) {
        demo::draw_frame(&mut driver, &mut state);

        if state.frames() % 1000 == 0 {
            tracing::debug!("Demo frame {}: {:?}", state.frames(), driver.stats());
        }
        if !frame_delay.is_zero() {
            std::thread::sleep(frame_delay);
        }
    }

    let stats = driver.stats();
    tracing::info!(
        "Demo stopped after {} frames ({} rotations, {} dropped)",
        state.frames(),
        stats.pool.rotations,
        stats.pool.frames_dropped
    );
}

struct ServeOptions {
    panel: PanelConfig,
    snapshot: SharedSnapshot,
    media_dir: PathBuf,
    port: u16,
    refresh_hz: u32,
}

/// Run the HTTP server until Ctrl+C. Returns the render thread's handle;
/// the thread exits once every command sender is dropped.
#[tokio::main(flavor = "current_thread")]
async fn serve(
    driver: MatrixDriver,
    options: ServeOptions,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, Box<dyn std::error::Error>> {
    let ServeOptions {
        panel,
        snapshot,
        media_dir,
        port,
        refresh_hz,
    } = options;
    let media_dir = media_dir.canonicalize().unwrap_or_else(|_| {
        tracing::warn!("Could not canonicalize media dir, using as-is");
        media_dir.clone()
    });

    tracing::info!("Panel: {}x{} ({:?} buffering)", panel.columns, panel.lines, panel.mode);
    tracing::info!("Media dir: {}", media_dir.display());

    let (tx, rx) = mpsc::channel();
    let status = Arc::new(Mutex::new(DriverStatus::new(panel)));

    let render_status = status.clone();
    let render_handle = std::thread::Builder::new()
        .name("render".to_string())
        .spawn(move || render_loop(rx, render_status, driver))?;

    let app = server::create_router(AppState {
        command_tx: tx,
        status,
        snapshot,
        media_dir,
        panel,
        refresh_hz,
        running: running.clone(),
    });

    let addr = format!("0.0.0.0:{port}");
    tracing::info!("Listening on http://{}", addr);
    tracing::info!("API Documentation: http://localhost:{}/docs", port);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            server::wait_for_shutdown(running).await;
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(render_handle)
}
