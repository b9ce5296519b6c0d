//! HTTP API server: axum router and request handlers.
//!
//! Handlers never touch the framebuffers directly. Drawing requests go to
//! the render thread over an `mpsc` channel; the snapshot endpoint reads
//! the copy the scan-out thread keeps of the last scanned frame.

use crate::render::{DisplayState, DriverStatus, RenderCommand};
use crate::scan::SharedSnapshot;
use crate::{PanelConfig, demo, is_running};
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use serde::Deserialize;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

// ── App State ────────────────────────────────────────────────────────

/// Shared application state, passed to every handler via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Channel to send commands to the render thread
    pub command_tx: Sender<RenderCommand>,
    /// Shared driver status (render thread writes, handlers read)
    pub status: Arc<Mutex<DriverStatus>>,
    /// Last frame presented by the scan-out thread
    pub snapshot: SharedSnapshot,
    /// Root directory for image files
    pub media_dir: PathBuf,
    /// Panel dimensions and buffering
    pub panel: PanelConfig,
    /// Scan-out refresh rate, paces the double-buffered demo
    pub refresh_hz: u32,
    /// Cleared by the Ctrl+C handler; open WebSocket streams close on it
    pub running: Arc<AtomicBool>,
}

// ── OpenAPI Documentation ────────────────────────────────────────────

#[derive(OpenApi)]
#[openapi(
    paths(
        get_status,
        get_snapshot,
        post_pixel,
        post_rotate,
        post_display_image,
        post_display_fill,
        post_display_demo,
        post_display_clear,
        post_display_stop,
        post_brightness,
    ),
    components(schemas(
        DriverStatus,
        DisplayState,
        PixelRequest,
        FillRequest,
        DemoRequest,
        ImageRequest,
        BrightnessRequest,
    )),
    tags(
        (name = "display", description = "Drawing and buffer rotation"),
        (name = "system", description = "Driver status"),
    ),
    info(
        title = "RGB Matrix Driver API",
        version = env!("CARGO_PKG_VERSION"),
        description = "HTTP API for drawing into a buffered RGB LED matrix"
    )
)]
pub struct ApiDoc;

// ── Request types ────────────────────────────────────────────────────

#[derive(Deserialize, utoipa::ToSchema)]
pub struct PixelRequest {
    /// Column, 0 at the left edge
    #[schema(example = 3)]
    column: u32,
    /// Row, 0 at the top edge
    #[schema(example = 5)]
    row: u32,
    /// RGB color array [red, green, blue] where each value is 0-255
    #[schema(value_type = Vec<u8>, example = "[255, 0, 0]")]
    color: (u8, u8, u8),
    /// Publish the write buffer right after this pixel
    #[serde(default)]
    #[schema(default = false)]
    rotate: bool,
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct FillRequest {
    /// RGB color array [red, green, blue] where each value is 0-255
    #[schema(value_type = Vec<u8>, example = "[0, 0, 255]")]
    color: (u8, u8, u8),
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct DemoRequest {
    /// Pause between demo frames in milliseconds. Double buffering never
    /// goes below one scan pass.
    #[serde(default)]
    #[schema(example = 20, default = 0)]
    frame_delay_ms: u64,
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct ImageRequest {
    /// Path to image file relative to media directory
    #[schema(example = "images/test.png")]
    path: String,
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct BrightnessRequest {
    /// Brightness level (0-100)
    #[schema(example = 75, minimum = 0, maximum = 100)]
    value: u8,
}

// ── Router ───────────────────────────────────────────────────────────

/// Build the axum router with all API endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(
            SwaggerUi::new("/docs")
                .url("/api-docs/openapi.json", ApiDoc::openapi())
                .config(
                    utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
                        .validator_url("none"),
                ),
        )
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/snapshot.png", get(get_snapshot))
        .route("/api/v1/pixel", post(post_pixel))
        .route("/api/v1/rotate", post(post_rotate))
        .route("/api/v1/display/image", post(post_display_image))
        .route("/api/v1/display/frame", post(post_display_frame))
        .route("/api/v1/display/fill", post(post_display_fill))
        .route("/api/v1/display/demo", post(post_display_demo))
        .route("/api/v1/display/stream", get(ws_display_stream))
        .route("/api/v1/display/clear", post(post_display_clear))
        .route("/api/v1/display/stop", post(post_display_stop))
        .route("/api/v1/brightness", post(post_brightness))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Handlers ─────────────────────────────────────────────────────────

fn send(state: &AppState, cmd: RenderCommand) -> Result<StatusCode, (StatusCode, String)> {
    state.command_tx.send(cmd).map_err(|_| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Render thread gone".to_string(),
        )
    })?;
    Ok(StatusCode::OK)
}

/// GET /api/v1/status — return driver state and counters
#[utoipa::path(
    get,
    path = "/api/v1/status",
    tag = "system",
    responses(
        (status = 200, description = "Current driver status", body = DriverStatus)
    )
)]
async fn get_status(State(state): State<AppState>) -> Json<DriverStatus> {
    let status = state.status.lock().unwrap().clone();
    Json(status)
}

/// GET /api/v1/snapshot.png — last frame the scan-out presented
#[utoipa::path(
    get,
    path = "/api/v1/snapshot.png",
    tag = "system",
    responses(
        (status = 200, description = "PNG of the scanned frame", content_type = "image/png")
    )
)]
async fn get_snapshot(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let png = encode_snapshot(&state.snapshot).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode snapshot: {e}"),
        )
    })?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png))
}

/// POST /api/v1/pixel — write one pixel into the write buffer
#[utoipa::path(
    post,
    path = "/api/v1/pixel",
    tag = "display",
    request_body = PixelRequest,
    responses(
        (status = 200, description = "Pixel queued; out-of-range pixels are ignored"),
    )
)]
async fn post_pixel(
    State(state): State<AppState>,
    Json(req): Json<PixelRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    send(
        &state,
        RenderCommand::SetPixel {
            column: req.column,
            row: req.row,
            color: req.color,
        },
    )?;
    if req.rotate {
        send(&state, RenderCommand::Rotate)?;
    }
    Ok(StatusCode::OK)
}

/// POST /api/v1/rotate — publish the write buffer to the scan-out
#[utoipa::path(
    post,
    path = "/api/v1/rotate",
    tag = "display",
    responses(
        (status = 200, description = "Rotation queued (no-op in single buffering)"),
    )
)]
async fn post_rotate(State(state): State<AppState>) -> Result<StatusCode, (StatusCode, String)> {
    send(&state, RenderCommand::Rotate)
}

/// POST /api/v1/display/image — display an image file
#[utoipa::path(
    post,
    path = "/api/v1/display/image",
    tag = "display",
    request_body = ImageRequest,
    responses(
        (status = 200, description = "Image displayed successfully"),
        (status = 404, description = "Image not found"),
        (status = 400, description = "Invalid path")
    )
)]
async fn post_display_image(
    State(state): State<AppState>,
    Json(req): Json<ImageRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    let full_path = validate_media_path(&state.media_dir, &req.path)?;
    send(&state, RenderCommand::ShowImage(full_path))
}

/// POST /api/v1/display/frame — push a raw RGB frame
///
/// Expects `application/octet-stream` body with exactly columns*lines*3 bytes.
async fn post_display_frame(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, (StatusCode, String)> {
    check_frame_len(&state.panel, body.len())?;
    send(&state, RenderCommand::ShowFrame(body.to_vec()))
}

/// POST /api/v1/display/fill — fill the panel with one color
#[utoipa::path(
    post,
    path = "/api/v1/display/fill",
    tag = "display",
    request_body = FillRequest,
    responses(
        (status = 200, description = "Fill queued"),
    )
)]
async fn post_display_fill(
    State(state): State<AppState>,
    Json(req): Json<FillRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    send(&state, RenderCommand::Fill(req.color))
}

/// POST /api/v1/display/demo — run the noise demo until the next command
#[utoipa::path(
    post,
    path = "/api/v1/display/demo",
    tag = "display",
    request_body = DemoRequest,
    responses(
        (status = 200, description = "Demo started"),
    )
)]
async fn post_display_demo(
    State(state): State<AppState>,
    Json(req): Json<DemoRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    let frame_delay = demo::frame_delay(
        state.panel.mode,
        Duration::from_millis(req.frame_delay_ms),
        state.refresh_hz,
    );
    send(&state, RenderCommand::RunDemo { frame_delay })
}

/// POST /api/v1/display/clear — clear the display
#[utoipa::path(
    post,
    path = "/api/v1/display/clear",
    tag = "display",
    responses(
        (status = 200, description = "Display cleared"),
    )
)]
async fn post_display_clear(
    State(state): State<AppState>,
) -> Result<StatusCode, (StatusCode, String)> {
    send(&state, RenderCommand::Clear)
}

/// POST /api/v1/display/stop — stop the demo
#[utoipa::path(
    post,
    path = "/api/v1/display/stop",
    tag = "display",
    responses(
        (status = 200, description = "Playback stopped"),
    )
)]
async fn post_display_stop(
    State(state): State<AppState>,
) -> Result<StatusCode, (StatusCode, String)> {
    send(&state, RenderCommand::Stop)
}

/// POST /api/v1/brightness — set display brightness (0-100)
#[utoipa::path(
    post,
    path = "/api/v1/brightness",
    tag = "display",
    request_body = BrightnessRequest,
    responses(
        (status = 200, description = "Brightness updated"),
    )
)]
async fn post_brightness(
    State(state): State<AppState>,
    Json(req): Json<BrightnessRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    send(&state, RenderCommand::SetBrightness(req.value))
}

// ── WebSocket streaming ─────────────────────────────────────────────

/// GET /api/v1/display/stream — WebSocket endpoint for streaming raw RGB frames.
///
/// Each binary message of exactly columns*lines*3 bytes is drawn and
/// rotated as one frame. Text messages are ignored.
async fn ws_display_stream(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_stream_socket(socket, state))
}

async fn handle_stream_socket(mut socket: WebSocket, state: AppState) {
    tracing::info!("WebSocket stream client connected");

    {
        let mut s = state.status.lock().unwrap();
        s.state = DisplayState::Streaming;
        s.current_media = Some("websocket".to_string());
    }

    let mut frame_count: u64 = 0;

    loop {
        let msg = tokio::select! {
            msg = socket.recv() => msg,
            _ = wait_for_shutdown(state.running.clone()) => break,
        };
        let msg = match msg {
            Some(Ok(m)) => m,
            Some(Err(e)) => {
                tracing::warn!("WebSocket receive error: {}", e);
                break;
            }
            None => break,
        };

        match msg {
            Message::Binary(data) => {
                if let Err((_, reason)) = check_frame_len(&state.panel, data.len()) {
                    tracing::warn!("WebSocket frame dropped: {}", reason);
                    continue;
                }

                if send(&state, RenderCommand::ShowFrame(data.to_vec())).is_err() {
                    tracing::error!("Render thread gone, closing WebSocket");
                    break;
                }

                frame_count += 1;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    tracing::info!(
        "WebSocket stream client disconnected ({} frames received)",
        frame_count
    );
    state.status.lock().unwrap().set_idle();
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Resolves once the Ctrl+C handler clears `running`.
pub async fn wait_for_shutdown(running: Arc<AtomicBool>) {
    while is_running(&running) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

fn check_frame_len(panel: &PanelConfig, len: usize) -> Result<(), (StatusCode, String)> {
    let expected = panel.frame_byte_count();
    if len != expected {
        return Err((
            StatusCode::BAD_REQUEST,
            format!(
                "Expected {} bytes ({}x{}x3 RGB), got {} bytes",
                expected, panel.columns, panel.lines, len
            ),
        ));
    }
    Ok(())
}

/// Encode the latest scanned frame as PNG.
pub fn encode_snapshot(snapshot: &SharedSnapshot) -> Result<Vec<u8>, image::ImageError> {
    let img = snapshot.lock().unwrap().clone();
    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)?;
    Ok(png)
}

/// Validate that a requested path is within the media directory.
///
/// Both paths are canonicalized so `..` components cannot escape.
fn validate_media_path(
    media_dir: &Path,
    relative_path: &str,
) -> Result<PathBuf, (StatusCode, String)> {
    let full_path = media_dir.join(relative_path);

    let canonical = full_path.canonicalize().map_err(|_| {
        (
            StatusCode::NOT_FOUND,
            format!("Path not found: {relative_path}"),
        )
    })?;

    let canonical_media = media_dir.canonicalize().map_err(|_| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Media directory not found".to_string(),
        )
    })?;

    if !canonical.starts_with(&canonical_media) {
        return Err((
            StatusCode::BAD_REQUEST,
            "Path is outside the media directory".to_string(),
        ));
    }

    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BufferingMode;
    use image::RgbImage;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn media_path_inside_dir_is_accepted() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("images")).unwrap();
        std::fs::write(tmp.path().join("images/a.png"), b"fake").unwrap();

        let path = validate_media_path(tmp.path(), "images/a.png").unwrap();
        assert!(path.ends_with("images/a.png"));
    }

    #[test]
    fn media_path_escaping_dir_is_rejected() {
        let outer = TempDir::new().unwrap();
        let media = outer.path().join("media");
        std::fs::create_dir(&media).unwrap();
        std::fs::write(outer.path().join("secret.png"), b"fake").unwrap();

        let (status, _) = validate_media_path(&media, "../secret.png").unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn missing_media_path_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let (status, _) = validate_media_path(tmp.path(), "nope.png").unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn frame_length_must_match_panel() {
        let panel = PanelConfig::new(4, 2, BufferingMode::Double);
        assert!(check_frame_len(&panel, 24).is_ok());
        let (status, msg) = check_frame_len(&panel, 23).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(msg.contains("4x2x3"));
    }

    #[test]
    fn snapshot_encodes_as_png() {
        let snapshot: SharedSnapshot = Arc::new(Mutex::new(RgbImage::from_pixel(
            3,
            2,
            image::Rgb([1, 2, 3]),
        )));
        let png = encode_snapshot(&snapshot).unwrap();
        assert_eq!(&png[..4], b"\x89PNG");

        let decoded = image::load_from_memory(&png).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.get_pixel(2, 1).0, [1, 2, 3]);
    }

    #[tokio::test]
    async fn shutdown_wait_resolves_when_flag_clears() {
        let running = Arc::new(AtomicBool::new(true));
        let waiter = tokio::spawn(wait_for_shutdown(running.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        running.store(false, std::sync::atomic::Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("shutdown wait never resolved")
            .unwrap();
    }
}
