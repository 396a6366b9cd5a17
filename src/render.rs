use crate::effects::apply_effects;
use crate::encode::{OutputEncoding, OutputFormat, encode_image};
use crate::geometry::fit_to_canvas;
use crate::loader::{self, DecodeLimits, ImageSource};
use crate::logo::composite_logo;
use crate::options::{LogoMode, RenderOptions};
use crate::overlay::{blend_overlay, draw_border, overlay_path};
use crate::text::{FontCatalog, render_text};
use bytes::Bytes;
use image::RgbaImage;
use mime::Mime;
use serde::Serialize;
use sha2::Digest;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task;
use tracing::{debug, warn};

// height is always 3/2 of width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl CanvasSize {
    pub fn poster(width: u32) -> Self {
        let width = width.max(2);
        Self {
            width,
            height: width * 3 / 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemIdentity {
    pub title: String,
    pub year: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    InvalidRequest,
    InvalidImage,
    AssetUnavailable,
    FontUnresolved,
    UpstreamRateLimited,
    UpstreamUnavailable,
    DeliveryFailed,
    Timeout,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PosterError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("asset unavailable: {0}")]
    AssetUnavailable(String),
    #[error("{service} rate limit wait exceeded")]
    UpstreamRateLimited { service: String },
    #[error("{service} unavailable: {detail}")]
    UpstreamUnavailable { service: String, detail: String },
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),
    #[error("{stage} timed out after {seconds}s")]
    Timeout { stage: &'static str, seconds: u64 },
}

impl PosterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PosterError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            PosterError::InvalidImage(_) => ErrorKind::InvalidImage,
            PosterError::AssetUnavailable(_) => ErrorKind::AssetUnavailable,
            PosterError::UpstreamRateLimited { .. } => ErrorKind::UpstreamRateLimited,
            PosterError::UpstreamUnavailable { .. } => ErrorKind::UpstreamUnavailable,
            PosterError::DeliveryFailed(_) => ErrorKind::DeliveryFailed,
            PosterError::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    pub fn upstream(service: &str, detail: impl std::fmt::Display) -> Self {
        PosterError::UpstreamUnavailable {
            service: service.to_string(),
            detail: detail.to_string(),
        }
    }

    pub fn timeout(stage: &'static str, limit: Duration) -> Self {
        PosterError::Timeout {
            stage,
            seconds: limit.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderWarning {
    pub kind: ErrorKind,
    pub stage: &'static str,
    pub detail: String,
}

impl RenderWarning {
    pub fn new(kind: ErrorKind, stage: &'static str, detail: String) -> Self {
        Self { kind, stage, detail }
    }
}

#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub item: ItemIdentity,
    pub artwork: ImageSource,
    pub logo: Option<ImageSource>,
    pub options: Arc<RenderOptions>,
    pub canvas: CanvasSize,
    pub encoding: OutputEncoding,
    pub grain_seed: Option<u64>,
}

pub struct RenderContext {
    pub fonts: Arc<FontCatalog>,
    pub overlays_dir: PathBuf,
    pub limits: DecodeLimits,
}

#[derive(Debug, Clone)]
pub struct RenderResult {
    pub bytes: Bytes,
    pub byte_len: usize,
    pub content_type: Mime,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    pub warnings: Vec<RenderWarning>,
    pub etag: String,
}

pub struct Composition {
    pub image: RgbaImage,
    pub warnings: Vec<RenderWarning>,
}

pub fn compose(request: &RenderRequest, ctx: &RenderContext) -> Result<Composition, PosterError> {
    let options = request.options.as_ref();
    let size = request.canvas;
    let mut warnings = Vec::new();
    let started = Instant::now();

    let artwork = loader::load(&request.artwork, ctx.limits)?;
    let mut canvas = fit_to_canvas(&artwork, size, options.zoom, options.shift_y, ctx.limits.max_pixels)?;
    drop(artwork);
    debug!(title = %request.item.title, elapsed_ms = started.elapsed().as_millis() as u64, "geometry done");

    let seed = request.grain_seed.unwrap_or_else(rand::random);
    apply_effects(&mut canvas, options, seed)?;

    if options.logo.mode != LogoMode::None {
        match request.logo.as_ref() {
            None => warnings.push(RenderWarning::new(
                ErrorKind::AssetUnavailable,
                "logo",
                "no logo available for item".to_string(),
            )),
            Some(source) => match loader::load(source, ctx.limits) {
                Ok(logo) => {
                    let spot = composite_logo(&mut canvas, &logo, &options.logo, size)?;
                    debug!(x = spot.x, y = spot.y, width = spot.width, height = spot.height, "logo placed");
                }
                Err(PosterError::AssetUnavailable(detail)) => {
                    warnings.push(RenderWarning::new(ErrorKind::AssetUnavailable, "logo", detail))
                }
                Err(err) => return Err(err),
            },
        }
    }

    if let Some(text) = options.text.as_ref() {
        warnings.extend(render_text(&mut canvas, text, &request.item, &ctx.fonts, size)?);
    }

    if let Some(overlay) = options.overlay.as_ref() {
        match overlay_path(&ctx.overlays_dir, &overlay.file) {
            None => warnings.push(RenderWarning::new(
                ErrorKind::AssetUnavailable,
                "overlay",
                format!("invalid overlay name {:?}", overlay.file),
            )),
            Some(path) => match loader::load(&ImageSource::File(path), ctx.limits) {
                Ok(layer) => blend_overlay(&mut canvas, &layer, overlay, size),
                Err(err) => warnings.push(RenderWarning::new(
                    ErrorKind::AssetUnavailable,
                    "overlay",
                    err.to_string(),
                )),
            },
        }
    }

    if let Some(border) = options.border {
        draw_border(&mut canvas, border);
    }

    for warning in &warnings {
        warn!(
            title = %request.item.title,
            stage = warning.stage,
            kind = ?warning.kind,
            detail = %warning.detail,
            "render warning"
        );
    }
    debug!(
        title = %request.item.title,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "composition done"
    );
    Ok(Composition {
        image: canvas,
        warnings,
    })
}

pub fn render(request: &RenderRequest, ctx: &RenderContext) -> Result<RenderResult, PosterError> {
    let Composition { image, warnings } = compose(request, ctx)?;
    let bytes = encode_image(&image, request.encoding)?;
    let etag = format!("\"{}\"", sha256_hex_bytes(&bytes));
    Ok(RenderResult {
        byte_len: bytes.len(),
        bytes: Bytes::from(bytes),
        content_type: request.encoding.format.content_type(),
        format: request.encoding.format,
        width: image.width(),
        height: image.height(),
        warnings,
        etag,
    })
}

pub async fn render_blocking(
    request: RenderRequest,
    ctx: Arc<RenderContext>,
    limit: Duration,
) -> Result<RenderResult, PosterError> {
    let handle = task::spawn_blocking(move || render(&request, &ctx));
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => Err(PosterError::InvalidImage(format!("render task failed: {err}"))),
        Err(_) => Err(PosterError::timeout("render", limit)),
    }
}

fn sha256_hex_bytes(bytes: &[u8]) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
pub(crate) fn test_context(dir: &std::path::Path) -> RenderContext {
    RenderContext {
        fonts: Arc::new(FontCatalog::load(dir, false, "sans-serif")),
        overlays_dir: dir.to_path_buf(),
        limits: DecodeLimits {
            max_pixels: 10_000_000,
            max_bytes: 10 * 1024 * 1024,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::png_bytes;
    use crate::options::RawRenderOptions;
    use image::Rgba;
    use image::imageops::{self, FilterType};

    fn artwork() -> RgbaImage {
        RgbaImage::from_fn(40, 60, |x, y| Rgba([(x * 6) as u8, (y * 4) as u8, 120, 255]))
    }

    fn request(raw: RawRenderOptions, logo: Option<ImageSource>) -> RenderRequest {
        let (options, _) = RenderOptions::validate(&raw, "default").unwrap();
        RenderRequest {
            item: ItemIdentity {
                title: "Heat".to_string(),
                year: Some(1995),
            },
            artwork: ImageSource::Bytes(png_bytes(&artwork())),
            logo,
            options: Arc::new(options),
            canvas: CanvasSize::poster(80),
            encoding: OutputEncoding::png(6),
            grain_seed: Some(11),
        }
    }

    #[test]
    fn poster_canvas_is_two_by_three() {
        assert_eq!(CanvasSize::poster(2000), CanvasSize { width: 2000, height: 3000 });
    }

    #[test]
    fn neutral_options_equal_plain_resize() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let raw = RawRenderOptions {
            logo_mode: Some("none".to_string()),
            logo_scale: Some(0.9),
            border_color: Some("#ff00ff".to_string()),
            ..Default::default()
        };
        let corrupt_logo = Some(ImageSource::Bytes(Bytes::from_static(b"garbage")));
        let composed = compose(&request(raw, corrupt_logo), &ctx).unwrap();
        let expected = imageops::resize(&artwork(), 80, 120, FilterType::Lanczos3);
        assert_eq!(composed.image, expected);
        assert!(composed.warnings.is_empty());
    }

    #[test]
    fn corrupt_logo_fails_when_logo_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let corrupt_logo = Some(ImageSource::Bytes(Bytes::from_static(b"garbage")));
        let err = compose(&request(RawRenderOptions::default(), corrupt_logo), &ctx)
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidImage);
    }

    #[test]
    fn missing_logo_and_overlay_are_warnings() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let raw = RawRenderOptions {
            overlay_file: Some("absent.png".to_string()),
            ..Default::default()
        };
        let composed = compose(&request(raw, None), &ctx).unwrap();
        let stages: Vec<_> = composed.warnings.iter().map(|w| w.stage).collect();
        assert_eq!(stages, vec!["logo", "overlay"]);
        assert!(composed
            .warnings
            .iter()
            .all(|w| w.kind == ErrorKind::AssetUnavailable));
    }

    #[test]
    fn same_request_renders_identically() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let logo = RgbaImage::from_pixel(10, 4, Rgba([255, 255, 255, 200]));
        let raw = RawRenderOptions {
            poster_zoom: Some(1.1),
            poster_shift_y: Some(0.05),
            matte_height_ratio: Some(0.18),
            fade_height_ratio: Some(0.1),
            vignette_strength: Some(0.4),
            grain_amount: Some(0.3),
            logo_mode: Some("match".to_string()),
            border_enabled: Some(true),
            border_px: Some(3.0),
            ..Default::default()
        };
        let req = request(raw, Some(ImageSource::Bytes(png_bytes(&logo))));
        let first = compose(&req, &ctx).unwrap();
        let second = compose(&req, &ctx).unwrap();
        assert_eq!(first.image, second.image);
        assert_eq!(first.image.dimensions(), (80, 120));
    }

    #[test]
    fn render_reports_encoding_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let mut req = request(RawRenderOptions::default(), None);
        req.encoding = OutputEncoding::jpg(90);
        let result = render(&req, &ctx).unwrap();
        assert_eq!(result.content_type, mime::IMAGE_JPEG);
        assert_eq!(result.byte_len, result.bytes.len());
        assert_eq!((result.width, result.height), (80, 120));
        assert_eq!(result.etag.len(), 66);
    }

    #[tokio::test]
    async fn blocking_render_runs_off_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(test_context(dir.path()));
        let req = request(RawRenderOptions::default(), None);
        let result = render_blocking(req, ctx, Duration::from_secs(30)).await.unwrap();
        assert_eq!(result.format, OutputFormat::Png);
    }
}
