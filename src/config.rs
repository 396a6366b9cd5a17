use crate::encode::{OutputEncoding, OutputFormat};
use crate::loader::DecodeLimits;
use crate::plex::PlexSettings;
use crate::rate_limit::UpstreamLimit;
use crate::render::CanvasSize;
use crate::tmdb::TmdbSettings;
use anyhow::{Result, anyhow};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

const RASTERS_PER_RENDER: u64 = 4;
const BYTES_PER_PIXEL: u64 = 4;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub max_in_flight_requests: usize,
    pub config_dir: PathBuf,
    pub presets_path: PathBuf,
    pub fonts_dir: PathBuf,
    pub overlays_dir: PathBuf,
    pub output_dir: PathBuf,
    pub canvas_width: u32,
    pub output_format: OutputFormat,
    pub jpg_quality: u8,
    pub png_compression: u8,
    pub webp_quality: u8,
    pub concurrent_renders: usize,
    pub max_batch_items: usize,
    pub batch_history: usize,
    pub tmdb_rate_limit: u32,
    pub plex_rate_limit: u32,
    pub rate_limit_window: Duration,
    pub rate_limit_max_wait: Duration,
    pub rate_limit_max_waiters: usize,
    pub memory_limit_bytes: u64,
    pub max_decoded_raster_pixels: u64,
    pub max_asset_bytes: usize,
    pub max_concurrent_fetches: usize,
    pub upstream_timeout: Duration,
    pub fetch_timeout: Duration,
    pub render_timeout: Duration,
    pub delivery_timeout: Duration,
    pub tmdb_api_key: Option<String>,
    pub tmdb_api_base: String,
    pub tmdb_image_base: String,
    pub plex_url: Option<String>,
    pub plex_token: Option<String>,
    pub plex_movie_library_id: Option<String>,
    pub webhook_auto_send: bool,
    pub webhook_auto_labels: Vec<String>,
    pub fallback_font_family: String,
    pub load_system_fonts: bool,
    pub failure_log_path: Option<PathBuf>,
    pub failure_log_max_bytes: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = parse_u16("PORT", 8080);
        let max_in_flight_requests = parse_usize("MAX_IN_FLIGHT_REQUESTS", 256);

        let config_dir = PathBuf::from(env::var("CONFIG_DIR").unwrap_or_else(|_| "/config".to_string()));
        let presets_path = parse_path("PRESETS_PATH").unwrap_or_else(|| config_dir.join("presets.json"));
        let fonts_dir = parse_path("FONTS_DIR").unwrap_or_else(|| config_dir.join("fonts"));
        let overlays_dir = parse_path("OVERLAYS_DIR").unwrap_or_else(|| config_dir.join("overlays"));
        let output_dir = PathBuf::from(env::var("OUTPUT_DIR").unwrap_or_else(|_| "/output".to_string()));

        let canvas_width = parse_u32("CANVAS_WIDTH", 2000);
        if canvas_width < 2 {
            return Err(anyhow!("CANVAS_WIDTH must be at least 2"));
        }
        let output_format = match env::var("OUTPUT_FORMAT") {
            Ok(raw) => OutputFormat::parse(&raw)
                .ok_or_else(|| anyhow!("OUTPUT_FORMAT must be jpg, png or webp, got {raw:?}"))?,
            Err(_) => OutputFormat::Jpg,
        };
        let jpg_quality = parse_u8("JPG_QUALITY", 95).clamp(1, 100);
        let png_compression = parse_u8("PNG_COMPRESSION", 6).min(9);
        let webp_quality = parse_u8("WEBP_QUALITY", 90).clamp(1, 100);

        let concurrent_renders = parse_usize("CONCURRENT_RENDERS", 2).max(1);
        let max_batch_items = parse_usize("MAX_BATCH_ITEMS", 1000);
        let batch_history = parse_usize("BATCH_HISTORY", 32).max(1);

        let tmdb_rate_limit = parse_u32("TMDB_RATE_LIMIT", 40);
        let plex_rate_limit = parse_u32("PLEX_RATE_LIMIT", 0);
        let rate_limit_window = Duration::from_secs(parse_u64("RATE_LIMIT_WINDOW_SECONDS", 10).max(1));
        let rate_limit_max_wait = Duration::from_secs(parse_u64("RATE_LIMIT_MAX_WAIT_SECONDS", 60));
        let rate_limit_max_waiters = parse_usize("RATE_LIMIT_MAX_WAITERS", 256).max(1);

        let memory_limit_bytes = parse_u64("MEMORY_LIMIT_MB", 2048).saturating_mul(1024 * 1024);
        let derived_pixels = memory_limit_bytes
            / (BYTES_PER_PIXEL * RASTERS_PER_RENDER * concurrent_renders as u64);
        let max_decoded_raster_pixels = parse_u64("MAX_DECODED_RASTER_PIXELS", derived_pixels);
        let canvas_pixels = canvas_width as u64 * (canvas_width as u64 * 3 / 2);
        if max_decoded_raster_pixels < canvas_pixels {
            warn!(
                max_decoded_raster_pixels,
                canvas_pixels, "decoded raster ceiling is below the output canvas size"
            );
        }
        let max_asset_bytes = parse_usize("MAX_ASSET_BYTES", 50 * 1024 * 1024);
        let max_concurrent_fetches = parse_usize("MAX_CONCURRENT_FETCHES", 8).max(1);

        let upstream_timeout = Duration::from_secs(parse_u64("UPSTREAM_TIMEOUT_SECONDS", 15).max(1));
        let fetch_timeout = Duration::from_secs(parse_u64("FETCH_TIMEOUT_SECONDS", 30).max(1));
        let render_timeout = Duration::from_secs(parse_u64("RENDER_TIMEOUT_SECONDS", 120).max(1));
        let delivery_timeout = Duration::from_secs(parse_u64("DELIVERY_TIMEOUT_SECONDS", 30).max(1));

        let tmdb_api_key = parse_optional("TMDB_API_KEY");
        if tmdb_api_key.is_none() {
            warn!("TMDB_API_KEY not set; artwork lookups will fail");
        }
        let tmdb_api_base =
            env::var("TMDB_API_BASE").unwrap_or_else(|_| "https://api.themoviedb.org/3".to_string());
        let tmdb_image_base =
            env::var("TMDB_IMAGE_BASE").unwrap_or_else(|_| "https://image.tmdb.org/t/p".to_string());
        let plex_url = parse_optional("PLEX_URL").map(|url| url.trim_end_matches('/').to_string());
        let plex_token = parse_optional("PLEX_TOKEN");
        let plex_movie_library_id = parse_optional("PLEX_MOVIE_LIBRARY_ID");
        let webhook_auto_send = parse_bool("WEBHOOK_AUTO_SEND", false);
        let webhook_auto_labels = parse_list("WEBHOOK_AUTO_LABELS");
        if webhook_auto_send && plex_movie_library_id.is_none() {
            warn!("WEBHOOK_AUTO_SEND is set without PLEX_MOVIE_LIBRARY_ID; webhook uploads will be skipped");
        }

        let fallback_font_family =
            parse_optional("FALLBACK_FONT_FAMILY").unwrap_or_else(|| "sans-serif".to_string());
        let load_system_fonts = parse_bool("LOAD_SYSTEM_FONTS", true);

        let failure_log_path = parse_path("FAILURE_LOG_PATH");
        let failure_log_max_bytes = parse_u64("FAILURE_LOG_MAX_BYTES", 102_400);

        Ok(Self {
            host,
            port,
            max_in_flight_requests,
            config_dir,
            presets_path,
            fonts_dir,
            overlays_dir,
            output_dir,
            canvas_width,
            output_format,
            jpg_quality,
            png_compression,
            webp_quality,
            concurrent_renders,
            max_batch_items,
            batch_history,
            tmdb_rate_limit,
            plex_rate_limit,
            rate_limit_window,
            rate_limit_max_wait,
            rate_limit_max_waiters,
            memory_limit_bytes,
            max_decoded_raster_pixels,
            max_asset_bytes,
            max_concurrent_fetches,
            upstream_timeout,
            fetch_timeout,
            render_timeout,
            delivery_timeout,
            tmdb_api_key,
            tmdb_api_base,
            tmdb_image_base,
            plex_url,
            plex_token,
            plex_movie_library_id,
            webhook_auto_send,
            webhook_auto_labels,
            fallback_font_family,
            load_system_fonts,
            failure_log_path,
            failure_log_max_bytes,
        })
    }

    pub fn canvas(&self) -> CanvasSize {
        CanvasSize::poster(self.canvas_width)
    }

    pub fn encoding(&self) -> OutputEncoding {
        self.encoding_for(self.output_format)
    }

    pub fn encoding_for(&self, format: OutputFormat) -> OutputEncoding {
        match format {
            OutputFormat::Jpg => OutputEncoding::jpg(self.jpg_quality),
            OutputFormat::Png => OutputEncoding::png(self.png_compression),
            OutputFormat::Webp => OutputEncoding::webp(self.webp_quality),
        }
    }

    pub fn decode_limits(&self) -> DecodeLimits {
        DecodeLimits {
            max_pixels: self.max_decoded_raster_pixels,
            max_bytes: self.max_asset_bytes,
        }
    }

    pub fn upstream_limit(&self, limit: u32) -> UpstreamLimit {
        UpstreamLimit {
            limit,
            window: self.rate_limit_window,
        }
    }

    pub fn tmdb_settings(&self) -> TmdbSettings {
        TmdbSettings {
            api_key: self.tmdb_api_key.clone(),
            api_base: self.tmdb_api_base.clone(),
            image_base: self.tmdb_image_base.clone(),
            timeout: self.upstream_timeout,
        }
    }

    pub fn plex_settings(&self) -> PlexSettings {
        PlexSettings {
            url: self.plex_url.clone(),
            token: self.plex_token.clone(),
            timeout: self.upstream_timeout,
        }
    }
}

#[cfg(test)]
pub(crate) fn test_config(dir: &std::path::Path) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        max_in_flight_requests: 0,
        config_dir: dir.to_path_buf(),
        presets_path: dir.join("presets.json"),
        fonts_dir: dir.join("fonts"),
        overlays_dir: dir.join("overlays"),
        output_dir: dir.join("output"),
        canvas_width: 40,
        output_format: OutputFormat::Png,
        jpg_quality: 95,
        png_compression: 1,
        webp_quality: 90,
        concurrent_renders: 2,
        max_batch_items: 10,
        batch_history: 4,
        tmdb_rate_limit: 40,
        plex_rate_limit: 0,
        rate_limit_window: Duration::from_secs(10),
        rate_limit_max_wait: Duration::from_secs(5),
        rate_limit_max_waiters: 16,
        memory_limit_bytes: 64 * 1024 * 1024,
        max_decoded_raster_pixels: 10_000_000,
        max_asset_bytes: 10 * 1024 * 1024,
        max_concurrent_fetches: 2,
        upstream_timeout: Duration::from_secs(5),
        fetch_timeout: Duration::from_secs(5),
        render_timeout: Duration::from_secs(30),
        delivery_timeout: Duration::from_secs(5),
        tmdb_api_key: None,
        tmdb_api_base: "http://127.0.0.1:9".to_string(),
        tmdb_image_base: "http://127.0.0.1:9".to_string(),
        plex_url: None,
        plex_token: None,
        plex_movie_library_id: None,
        webhook_auto_send: false,
        webhook_auto_labels: Vec::new(),
        fallback_font_family: "sans-serif".to_string(),
        load_system_fonts: false,
        failure_log_path: None,
        failure_log_max_bytes: 0,
    }
}

fn parse_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_list(key: &str) -> Vec<String> {
    parse_optional(key)
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_path(key: &str) -> Option<PathBuf> {
    parse_optional(key).map(PathBuf::from)
}

fn parse_u8(key: &str, default: u8) -> u8 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn parse_u16(key: &str, default: u16) -> u16 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
