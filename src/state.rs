use crate::assets::AssetFetcher;
use crate::batch::{BatchDeps, BatchScheduler, BatchSettings};
use crate::config::Config;
use crate::delivery::LocalOutput;
use crate::failure_log::FailureLog;
use crate::plex::{self, PlexServer};
use crate::presets::PresetStore;
use crate::rate_limit::UpstreamLimiter;
use crate::render::RenderContext;
use crate::text::FontCatalog;
use crate::tmdb::{self, TmdbCatalog};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::info;

pub type PosterScheduler = BatchScheduler<TmdbCatalog, PlexServer>;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub fetcher: AssetFetcher,
    pub render: Arc<RenderContext>,
    pub render_semaphore: Arc<Semaphore>,
    pub presets: PresetStore,
    pub limiter: UpstreamLimiter,
    pub tmdb: Arc<TmdbCatalog>,
    pub plex: Arc<PlexServer>,
    pub batches: Arc<PosterScheduler>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        let fetcher = AssetFetcher::new(
            config.fetch_timeout,
            config.max_asset_bytes,
            config.max_concurrent_fetches,
        )?;
        let fonts = FontCatalog::load(
            &config.fonts_dir,
            config.load_system_fonts,
            &config.fallback_font_family,
        );
        let render = Arc::new(RenderContext {
            fonts: Arc::new(fonts),
            overlays_dir: config.overlays_dir.clone(),
            limits: config.decode_limits(),
        });

        let limiter = UpstreamLimiter::new(config.rate_limit_max_wait, config.rate_limit_max_waiters);
        limiter.configure(tmdb::UPSTREAM, config.upstream_limit(config.tmdb_rate_limit));
        limiter.configure(plex::UPSTREAM, config.upstream_limit(config.plex_rate_limit));

        let tmdb = Arc::new(TmdbCatalog::new(config.tmdb_settings(), fetcher.clone())?);
        let plex = Arc::new(PlexServer::new(config.plex_settings())?);
        let presets = PresetStore::new(config.presets_path.clone());
        let failure_log = config
            .failure_log_path
            .clone()
            .and_then(|path| FailureLog::new(path, config.failure_log_max_bytes));

        let batches = Arc::new(BatchScheduler::new(BatchDeps {
            catalog: tmdb.clone(),
            media: plex.clone(),
            limiter: limiter.clone(),
            render: render.clone(),
            output: LocalOutput::new(config.output_dir.clone()),
            presets: presets.clone(),
            failure_log,
            settings: BatchSettings {
                concurrent_renders: config.concurrent_renders,
                max_items: config.max_batch_items,
                history: config.batch_history,
                canvas: config.canvas(),
                encoding: config.encoding(),
                upstream_timeout: config.upstream_timeout,
                fetch_timeout: config.fetch_timeout,
                render_timeout: config.render_timeout,
                delivery_timeout: config.delivery_timeout,
                grain_seed: None,
            },
        }));

        info!(
            canvas_width = config.canvas_width,
            format = config.output_format.extension(),
            concurrent_renders = config.concurrent_renders,
            max_decoded_raster_pixels = config.max_decoded_raster_pixels,
            plex_configured = plex.is_configured(),
            "state initialized"
        );

        Ok(Self {
            render_semaphore: Arc::new(Semaphore::new(config.concurrent_renders)),
            config: Arc::new(config),
            fetcher,
            render,
            presets,
            limiter,
            tmdb,
            plex,
            batches,
        })
    }
}
