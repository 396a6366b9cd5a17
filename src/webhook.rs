use crate::batch::bounded;
use crate::loader::ImageSource;
use crate::options::{LogoMode, RawRenderOptions, RenderOptions, resolve_template};
use crate::render::{PosterError, RenderRequest, RenderResult, RenderWarning, render_blocking};
use crate::sources::{AssetCatalog, ItemDescriptor, MediaKind, MediaServer, select_artwork, select_logo};
use crate::state::AppState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadarrEvent {
    #[serde(default)]
    pub event_type: Option<String>,
    pub movie: RadarrMovie,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadarrMovie {
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub tmdb_id: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct WebhookOutcome {
    pub status: &'static str,
    pub artwork_url: String,
    pub logo_url: Option<String>,
    pub byte_len: usize,
    pub warnings: Vec<RenderWarning>,
    pub sent_to_server: bool,
    pub item_id: Option<String>,
    pub delivery_error: Option<String>,
}

pub async fn handle_radarr(
    state: &AppState,
    template_id: &str,
    preset_id: &str,
    event: RadarrEvent,
) -> Result<WebhookOutcome, PosterError> {
    let template = resolve_template(template_id)?;
    let raw = state
        .presets
        .layered(template, Some(preset_id), &RawRenderOptions::default())
        .await?;
    let (options, _) = RenderOptions::validate(&raw, template)?;
    let movie = event.movie;
    let tmdb_id = movie
        .tmdb_id
        .ok_or_else(|| PosterError::InvalidRequest("tmdbId missing in webhook payload".to_string()))?;
    info!(
        event = ?event.event_type,
        title = %movie.title,
        year = ?movie.year,
        tmdb_id,
        template,
        preset = preset_id,
        "radarr webhook received"
    );

    let descriptor = ItemDescriptor {
        item_id: format!("tmdb-{tmdb_id}"),
        title: movie.title.clone(),
        year: movie.year,
        kind: MediaKind::Movie,
        tmdb_id: Some(tmdb_id),
        labels: Vec::new(),
    };
    let config = &state.config;
    state.limiter.acquire(state.tmdb.upstream()).await?;
    let assets = bounded("candidates", config.upstream_timeout, state.tmdb.candidates(&descriptor)).await?;
    let artwork_url = select_artwork(&assets.artwork, options.artwork_filter)
        .ok_or_else(|| PosterError::AssetUnavailable(format!("no artwork for {}", movie.title)))?
        .url
        .clone();
    let logo_url = if options.logo.mode == LogoMode::None {
        None
    } else {
        select_logo(&assets.logos, options.logo.preference).map(|logo| logo.url.clone())
    };

    let artwork = bounded("fetch", config.fetch_timeout, state.tmdb.fetch(&artwork_url)).await?;
    let logo = match logo_url.as_deref() {
        None => None,
        Some(url) => match bounded("fetch", config.fetch_timeout, state.tmdb.fetch(url)).await {
            Ok(bytes) => Some(ImageSource::Bytes(bytes)),
            Err(err) => {
                warn!(url, error = %err, "webhook logo fetch failed, rendering without logo");
                None
            }
        },
    };

    let request = RenderRequest {
        item: descriptor.identity(),
        artwork: ImageSource::Bytes(artwork),
        logo,
        options: Arc::new(options),
        canvas: config.canvas(),
        encoding: config.encoding(),
        grain_seed: None,
    };
    let result = {
        let _permit = state
            .render_semaphore
            .acquire()
            .await
            .map_err(|err| PosterError::upstream("renderer", err))?;
        render_blocking(request, state.render.clone(), config.render_timeout).await?
    };

    let mut outcome = WebhookOutcome {
        status: "ok",
        artwork_url,
        logo_url,
        byte_len: result.byte_len,
        warnings: result.warnings.clone(),
        sent_to_server: false,
        item_id: None,
        delivery_error: None,
    };
    if config.webhook_auto_send {
        // upload failures are reported in the outcome, the render still stands
        if let Err(err) = send_to_plex(state, &movie, &result, &mut outcome).await {
            warn!(title = %movie.title, error = %err, "webhook upload failed");
            outcome.delivery_error = Some(err.to_string());
        }
    }
    Ok(outcome)
}

async fn send_to_plex(
    state: &AppState,
    movie: &RadarrMovie,
    result: &RenderResult,
    outcome: &mut WebhookOutcome,
) -> Result<(), PosterError> {
    let config = &state.config;
    let section = config
        .plex_movie_library_id
        .as_deref()
        .ok_or_else(|| PosterError::DeliveryFailed("PLEX_MOVIE_LIBRARY_ID not set".to_string()))?;
    state.limiter.acquire(state.plex.upstream()).await?;
    let item_id = bounded(
        "lookup",
        config.upstream_timeout,
        state.plex.find_item(section, &movie.title, movie.year),
    )
    .await?
    .ok_or_else(|| {
        PosterError::DeliveryFailed(format!("no plex item titled {} ({:?})", movie.title, movie.year))
    })?;
    outcome.item_id = Some(item_id.clone());

    state.limiter.acquire(state.plex.upstream()).await?;
    bounded(
        "delivery",
        config.delivery_timeout,
        state
            .plex
            .upload_poster(&item_id, result.bytes.clone(), &result.content_type),
    )
    .await?;
    outcome.sent_to_server = true;
    for label in &config.webhook_auto_labels {
        state.limiter.acquire(state.plex.upstream()).await?;
        if let Err(err) = state.plex.remove_label(&item_id, label).await {
            warn!(item_id, label, error = %err, "label removal failed");
        }
    }
    info!(item_id, size = result.byte_len, "webhook poster sent to plex");
    Ok(())
}
