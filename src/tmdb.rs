use crate::assets::AssetFetcher;
use crate::render::PosterError;
use crate::sources::{
    ArtworkCandidate, AssetCatalog, ItemAssets, ItemDescriptor, LogoCandidate, MediaKind,
};
use anyhow::{Context, Result};
use bytes::Bytes;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const UPSTREAM: &str = "tmdb";

#[derive(Debug, Clone)]
pub struct TmdbSettings {
    pub api_key: Option<String>,
    pub api_base: String,
    pub image_base: String,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct TmdbCatalog {
    client: reqwest::Client,
    settings: TmdbSettings,
    fetcher: AssetFetcher,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    posters: Vec<ImageEntry>,
    #[serde(default)]
    logos: Vec<ImageEntry>,
}

#[derive(Debug, Deserialize)]
struct ImageEntry {
    file_path: Option<String>,
    iso_639_1: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

impl TmdbCatalog {
    pub fn new(settings: TmdbSettings, fetcher: AssetFetcher) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("build tmdb http client")?;
        Ok(Self {
            client,
            settings,
            fetcher,
        })
    }

    fn image_url(&self, file_path: &str) -> String {
        format!(
            "{}/original{}",
            self.settings.image_base.trim_end_matches('/'),
            file_path
        )
    }

    async fn images(&self, kind: MediaKind, tmdb_id: u64) -> Result<ImagesResponse, PosterError> {
        let Some(api_key) = self.settings.api_key.as_deref() else {
            return Err(PosterError::upstream(UPSTREAM, "TMDB_API_KEY not set"));
        };
        let segment = match kind {
            MediaKind::Movie => "movie",
            MediaKind::Show => "tv",
        };
        let url = format!(
            "{}/{segment}/{tmdb_id}/images",
            self.settings.api_base.trim_end_matches('/')
        );
        let response = self
            .client
            .get(&url)
            .query(&[("api_key", api_key), ("include_image_language", "en,null")])
            .send()
            .await
            .map_err(|err| PosterError::upstream(UPSTREAM, err))?;
        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(PosterError::AssetUnavailable(format!(
                    "tmdb has no {segment} {tmdb_id}"
                )));
            }
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(PosterError::UpstreamRateLimited {
                    service: UPSTREAM.to_string(),
                });
            }
            status => return Err(PosterError::upstream(UPSTREAM, format!("HTTP {status}"))),
        }
        response
            .json::<ImagesResponse>()
            .await
            .map_err(|err| PosterError::upstream(UPSTREAM, format!("bad images payload: {err}")))
    }

    fn collect_assets(&self, images: ImagesResponse) -> ItemAssets {
        let artwork = images
            .posters
            .into_iter()
            .filter_map(|entry| {
                let path = entry.file_path?;
                Some(ArtworkCandidate {
                    url: self.image_url(&path),
                    has_text: entry.iso_639_1.is_some_and(|lang| !lang.is_empty()),
                    width: entry.width,
                    height: entry.height,
                })
            })
            .collect();
        let mut logos: Vec<LogoCandidate> = images
            .logos
            .into_iter()
            .filter_map(|entry| {
                let path = entry.file_path?;
                Some(LogoCandidate {
                    url: self.image_url(&path),
                    language: entry.iso_639_1.filter(|lang| !lang.is_empty()),
                    width: entry.width,
                })
            })
            .collect();
        // stable: keeps upstream order within each language group
        logos.sort_by_key(|logo| logo.language.as_deref() != Some("en"));
        ItemAssets { artwork, logos }
    }
}

impl AssetCatalog for TmdbCatalog {
    fn upstream(&self) -> &'static str {
        UPSTREAM
    }

    async fn candidates(&self, item: &ItemDescriptor) -> Result<ItemAssets, PosterError> {
        let Some(tmdb_id) = item.tmdb_id else {
            return Err(PosterError::AssetUnavailable(format!(
                "item {} has no tmdb id",
                item.item_id
            )));
        };
        let images = self.images(item.kind, tmdb_id).await?;
        let assets = self.collect_assets(images);
        debug!(
            item_id = %item.item_id,
            tmdb_id,
            artwork = assets.artwork.len(),
            logos = assets.logos.len(),
            "tmdb candidates"
        );
        Ok(assets)
    }

    async fn fetch(&self, url: &str) -> Result<Bytes, PosterError> {
        self.fetcher
            .fetch(url)
            .await
            .map_err(|err| err.into_poster_error(UPSTREAM))
    }
}
