use crate::render::PosterError;
use crate::sources::{ItemDescriptor, MediaKind, MediaServer};
use anyhow::{Context, Result};
use bytes::Bytes;
use mime::Mime;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

pub const UPSTREAM: &str = "plex";

const TOKEN_HEADER: &str = "X-Plex-Token";

#[derive(Debug, Clone)]
pub struct PlexSettings {
    pub url: Option<String>,
    pub token: Option<String>,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct PlexServer {
    client: reqwest::Client,
    settings: PlexSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LibraryItem {
    pub item_id: String,
    pub title: String,
    pub year: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "MediaContainer")]
    container: Container,
}

#[derive(Debug, Default, Deserialize)]
struct Container {
    #[serde(rename = "Metadata", default)]
    metadata: Vec<Metadata>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    #[serde(rename = "ratingKey")]
    rating_key: String,
    #[serde(default)]
    title: String,
    year: Option<i32>,
    #[serde(rename = "type")]
    kind: Option<String>,
    guid: Option<String>,
    #[serde(rename = "Guid", default)]
    guids: Vec<GuidTag>,
    #[serde(rename = "Label", default)]
    labels: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
struct GuidTag {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Tag {
    tag: String,
}

impl Metadata {
    fn tmdb_id(&self) -> Option<u64> {
        self.guids
            .iter()
            .map(|guid| guid.id.as_str())
            .chain(self.guid.as_deref())
            .find_map(parse_tmdb_guid)
    }

    fn label_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for label in &self.labels {
            if !label.tag.is_empty() && !names.contains(&label.tag) {
                names.push(label.tag.clone());
            }
        }
        names
    }
}

pub fn parse_tmdb_guid(guid: &str) -> Option<u64> {
    ["tmdb://", "themoviedb://"].iter().find_map(|prefix| {
        let start = guid.find(prefix)? + prefix.len();
        let digits: String = guid[start..]
            .chars()
            .take_while(|ch| ch.is_ascii_digit())
            .collect();
        digits.parse().ok()
    })
}

impl PlexServer {
    pub fn new(settings: PlexSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("build plex http client")?;
        Ok(Self { client, settings })
    }

    pub fn is_configured(&self) -> bool {
        self.settings.url.is_some()
    }

    fn endpoint(&self, path: &str) -> Result<String, PosterError> {
        let base = self
            .settings
            .url
            .as_deref()
            .ok_or_else(|| PosterError::upstream(UPSTREAM, "PLEX_URL not set"))?;
        Ok(format!("{}{path}", base.trim_end_matches('/')))
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header(ACCEPT, "application/json");
        match self.settings.token.as_deref() {
            Some(token) => builder.header(TOKEN_HEADER, token),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response, PosterError> {
        let response = builder
            .send()
            .await
            .map_err(|err| PosterError::upstream(UPSTREAM, format!("{what}: {err}")))?;
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(PosterError::AssetUnavailable(format!("{what}: not found"))),
            StatusCode::TOO_MANY_REQUESTS => Err(PosterError::UpstreamRateLimited {
                service: UPSTREAM.to_string(),
            }),
            status => Err(PosterError::upstream(UPSTREAM, format!("{what}: HTTP {status}"))),
        }
    }

    async fn metadata(&self, item_id: &str) -> Result<Metadata, PosterError> {
        let url = self.endpoint(&format!("/library/metadata/{item_id}"))?;
        let response = self
            .send(self.request(reqwest::Method::GET, &url), "item metadata")
            .await?;
        let envelope: Envelope = response
            .json()
            .await
            .map_err(|err| PosterError::upstream(UPSTREAM, format!("bad metadata payload: {err}")))?;
        envelope
            .container
            .metadata
            .into_iter()
            .next()
            .ok_or_else(|| PosterError::AssetUnavailable(format!("plex item {item_id} not found")))
    }

    pub async fn list_items(&self, section: &str) -> Result<Vec<LibraryItem>, PosterError> {
        let url = self.endpoint(&format!("/library/sections/{section}/all"))?;
        let response = self
            .send(
                self.request(reqwest::Method::GET, &url).query(&[("type", "1")]),
                "library listing",
            )
            .await?;
        let envelope: Envelope = response
            .json()
            .await
            .map_err(|err| PosterError::upstream(UPSTREAM, format!("bad listing payload: {err}")))?;
        Ok(envelope
            .container
            .metadata
            .into_iter()
            .map(|meta| LibraryItem {
                item_id: meta.rating_key,
                title: meta.title,
                year: meta.year,
            })
            .collect())
    }

    pub async fn find_item(
        &self,
        section: &str,
        title: &str,
        year: Option<i32>,
    ) -> Result<Option<String>, PosterError> {
        let wanted = title.trim().to_lowercase();
        let found = self.list_items(section).await?.into_iter().find(|item| {
            item.title.trim().to_lowercase() == wanted
                && (year.is_none() || item.year.is_none() || item.year == year)
        });
        debug!(section, title, ?year, found = ?found.as_ref().map(|item| &item.item_id), "plex title lookup");
        Ok(found.map(|item| item.item_id))
    }
}

impl MediaServer for PlexServer {
    fn upstream(&self) -> &'static str {
        UPSTREAM
    }

    async fn describe(&self, item_id: &str) -> Result<ItemDescriptor, PosterError> {
        let meta = self.metadata(item_id).await?;
        let kind = match meta.kind.as_deref() {
            Some("show") | Some("season") | Some("episode") => MediaKind::Show,
            _ => MediaKind::Movie,
        };
        let descriptor = ItemDescriptor {
            tmdb_id: meta.tmdb_id(),
            labels: meta.label_names(),
            item_id: meta.rating_key,
            title: meta.title,
            year: meta.year,
            kind,
        };
        debug!(item_id, tmdb_id = ?descriptor.tmdb_id, "plex item described");
        Ok(descriptor)
    }

    async fn labels(&self, item_id: &str) -> Result<Vec<String>, PosterError> {
        Ok(self.metadata(item_id).await?.label_names())
    }

    async fn upload_poster(&self, item_id: &str, bytes: Bytes, content_type: &Mime) -> Result<(), PosterError> {
        let url = self.endpoint(&format!("/library/metadata/{item_id}/posters"))?;
        let size = bytes.len();
        self.send(
            self.request(reqwest::Method::POST, &url)
                .header(CONTENT_TYPE, content_type.as_ref())
                .body(bytes),
            "poster upload",
        )
        .await
        .map_err(|err| PosterError::DeliveryFailed(err.to_string()))?;
        info!(item_id, size, "poster uploaded to plex");
        Ok(())
    }

    async fn remove_label(&self, item_id: &str, label: &str) -> Result<(), PosterError> {
        if label.is_empty() {
            return Ok(());
        }
        let url = self.endpoint(&format!("/library/metadata/{item_id}/labels"))?;
        self.send(
            self.request(reqwest::Method::DELETE, &url)
                .query(&[("tag.tag", label), ("tag.type", "label")]),
            "label removal",
        )
        .await
        .map_err(|err| PosterError::DeliveryFailed(err.to_string()))?;
        info!(item_id, label, "label removed");
        Ok(())
    }
}
