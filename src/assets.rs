use crate::render::PosterError;
use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum AssetFetchError {
    #[error("invalid asset url")]
    InvalidUri,
    #[error("asset too large")]
    TooLarge,
    #[error("asset not found at {url}")]
    NotFound { url: String },
    #[error("asset fetch failed from {url}: {status}")]
    UpstreamStatus { status: StatusCode, url: String },
    #[error("asset fetch failed from {url}: {detail}")]
    Upstream { url: String, detail: String },
}

impl AssetFetchError {
    pub fn into_poster_error(self, service: &str) -> PosterError {
        match self {
            AssetFetchError::NotFound { .. } | AssetFetchError::InvalidUri => {
                PosterError::AssetUnavailable(self.to_string())
            }
            AssetFetchError::TooLarge => PosterError::InvalidImage(self.to_string()),
            AssetFetchError::UpstreamStatus { .. } | AssetFetchError::Upstream { .. } => {
                PosterError::upstream(service, self)
            }
        }
    }
}

#[derive(Clone)]
pub struct AssetFetcher {
    client: reqwest::Client,
    max_bytes: usize,
    permits: Arc<Semaphore>,
}

impl AssetFetcher {
    pub fn new(timeout: Duration, max_bytes: usize, max_concurrent: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(concat!("poster-renderer/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build asset http client")?;
        Ok(Self {
            client,
            max_bytes,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        })
    }

    pub async fn fetch(&self, url: &str) -> Result<Bytes, AssetFetchError> {
        let parsed = validate_http_url(url)?;
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|err| AssetFetchError::Upstream {
                url: url.to_string(),
                detail: err.to_string(),
            })?;
        let mut response = self
            .client
            .get(parsed.clone())
            .send()
            .await
            .map_err(|err| AssetFetchError::Upstream {
                url: parsed.to_string(),
                detail: err.to_string(),
            })?;
        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                return Err(AssetFetchError::NotFound {
                    url: parsed.to_string(),
                });
            }
            status => {
                return Err(AssetFetchError::UpstreamStatus {
                    status,
                    url: parsed.to_string(),
                });
            }
        }
        if let Some(length) = response.content_length() {
            if length > self.max_bytes as u64 {
                return Err(AssetFetchError::TooLarge);
            }
        }
        let mut buffer = BytesMut::with_capacity(std::cmp::min(self.max_bytes, 64 * 1024));
        let mut total = 0usize;
        loop {
            let chunk = response
                .chunk()
                .await
                .map_err(|err| AssetFetchError::Upstream {
                    url: parsed.to_string(),
                    detail: err.to_string(),
                })?;
            let Some(chunk) = chunk else { break };
            total = total.saturating_add(chunk.len());
            if total > self.max_bytes {
                return Err(AssetFetchError::TooLarge);
            }
            buffer.extend_from_slice(&chunk);
        }
        debug!(url = %parsed, size = total, "fetched asset");
        Ok(buffer.freeze())
    }
}

pub fn validate_http_url(url: &str) -> Result<Url, AssetFetchError> {
    let parsed = Url::parse(url.trim()).map_err(|_| AssetFetchError::InvalidUri)?;
    let scheme = parsed.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(AssetFetchError::InvalidUri);
    }
    if parsed.host_str().is_none() {
        return Err(AssetFetchError::InvalidUri);
    }
    Ok(parsed)
}

#[cfg(test)]
pub(crate) async fn serve_test_router(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}
