#![allow(clippy::collapsible_if)]

mod assets;
mod batch;
mod config;
mod delivery;
mod effects;
mod encode;
mod failure_log;
mod geometry;
mod http;
mod loader;
mod logo;
mod options;
mod overlay;
mod plex;
mod presets;
mod rate_limit;
mod render;
mod sources;
mod state;
mod text;
mod tmdb;
mod webhook;

use crate::config::Config;
use crate::state::AppState;
use axum::Router;
use axum::body::HttpBody;
use axum::http::{Response, header};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::compression::{
    CompressionLayer,
    predicate::{DefaultPredicate, Predicate},
};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::info;

#[derive(Clone)]
struct NoImageCompression {
    inner: DefaultPredicate,
}

impl NoImageCompression {
    fn new() -> Self {
        Self {
            inner: DefaultPredicate::new(),
        }
    }
}

impl Predicate for NoImageCompression {
    fn should_compress<B>(&self, response: &Response<B>) -> bool
    where
        B: HttpBody,
    {
        if let Some(content_type) = response.headers().get(header::CONTENT_TYPE) {
            if let Ok(content_type) = content_type.to_str() {
                if content_type.starts_with("image/") {
                    return false;
                }
            }
        }
        self.inner.should_compress(response)
    }
}

fn build_app(state: Arc<AppState>) -> Router {
    let max_in_flight = if state.config.max_in_flight_requests == 0 {
        usize::MAX
    } else {
        state.config.max_in_flight_requests
    };
    http::router(state)
        .layer(CompressionLayer::new().compress_when(NoImageCompression::new()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(false)),
        )
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
            header::SET_COOKIE,
        ]))
        .layer(ConcurrencyLimitLayer::new(max_in_flight))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    info!(
        config_dir = %config.config_dir.display(),
        output_dir = %config.output_dir.display(),
        memory_limit_bytes = config.memory_limit_bytes,
        concurrent_renders = config.concurrent_renders,
        tmdb_rate_limit = config.tmdb_rate_limit,
        plex_rate_limit = config.plex_rate_limit,
        max_in_flight_requests = config.max_in_flight_requests,
        "startup config summary"
    );
    let state = Arc::new(AppState::new(config)?);
    let app = build_app(state.clone());

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(address = %addr, "poster renderer listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;
    Ok(())
}
