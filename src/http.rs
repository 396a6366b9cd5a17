use crate::batch::{BatchReport, BatchSubmission, ItemReport};
use crate::encode::OutputFormat;
use crate::loader::ImageSource;
use crate::options::{
    DEFAULT_TEMPLATE, LogoMode, RawRenderOptions, RenderOptions, TEMPLATES, UNIFORM_LOGO_TEMPLATE,
    resolve_template,
};
use crate::presets::PresetDocument;
use crate::render::{ErrorKind, ItemIdentity, PosterError, RenderRequest, render_blocking};
use crate::sources::MediaServer;
use crate::state::AppState;
use crate::webhook::{RadarrEvent, WebhookOutcome, handle_radarr};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

const MAX_HEADER_VALUE_LEN: usize = 4096;
const ERROR_HEADER: &str = "x-poster-error";

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .route("/api/templates", get(templates))
        .route("/api/fonts", get(fonts))
        .route("/api/library", get(library))
        .route("/api/movie/{item_id}/labels", get(item_labels))
        .route("/api/presets", get(list_presets))
        .route("/api/presets/save", post(save_preset))
        .route("/api/presets/delete", post(delete_preset))
        .route("/api/preview", post(preview))
        .route("/api/batch", get(list_batches).post(submit_batch))
        .route("/api/batch/{id}", get(batch_report))
        .route("/api/batch/{id}/cancel", post(cancel_batch))
        .route("/api/batch/{id}/items/{item_id}/redeliver", post(redeliver_item))
        .route("/webhook/radarr/{template_id}/{preset_id}", post(radarr_webhook))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "canvas": state.config.canvas(),
        "output_format": state.config.output_format,
        "concurrent_renders": state.config.concurrent_renders,
        "render_permits_available": state.render_semaphore.available_permits(),
        "rate_limiter": state.limiter.stats(),
        "batches": state.batches.batch_ids(),
        "plex_configured": state.plex.is_configured(),
    }))
}

async fn templates() -> Json<Value> {
    let describe = |id: &str| match id {
        UNIFORM_LOGO_TEMPLATE => "logo scaled into a fixed bounding box for consistent sizing",
        _ => "free-form logo placement with matte, fade, text and overlay controls",
    };
    Json(json!({
        "default": DEFAULT_TEMPLATE,
        "templates": TEMPLATES
            .iter()
            .map(|id| json!({ "id": id, "description": describe(id) }))
            .collect::<Vec<_>>(),
    }))
}

async fn fonts(State(state): State<Arc<AppState>>) -> Json<Value> {
    let fonts = &state.render.fonts;
    Json(json!({
        "fallback": fonts.fallback(),
        "families": fonts.families().collect::<Vec<_>>(),
    }))
}

async fn library(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let Some(section) = state.config.plex_movie_library_id.as_deref() else {
        return Err(ApiError::new(StatusCode::NOT_FOUND, "PLEX_MOVIE_LIBRARY_ID not set"));
    };
    state.limiter.acquire(state.plex.upstream()).await?;
    let items = state.plex.list_items(section).await?;
    Ok(Json(json!({ "section": section, "items": items })))
}

async fn item_labels(
    State(state): State<Arc<AppState>>,
    Path(item_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.limiter.acquire(state.plex.upstream()).await?;
    let labels = state.plex.labels(&item_id).await?;
    Ok(Json(json!({ "item_id": item_id, "labels": labels })))
}

async fn list_presets(State(state): State<Arc<AppState>>) -> Result<Json<PresetDocument>, ApiError> {
    Ok(Json(state.presets.list().await?))
}

#[derive(Debug, Deserialize)]
struct SavePresetRequest {
    #[serde(default = "default_template", alias = "template_id")]
    template: String,
    preset_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    options: RawRenderOptions,
}

#[derive(Debug, Deserialize)]
struct DeletePresetRequest {
    #[serde(default = "default_template", alias = "template_id")]
    template: String,
    preset_id: String,
}

fn default_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}

fn preset_id(raw: &str) -> Result<&str, ApiError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > 128 {
        return Err(ApiError::bad_request("preset_id must be 1-128 characters"));
    }
    Ok(trimmed)
}

async fn save_preset(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SavePresetRequest>,
) -> Result<Json<Value>, ApiError> {
    let template = resolve_template(&request.template)?;
    let preset_id = preset_id(&request.preset_id)?;
    // Reject payloads that cannot validate at all; clamps are reported back.
    let (_, adjustments) = RenderOptions::validate(&request.options, template)?;
    state
        .presets
        .save(template, preset_id, request.name.as_deref(), request.options)
        .await?;
    Ok(Json(json!({
        "message": format!("Preset '{preset_id}' saved."),
        "template": template,
        "adjustments": adjustments,
    })))
}

async fn delete_preset(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DeletePresetRequest>,
) -> Result<Json<Value>, ApiError> {
    let template = resolve_template(&request.template)?;
    let preset_id = preset_id(&request.preset_id)?;
    if !state.presets.delete(template, preset_id).await? {
        return Err(ApiError::new(StatusCode::NOT_FOUND, "preset not found"));
    }
    Ok(Json(json!({ "message": format!("Preset '{preset_id}' deleted.") })))
}

#[derive(Debug, Deserialize)]
struct PreviewRequest {
    artwork_url: String,
    #[serde(default)]
    logo_url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default = "default_template", alias = "template_id")]
    template: String,
    #[serde(default, alias = "preset_id")]
    preset: Option<String>,
    #[serde(default)]
    options: RawRenderOptions,
    #[serde(default)]
    format: Option<OutputFormat>,
    #[serde(default)]
    grain_seed: Option<u64>,
}

async fn preview(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PreviewRequest>,
) -> Result<Response, ApiError> {
    let template = resolve_template(&request.template)?;
    let raw = state
        .presets
        .layered(template, request.preset.as_deref(), &request.options)
        .await?;
    let (options, adjustments) = RenderOptions::validate(&raw, template)?;

    let artwork = state
        .fetcher
        .fetch(&request.artwork_url)
        .await
        .map_err(|err| err.into_poster_error("artwork"))?;
    let logo = match (options.logo.mode, request.logo_url.as_deref()) {
        (LogoMode::None, _) | (_, None) => None,
        (_, Some(url)) => match state.fetcher.fetch(url).await {
            Ok(bytes) => Some(ImageSource::Bytes(bytes)),
            Err(err) => {
                warn!(url, error = %err, "preview logo fetch failed, rendering without logo");
                None
            }
        },
    };

    let encoding = request
        .format
        .map(|format| state.config.encoding_for(format))
        .unwrap_or_else(|| state.config.encoding());
    let render_request = RenderRequest {
        item: ItemIdentity {
            title: request.title.unwrap_or_default(),
            year: request.year,
        },
        artwork: ImageSource::Bytes(artwork),
        logo,
        options: Arc::new(options),
        canvas: state.config.canvas(),
        encoding,
        grain_seed: request.grain_seed,
    };
    let _permit = state
        .render_semaphore
        .acquire()
        .await
        .map_err(|err| ApiError::from(anyhow::Error::new(err)))?;
    let result = render_blocking(render_request, state.render.clone(), state.config.render_timeout).await?;
    debug!(
        template,
        size = result.byte_len,
        warnings = result.warnings.len(),
        "preview rendered"
    );

    let mut response = Response::new(Body::from(result.bytes));
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(result.content_type.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&result.etag) {
        headers.insert(header::ETAG, value);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    insert_json_header(headers, "x-render-warnings", &json!(result.warnings));
    insert_json_header(headers, "x-render-adjustments", &json!(adjustments));
    Ok(response)
}

fn insert_json_header(headers: &mut HeaderMap, name: &'static str, value: &Value) {
    let mut encoded = value.to_string();
    encoded.retain(|ch| ch.is_ascii() && !ch.is_control());
    if encoded.len() > MAX_HEADER_VALUE_LEN {
        encoded = "[\"truncated\"]".to_string();
    }
    if let Ok(value) = HeaderValue::from_str(&encoded) {
        headers.insert(name, value);
    }
}

async fn list_batches(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "batches": state.batches.batch_ids() }))
}

async fn submit_batch(
    State(state): State<Arc<AppState>>,
    Json(submission): Json<BatchSubmission>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let handle = state.batches.submit(submission).await?;
    let total = handle.progress().borrow().total;
    info!(batch = %handle.id(), total, "batch accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "id": handle.id(), "total": total })),
    ))
}

fn batch_not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "batch not found")
}

async fn batch_report(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BatchReport>, ApiError> {
    let handle = state.batches.get(&id).ok_or_else(batch_not_found)?;
    Ok(Json(handle.report()))
}

async fn cancel_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BatchReport>, ApiError> {
    let handle = state.batches.get(&id).ok_or_else(batch_not_found)?;
    handle.cancel();
    Ok(Json(handle.report()))
}

async fn redeliver_item(
    State(state): State<Arc<AppState>>,
    Path((id, item_id)): Path<(String, String)>,
) -> Result<Json<ItemReport>, ApiError> {
    if state.batches.get(&id).is_none() {
        return Err(batch_not_found());
    }
    Ok(Json(state.batches.redeliver(&id, &item_id).await?))
}

async fn radarr_webhook(
    State(state): State<Arc<AppState>>,
    Path((template_id, raw_preset)): Path<(String, String)>,
    Json(event): Json<RadarrEvent>,
) -> Result<Json<WebhookOutcome>, ApiError> {
    let preset = preset_id(&raw_preset)?;
    Ok(Json(handle_radarr(&state, &template_id, preset, event).await?))
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: Value,
    pub log_detail: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: &str) -> Self {
        Self {
            status,
            body: json!({ "error": message }),
            log_detail: None,
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        if let Value::Object(map) = &mut self.body {
            map.insert(key.to_string(), value);
        }
        self
    }

    pub fn with_log_detail(mut self, detail: String) -> Self {
        if !detail.is_empty() {
            self.log_detail = Some(detail);
        }
        self
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidRequest | ErrorKind::InvalidImage => StatusCode::BAD_REQUEST,
        ErrorKind::AssetUnavailable => StatusCode::NOT_FOUND,
        ErrorKind::UpstreamRateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::UpstreamUnavailable | ErrorKind::DeliveryFailed => StatusCode::BAD_GATEWAY,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::FontUnresolved => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<PosterError> for ApiError {
    fn from(error: PosterError) -> Self {
        let kind = error.kind();
        Self::new(status_for(kind), &error.to_string()).with_field("kind", json!(kind))
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        warn!(error = ?error, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "request failed").with_log_detail(format!("{error:#}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Some(detail) = self.log_detail.as_deref() {
            debug!(status = self.status.as_u16(), detail, "request error");
        }
        let message = self
            .body
            .get("error")
            .and_then(Value::as_str)
            .map(sanitize_error_header);
        let mut response = (self.status, Json(self.body)).into_response();
        if let Some(value) = message.and_then(|message| HeaderValue::from_str(&message).ok()) {
            response.headers_mut().insert(ERROR_HEADER, value);
        }
        if self.status == StatusCode::TOO_MANY_REQUESTS {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("10"));
        }
        response
    }
}

fn sanitize_error_header(message: &str) -> String {
    message
        .chars()
        .filter(|ch| ch.is_ascii() && !ch.is_ascii_control())
        .take(200)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::serve_test_router;
    use crate::config::test_config;
    use crate::loader::png_bytes;
    use axum::body::to_bytes;
    use axum::http::Request;
    use image::{Rgba, RgbaImage};
    use tower::ServiceExt;

    fn app(dir: &tempfile::TempDir) -> (Router, Arc<AppState>) {
        let state = Arc::new(AppState::new(test_config(dir.path())).unwrap());
        (router(state.clone()), state)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn error_kinds_map_to_statuses() {
        assert_eq!(status_for(ErrorKind::InvalidImage), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::AssetUnavailable), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::UpstreamRateLimited), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_for(ErrorKind::DeliveryFailed), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorKind::Timeout), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn templates_and_fonts_are_listed() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(&dir);
        let response = app.clone().oneshot(get("/api/templates")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["templates"][1]["id"], "uniformlogo");

        let response = app.oneshot(get("/api/fonts")).await.unwrap();
        let body = json_body(response).await;
        assert_eq!(body["fallback"], "sans-serif");
    }

    #[tokio::test]
    async fn preset_save_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(&dir);
        let response = app
            .clone()
            .oneshot(post_json(
                "/api/presets/save",
                json!({"preset_id": "cinema", "options": {"poster_zoom": 9.0}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["adjustments"][0]["field"], "poster_zoom");

        let body = json_body(app.clone().oneshot(get("/api/presets")).await.unwrap()).await;
        assert_eq!(body["default"]["presets"][0]["id"], "cinema");

        let response = app
            .clone()
            .oneshot(post_json("/api/presets/delete", json!({"preset_id": "cinema"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = app
            .oneshot(post_json("/api/presets/delete", json!({"preset_id": "cinema"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn preview_returns_image_with_warnings() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(&dir);
        let artwork = png_bytes(&RgbaImage::from_pixel(40, 60, Rgba([20, 40, 60, 255])));
        let base = serve_test_router(Router::new().route(
            "/poster.png",
            axum::routing::get(move || {
                let artwork = artwork.clone();
                async move { artwork }
            }),
        ))
        .await;
        let response = app
            .oneshot(post_json(
                "/api/preview",
                json!({
                    "artwork_url": format!("{base}/poster.png"),
                    "logo_url": format!("{base}/missing-logo.png"),
                    "title": "Heat",
                    "options": {"matte_height_ratio": 0.2},
                    "grain_seed": 3
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert!(response.headers().contains_key(header::ETAG));
        let warnings: Value =
            serde_json::from_str(response.headers()["x-render-warnings"].to_str().unwrap()).unwrap();
        assert_eq!(warnings[0]["stage"], "logo");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.starts_with(b"\x89PNG"));
    }

    #[tokio::test]
    async fn preview_surfaces_fatal_errors() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(&dir);
        let response = app
            .clone()
            .oneshot(post_json(
                "/api/preview",
                json!({"artwork_url": "http://127.0.0.1:9/a.png", "template": "gallery"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().contains_key(ERROR_HEADER));
        assert_eq!(json_body(response).await["kind"], "InvalidRequest");

        let response = app
            .oneshot(post_json("/api/preview", json!({"artwork_url": "ftp://example.org/a.png"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn batch_routes() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(&dir);
        let response = app
            .clone()
            .oneshot(post_json("/api/batch", json!({"item_ids": []})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app.clone().oneshot(get("/api/batch/unknown")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        // Plex is not configured, so every item fails upstream without stopping the batch.
        let response = app
            .clone()
            .oneshot(post_json("/api/batch", json!({"item_ids": ["1", "2"]})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let id = json_body(response).await["id"].as_str().unwrap().to_string();

        let mut report = Value::Null;
        for _ in 0..100 {
            report = json_body(app.clone().oneshot(get(&format!("/api/batch/{id}"))).await.unwrap()).await;
            if report["progress"]["finished"] == true {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(report["progress"]["failed"], 2);
        assert_eq!(report["items"][0]["state"], "failed");
        assert_eq!(report["items"][0]["kind"], "UpstreamUnavailable");

        let response = app
            .oneshot(post_json(&format!("/api/batch/{id}/items/1/redeliver"), json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    type Calls = Arc<std::sync::Mutex<Vec<String>>>;

    async fn fake_upstreams(calls: Calls) -> String {
        use axum::routing::delete;
        let poster = png_bytes(&RgbaImage::from_pixel(40, 60, Rgba([90, 30, 30, 255])));
        let logo = png_bytes(&RgbaImage::from_pixel(8, 2, Rgba([255, 255, 255, 255])));
        let router = Router::new()
            .route(
                "/movie/{id}/images",
                axum::routing::get(|Path(id): Path<u64>| async move {
                    assert_eq!(id, 949);
                    Json(json!({
                        "posters": [{"file_path": "/poster.png", "iso_639_1": null}],
                        "logos": [{"file_path": "/logo.png", "iso_639_1": "en", "width": 8}]
                    }))
                }),
            )
            .route(
                "/original/poster.png",
                axum::routing::get(move || {
                    let poster = poster.clone();
                    async move { poster }
                }),
            )
            .route(
                "/original/logo.png",
                axum::routing::get(move || {
                    let logo = logo.clone();
                    async move { logo }
                }),
            )
            .route(
                "/library/sections/{section}/all",
                axum::routing::get(|| async {
                    Json(json!({"MediaContainer": {"Metadata": [
                        {"ratingKey": "3", "title": "Heat", "year": 2013},
                        {"ratingKey": "7", "title": "Heat", "year": 1995}
                    ]}}))
                }),
            )
            .route(
                "/library/metadata/{key}",
                axum::routing::get(|Path(key): Path<String>| async move {
                    Json(json!({"MediaContainer": {"Metadata": [{
                        "ratingKey": key,
                        "title": "Heat",
                        "Label": [{"tag": "Overlay"}]
                    }]}}))
                }),
            )
            .route(
                "/library/metadata/{key}/posters",
                post(|State(calls): State<Calls>, Path(key): Path<String>| async move {
                    calls.lock().unwrap().push(format!("upload {key}"));
                }),
            )
            .route(
                "/library/metadata/{key}/labels",
                delete(
                    |State(calls): State<Calls>,
                     Path(key): Path<String>,
                     axum::extract::Query(query): axum::extract::Query<
                        std::collections::HashMap<String, String>,
                    >| async move {
                        calls.lock().unwrap().push(format!("unlabel {key} {}", query["tag.tag"]));
                    },
                ),
            )
            .with_state(calls);
        serve_test_router(router).await
    }

    fn connected_app(dir: &tempfile::TempDir, base: &str) -> Router {
        let mut config = test_config(dir.path());
        config.tmdb_api_key = Some("secret".to_string());
        config.tmdb_api_base = base.to_string();
        config.tmdb_image_base = base.to_string();
        config.plex_url = Some(base.to_string());
        config.plex_token = Some("tok".to_string());
        config.plex_movie_library_id = Some("1".to_string());
        config.webhook_auto_send = true;
        config.webhook_auto_labels = vec!["Overlay".to_string()];
        router(Arc::new(AppState::new(config).unwrap()))
    }

    #[tokio::test]
    async fn radarr_webhook_renders_and_uploads_matching_item() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Calls::default();
        let base = fake_upstreams(calls.clone()).await;
        let app = connected_app(&dir, &base);
        let response = app
            .clone()
            .oneshot(post_json(
                "/api/presets/save",
                json!({"preset_id": "radarr", "options": {"poster_filter": "textless", "logo_mode": "match"}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(post_json(
                "/webhook/radarr/default/radarr",
                json!({"eventType": "Download", "movie": {"title": "Heat", "year": 1995, "tmdbId": 949}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["artwork_url"], format!("{base}/original/poster.png"));
        assert_eq!(body["logo_url"], format!("{base}/original/logo.png"));
        assert_eq!(body["sent_to_server"], true);
        assert_eq!(body["item_id"], "7");
        assert!(body["delivery_error"].is_null());
        assert!(body["byte_len"].as_u64().unwrap() > 0);
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["upload 7".to_string(), "unlabel 7 Overlay".to_string()]
        );
    }

    #[tokio::test]
    async fn radarr_webhook_rejects_bad_requests() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(&dir);
        app.clone()
            .oneshot(post_json("/api/presets/save", json!({"preset_id": "radarr"})))
            .await
            .unwrap();
        let movie = json!({"eventType": "Download", "movie": {"title": "Heat", "year": 1995}});

        let response = app
            .clone()
            .oneshot(post_json("/webhook/radarr/default/radarr", movie.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].as_str().unwrap().contains("tmdbId"));

        let with_id = json!({"movie": {"title": "Heat", "tmdbId": 949}});
        let response = app
            .clone()
            .oneshot(post_json("/webhook/radarr/default/missing", with_id.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let response = app
            .clone()
            .oneshot(post_json("/webhook/radarr/mystery/radarr", with_id.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // no TMDB key in the test config
        let response = app
            .oneshot(post_json("/webhook/radarr/default/radarr", with_id))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn item_labels_come_from_plex() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(&dir);
        let response = app.oneshot(get("/api/movie/7/labels")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let dir = tempfile::tempdir().unwrap();
        let base = fake_upstreams(Calls::default()).await;
        let response = connected_app(&dir, &base)
            .oneshot(get("/api/movie/7/labels"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["item_id"], "7");
        assert_eq!(body["labels"], json!(["Overlay"]));
    }
}
