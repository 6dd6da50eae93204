pub mod adapters;
pub mod config;
pub mod error;
pub mod validation;

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderValue, Method},
    middleware::Next,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chime_core::{
    Capabilities, ChimeTts, ClearCacheRequest, ClearCacheSummary, HttpDownloader, JsonFileStore,
    SayOutcome, SayRequest, UrlResponse,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    services::ServeDir,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::adapters::{CommandPlaybackSink, FfmpegConverter, HttpTtsEngine};
use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::validation::validate_say_request;

#[derive(Clone)]
pub struct AppState {
    pub chime: ChimeTts,
    pub config: ServerConfig,
}

/// Body of a `/say` response. `url` is only set when no target was given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SayResponse {
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl From<SayOutcome> for SayResponse {
    fn from(outcome: SayOutcome) -> Self {
        match outcome {
            SayOutcome::Played { duration_seconds } => Self {
                duration: duration_seconds,
                url: None,
            },
            SayOutcome::Url(UrlResponse { url, duration }) => Self {
                duration,
                url: Some(url),
            },
        }
    }
}

/// Production capabilities for `config`.
pub fn capabilities(config: &ServerConfig) -> Capabilities {
    let client = reqwest::Client::new();
    Capabilities {
        tts: Arc::new(HttpTtsEngine::new(client.clone(), config.tts_endpoint.clone())),
        playback: Arc::new(CommandPlaybackSink::new(config.audio_player.as_deref())),
        converter: Arc::new(FfmpegConverter::new(config.ffmpeg_bin.clone())),
        downloader: Arc::new(HttpDownloader::new(client)),
        store: Arc::new(JsonFileStore::new(&config.store_path)),
    }
}

pub fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::OPTIONS];
    let permissive = || {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods.clone())
            .allow_headers(Any)
            .allow_credentials(false)
    };

    let Some(allowed_origins) = config.cors_allowed_origins.as_ref() else {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
        return permissive();
    };
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();
    if origins.is_empty() {
        warn!("CORS_ALLOWED_ORIGINS is empty, falling back to permissive CORS");
        return permissive();
    }

    info!("CORS configured for {} origin(s)", origins.len());
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(methods)
        .allow_headers(Any)
        .allow_credentials(false)
}

// Request ID middleware for tracing
async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()).ok();
    if let Some(id) = request_id.clone() {
        request.headers_mut().insert("x-request-id", id);
    }
    let mut response = next.run(request).await;
    if let Some(id) = request_id {
        response.headers_mut().insert("x-request-id", id);
    }
    response
}

/// The HTTP surface, served both at the root and below `/api`. Generated
/// public files are served from `/local`.
pub fn router(state: AppState) -> Router {
    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        .layer(cors_layer(&state.config))
        .into_inner();

    let api = Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route("/say", post(say_endpoint))
        .route("/say_url", post(say_url_endpoint))
        .route("/clear_cache", post(clear_cache_endpoint));

    let www_path = state.config.chime.www_path.clone();
    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .nest_service("/local", ServeDir::new(www_path))
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(middleware_stack)
        .with_state(state)
}

fn with_defaults(mut req: SayRequest, config: &ServerConfig) -> SayRequest {
    if req.tts_platform.trim().is_empty() {
        req.tts_platform = config.default_tts_platform.clone();
    }
    req
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn say_endpoint(
    State(state): State<AppState>,
    Json(req): Json<SayRequest>,
) -> Result<Json<SayResponse>, ApiError> {
    validate_say_request(&req)?;
    let outcome = state.chime.say(with_defaults(req, &state.config)).await?;
    Ok(Json(outcome.into()))
}

pub async fn say_url_endpoint(
    State(state): State<AppState>,
    Json(req): Json<SayRequest>,
) -> Result<Json<UrlResponse>, ApiError> {
    validate_say_request(&req)?;
    let response = state.chime.say_url(with_defaults(req, &state.config)).await?;
    Ok(Json(response))
}

pub async fn clear_cache_endpoint(
    State(state): State<AppState>,
    Json(req): Json<ClearCacheRequest>,
) -> Result<Json<ClearCacheSummary>, ApiError> {
    let summary = state.chime.clear_cache(req).await?;
    Ok(Json(summary))
}
