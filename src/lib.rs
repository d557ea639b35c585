pub mod auth;
pub mod catalog;
pub mod channels;
pub mod config;
pub mod error;
pub mod metrics;
pub mod relay;
pub mod store;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info, warn};

use auth::ApiKey;
use catalog::{Catalog, CategoryTab};
use channels::{looks_like_m3u, parse_m3u, Channel};
use error::{m3u_error_body, Error};
use relay::{ProviderRegistry, RelayClient};
use store::KeyValueStore;

pub const SERVICE_NAME: &str = "m3u-relay";
const M3U_CONTENT_TYPE: &str = "audio/x-mpegurl";

pub struct AppState {
    pub api_key: String,
    pub providers: ProviderRegistry,
    pub default_provider: String,
    pub relay: RelayClient,
    pub catalog: RwLock<Catalog>,
    pub store: Arc<dyn KeyValueStore>,
    started_at: Instant,
}

impl AppState {
    pub fn new(
        api_key: impl Into<String>,
        providers: ProviderRegistry,
        default_provider: impl Into<String>,
        relay: RelayClient,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let default_provider = default_provider.into();
        Self {
            api_key: api_key.into(),
            providers,
            catalog: RwLock::new(Catalog::new(default_provider.clone())),
            default_provider,
            relay,
            store,
            started_at: Instant::now(),
        }
    }

    pub fn with_catalog(self, catalog: Catalog) -> Self {
        metrics::CATALOG_CHANNELS.set(catalog.channels.len() as i64);
        Self {
            catalog: RwLock::new(catalog),
            ..self
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

pub fn create_app(state: Arc<AppState>, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/playlist", get(playlist_handler))
        .route("/api/providers", get(providers_handler))
        .route("/api/catalog", get(catalog_handler))
        .route("/api/catalog/reset", post(reset_handler))
        .route("/api/channels", get(channels_handler))
        .route("/api/categories", get(categories_handler))
        .route("/api/export", get(export_handler))
        .fallback(fallback_handler)
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin {:?}", o);
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(auth::API_KEY_HEADER)])
        .max_age(Duration::from_secs(86400))
}

/// Fetches `provider_id`, swaps the parsed result into the shared catalog
/// and persists it. Returns the raw upstream text.
///
/// On any failure the current catalog is left as it was.
pub async fn load_provider(state: &AppState, provider_id: &str) -> Result<String, Error> {
    let provider = state.providers.get(provider_id)?;
    info!("Fetching playlist from provider {} ({})", provider_id, provider.name);

    let body = match state.relay.fetch_provider(&state.providers, provider_id).await {
        Ok(body) => body,
        Err(e) => {
            error!("Failed to fetch playlist from provider {}: {}", provider_id, e);
            metrics::record_fetch(provider_id, e.kind());
            return Err(e);
        }
    };

    if !looks_like_m3u(&body) {
        warn!(
            "Provider {}: {} (first bytes: {:?})",
            provider_id,
            Error::InvalidFormat,
            body.chars().take(80).collect::<String>()
        );
    }

    let parsed = parse_m3u(&body);
    // Persist under the swap's guard: the stored snapshot always matches memory.
    let (channel_count, category_count) = {
        let mut catalog = state.catalog.write().await;
        let next = std::mem::take(&mut *catalog)
            .select_provider(provider_id)
            .load(parsed);
        *catalog = next;
        if let Err(e) = store::persist_catalog(state.store.as_ref(), &catalog) {
            warn!("Failed to persist catalog: {}", e);
        }
        metrics::CATALOG_CHANNELS.set(catalog.channels.len() as i64);
        (catalog.channels.len(), catalog.categories.len())
    };

    info!(
        "Loaded {} channels in {} categories from {}",
        channel_count, category_count, provider_id
    );
    metrics::record_fetch(provider_id, "ok");

    Ok(body)
}

fn annotate_playlist(provider_name: &str, body: &str, fetched_at: DateTime<Utc>) -> String {
    format!(
        "#EXTM3U\n# Relayed by {} {}\n# Provider: {}\n# Date: {}\n{}",
        SERVICE_NAME,
        env!("CARGO_PKG_VERSION"),
        provider_name,
        fetched_at.to_rfc3339(),
        body
    )
}

#[derive(Deserialize)]
struct PlaylistQuery {
    provider: Option<String>,
}

async fn playlist_handler(
    _key: ApiKey,
    State(state): State<Arc<AppState>>,
    Query(query): Query<PlaylistQuery>,
) -> Result<Response, Error> {
    let provider_id = query
        .provider
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| state.default_provider.clone());

    let body = load_provider(&state, &provider_id).await?;
    let provider_name = state.providers.get(&provider_id)?.name.clone();
    let annotated = annotate_playlist(&provider_name, &body, Utc::now());
    info!("Relayed playlist from {}: {} bytes", provider_id, annotated.len());

    let provider_header = HeaderValue::from_str(&provider_name)
        .unwrap_or_else(|_| HeaderValue::from_static("unknown"));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(M3U_CONTENT_TYPE)),
            (header::CACHE_CONTROL, HeaderValue::from_static("public, max-age=300")),
            (HeaderName::from_static("x-provider"), provider_header),
        ],
        annotated,
    )
        .into_response())
}

async fn providers_handler(_key: ApiKey, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "success": true,
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now(),
        "providers": state.providers.list(),
    }))
}

#[derive(Serialize)]
struct CatalogSummary {
    provider: String,
    last_updated: Option<DateTime<Utc>>,
    channels: usize,
    categories: usize,
}

async fn catalog_handler(_key: ApiKey, State(state): State<Arc<AppState>>) -> Json<CatalogSummary> {
    let catalog = state.catalog.read().await;
    Json(CatalogSummary {
        provider: catalog.selected_provider.clone(),
        last_updated: catalog.last_updated,
        channels: catalog.channels.len(),
        categories: catalog.categories.len(),
    })
}

async fn reset_handler(_key: ApiKey, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    {
        let mut catalog = state.catalog.write().await;
        let next = std::mem::take(&mut *catalog).reset();
        *catalog = next;
        if let Err(e) = store::clear_catalog(state.store.as_ref()) {
            warn!("Failed to clear persisted catalog: {}", e);
        }
    }
    metrics::CATALOG_CHANNELS.set(0);
    info!("Catalog reset");
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
struct ChannelQuery {
    category: Option<String>,
    search: Option<String>,
}

#[derive(Serialize)]
struct ChannelsResponse {
    total: usize,
    overflow: usize,
    channels: Vec<Channel>,
}

async fn channels_handler(
    _key: ApiKey,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChannelQuery>,
) -> Json<ChannelsResponse> {
    let mut catalog = state.catalog.read().await.clone();
    if let Some(category) = query.category.filter(|c| !c.is_empty()) {
        catalog = catalog.set_category(category);
    }
    if let Some(search) = query.search {
        catalog = catalog.set_search_term(search);
    }

    let view = catalog.filter_view();
    Json(ChannelsResponse {
        total: view.total(),
        overflow: view.overflow,
        channels: view.channels,
    })
}

async fn categories_handler(_key: ApiKey, State(state): State<Arc<AppState>>) -> Json<Vec<CategoryTab>> {
    Json(state.catalog.read().await.tabs())
}

async fn export_handler(_key: ApiKey, State(state): State<Arc<AppState>>) -> Response {
    let catalog = state.catalog.read().await;
    if catalog.is_empty() {
        return (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, M3U_CONTENT_TYPE)],
            m3u_error_body("no playlist loaded"),
        )
            .into_response();
    }

    let disposition = format!(
        "attachment; filename=\"playlist_{}.m3u\"",
        Utc::now().format("%Y-%m-%d")
    );
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, M3U_CONTENT_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        catalog.export_m3u(),
    )
        .into_response()
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now(),
        "uptime_seconds": state.uptime().as_secs(),
        "providers": state.providers.len(),
    }))
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
}

async fn index_handler() -> impl IntoResponse {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "playlist": "/api/playlist?provider=<id>",
            "providers": "/api/providers",
            "catalog": "/api/catalog",
            "channels": "/api/channels?category=<name>&search=<term>",
            "categories": "/api/categories",
            "export": "/api/export",
            "health": "/health",
            "metrics": "/metrics",
        },
    }))
}

async fn fallback_handler(method: Method, uri: Uri, headers: HeaderMap) -> impl IntoResponse {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("<none>");
    info!(
        "HTTP 404: method={} uri={} UA=\"{}\"",
        method,
        relay::redact(&uri.to_string()),
        user_agent
    );
    (StatusCode::NOT_FOUND, Body::from("Not found"))
}
