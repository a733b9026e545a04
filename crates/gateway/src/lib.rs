//! HTTP gateway for Turnstile.
//!
//! Exposes `POST /v1/chat` and `GET /health`, and wires the configured
//! rate store, usage store, knowledge index, and provider into one
//! [`RequestOrchestrator`].
//!
//! Built on Axum.

pub mod chat;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    http::{HeaderValue, Method, header},
    middleware::{self, Next},
    response::{Json, Response},
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use turnstile_config::{AppConfig, GatewayConfig, RateBackend};
use turnstile_knowledge::{KnowledgeRetriever, ProviderEmbedder, SqliteIndex};
use turnstile_pipeline::{RequestOrchestrator, StaticTokenAuthenticator};
use turnstile_quota::{PlanCatalog, QuotaGate, SqliteUsageStore};
use turnstile_ratelimit::{LocalRateStore, RateLimiter, RateStore, RedisRateStore};

/// Correlation id header, read from the request or generated, and always
/// echoed on the response.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_REQUEST_ID_LEN: usize = 128;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub orchestrator: Arc<RequestOrchestrator>,
    /// Include diagnostic `detail` in failure bodies
    pub dev_mode: bool,
}

pub type SharedState = Arc<GatewayState>;

/// Build the router with all gateway routes and layers.
///
/// Layers applied:
/// - request body size limit (`gateway.max_body_bytes`)
/// - `x-request-id` propagation
/// - CORS restricted to `gateway.cors_origins`
/// - HTTP trace logging
pub fn build_router(state: SharedState, gateway: &GatewayConfig) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/chat", post(chat::chat_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(gateway.max_body_bytes))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors_layer(&gateway.cors_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static(REQUEST_ID_HEADER),
        ])
        .expose_headers([
            header::RETRY_AFTER,
            header::HeaderName::from_static(REQUEST_ID_HEADER),
        ])
        .max_age(Duration::from_secs(3600))
}

/// Ensure every request has a correlation id and every response carries it.
async fn request_id_middleware(mut req: axum::extract::Request, next: Next) -> Response {
    let incoming = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN && v.to_str().is_ok())
        .cloned();

    let value = match incoming {
        Some(value) => Some(value),
        None => HeaderValue::try_from(uuid::Uuid::new_v4().to_string()).ok(),
    };

    match value {
        Some(value) => {
            req.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
            let mut response = next.run(req).await;
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
            response
        }
        None => next.run(req).await,
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    provider: String,
    rate_store: String,
    knowledge: bool,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        provider: state.orchestrator.provider_name().to_string(),
        rate_store: state.orchestrator.rate_store_name().to_string(),
        knowledge: state.orchestrator.knowledge_enabled(),
    })
}

/// Pick the rate store for `config`.
///
/// A Redis backend that cannot be reached at startup falls back to the
/// in-process store.
pub async fn build_rate_store(config: &AppConfig) -> Arc<dyn RateStore> {
    let rl = &config.rate_limit;
    match (rl.backend, rl.redis_url.as_deref()) {
        (RateBackend::Redis, Some(url)) => {
            let timeout = Duration::from_millis(rl.store_timeout_ms.max(1_000));
            match RedisRateStore::connect(url, rl.key_prefix.clone(), timeout).await {
                Ok(store) => {
                    info!("Using Redis rate store");
                    Arc::new(store)
                }
                Err(e) => {
                    warn!(
                        event = "rate_store_fallback",
                        error = %e,
                        "Redis unavailable, falling back to local rate store"
                    );
                    Arc::new(LocalRateStore::new())
                }
            }
        }
        _ => Arc::new(LocalRateStore::new()),
    }
}

/// Open the knowledge index and build a retriever over it.
pub async fn build_retriever(
    config: &AppConfig,
    provider: Arc<dyn turnstile_core::Provider>,
) -> Result<KnowledgeRetriever, turnstile_core::KnowledgeError> {
    ensure_parent_dir(&config.knowledge.index_path);
    let index = SqliteIndex::new(&config.knowledge.index_path).await?;
    let embedder = ProviderEmbedder::new(
        provider,
        config.knowledge.embedding_model.clone(),
        config.knowledge.dimensions,
    );
    Ok(KnowledgeRetriever::new(Arc::new(embedder), Arc::new(index), &config.knowledge))
}

/// Open the usage store and build the quota gate.
pub async fn build_quota_gate(config: &AppConfig) -> Result<QuotaGate, turnstile_core::StoreError> {
    ensure_parent_dir(&config.quota.database_url);
    let store = SqliteUsageStore::new(&config.quota.database_url).await?;
    Ok(QuotaGate::new(
        Arc::new(store),
        PlanCatalog::from_config(&config.quota.plans),
    ))
}

/// Wire every component named in `config` into an orchestrator.
pub async fn build_orchestrator(
    config: &AppConfig,
) -> Result<RequestOrchestrator, Box<dyn std::error::Error>> {
    let provider = turnstile_providers::build_from_config(config)?;
    let quota = Arc::new(build_quota_gate(config).await?);
    let limiter = Arc::new(RateLimiter::new(build_rate_store(config).await, &config.rate_limit));

    if config.gateway.tokens.is_empty() {
        warn!("No bearer tokens configured under [gateway.tokens]; every chat request will be rejected");
    }
    let authenticator = Arc::new(StaticTokenAuthenticator::new(config.gateway.tokens.clone()));

    let mut orchestrator =
        RequestOrchestrator::new(authenticator, quota, limiter, provider.clone(), config);

    if config.knowledge.enabled {
        match build_retriever(config, provider).await {
            Ok(retriever) => orchestrator = orchestrator.with_knowledge(Arc::new(retriever)),
            Err(e) => warn!(
                event = "knowledge_degraded",
                error = %e,
                "Knowledge index unavailable, serving without knowledge"
            ),
        }
    }

    Ok(orchestrator)
}

fn ensure_parent_dir(path: &str) {
    if path.contains(":memory:") {
        return;
    }
    let file = path.strip_prefix("sqlite://").unwrap_or(path);
    if let Some(parent) = std::path::Path::new(file).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(path = %parent.display(), error = %e, "Could not create data directory");
            }
        }
    }
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let orchestrator = build_orchestrator(&config).await?;
    let state = Arc::new(GatewayState {
        orchestrator: Arc::new(orchestrator),
        dev_mode: config.gateway.dev_mode,
    });
    let app = build_router(state, &config.gateway);

    info!(addr = %addr, dev_mode = config.gateway.dev_mode, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
