use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use axum::body::Bytes;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use clap::Parser;
use fusion_api::{FusionService, SqliteBackend};
use fusion_core::{Clock, FusionConfig, HistoryPage, MergedRecord, SystemClock};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod auth;
mod error;
mod rate_limit;
mod validation;

use auth::TokenSigner;
use error::ApiError;
use rate_limit::RateLimiter;

const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Clone)]
struct AppState {
    service: FusionService,
    tokens: Arc<TokenSigner>,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Parser)]
#[command(name = "fusion-service")]
#[command(about = "HTTP service merging catalog characters with their closest creature")]
struct Args {
    #[arg(long, env = "FUSION_DB", default_value = "./fusion.sqlite3")]
    db: PathBuf,
    #[arg(long, env = "FUSION_BIND", default_value = "127.0.0.1:3000")]
    bind: SocketAddr,
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    jwt_secret: String,
    #[arg(long, env = "FUSION_CHARACTER_API", default_value = "https://swapi.dev/api")]
    character_api: String,
    #[arg(long, env = "FUSION_CREATURE_API", default_value = "https://pokeapi.co/api/v2")]
    creature_api: String,
    #[arg(long, env = "FUSION_CACHE_WINDOW_SECS", default_value_t = 30 * 60)]
    cache_window_secs: u64,
    #[arg(long, env = "FUSION_REQUEST_TIMEOUT_MS", default_value_t = 10_000)]
    request_timeout_ms: u64,
    #[arg(long, env = "FUSION_MERGE_DEADLINE_MS", default_value_t = 30_000)]
    merge_deadline_ms: u64,
    #[arg(long, env = "FUSION_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,
    #[arg(long, env = "FUSION_RETRY_DELAY_MS", default_value_t = 250)]
    retry_delay_ms: u64,
    #[arg(long, env = "FUSION_FALLBACK_SEED")]
    fallback_seed: Option<u64>,
    #[arg(long, env = "FUSION_RATE_LIMIT", default_value_t = 100)]
    rate_limit: u32,
    #[arg(long, env = "FUSION_RATE_WINDOW_SECS", default_value_t = 15 * 60)]
    rate_window_secs: u64,
}

impl Args {
    fn fusion_config(&self) -> FusionConfig {
        FusionConfig {
            character_api_base: self.character_api.clone(),
            creature_api_base: self.creature_api.clone(),
            cache_window: Duration::from_secs(self.cache_window_secs),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            merge_deadline: Duration::from_millis(self.merge_deadline_ms),
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            fallback_seed: self.fallback_seed,
            ..FusionConfig::default()
        }
    }
}

fn app(state: AppState, limiter: Arc<RateLimiter>) -> Router {
    let protected = Router::new()
        .route("/fusionados/:characterId", get(merge_character))
        .route("/almacenar", post(store_character))
        .route("/historial", get(history))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.tokens),
            auth::require_bearer,
        ));

    let api = Router::new().route("/auth", post(issue_token)).merge(protected);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/docs/openapi.yaml", get(openapi))
        .nest("/api", api)
        .layer(middleware::from_fn_with_state(limiter, rate_limit::enforce))
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    if args.jwt_secret.trim().is_empty() {
        bail!("JWT_SECRET must not be empty");
    }

    let backend = SqliteBackend::new(args.db.clone());
    let schema = backend
        .schema_status()
        .with_context(|| format!("failed to inspect database {}", args.db.display()))?;
    tracing::info!(
        current = schema.current_version,
        target = schema.target_version,
        pending = schema.pending_versions.len(),
        "database schema"
    );
    let purged = backend
        .purge_expired_cache(SystemClock.now_millis())
        .context("failed to purge expired cache entries")?;
    tracing::info!(purged, "expired cache entries removed");

    let service = FusionService::from_config(&args.fusion_config(), args.db.clone())
        .context("failed to build fusion service")?;
    let state = AppState { service, tokens: Arc::new(TokenSigner::new(&args.jwt_secret)) };
    let limiter = Arc::new(RateLimiter::new(
        args.rate_limit,
        Duration::from_secs(args.rate_window_secs),
    ));

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    tracing::info!(bind = %args.bind, "fusion service listening");
    axum::serve(listener, app(state, limiter).into_make_service_with_connect_info::<SocketAddr>())
        .await?;
    Ok(())
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();
    let response = next.run(request).await;
    tracing::info!(
        %method,
        path,
        status = response.status().as_u16(),
        latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "request"
    );
    response
}

async fn root() -> &'static str {
    "Hola mundo"
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn issue_token(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<TokenResponse>, ApiError> {
    let body = validation::parse_json_object(&body)?;
    let email = validation::validate_auth_body(&body)?;
    let token = state.tokens.issue(&email, auth::now_secs())?;
    Ok(Json(TokenResponse { token }))
}

async fn merge_character(
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
    Path(character_id): Path<String>,
) -> Result<Json<MergedRecord>, ApiError> {
    let character_id = validation::parse_character_id(&character_id)?;
    tracing::info!(sub = %claims.sub, character_id, "merge requested");
    let record = state.service.merge(&character_id.to_string()).await?;
    Ok(Json(record))
}

async fn store_character(
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
    body: Bytes,
) -> Result<(StatusCode, Json<MergedRecord>), ApiError> {
    let body = validation::parse_json_object(&body)?;
    let profile = validation::validate_create_body(body)?;
    tracing::info!(sub = %claims.sub, name = %profile.name, "direct store requested");
    let record = state.service.create_character(profile)?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn history(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<HistoryPage>, ApiError> {
    let query = validation::parse_history_query(&params)?;
    let page = state.service.get_history(query.last_evaluated_key.as_ref(), query.limit)?;
    Ok(Json(page))
}
