use std::{
    str::FromStr,
    sync::{Arc, OnceLock},
    time::Duration,
};

use anyhow::Context;
use axum::{
    Extension, Router,
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::get,
    serve,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use shared::config::server::{Config, DatabaseConfig, LogFormat, StoreBackend};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, fmt};

use crate::{
    app_state::AppState,
    db::bootstrap,
    middleware::{
        auth::auth_middleware,
        request_context::{self, RequestIdState},
    },
    routes,
    store::MemoryStore,
    tracer,
};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Process-wide Prometheus recorder, installed on first use.
///
/// # Panics
/// Panics if another metrics recorder was installed first.
pub fn metrics_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

async fn metrics_endpoint(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        handle.render(),
    )
}

/// Initializes the tracing subscriber for logging using the provided configuration.
pub fn initialize_tracing(config: &Config) -> String {
    let env_filter = build_env_filter(config);

    let fmt_builder = fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    // A subscriber may already be installed (tests, embedding); keep the first.
    let _ = if matches!(config.logging.format, LogFormat::Json) {
        fmt_builder.json().with_ansi(false).try_init()
    } else {
        fmt_builder.with_ansi(true).try_init()
    };

    config.logging.level.clone()
}

fn build_env_filter(config: &Config) -> EnvFilter {
    let default_level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}

/// Creates the PostgreSQL pool. Every pooled connection carries the
/// configured `statement_timeout`.
///
/// # Errors
/// Returns an error if the URL is invalid or the first connection fails.
pub async fn create_database_pool(db: &DatabaseConfig) -> Result<sqlx::PgPool, sqlx::Error> {
    let options = PgConnectOptions::from_str(&db.url)?
        .options([("statement_timeout", db.statement_timeout_ms.to_string())]);
    let pool = PgPoolOptions::new()
        .max_connections(db.max_connections)
        .connect_with(options)
        .await?;
    metrics::gauge!("db_pool_max_connections").set(f64::from(db.max_connections));
    Ok(pool)
}

/// Builds the state for the configured store backend, bootstrapping the
/// schema when PostgreSQL is used.
///
/// # Errors
/// Returns an error if the database is unreachable or bootstrap fails.
pub async fn create_app_state(config: Arc<Config>) -> anyhow::Result<Arc<AppState>> {
    let state = match config.db.backend {
        StoreBackend::Postgres => {
            let pool = prepare_database(&config.db).await?;
            AppState::with_postgres(config, pool)
        }
        StoreBackend::Memory => {
            warn!("using the in-memory store; conversations are lost on exit");
            AppState::in_memory(config, Arc::new(MemoryStore::new()))
        }
    };
    Ok(Arc::new(state))
}

/// Connects, applies the bootstrap scripts and checks readiness.
///
/// # Errors
/// Returns an error naming the step that failed.
pub async fn prepare_database(db: &DatabaseConfig) -> anyhow::Result<sqlx::PgPool> {
    let pool = create_database_pool(db)
        .await
        .context("failed to connect to PostgreSQL")?;
    bootstrap::ensure_liveness(&pool)
        .await
        .context("database liveness check failed")?;
    bootstrap::run(&pool, db)
        .await
        .context("database bootstrap failed")?;
    bootstrap::ensure_readiness(&pool)
        .await
        .context("database readiness check failed")?;
    Ok(pool)
}

/// Creates the CORS layer for the application.
pub fn create_cors_layer(config: &Config) -> CorsLayer {
    use axum::http::Method;

    let cors_config = &config.server.cors;
    let methods = vec![
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];

    let origins = cors_config
        .allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();

    let cors = CorsLayer::new()
        .allow_methods(AllowMethods::list(methods))
        .max_age(Duration::from_secs(cors_config.max_age_seconds));

    if origins.is_empty() {
        if cors_config.allow_credentials {
            warn!("CORS credentials ignored: no allowed origins configured");
        }
        cors.allow_origin(AllowOrigin::any())
            .allow_headers(AllowHeaders::any())
    } else {
        cors.allow_origin(AllowOrigin::list(origins))
            .allow_headers(AllowHeaders::mirror_request())
            .allow_credentials(cors_config.allow_credentials)
    }
}

/// Routes under `/api`. Everything except the OpenAPI document requires a session.
pub fn create_api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    routes::chat::create_router_chat()
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
        .merge(routes::openapi::openapi_routes())
}

/// Creates the main application router with all middleware and routes.
pub fn create_app_router(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let config = state.config.clone();
    let request_id_state = RequestIdState::from_config(&config);

    Router::new()
        .nest("/api", create_api_router(state.clone()))
        .merge(routes::health::create_health_router())
        .route("/metrics", get(metrics_endpoint))
        .layer(Extension(metrics_handle))
        .layer(create_cors_layer(&config))
        .layer(tracer::create_trace_layer())
        .layer(middleware::from_fn_with_state(
            request_id_state,
            request_context::assign_request_id,
        ))
        .with_state(state)
}

/// Resolves on Ctrl+C, after closing every realtime connection so open
/// event streams end and the listener can drain.
///
/// # Panics
/// Panics if the signal handler cannot be installed.
pub async fn create_shutdown_signal(state: Arc<AppState>) {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    let closed = state.presence.disconnect_all().await;
    info!(closed, "Shutting down...");
}

/// Starts the server and serves until shutdown.
///
/// # Errors
/// Returns an error if the store cannot be prepared or the listener fails.
pub async fn run(config: Config) -> anyhow::Result<()> {
    initialize_tracing(&config);
    info!(profile = %config.profile, "Starting server...");

    let metrics_handle = metrics_handle();
    let config = Arc::new(config);
    let state = create_app_state(config.clone()).await?;
    let app = create_app_router(state.clone(), metrics_handle);

    let listener = TcpListener::bind((config.server.host.as_str(), config.server.port))
        .await
        .with_context(|| {
            format!(
                "failed to bind {}:{}",
                config.server.host, config.server.port
            )
        })?;
    info!(addr = %listener.local_addr()?, "Listening");

    serve(listener, app)
        .with_graceful_shutdown(create_shutdown_signal(state))
        .await?;

    Ok(())
}
