//! eda-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, loads config, picks
//! the ledger backend, wires middleware, and starts the HTTP server.  All
//! route handlers live in `routes.rs`; shared state lives in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use eda_audit::AuditWriter;
use eda_config::{report_unused_keys, LedgerConfig, UnusedKeyPolicy};
use eda_daemon::{
    backend::{LedgerBackend, MemBackend, PgBackend},
    routes, state,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

/// Comma-separated layered config paths.
const ENV_CONFIG: &str = "EDA_CONFIG";
const ENV_DAEMON_ADDR: &str = "EDA_DAEMON_ADDR";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cfg = load_config()?;

    let backend: Arc<dyn LedgerBackend> = match std::env::var(&cfg.database.url_env) {
        Ok(url) => {
            let pool = eda_db::connect(&url).await?;
            eda_db::migrate(&pool).await?;
            Arc::new(PgBackend::new(pool))
        }
        Err(_) => {
            warn!(
                url_env = %cfg.database.url_env,
                "no database configured; serving an in-memory ledger"
            );
            Arc::new(MemBackend::new())
        }
    };

    let writer = AuditWriter::resume(&cfg.audit.path, cfg.audit.hash_chain)?;
    let shared = Arc::new(state::AppState::new(backend, cfg.default_vat_rate()).with_audit(writer));

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(5));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr(&cfg)?;
    info!(backend = shared.backend.name(), "eda-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// Defaults when EDA_CONFIG is unset. Unused keys fail here: a daemon should
/// not start on a config it silently ignores.
fn load_config() -> anyhow::Result<LedgerConfig> {
    let raw = std::env::var(ENV_CONFIG).unwrap_or_default();
    let paths: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    let loaded = eda_config::load_layered_yaml(&paths)?;
    report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Fail)?;
    info!(config_hash = %loaded.config_hash, layers = paths.len(), "config loaded");
    loaded.typed()
}

/// EDA_DAEMON_ADDR wins over `daemon.addr`.
fn bind_addr(cfg: &LedgerConfig) -> anyhow::Result<SocketAddr> {
    let raw = std::env::var(ENV_DAEMON_ADDR).unwrap_or_else(|_| cfg.daemon.addr.clone());
    raw.parse()
        .with_context(|| format!("invalid bind address {raw:?}"))
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}
