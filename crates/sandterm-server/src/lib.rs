//! HTTP + WebSocket transport for sandterm session multiplexing.
//!
//! Split into a library and a thin binary so integration tests can
//! build the router directly, the way the teacher's sibling crates
//! keep their axum app construction testable.

pub mod credentials;
pub mod error;
pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use sandterm_core::SessionRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub secret_key: String,
}

pub struct Config {
    pub bind_address: String,
    pub storage_dir: PathBuf,
    pub shell: String,
    pub idle_timeout: Duration,
    pub secret_key: String,
    pub ring_buffer_capacity: usize,
}

pub async fn load_config() -> anyhow::Result<Config> {
    let storage_dir = std::env::var("STORAGE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/sandterm/sessions"));
    tokio::fs::create_dir_all(&storage_dir).await?;

    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8080);
    let bind_address = format!("0.0.0.0:{port}");

    let idle_timeout_secs: u64 = std::env::var("IDLE_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1800);

    let ring_buffer_capacity: usize = std::env::var("RING_BUFFER_CAPACITY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(sandterm_core::session::DEFAULT_SCROLLBACK_CAPACITY);

    let secret_key = std::env::var("SECRET_KEY").unwrap_or_else(|_| {
        warn!("SECRET_KEY not set, generating an ephemeral one (insecure across restarts)");
        use rand::Rng;
        rand::thread_rng()
            .sample_iter(&rand::distributions::Alphanumeric)
            .take(32)
            .map(char::from)
            .collect()
    });

    Ok(Config {
        bind_address,
        storage_dir,
        shell,
        idle_timeout: Duration::from_secs(idle_timeout_secs),
        secret_key,
        ring_buffer_capacity,
    })
}

pub fn build_state(config: Config) -> AppState {
    let registry = SessionRegistry::new(
        config.storage_dir,
        config.shell,
        config.idle_timeout,
        config.ring_buffer_capacity,
    );
    AppState {
        registry,
        secret_key: config.secret_key,
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/maintenance/cleanup",
            post(handlers::maintenance::cleanup),
        )
        .nest("/api/terminal", session_routes())
        .route("/ws", get(handlers::ws::handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn session_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/sessions",
            get(handlers::sessions::list).post(handlers::sessions::create),
        )
        .route(
            "/sessions/:id",
            get(handlers::sessions::get).delete(handlers::sessions::delete),
        )
        .route("/sessions/:id/size", post(handlers::sessions::resize))
        .route("/sessions/:id/screen", get(handlers::sessions::screen))
        .route(
            "/sessions/:id/credentials",
            get(handlers::sessions::credentials),
        )
}
