//! sandterm-server binary entry point.
//!
//! The panic hook and tracing subscriber setup are ported from the
//! teacher's `main.rs`; router construction lives in `lib.rs` so it's
//! reachable from integration tests.

use std::net::SocketAddr;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()));
        let payload = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        tracing::error!("panic at {:?}: {}", location, payload);
    }));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_max_level(Level::INFO)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(1);
    }

    info!("starting sandterm-server v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run().await {
        error!("server failed: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = sandterm_server::load_config().await?;
    info!(
        storage_dir = %config.storage_dir.display(),
        shell = %config.shell,
        idle_timeout_secs = config.idle_timeout.as_secs(),
        "configuration loaded"
    );
    let bind_address = config.bind_address.clone();

    let state = sandterm_server::build_state(config);
    let app = sandterm_server::build_router(state);

    let addr: SocketAddr = bind_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
