mod config;
mod errors;
mod layout;
mod measurement;
mod models;
mod routes;
mod snapshots;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::layout::http_probe::HttpLayoutProbe;
use crate::layout::{EstimatingProbe, LayoutProbe};
use crate::measurement::{MeasurementDatabase, SharedDatabase};
use crate::routes::build_router;
use crate::snapshots::SnapshotStore;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on malformed values)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Layout API v{}", env!("CARGO_PKG_VERSION"));

    let database = MeasurementDatabase::new().shared();
    let probe = build_probe(&config, &database)?;
    info!(probe = probe.name(), "Layout probe initialized");

    // Redis is optional; without it everything stays in memory
    let snapshots = match &config.redis_url {
        Some(url) => match SnapshotStore::connect(url).await {
            Ok(store) => Some(store),
            Err(e) => {
                warn!(error = %e, "Redis unavailable; snapshots disabled");
                None
            }
        },
        None => None,
    };

    let state = AppState::build(&config, database, probe, snapshots);
    restore_snapshots(&state).await;
    let cache = state.cache.clone();
    cache.start_auto_cleanup().await;

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cache.stop_auto_cleanup().await;
    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

/// Browser sidecar when `LAYOUT_PROBE_URL` is set, database estimates otherwise.
fn build_probe(config: &Config, database: &SharedDatabase) -> Result<Arc<dyn LayoutProbe>> {
    match &config.layout_probe_url {
        Some(url) => Ok(Arc::new(HttpLayoutProbe::new(url.as_str())?)),
        None => Ok(Arc::new(EstimatingProbe::new(database.clone()))),
    }
}

/// Load failures are logged and ignored.
async fn restore_snapshots(state: &AppState) {
    let Some(store) = &state.snapshots else {
        return;
    };
    match store.load().await {
        Ok(loaded) => {
            if let Some(cache) = loaded.cache {
                let restored = state.cache.import(cache).await;
                info!(restored, "cache snapshot restored");
            }
            if let Some(learned) = loaded.learned {
                let rows = learned.len();
                state.database.write().await.import_learned_measurements(learned);
                info!(rows, "learned measurements restored");
            }
        }
        Err(e) => warn!(error = %e, "failed to load snapshots; starting empty"),
    }
}
