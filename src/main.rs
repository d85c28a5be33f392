//! Slot watcher service entrypoint.
//! Discovers resources, starts the poll/match loops, and serves the admin + metrics routes.

use std::sync::Arc;

use shuttle_axum::ShuttleAxum;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use slot_watcher::api::{self, AdminState};
use slot_watcher::config::WatcherConfig;
use slot_watcher::matching::InMemorySubscriberStore;
use slot_watcher::metrics::Metrics;
use slot_watcher::notify::NotifierMux;
use slot_watcher::Watcher;

/// Compact logs by default; `WATCHER_LOG_JSON=1` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("slot_watcher=info,warn"));

    let json = std::env::var("WATCHER_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    // try_init: the runtime may already have installed a subscriber.
    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = WatcherConfig::load_default()?;
    let metrics = Metrics::init(cfg.seen_ttl())?;

    let store = Arc::new(InMemorySubscriberStore::new());
    let sink = Arc::new(NotifierMux::from_webhook_url(cfg.webhook_url.as_deref()));

    let watcher = Watcher::start(&cfg, store.clone(), sink, CancellationToken::new()).await?;
    tracing::info!(
        resources = watcher.resources.len(),
        mode = %watcher.mode.get(),
        "watcher started"
    );

    let router = api::router(AdminState::from_watcher(&watcher, Some(store)))
        .merge(metrics.router());

    Ok(router.into())
}
