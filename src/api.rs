use std::sync::Arc;

use shuttle_axum::axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::ingest::{AdaptiveLimiter, ModeSwitch, PollingMode, ResourceSet, Watcher};
use crate::matching::{InMemorySubscriberStore, MatchEngine};
use crate::metrics::PollStats;
use crate::model::{ResourceId, SubscriberInterest};

/// Handles the admin surface reads and pokes. Cheap to clone.
#[derive(Clone)]
pub struct AdminState {
    pub mode: Arc<ModeSwitch>,
    pub engine: Arc<MatchEngine>,
    pub resources: Arc<ResourceSet>,
    pub limiter: Arc<AdaptiveLimiter>,
    pub stats: Arc<PollStats>,
    /// Present when subscriptions live in-process; otherwise the external store
    /// owns persistence and POST /subscriptions only back-matches.
    pub subscriptions: Option<Arc<InMemorySubscriberStore>>,
}

impl AdminState {
    pub fn from_watcher(w: &Watcher, subscriptions: Option<Arc<InMemorySubscriberStore>>) -> Self {
        Self {
            mode: w.mode.clone(),
            engine: w.engine.clone(),
            resources: w.resources.clone(),
            limiter: w.limiter.clone(),
            stats: w.stats.clone(),
            subscriptions,
        }
    }
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/mode", get(get_mode).post(set_mode))
        .route("/debug/resources", get(debug_resources))
        .route("/debug/cache", get(debug_cache))
        .route("/subscriptions", post(create_subscription))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(serde::Serialize, serde::Deserialize)]
struct ModeBody {
    mode: PollingMode,
}

#[derive(serde::Serialize)]
struct ModeChanged {
    previous: PollingMode,
    mode: PollingMode,
}

async fn get_mode(State(state): State<AdminState>) -> Json<ModeBody> {
    Json(ModeBody {
        mode: state.mode.get(),
    })
}

async fn set_mode(State(state): State<AdminState>, Json(body): Json<ModeBody>) -> Json<ModeChanged> {
    let previous = state.mode.set(body.mode);
    if previous != body.mode {
        info!(target: "admin", from = %previous, to = %body.mode, "polling mode switched");
    }
    Json(ModeChanged {
        previous,
        mode: body.mode,
    })
}

#[derive(serde::Serialize)]
struct ResourcesOut {
    count: usize,
    ids: Vec<ResourceId>,
    delay_ms: u64,
    requests_per_sec: f64,
    polls: u64,
}

async fn debug_resources(State(state): State<AdminState>) -> Json<ResourcesOut> {
    let ids: Vec<ResourceId> = state.resources.snapshot().iter().copied().collect();
    let rate = state.limiter.snapshot();
    Json(ResourcesOut {
        count: ids.len(),
        ids,
        delay_ms: rate.delay().as_millis() as u64,
        requests_per_sec: rate.requests_per_sec(),
        polls: state.stats.polls(),
    })
}

#[derive(serde::Serialize)]
struct CacheOut {
    size: usize,
    ttl_secs: u64,
}

async fn debug_cache(State(state): State<AdminState>) -> Json<CacheOut> {
    let cache = state.engine.cache();
    Json(CacheOut {
        size: cache.len(),
        ttl_secs: cache.ttl().as_secs(),
    })
}

#[derive(serde::Serialize)]
struct SubscriptionOut {
    stored: bool,
    notified: usize,
}

async fn create_subscription(
    State(state): State<AdminState>,
    Json(interest): Json<SubscriberInterest>,
) -> (StatusCode, Json<SubscriptionOut>) {
    // Store before back-matching so no slot falls between the two; overlap with a
    // concurrent observe is absorbed by the engine's per-user marks.
    let stored = match &state.subscriptions {
        Some(store) => {
            store.add(interest.clone());
            true
        }
        None => false,
    };
    let notified = state.engine.on_new_subscription(&interest).await;
    info!(
        target: "admin",
        user_id = interest.user_id,
        lab = interest.lab_number,
        stored,
        notified,
        "subscription registered"
    );
    (StatusCode::CREATED, Json(SubscriptionOut { stored, notified }))
}
