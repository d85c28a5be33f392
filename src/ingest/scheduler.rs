// src/ingest/scheduler.rs
//! Background loops: catalog refresh, poll cycle, seen-cache sweep.
//!
//! The poll loop runs one cycle, feeds its slots through the match engine, then
//! sleeps the current mode's period; a slow cycle delays the next one but never the
//! catalog refresh, which runs on its own timer.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics::{counter, gauge};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ModeProfile, WatcherConfig};
use crate::ingest::discovery::{CatalogDiscovery, ResourceSet};
use crate::ingest::fetcher::{build_client, HttpFetcher};
use crate::ingest::mode::{ModeSwitch, PollingMode};
use crate::ingest::poller::{PollOutcome, Poller};
use crate::ingest::rate::AdaptiveLimiter;
use crate::ingest::ensure_metrics_described;
use crate::matching::{MatchEngine, SeenCache, SubscriberStore};
use crate::metrics::PollStats;
use crate::model::ResourceId;
use crate::notify::NotificationSink;

/// Result of one full cycle (poll + match).
#[derive(Debug)]
pub struct CycleReport {
    pub mode: PollingMode,
    pub outcome: PollOutcome,
    pub notifications: usize,
}

/// Everything one poll cycle touches.
#[derive(Clone)]
pub struct PollCycle {
    pub poller: Poller,
    pub resources: Arc<ResourceSet>,
    pub mode: Arc<ModeSwitch>,
    pub limiter: Arc<AdaptiveLimiter>,
    pub normal: ModeProfile,
    pub aggressive: ModeProfile,
    pub engine: Arc<MatchEngine>,
    pub stats: Arc<PollStats>,
}

impl PollCycle {
    pub fn profile(&self, mode: PollingMode) -> ModeProfile {
        match mode {
            PollingMode::Normal => self.normal,
            PollingMode::Aggressive => self.aggressive,
        }
    }

    /// Period to wait before the next cycle, per the mode in force right now.
    pub fn period(&self) -> Duration {
        self.profile(self.mode.get()).poll_interval()
    }

    /// Poll the current resource snapshot once and observe everything it yields.
    pub async fn run(&self, cancel: &CancellationToken) -> CycleReport {
        let mode = self.mode.get();
        self.limiter.set_bounds(self.profile(mode).bounds());

        let ids: Vec<ResourceId> = self.resources.snapshot().iter().copied().collect();
        let outcome = self.poller.poll_once(&ids, cancel).await;
        let notifications = self.engine.observe_all(&outcome.slots).await;
        self.stats.record(outcome.elapsed, outcome.slots.len());

        if let Some(err) = &outcome.error {
            warn!(
                target: "poll",
                failed = err.len(),
                total = err.total,
                error = %err,
                "poll cycle finished with failures"
            );
        }
        info!(
            target: "poll",
            mode = %mode,
            resources = outcome.resources,
            slots = outcome.slots.len(),
            parse_errors = outcome.parse_errors,
            notifications,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            delay_ms = self.limiter.current_delay().as_millis() as u64,
            "poll cycle done"
        );

        CycleReport {
            mode,
            outcome,
            notifications,
        }
    }
}

/// Poll, observe, sleep, repeat until cancelled.
pub fn spawn_poll_loop(cycle: PollCycle, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            cycle.run(&cancel).await;
            if cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(cycle.period()) => {}
            }
        }
        info!(target: "poll", "poll loop stopped");
    })
}

/// One catalog refresh. On failure the previous set stays in effect.
pub async fn refresh_resources(discovery: &CatalogDiscovery, resources: &ResourceSet) -> bool {
    match discovery.discover().await {
        Ok(ids) => {
            info!(target: "discovery", resources = ids.len(), "resource set refreshed");
            gauge!("watcher_resources").set(ids.len() as f64);
            resources.replace(ids);
            true
        }
        Err(e) => {
            warn!(
                target: "discovery",
                error = %e,
                kept = resources.len(),
                "catalog refresh failed, keeping previous resource set"
            );
            counter!("watcher_discovery_errors_total").increment(1);
            false
        }
    }
}

/// Refresh every `period`, starting one period from now (startup already discovered).
/// Failures wait for the next tick.
pub fn spawn_discovery_loop(
    discovery: CatalogDiscovery,
    resources: Arc<ResourceSet>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    refresh_resources(&discovery, &resources).await;
                }
            }
        }
    })
}

/// The running pipeline and the handles the admin surface needs.
pub struct Watcher {
    pub resources: Arc<ResourceSet>,
    pub mode: Arc<ModeSwitch>,
    pub limiter: Arc<AdaptiveLimiter>,
    pub engine: Arc<MatchEngine>,
    pub stats: Arc<PollStats>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Watcher {
    /// Discover the initial resource set (blocking) and spawn the background loops.
    ///
    /// Failing to build the initial set is the one error surfaced to the caller.
    pub async fn start(
        config: &WatcherConfig,
        store: Arc<dyn SubscriberStore>,
        sink: Arc<dyn NotificationSink>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        ensure_metrics_described();

        let client = build_client(&config.user_agent, config.request_timeout())
            .context("building HTTP client")?;
        let discovery = CatalogDiscovery::new(
            client.clone(),
            config.catalog_url.clone(),
            config.catalog_selector.clone(),
            config.catalog_attr.clone(),
        );

        let initial = discovery
            .discover()
            .await
            .context("initial resource discovery")?;
        info!(target: "discovery", resources = initial.len(), "initial resource set");
        gauge!("watcher_resources").set(initial.len() as f64);
        let resources = Arc::new(ResourceSet::new(initial));

        let mode = Arc::new(ModeSwitch::new(config.initial_mode));
        let limiter = Arc::new(AdaptiveLimiter::new(
            config.profile(mode.get()).bounds(),
            config.recovery_factor,
            config.backoff_factor,
        ));
        let fetcher = HttpFetcher::new(client, config.resource_url.clone(), limiter.clone());

        let cache = Arc::new(SeenCache::new(config.seen_ttl()));
        let engine = Arc::new(MatchEngine::new(cache.clone(), store, sink));
        let stats = Arc::new(PollStats::new());

        let cycle = PollCycle {
            poller: Poller::new(Arc::new(fetcher)),
            resources: resources.clone(),
            mode: mode.clone(),
            limiter: limiter.clone(),
            normal: config.normal,
            aggressive: config.aggressive,
            engine: engine.clone(),
            stats: stats.clone(),
        };

        let handles = vec![
            cache.spawn_sweeper(config.sweep_interval(), cancel.clone()),
            spawn_discovery_loop(
                discovery,
                resources.clone(),
                config.discovery_interval(),
                cancel.clone(),
            ),
            spawn_poll_loop(cycle, cancel.clone()),
        ];

        Ok(Self {
            resources,
            mode,
            limiter,
            engine,
            stats,
            cancel,
            handles,
        })
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait for every loop to exit.
    pub async fn join(mut self) {
        self.cancel.cancel();
        for h in self.handles.drain(..) {
            if let Err(e) = h.await {
                warn!(error = %e, "watcher task ended abnormally");
            }
        }
    }
}
