use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use axum::{routing::get, Router};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and publish the static seen-cache TTL gauge.
    pub fn init(seen_ttl: Duration) -> anyhow::Result<Self> {
        // Use default buckets to avoid API differences across crate versions.
        let builder = PrometheusBuilder::new();

        let handle = builder
            .install_recorder()
            .context("prometheus: install recorder")?;

        crate::ingest::ensure_metrics_described();
        gauge!("watcher_seen_ttl_secs").set(seen_ttl.as_secs_f64());

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// Running averages over every completed poll cycle.
#[derive(Debug, Default)]
pub struct PollStats {
    inner: Mutex<PollTotals>,
}

#[derive(Debug, Default, Clone, Copy)]
struct PollTotals {
    polls: u64,
    duration_ms: f64,
    slots: u64,
}

impl PollStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one cycle and refresh the average gauges. Returns `(avg_ms, avg_slots)`.
    pub fn record(&self, elapsed: Duration, slots: usize) -> (f64, f64) {
        let ms = elapsed.as_secs_f64() * 1_000.0;
        let t = {
            let mut t = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            t.polls += 1;
            t.duration_ms += ms;
            t.slots += slots as u64;
            *t
        };
        let avg_ms = t.duration_ms / t.polls as f64;
        let avg_slots = t.slots as f64 / t.polls as f64;

        counter!("watcher_polls_total").increment(1);
        histogram!("watcher_poll_duration_ms").record(ms);
        gauge!("watcher_poll_duration_avg_ms").set(avg_ms);
        gauge!("watcher_poll_slots_avg").set(avg_slots);
        (avg_ms, avg_slots)
    }

    pub fn polls(&self) -> u64 {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).polls
    }
}
