// src/ingest/mod.rs
pub mod discovery;
pub mod fetcher;
pub mod mode;
pub mod parser;
pub mod poller;
pub mod rate;
pub mod scheduler;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

pub use discovery::{CatalogDiscovery, ResourceSet};
pub use fetcher::{HttpFetcher, ResourceFetcher};
pub use mode::{ModeSwitch, PollingMode};
pub use poller::{PollOutcome, Poller};
pub use rate::{AdaptiveLimiter, FetchRateState, RateBounds};
pub use scheduler::Watcher;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("watcher_polls_total", "Completed poll cycles.");
        describe_counter!(
            "watcher_fetch_errors_total",
            "Per-resource fetch failures (transport, throttling, bad status)."
        );
        describe_counter!(
            "watcher_parse_errors_total",
            "Malformed payloads and records skipped by the parser."
        );
        describe_histogram!("watcher_poll_duration_ms", "Poll cycle wall time in milliseconds.");
        describe_gauge!("watcher_poll_duration_avg_ms", "Average poll cycle duration.");
        describe_gauge!("watcher_poll_slots_avg", "Average slots produced per poll cycle.");
        describe_histogram!("watcher_parse_ms", "Payload parse time in milliseconds.");
        describe_gauge!("watcher_seen_cache_size", "Entries currently held by the seen cache.");
        describe_gauge!("watcher_seen_ttl_secs", "Seen cache time-to-live.");
        describe_counter!("watcher_notifications_total", "Notifications handed to dispatch.");
        describe_counter!(
            "watcher_store_errors_total",
            "Subscriber store lookups that failed and were treated as no match."
        );
        describe_gauge!("watcher_fetch_delay_ms", "Current adaptive inter-request delay.");
        describe_gauge!("watcher_resources", "Resources in the current discovery set.");
        describe_counter!(
            "watcher_discovery_errors_total",
            "Catalog refreshes that failed and kept the previous set."
        );
    });
}
