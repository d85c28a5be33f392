// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod matching;
pub mod metrics;
pub mod model;
pub mod notify;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AdminState};
pub use crate::config::WatcherConfig;
pub use crate::error::{CycleError, FetchError, ParseError, TaskFailure};
pub use crate::ingest::{PollingMode, Watcher};
pub use crate::matching::{MatchEngine, SubscriberStore};
pub use crate::model::{Notification, ResourceId, Slot, SubscriberInterest};
pub use crate::notify::{NotificationSink, NotifierMux};
