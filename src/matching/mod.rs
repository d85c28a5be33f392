// src/matching/mod.rs
pub mod engine;
pub mod seen_cache;
pub mod store;

pub use engine::MatchEngine;
pub use seen_cache::SeenCache;
pub use store::{InMemorySubscriberStore, SubscriberStore};
