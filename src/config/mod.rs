// src/config/mod.rs
pub mod watcher;

pub use watcher::{ModeProfile, WatcherConfig};
