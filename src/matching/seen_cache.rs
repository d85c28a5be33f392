//! # Seen cache
//! Time-bounded memory of slots that already triggered notifications.
//!
//! Entries expire `ttl` after insertion. Expired entries are invisible to lookups
//! immediately and are physically removed by a periodic sweep that runs regardless
//! of traffic. Reads take a shared lock; insert and sweep take the exclusive one.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use metrics::gauge;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::model::{Slot, SlotKey};

#[derive(Debug, Clone)]
struct SeenEntry {
    slot: Slot,
    inserted_at: Instant,
    notified: HashSet<i64>,
}

#[derive(Debug)]
pub struct SeenCache {
    ttl: Duration,
    entries: RwLock<HashMap<SlotKey, SeenEntry>>,
}

impl SeenCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert unless a live entry exists. Returns `true` when the slot was unseen.
    ///
    /// Check and insert happen under one write lock, so two concurrent observers of
    /// the same slot cannot both win.
    pub fn insert_if_absent(&self, slot: &Slot) -> bool {
        let key = slot.key();
        let now = Instant::now();
        let mut entries = self.write();
        if let Some(e) = entries.get(&key) {
            if now.duration_since(e.inserted_at) < self.ttl {
                return false;
            }
        }
        entries.insert(
            key,
            SeenEntry {
                slot: slot.clone(),
                inserted_at: now,
                notified: HashSet::new(),
            },
        );
        gauge!("watcher_seen_cache_size").set(entries.len() as f64);
        true
    }

    pub fn contains(&self, slot: &Slot) -> bool {
        let now = Instant::now();
        self.read()
            .get(&slot.key())
            .is_some_and(|e| now.duration_since(e.inserted_at) < self.ttl)
    }

    /// Record that `user_id` was told about `slot` in the current window. Returns
    /// `false` when it already was, so each (user, slot) pair notifies at most once
    /// per TTL window no matter which path found the match.
    pub fn mark_notified(&self, slot: &Slot, user_id: i64) -> bool {
        let now = Instant::now();
        let mut entries = self.write();
        match entries.get_mut(&slot.key()) {
            Some(e) if now.duration_since(e.inserted_at) < self.ttl => e.notified.insert(user_id),
            _ => true,
        }
    }

    /// Slots whose entries are still within the TTL window.
    pub fn live_slots(&self) -> Vec<Slot> {
        let now = Instant::now();
        self.read()
            .values()
            .filter(|e| now.duration_since(e.inserted_at) < self.ttl)
            .map(|e| e.slot.clone())
            .collect()
    }

    /// Drop expired entries; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, e| now.duration_since(e.inserted_at) < self.ttl);
        gauge!("watcher_seen_cache_size").set(entries.len() as f64);
        before - entries.len()
    }

    /// Physical entry count, including expired-but-unswept ones.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Periodic eviction, independent of read/write traffic.
    pub fn spawn_sweeper(self: Arc<Self>, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = self.sweep();
                        if removed > 0 {
                            debug!(target: "matching", removed, "seen cache swept");
                        }
                    }
                }
            }
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SlotKey, SeenEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SlotKey, SeenEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}
