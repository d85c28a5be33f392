// src/matching/engine.rs
//! Dedup + match: decide which observed slots are news, and for whom.
//!
//! Matching never waits on delivery. Notifications go onto a queue drained by one
//! dispatcher task, so a slow or dead sink backs up that queue instead of the poll loop.

use std::sync::Arc;

use metrics::counter;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::matching::seen_cache::SeenCache;
use crate::matching::store::SubscriberStore;
use crate::model::{Notification, Slot, SubscriberInterest};
use crate::notify::NotificationSink;

enum Dispatch {
    Deliver(Notification),
    Flush(oneshot::Sender<()>),
}

/// Deliver in arrival order until every engine handle is dropped.
fn spawn_dispatcher(sink: Arc<dyn NotificationSink>, mut rx: mpsc::UnboundedReceiver<Dispatch>) {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg {
                Dispatch::Deliver(n) => sink.deliver(&n).await,
                Dispatch::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        debug!(target: "notify", "dispatcher stopped");
    });
}

#[derive(Clone)]
pub struct MatchEngine {
    cache: Arc<SeenCache>,
    store: Arc<dyn SubscriberStore>,
    outbox: mpsc::UnboundedSender<Dispatch>,
}

impl MatchEngine {
    /// Spawns the dispatcher task; must be called inside a Tokio runtime.
    pub fn new(
        cache: Arc<SeenCache>,
        store: Arc<dyn SubscriberStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let (outbox, rx) = mpsc::unbounded_channel();
        spawn_dispatcher(sink, rx);
        Self {
            cache,
            store,
            outbox,
        }
    }

    pub fn cache(&self) -> &Arc<SeenCache> {
        &self.cache
    }

    /// Queue a notification for every interested subscriber about `slot` unless it
    /// was already seen within the TTL window. Returns the number queued.
    ///
    /// A store failure counts as zero matches; the slot stays marked as seen.
    pub async fn observe(&self, slot: &Slot) -> usize {
        if !self.cache.insert_if_absent(slot) {
            return 0;
        }

        let interests = match self
            .store
            .find_interest(slot.lab_number, slot.target(), Some(slot.weekday()))
            .await
        {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    target: "matching",
                    resource = %slot.id,
                    lab = slot.lab_number,
                    error = ?e,
                    "subscriber lookup failed, treating as no matches"
                );
                counter!("watcher_store_errors_total").increment(1);
                return 0;
            }
        };

        let mut sent = 0;
        for interest in interests.iter().filter(|i| i.matches(slot)) {
            if self.dispatch(interest, slot) {
                sent += 1;
            }
        }
        debug!(target: "matching", key = %slot.key(), sent, "new slot observed");
        sent
    }

    /// Observe a whole cycle's worth of slots in order.
    pub async fn observe_all(&self, slots: &[Slot]) -> usize {
        let mut sent = 0;
        for slot in slots {
            sent += self.observe(slot).await;
        }
        sent
    }

    /// Back-match a freshly created subscription against every live cache entry.
    /// Slots this subscriber was already told about in the current window are skipped.
    pub async fn on_new_subscription(&self, interest: &SubscriberInterest) -> usize {
        let mut matched: Vec<Slot> = self
            .cache
            .live_slots()
            .into_iter()
            .filter(|s| interest.matches(s))
            .collect();
        matched.sort_by(|a, b| a.date_time.cmp(&b.date_time));

        let sent = matched.iter().filter(|s| self.dispatch(interest, s)).count();
        debug!(
            target: "matching",
            user_id = interest.user_id,
            sent,
            "new subscription back-matched"
        );
        sent
    }

    /// Resolves once every notification queued before the call has been delivered.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.outbox.send(Dispatch::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    fn dispatch(&self, interest: &SubscriberInterest, slot: &Slot) -> bool {
        if !self.cache.mark_notified(slot, interest.user_id) {
            return false;
        }
        let n = Notification::for_interest(interest, slot);
        if self.outbox.send(Dispatch::Deliver(n)).is_err() {
            warn!(target: "notify", user_id = interest.user_id, "dispatcher gone, notification dropped");
            return false;
        }
        counter!("watcher_notifications_total").increment(1);
        true
    }
}
