// src/notify/mod.rs
pub mod webhook;

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::model::Notification;

pub use webhook::WebhookSink;

/// One-way hand-off to whatever actually reaches the subscriber.
/// Delivery failures are the sink's own business; the core never retries.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification);
}

/// Writes every notification to the log.
#[derive(Debug, Clone, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, n: &Notification) {
        tracing::info!(
            target: "notify",
            user_id = n.user_id,
            resource = %n.slot.id,
            lab = n.slot.lab_number,
            at = %n.slot.date_time,
            preferred = n.matched_range.is_some(),
            "slot notification"
        );
    }
}

/// Fans one notification out to every configured sink.
#[derive(Clone, Default)]
pub struct NotifierMux {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl NotifierMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Log sink always; webhook sink when a URL is configured.
    pub fn from_webhook_url(webhook_url: Option<&str>) -> Self {
        let mux = Self::new().with(Arc::new(LogSink));
        match webhook_url {
            Some(url) => mux.with(Arc::new(WebhookSink::new(url.to_string()))),
            None => mux,
        }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl NotificationSink for NotifierMux {
    async fn deliver(&self, n: &Notification) {
        for sink in &self.sinks {
            sink.deliver(n).await;
        }
    }
}

// --- Test helper ---
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub delivered: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.delivered.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.delivered.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, n: &Notification) {
        self.delivered.lock().unwrap_or_else(PoisonError::into_inner).push(n.clone());
    }
}
