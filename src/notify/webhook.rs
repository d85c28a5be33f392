use super::NotificationSink;
use crate::model::Notification;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

/// POSTs each notification as JSON to a webhook (e.g. a chat-bot relay).
#[derive(Clone)]
pub struct WebhookSink {
    webhook: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl WebhookSink {
    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    pub async fn send(&self, n: &Notification) -> Result<()> {
        let payload = WebhookPayload::from(n);

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.webhook)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;

            let err = match res {
                Ok(rsp) => match rsp.error_for_status_ref() {
                    Ok(_) => return Ok(()),
                    Err(e) => anyhow!("webhook HTTP error: {e}"),
                },
                Err(e) => anyhow!("webhook request failed: {e}"),
            };

            if attempt >= self.max_retries {
                return Err(err);
            }
            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn deliver(&self, n: &Notification) {
        if let Err(e) = self.send(n).await {
            tracing::warn!(target: "notify", user_id = n.user_id, error = %e, "webhook delivery failed");
        }
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    #[serde(flatten)]
    notification: &'a Notification,
    weekday: String,
}

impl<'a> From<&'a Notification> for WebhookPayload<'a> {
    fn from(n: &'a Notification) -> Self {
        use chrono::Datelike;
        Self {
            notification: n,
            weekday: n.slot.date_time.weekday().to_string(),
        }
    }
}
