// src/ingest/fetcher.rs
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::ingest::rate::AdaptiveLimiter;
use crate::model::{RawPayload, ResourceId};

/// One fetch of one resource. Implementations own their own pacing.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(
        &self,
        id: ResourceId,
        cancel: &CancellationToken,
    ) -> Result<RawPayload, FetchError>;
}

/// How a response status feeds back into the shared limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Throttled,
    Failed,
}

pub fn classify(status: StatusCode) -> StatusClass {
    if status.is_success() {
        StatusClass::Success
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        StatusClass::Throttled
    } else {
        StatusClass::Failed
    }
}

/// Build the HTTP client used for both the catalog and per-resource requests.
pub fn build_client(user_agent: &str, timeout: Duration) -> anyhow::Result<Client> {
    let client = Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()?;
    Ok(client)
}

/// Rate-limited GET against the per-resource endpoint.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    url_template: String,
    limiter: Arc<AdaptiveLimiter>,
}

impl HttpFetcher {
    /// `url_template` must contain `{id}`.
    pub fn new(client: Client, url_template: impl Into<String>, limiter: Arc<AdaptiveLimiter>) -> Self {
        Self {
            client,
            url_template: url_template.into(),
            limiter,
        }
    }

    pub fn url_for(&self, id: ResourceId) -> String {
        self.url_template.replace("{id}", &id.to_string())
    }

    pub fn limiter(&self) -> &Arc<AdaptiveLimiter> {
        &self.limiter
    }
}

#[async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn fetch(
        &self,
        id: ResourceId,
        cancel: &CancellationToken,
    ) -> Result<RawPayload, FetchError> {
        self.limiter
            .acquire(cancel)
            .await
            .map_err(|_| FetchError::Cancelled { resource: id })?;

        let url = self.url_for(id);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| FetchError::Transport { resource: id, source })?;

        let status = resp.status();
        match classify(status) {
            StatusClass::Success => {
                self.limiter.on_success();
                let body = resp
                    .text()
                    .await
                    .map_err(|source| FetchError::Transport { resource: id, source })?;
                Ok(RawPayload { resource: id, body })
            }
            StatusClass::Throttled => {
                self.limiter.on_throttled();
                Err(FetchError::RateLimited { resource: id })
            }
            StatusClass::Failed => Err(FetchError::Status {
                resource: id,
                status: status.as_u16(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::rate::RateBounds;

    #[test]
    fn status_classes() {
        assert_eq!(classify(StatusCode::OK), StatusClass::Success);
        assert_eq!(classify(StatusCode::NO_CONTENT), StatusClass::Success);
        assert_eq!(classify(StatusCode::TOO_MANY_REQUESTS), StatusClass::Throttled);
        assert_eq!(classify(StatusCode::BAD_GATEWAY), StatusClass::Failed);
        assert_eq!(classify(StatusCode::NOT_FOUND), StatusClass::Failed);
    }

    #[test]
    fn url_template_substitutes_id() {
        let limiter = Arc::new(AdaptiveLimiter::new(
            RateBounds::new(Duration::ZERO, Duration::from_millis(10)),
            0.9,
            2.0,
        ));
        let f = HttpFetcher::new(Client::new(), "http://x/api?service={id}", limiter);
        assert_eq!(f.url_for(ResourceId(42)), "http://x/api?service=42");
    }
}
