// tests/poll_partial_failure.rs
//
// One poll cycle where some resources fail: the rest still deliver, and the
// failures come back joined into a single CycleError.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use slot_watcher::error::TaskFailure;
use slot_watcher::ingest::{Poller, ResourceFetcher};
use slot_watcher::model::{RawPayload, ResourceId};
use slot_watcher::FetchError;

fn doc(id: u64) -> String {
    json!({
        "masters": {
            "m": { "username": format!("{id} (100) Lab {id}"), "serviceName": "Выполнение ЛР" }
        },
        "times": { "m": ["2025-10-20 10:00:00"] }
    })
    .to_string()
}

/// Fails ids 2 (throttled) and 4 (bad status), serves garbage for 9, panics on 13.
struct ScriptedFetcher;

#[async_trait]
impl ResourceFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        id: ResourceId,
        _cancel: &CancellationToken,
    ) -> Result<RawPayload, FetchError> {
        match id.0 {
            2 => Err(FetchError::RateLimited { resource: id }),
            4 => Err(FetchError::Status {
                resource: id,
                status: 502,
            }),
            9 => Ok(RawPayload {
                resource: id,
                body: "<html>oops</html>".into(),
            }),
            13 => panic!("fetcher blew up"),
            n => Ok(RawPayload {
                resource: id,
                body: doc(n),
            }),
        }
    }
}

fn ids(v: &[u64]) -> Vec<ResourceId> {
    v.iter().copied().map(ResourceId).collect()
}

#[tokio::test]
async fn two_of_five_fail_three_deliver() {
    let poller = Poller::new(Arc::new(ScriptedFetcher));
    let out = poller
        .poll_once(&ids(&[1, 2, 3, 4, 5]), &CancellationToken::new())
        .await;

    assert_eq!(out.resources, 5);
    assert_eq!(out.slots.len(), 3);
    let mut labs: Vec<u32> = out.slots.iter().map(|s| s.lab_number).collect();
    labs.sort_unstable();
    assert_eq!(labs, vec![1, 3, 5]);

    let err = out.error.as_ref().expect("cycle error");
    assert_eq!(err.total, 5);
    assert_eq!(err.len(), 2);
    assert_eq!(out.failed(), 2);

    let mut failed: Vec<ResourceId> = err
        .failures
        .iter()
        .map(|f| match f {
            TaskFailure::Fetch(e) => e.resource(),
            other => panic!("unexpected failure kind: {other}"),
        })
        .collect();
    failed.sort();
    assert_eq!(failed, ids(&[2, 4]));
    assert!(err.to_string().starts_with("2 of 5 resources failed"));
}

#[tokio::test]
async fn payload_errors_and_panics_fail_only_their_task() {
    let poller = Poller::new(Arc::new(ScriptedFetcher));
    let out = poller
        .poll_once(&ids(&[1, 9, 13]), &CancellationToken::new())
        .await;

    assert_eq!(out.slots.len(), 1);
    let err = out.error.expect("cycle error");
    assert_eq!(err.len(), 2);
    assert!(err.failures.iter().any(|f| matches!(f, TaskFailure::Parse(p) if p.is_payload())));
    assert!(err
        .failures
        .iter()
        .any(|f| matches!(f, TaskFailure::Aborted { resource, .. } if *resource == ResourceId(13))));
}

#[tokio::test]
async fn clean_cycle_has_no_error() {
    let poller = Poller::new(Arc::new(ScriptedFetcher));
    let out = poller
        .poll_once(&ids(&[1, 3]), &CancellationToken::new())
        .await;
    assert!(out.error.is_none());
    let (slots, err) = out.into_parts();
    assert_eq!(slots.len(), 2);
    assert!(err.is_none());
}

#[tokio::test]
async fn empty_resource_set_is_a_no_op() {
    let poller = Poller::new(Arc::new(ScriptedFetcher));
    let out = poller.poll_once(&[], &CancellationToken::new()).await;
    assert!(out.slots.is_empty());
    assert!(out.error.is_none());
}

/// Paced by a shared limiter; serves one slot per resource once let through.
struct PacedFetcher {
    limiter: slot_watcher::ingest::AdaptiveLimiter,
}

#[async_trait]
impl ResourceFetcher for PacedFetcher {
    async fn fetch(
        &self,
        id: ResourceId,
        cancel: &CancellationToken,
    ) -> Result<RawPayload, FetchError> {
        self.limiter
            .acquire(cancel)
            .await
            .map_err(|_| FetchError::Cancelled { resource: id })?;
        Ok(RawPayload {
            resource: id,
            body: doc(id.0),
        })
    }
}

#[tokio::test(start_paused = true)]
async fn cancel_mid_cycle_keeps_finished_slots() {
    use slot_watcher::ingest::{AdaptiveLimiter, RateBounds};
    use std::time::Duration;

    let one_sec = Duration::from_secs(1);
    let poller = Poller::new(Arc::new(PacedFetcher {
        limiter: AdaptiveLimiter::new(RateBounds::new(one_sec, one_sec), 0.9, 2.0),
    }));
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2_500)).await;
            cancel.cancel();
        });
    }

    let t0 = tokio::time::Instant::now();
    let out = poller
        .poll_once(&ids(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]), &cancel)
        .await;

    // Requests went out at 0s, 1s and 2s; the rest were still waiting.
    assert!(t0.elapsed() < Duration::from_secs(3), "cancel was not prompt");
    assert_eq!(out.slots.len(), 3);
    let err = out.error.expect("cycle error");
    assert_eq!(err.total, 10);
    assert_eq!(err.len(), 7);
    assert!(err
        .failures
        .iter()
        .all(|f| matches!(f, TaskFailure::Fetch(FetchError::Cancelled { .. }))));
}
