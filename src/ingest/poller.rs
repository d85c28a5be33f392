// src/ingest/poller.rs
//! One poll cycle: fan the resource set out to one task per resource, fan the
//! slots back in over a single channel, join whatever failed into a [`CycleError`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{CycleError, TaskFailure};
use crate::ingest::fetcher::ResourceFetcher;
use crate::ingest::parser;
use crate::model::{ResourceId, Slot};

/// Everything one cycle produced.
#[derive(Debug)]
pub struct PollOutcome {
    pub slots: Vec<Slot>,
    pub resources: usize,
    pub parse_errors: usize,
    pub elapsed: Duration,
    pub error: Option<CycleError>,
}

impl PollOutcome {
    pub fn failed(&self) -> usize {
        self.error.as_ref().map_or(0, CycleError::len)
    }

    pub fn into_parts(self) -> (Vec<Slot>, Option<CycleError>) {
        (self.slots, self.error)
    }
}

struct TaskReport {
    resource: ResourceId,
    slots: usize,
    parse_errors: usize,
}

async fn poll_resource(
    fetcher: Arc<dyn ResourceFetcher>,
    id: ResourceId,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<Slot>,
) -> Result<TaskReport, TaskFailure> {
    let payload = fetcher.fetch(id, &cancel).await?;
    let (slots, errors) = parser::parse(&payload);

    if let Some(fatal) = errors.iter().find(|e| e.is_payload()) {
        return Err(TaskFailure::Parse(fatal.clone()));
    }
    for e in &errors {
        warn!(target: "poll", resource = %id, error = %e, "skipping malformed record");
    }

    let report = TaskReport {
        resource: id,
        slots: slots.len(),
        parse_errors: errors.len(),
    };
    for slot in slots {
        // The collector drains until every sender is dropped, so this cannot fail
        // while anyone still wants the slot.
        let _ = tx.send(slot);
    }
    Ok(report)
}

#[derive(Clone)]
pub struct Poller {
    fetcher: Arc<dyn ResourceFetcher>,
}

impl Poller {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>) -> Self {
        Self { fetcher }
    }

    /// Fetch and parse every id concurrently. A failing task never cancels its
    /// siblings; pacing comes from the fetcher's shared limiter.
    pub async fn poll_once(&self, ids: &[ResourceId], cancel: &CancellationToken) -> PollOutcome {
        let t0 = Instant::now();
        let (tx, mut rx) = mpsc::unbounded_channel::<Slot>();
        let mut tasks = JoinSet::new();
        let mut spawned = Vec::with_capacity(ids.len());

        for &id in ids {
            let fetcher = Arc::clone(&self.fetcher);
            let tx = tx.clone();
            let cancel = cancel.clone();
            let handle = tasks.spawn(async move { poll_resource(fetcher, id, cancel, tx).await });
            spawned.push((handle.id(), id));
        }
        drop(tx);

        // Ends once every task has dropped its sender.
        let mut slots = Vec::new();
        while let Some(slot) = rx.recv().await {
            slots.push(slot);
        }

        let mut failures = Vec::new();
        let mut parse_errors = 0usize;
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, Ok(report))) => {
                    parse_errors += report.parse_errors;
                    debug!(
                        target: "poll",
                        resource = %report.resource,
                        slots = report.slots,
                        parse_errors = report.parse_errors,
                        "resource polled"
                    );
                }
                Ok((_, Err(failure))) => failures.push(failure),
                Err(join_err) => {
                    let resource = spawned
                        .iter()
                        .find(|(tid, _)| *tid == join_err.id())
                        .map(|(_, rid)| *rid)
                        .unwrap_or(ResourceId(0));
                    failures.push(TaskFailure::Aborted {
                        resource,
                        message: join_err.to_string(),
                    });
                }
            }
        }

        let fetch_failures = failures
            .iter()
            .filter(|f| matches!(f, TaskFailure::Fetch(_)))
            .count();
        let payload_failures = failures
            .iter()
            .filter(|f| matches!(f, TaskFailure::Parse(_)))
            .count();
        counter!("watcher_fetch_errors_total").increment(fetch_failures as u64);
        counter!("watcher_parse_errors_total").increment((parse_errors + payload_failures) as u64);

        for f in &failures {
            warn!(target: "poll", error = %f, "resource failed");
        }

        let error = if failures.is_empty() {
            None
        } else {
            Some(CycleError {
                total: ids.len(),
                failures,
            })
        };

        PollOutcome {
            slots,
            resources: ids.len(),
            parse_errors,
            elapsed: t0.elapsed(),
            error,
        }
    }
}
