//! Adaptive request pacing shared by every in-flight fetch.
//!
//! A single token bucket with burst 1 whose refill interval is the current
//! inter-request delay. Successes shrink the delay, throttling responses grow it;
//! both are clamped to the active [`RateBounds`]. The delay and the bucket's next
//! free slot live behind one mutex so a rate change and a reservation never
//! interleave.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use metrics::gauge;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Smallest delay a slow-down can grow from, so a zero lower bound still backs off.
const MIN_BACKOFF_BASE: Duration = Duration::from_millis(1);

/// Inclusive bounds on the inter-request delay.
///
/// `min_delay` corresponds to the maximum request rate and `max_delay` to the
/// minimum one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBounds {
    min_delay: Duration,
    max_delay: Duration,
}

impl RateBounds {
    /// Arguments may come in either order.
    pub fn new(a: Duration, b: Duration) -> Self {
        Self {
            min_delay: a.min(b),
            max_delay: a.max(b),
        }
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn clamp(&self, d: Duration) -> Duration {
        d.clamp(self.min_delay, self.max_delay)
    }
}

/// Current inter-request delay. Only reachable through its read-modify-write methods.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRateState {
    delay: Duration,
    bounds: RateBounds,
}

impl FetchRateState {
    pub fn new(initial: Duration, bounds: RateBounds) -> Self {
        Self {
            delay: bounds.clamp(initial),
            bounds,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn bounds(&self) -> RateBounds {
        self.bounds
    }

    /// Requests per second implied by the current delay.
    pub fn requests_per_sec(&self) -> f64 {
        if self.delay.is_zero() {
            f64::INFINITY
        } else {
            1.0 / self.delay.as_secs_f64()
        }
    }

    /// `factor` < 1 makes requests faster; floored at the minimum delay.
    pub fn speed_up(&mut self, factor: f64) -> Duration {
        self.delay = self.scaled(self.delay, factor);
        self.delay
    }

    /// `factor` > 1 makes requests slower; capped at the maximum delay.
    pub fn slow_down(&mut self, factor: f64) -> Duration {
        self.delay = self.scaled(self.delay.max(MIN_BACKOFF_BASE), factor);
        self.delay
    }

    pub fn set_bounds(&mut self, bounds: RateBounds) {
        self.bounds = bounds;
        self.delay = bounds.clamp(self.delay);
    }

    fn scaled(&self, base: Duration, factor: f64) -> Duration {
        let secs = base.as_secs_f64() * factor;
        let d = Duration::try_from_secs_f64(secs).unwrap_or(self.bounds.max_delay);
        self.bounds.clamp(d)
    }
}

#[derive(Debug, Error)]
#[error("rate limiter wait cancelled")]
pub struct Cancelled;

#[derive(Debug)]
struct LimiterInner {
    state: FetchRateState,
    last_issue: Option<Instant>,
}

/// The one global pacing knob for outbound fetches.
#[derive(Debug)]
pub struct AdaptiveLimiter {
    inner: Mutex<LimiterInner>,
    recovery_factor: f64,
    backoff_factor: f64,
}

impl AdaptiveLimiter {
    /// Starts at the fastest delay the bounds allow.
    pub fn new(bounds: RateBounds, recovery_factor: f64, backoff_factor: f64) -> Self {
        Self::with_state(
            FetchRateState::new(bounds.min_delay(), bounds),
            recovery_factor,
            backoff_factor,
        )
    }

    pub fn with_state(state: FetchRateState, recovery_factor: f64, backoff_factor: f64) -> Self {
        gauge!("watcher_fetch_delay_ms").set(state.delay().as_secs_f64() * 1_000.0);
        Self {
            inner: Mutex::new(LimiterInner {
                state,
                last_issue: None,
            }),
            recovery_factor: recovery_factor.clamp(f64::MIN_POSITIVE, 1.0),
            backoff_factor: if backoff_factor.is_finite() {
                backoff_factor.max(1.0)
            } else {
                1.0
            },
        }
    }

    /// Wait until one current delay has passed since the last issued request.
    ///
    /// The due time is recomputed from the live delay after every sleep, so a 429
    /// seen by any task slows every request still waiting. The lock is never held
    /// across a sleep, and each sleep returns early with [`Cancelled`] when `cancel`
    /// fires. Returns the total time waited.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Duration, Cancelled> {
        let started = Instant::now();
        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }

            let wait = {
                let mut inner = self.lock();
                let now = Instant::now();
                let delay = inner.state.delay();
                let due = inner.last_issue.map_or(now, |last| last + delay);
                if due <= now {
                    inner.last_issue = Some(now);
                    return Ok(now - started);
                }
                due - now
            };

            trace!(wait = ?wait, "waiting for fetch slot");
            tokio::select! {
                _ = cancel.cancelled() => return Err(Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Record a 2xx response.
    pub fn on_success(&self) -> Duration {
        let delay = self.lock().state.speed_up(self.recovery_factor);
        gauge!("watcher_fetch_delay_ms").set(delay.as_secs_f64() * 1_000.0);
        delay
    }

    /// Record a 429 response.
    pub fn on_throttled(&self) -> Duration {
        let delay = self.lock().state.slow_down(self.backoff_factor);
        debug!(delay_ms = delay.as_millis() as u64, "remote throttled, slowing down");
        gauge!("watcher_fetch_delay_ms").set(delay.as_secs_f64() * 1_000.0);
        delay
    }

    /// Swap in the bounds of another polling mode; the current delay is clamped.
    pub fn set_bounds(&self, bounds: RateBounds) {
        let mut inner = self.lock();
        if inner.state.bounds() != bounds {
            inner.state.set_bounds(bounds);
            debug!(
                min_ms = bounds.min_delay().as_millis() as u64,
                max_ms = bounds.max_delay().as_millis() as u64,
                "fetch rate bounds changed"
            );
        }
    }

    pub fn current_delay(&self) -> Duration {
        self.lock().state.delay()
    }

    pub fn snapshot(&self) -> FetchRateState {
        self.lock().state.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LimiterInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
