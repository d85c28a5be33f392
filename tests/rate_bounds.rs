// tests/rate_bounds.rs
//
// Adaptive fetch-rate state under arbitrary feedback sequences.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use slot_watcher::ingest::{FetchRateState, RateBounds};

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

#[test]
fn random_feedback_never_leaves_bounds() {
    let bounds = RateBounds::new(ms(100), ms(5_000));
    for seed in 0..20u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut st = FetchRateState::new(bounds.min_delay(), bounds);
        for _ in 0..500 {
            let d = if rng.random_bool(0.3) {
                st.slow_down(rng.random_range(1.1..4.0))
            } else {
                st.speed_up(rng.random_range(0.1..0.99))
            };
            assert!(d >= bounds.min_delay() && d <= bounds.max_delay(), "seed {seed}: {d:?}");
            assert_eq!(d, st.delay());
        }
    }
}

#[test]
fn sustained_feedback_saturates_at_the_edges() {
    let bounds = RateBounds::new(ms(250), ms(2_000));
    let mut st = FetchRateState::new(bounds.min_delay(), bounds);

    for _ in 0..50 {
        st.slow_down(2.0);
    }
    assert_eq!(st.delay(), bounds.max_delay());

    for _ in 0..200 {
        st.speed_up(0.9);
    }
    assert_eq!(st.delay(), bounds.min_delay());
    assert!((st.requests_per_sec() - 4.0).abs() < 1e-9);
}

#[test]
fn switching_modes_clamps_the_current_delay() {
    let normal = RateBounds::new(ms(500), ms(10_000));
    let aggressive = RateBounds::new(ms(100), ms(2_000));

    let mut st = FetchRateState::new(ms(8_000), normal);
    st.set_bounds(aggressive);
    assert_eq!(st.delay(), ms(2_000));

    let mut st = FetchRateState::new(ms(100), aggressive);
    st.set_bounds(normal);
    assert_eq!(st.delay(), ms(500));
}

#[test]
fn inverted_bounds_are_normalised() {
    let b = RateBounds::new(ms(900), ms(300));
    assert_eq!(b.min_delay(), ms(300));
    assert_eq!(b.max_delay(), ms(900));
}

mod shared_backoff {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use slot_watcher::ingest::{AdaptiveLimiter, Poller, RateBounds, ResourceFetcher};
    use slot_watcher::model::{RawPayload, ResourceId};
    use slot_watcher::FetchError;

    /// Every request is throttled; records when each one went out.
    struct AlwaysThrottled {
        limiter: Arc<AdaptiveLimiter>,
        issued: Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl ResourceFetcher for AlwaysThrottled {
        async fn fetch(
            &self,
            id: ResourceId,
            cancel: &CancellationToken,
        ) -> Result<RawPayload, FetchError> {
            self.limiter
                .acquire(cancel)
                .await
                .map_err(|_| FetchError::Cancelled { resource: id })?;
            self.issued.lock().unwrap().push(Instant::now());
            self.limiter.on_throttled();
            Err(FetchError::RateLimited { resource: id })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn one_throttle_slows_requests_already_waiting() {
        let limiter = Arc::new(AdaptiveLimiter::new(
            RateBounds::new(Duration::from_millis(100), Duration::from_secs(60)),
            0.9,
            2.0,
        ));
        let fetcher = Arc::new(AlwaysThrottled {
            limiter: limiter.clone(),
            issued: Mutex::new(Vec::new()),
        });
        let ids: Vec<ResourceId> = (1..=6).map(ResourceId).collect();

        let out = Poller::new(fetcher.clone())
            .poll_once(&ids, &CancellationToken::new())
            .await;
        assert_eq!(out.failed(), 6);

        let issued = fetcher.issued.lock().unwrap().clone();
        assert_eq!(issued.len(), 6);
        let gaps: Vec<Duration> = issued.windows(2).map(|w| w[1] - w[0]).collect();
        // Each gap is the delay after the previous 429: 200ms, 400ms, 800ms, ...
        for (i, gap) in gaps.iter().enumerate() {
            let expected = Duration::from_millis(200 << i);
            assert!(*gap >= expected, "gap {i} was {gap:?}, expected at least {expected:?}");
        }
        assert_eq!(limiter.current_delay(), Duration::from_millis(6_400));
    }
}
