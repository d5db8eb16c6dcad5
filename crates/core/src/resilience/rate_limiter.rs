use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimiterConfig {
    pub max_requests: u32,
    pub time_window: Duration,
    /// How often `wait_for_slot` re-checks the window.
    pub poll_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            time_window: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RateLimiterSnapshot {
    pub requests_in_window: usize,
    pub max_requests: u32,
    pub time_window_secs: u64,
}

/// Sliding-window admission control for outbound calls.
///
/// `wait_for_slot` polls and gives no FIFO ordering between waiters; under
/// sustained overload a waiter can starve.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    requests: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self { config, requests: Mutex::new(VecDeque::new()) }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Records a request and returns `true` if the window has room.
    pub fn acquire(&self) -> bool {
        self.acquire_at(Instant::now())
    }

    pub async fn wait_for_slot(&self) {
        let mut waited = false;
        while !self.acquire() {
            if !waited {
                debug!(
                    event_name = "resilience.rate_limit.waiting",
                    max_requests = self.config.max_requests,
                    window_secs = self.config.time_window.as_secs(),
                    "rate limit reached, waiting for a free slot"
                );
                waited = true;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let mut requests = self.lock();
        prune(&mut requests, Instant::now(), self.config.time_window);
        RateLimiterSnapshot {
            requests_in_window: requests.len(),
            max_requests: self.config.max_requests,
            time_window_secs: self.config.time_window.as_secs(),
        }
    }

    fn acquire_at(&self, now: Instant) -> bool {
        let mut requests = self.lock();
        prune(&mut requests, now, self.config.time_window);

        if requests.len() < self.config.max_requests as usize {
            requests.push_back(now);
            true
        } else {
            false
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn prune(requests: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = requests.front() {
        if now.saturating_duration_since(*oldest) >= window {
            requests.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use super::{RateLimiter, RateLimiterConfig};

    fn limiter(max_requests: u32, window_ms: u64) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig {
            max_requests,
            time_window: Duration::from_millis(window_ms),
            poll_interval: Duration::from_millis(5),
        })
    }

    #[test]
    fn admits_at_most_max_requests_per_window() {
        let limiter = limiter(3, 60_000);
        let admitted = (0..10).filter(|_| limiter.acquire()).count();
        assert_eq!(admitted, 3);
        assert_eq!(limiter.snapshot().requests_in_window, 3);
    }

    #[test]
    fn window_slides_as_requests_age_out() {
        let limiter = limiter(2, 1_000);
        let start = Instant::now();

        assert!(limiter.acquire_at(start));
        assert!(limiter.acquire_at(start + Duration::from_millis(500)));
        assert!(!limiter.acquire_at(start + Duration::from_millis(900)));

        // First request has left the window; the second has not.
        assert!(limiter.acquire_at(start + Duration::from_millis(1_000)));
        assert!(!limiter.acquire_at(start + Duration::from_millis(1_200)));
        assert!(limiter.acquire_at(start + Duration::from_millis(1_500)));
    }

    #[test]
    fn rejected_attempts_are_not_recorded() {
        let limiter = limiter(1, 1_000);
        let start = Instant::now();

        assert!(limiter.acquire_at(start));
        for step in 1..10 {
            assert!(!limiter.acquire_at(start + Duration::from_millis(step * 50)));
        }
        assert!(limiter.acquire_at(start + Duration::from_millis(1_000)));
    }

    #[tokio::test]
    async fn wait_for_slot_resumes_once_window_frees() {
        let limiter = Arc::new(limiter(1, 50));
        assert!(limiter.acquire());

        let started = Instant::now();
        tokio::time::timeout(Duration::from_secs(2), limiter.wait_for_slot())
            .await
            .expect("slot should free up within the window");
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(!limiter.acquire());
    }
}
