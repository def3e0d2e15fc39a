//! Process-wide limiter for upstream requests.
//!
//! The upstream enforces a hard requests-per-window budget; every call path
//! funnels through one `RequestLimiter` before touching the network.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Sliding-window request limiter: at most `max_requests` acquisitions
/// complete within any window of `window` length.
///
/// The timestamp history is guarded by an async mutex that is held across
/// the wait, so concurrent workers acquire strictly one at a time.
pub struct RequestLimiter {
    max_requests: usize,
    window: Duration,
    history: Mutex<VecDeque<Instant>>,
}

impl RequestLimiter {
    pub fn new(max_requests: u32, window_secs: f64) -> Self {
        Self {
            max_requests: max_requests.max(1) as usize,
            window: Duration::from_secs_f64(window_secs.max(0.001)),
            history: Mutex::new(VecDeque::with_capacity(max_requests.max(1) as usize)),
        }
    }

    /// Block until one request may proceed, then record the acquisition.
    pub async fn acquire(&self) {
        let mut history = self.history.lock().await;
        loop {
            let now = Instant::now();
            while let Some(&oldest) = history.front() {
                if now.duration_since(oldest) >= self.window {
                    history.pop_front();
                } else {
                    break;
                }
            }

            if history.len() < self.max_requests {
                history.push_back(now);
                return;
            }

            // Window is full: sleep until the oldest acquisition expires.
            let oldest = *history.front().expect("non-empty at capacity");
            let wait = self.window - now.duration_since(oldest);
            debug!(wait_ms = wait.as_millis() as u64, "rate limit: waiting");
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_within_budget_is_not_delayed() {
        let limiter = RequestLimiter::new(3, 1.0);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn fourth_acquisition_waits_out_the_window() {
        let limiter = RequestLimiter::new(3, 1.0);
        let start = Instant::now();
        for _ in 0..4 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn at_most_n_per_window_under_concurrency() {
        use std::sync::Arc;

        let limiter = Arc::new(RequestLimiter::new(3, 1.0));
        let times = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..9 {
            let limiter = limiter.clone();
            let times = times.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                times.lock().unwrap().push(Instant::now());
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let mut times = times.lock().unwrap().clone();
        times.sort();
        // Any acquisition and the one three slots later must be at least a
        // full window apart.
        for pair in times.windows(4) {
            assert!(pair[3].duration_since(pair[0]) >= Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides_rather_than_resets() {
        let limiter = RequestLimiter::new(2, 1.0);
        limiter.acquire().await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        limiter.acquire().await;

        // One slot frees up 1s after the first acquisition, i.e. 400ms from
        // here, not a full second.
        let start = Instant::now();
        limiter.acquire().await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(400));
        assert!(waited < Duration::from_millis(600));
    }
}
