// Sliding-window rate limiter shared by every job that calls the API.
//
// Casts, profiles and backfill runs can be scheduled concurrently, but they
// all draw from the same upstream quota. The API client owns an
// `Arc<RateLimiter>` and acquires a slot before each request, so concurrent
// jobs throttle each other instead of tripping 429s.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use tokio::time::{Duration, Instant};
use tracing::info;

/// Caps requests per sliding window and spaces consecutive requests by at
/// least `min_delay`.
pub struct RateLimiter {
    state: Mutex<WindowState>,
    max_requests: u32,
    window: Duration,
    min_delay: Duration,
}

#[derive(Default)]
struct WindowState {
    /// Send times still inside the window, oldest first.
    requests: VecDeque<Instant>,
    last_request: Option<Instant>,
}

impl RateLimiter {
    /// Limiter from the `FC_RATE_LIMIT`, `FC_RATE_WINDOW_SECS` and
    /// `FC_MIN_DELAY_MS` settings.
    pub fn new(max_requests_per_window: u32, window_seconds: u64, min_delay_ms: u64) -> Self {
        Self::with_window(
            max_requests_per_window,
            Duration::from_secs(window_seconds),
            Duration::from_millis(min_delay_ms),
        )
    }

    pub fn with_window(max_requests: u32, window: Duration, min_delay: Duration) -> Self {
        Self {
            state: Mutex::new(WindowState::default()),
            max_requests: max_requests.max(1),
            window,
            min_delay,
        }
    }

    /// A limiter that never waits. Used by tests and one-off tools.
    pub fn unlimited() -> Self {
        Self::with_window(u32::MAX, Duration::ZERO, Duration::ZERO)
    }

    /// Wait until a request may be sent, then record it.
    pub async fn acquire(&self) {
        loop {
            // The std mutex is never held across an await point.
            let wait = self.try_acquire(Instant::now());
            match wait {
                None => return,
                Some(wait) => {
                    if wait >= Duration::from_secs(1) {
                        info!(
                            delay_ms = wait.as_millis() as u64,
                            "Rate limit: waiting {}ms before next request",
                            wait.as_millis()
                        );
                    }
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Record a request at `now` if allowed, else return how long to wait.
    fn try_acquire(&self, now: Instant) -> Option<Duration> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(last) = state.last_request {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.min_delay {
                return Some(self.min_delay - elapsed);
            }
        }

        while let Some(&oldest) = state.requests.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                state.requests.pop_front();
            } else {
                break;
            }
        }

        if (state.requests.len() as u64) < self.max_requests as u64 {
            state.requests.push_back(now);
            state.last_request = Some(now);
            return None;
        }

        let oldest = *state.requests.front()?;
        Some((oldest + self.window).saturating_duration_since(now))
    }

    /// Requests currently counted against the window.
    pub fn in_flight_window(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .requests
            .len()
    }
}
