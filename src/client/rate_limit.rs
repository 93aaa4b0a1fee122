//! Sliding-window rate limiter for upstream requests.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Length of the rolling window.
const WINDOW: Duration = Duration::from_secs(1);

/// Wait applied when the window is full, measured from the oldest call.
/// 10% longer than `WINDOW` so we never land exactly on the upstream boundary.
const WINDOW_WITH_MARGIN: Duration = Duration::from_millis(1100);

/// Allows at most `max_per_second` calls to proceed in any one-second window.
pub struct RateLimiter {
    max_per_second: usize,
    recent: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_per_second: usize) -> Self {
        let max_per_second = if max_per_second == 0 { 2 } else { max_per_second };
        Self {
            max_per_second,
            recent: Mutex::new(VecDeque::with_capacity(max_per_second)),
        }
    }

    pub fn max_per_second(&self) -> usize {
        self.max_per_second
    }

    /// Wait until a call may proceed and record it.
    ///
    /// The lock is held while sleeping, so concurrent callers queue behind the waiter
    /// and see the window as it is after the wait.
    pub async fn acquire(&self) {
        let mut recent = self.recent.lock().await;

        let mut now = Instant::now();
        prune(&mut recent, now);

        if recent.len() >= self.max_per_second {
            if let Some(&oldest) = recent.front() {
                let wait = WINDOW_WITH_MARGIN.saturating_sub(now.duration_since(oldest));
                if !wait.is_zero() {
                    tracing::debug!(
                        wait_seconds = wait.as_secs_f64(),
                        "Rate limit: waiting before next API request"
                    );
                    tokio::time::sleep(wait).await;
                    now = Instant::now();
                    prune(&mut recent, now);
                }
            }
        }

        recent.push_back(now);
    }
}

/// Drop calls that are no longer inside the window ending at `now`.
fn prune(recent: &mut VecDeque<Instant>, now: Instant) {
    while let Some(&front) = recent.front() {
        if now.duration_since(front) >= WINDOW {
            recent.pop_front();
        } else {
            break;
        }
    }
}
