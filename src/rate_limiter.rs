//! Call spacing for a rate-limited external service
//!
//! The RateLimiter enforces a minimum delay (plus random jitter) between two
//! consecutive calls, across every worker that shares it.

use crate::config::RateLimitConfig;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Shared call spacer
///
/// Clones share the same schedule. Callers queue on an async mutex, so at most
/// one call is released per spacing interval regardless of how many workers are
/// waiting.
///
/// # Algorithm
///
/// - Each acquisition draws `min_delay + uniform(0, jitter)`
/// - If less than that has elapsed since the previous release, the caller sleeps
///   for the remainder while holding the lock
/// - The release time is then recorded for the next caller
#[derive(Clone, Debug)]
pub struct RateLimiter {
    min_delay: Duration,
    jitter: Duration,
    /// When the previous call was released (None before the first call)
    last_release: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    /// Create a limiter from configuration
    ///
    /// # Examples
    ///
    /// ```
    /// use resumable_ingest::config::RateLimitConfig;
    /// use resumable_ingest::rate_limiter::RateLimiter;
    /// use std::time::Duration;
    ///
    /// let limiter = RateLimiter::new(&RateLimitConfig {
    ///     min_delay: Duration::from_secs(2),
    ///     jitter: Duration::from_millis(500),
    /// });
    /// assert!(!limiter.is_unlimited());
    /// ```
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            min_delay: config.min_delay,
            jitter: config.jitter,
            last_release: Arc::new(Mutex::new(None)),
        }
    }

    /// Whether acquisitions return immediately
    pub fn is_unlimited(&self) -> bool {
        self.min_delay.is_zero() && self.jitter.is_zero()
    }

    /// Wait until the next call may start; returns how long the caller slept
    pub async fn acquire(&self) -> Duration {
        if self.is_unlimited() {
            return Duration::ZERO;
        }

        let mut last = self.last_release.lock().await;
        let spacing = self.min_delay + self.draw_jitter();

        let waited = match *last {
            Some(prev) => {
                let elapsed = prev.elapsed();
                if elapsed < spacing {
                    let remaining = spacing - elapsed;
                    tracing::debug!(wait_ms = remaining.as_millis() as u64, "rate limit spacing");
                    tokio::time::sleep(remaining).await;
                    remaining
                } else {
                    Duration::ZERO
                }
            }
            None => Duration::ZERO,
        };

        *last = Some(Instant::now());
        waited
    }

    fn draw_jitter(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let secs = rand::thread_rng().gen_range(0.0..=self.jitter.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}
