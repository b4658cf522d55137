//! Token bucket rate limiter for the data portal.
//!
//! The KRX portal has no published quota but starts refusing clients that
//! burst. Requests are throttled proactively instead of reacting to errors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Tokens are stored scaled by this factor for sub-token precision.
const SCALE: u64 = 1000;

/// A token bucket rate limiter.
///
/// Holds at most one second's worth of tokens and refills continuously at
/// `requests_per_minute / 60` tokens per second.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    tokens: AtomicU64,
    /// Scaled tokens added per millisecond
    refill_per_ms: f64,
    last_refill: Mutex<Instant>,
    name: String,
}

impl RateLimiter {
    /// Create a limiter allowing `requests_per_minute` requests.
    pub fn new(name: impl Into<String>, requests_per_minute: u32) -> Self {
        let requests_per_minute = requests_per_minute.max(1);
        let capacity = ((f64::from(requests_per_minute) / 60.0).ceil() as u32).max(1);

        Self {
            capacity,
            tokens: AtomicU64::new(u64::from(capacity) * SCALE),
            refill_per_ms: f64::from(requests_per_minute) * SCALE as f64 / 60_000.0,
            last_refill: Mutex::new(Instant::now()),
            name: name.into(),
        }
    }

    /// Acquire a token, waiting until one is available.
    pub async fn acquire(&self) {
        loop {
            if self.try_acquire() {
                return;
            }

            let wait_ms = (SCALE as f64 / self.refill_per_ms).ceil() as u64;
            let wait_time = Duration::from_millis(wait_ms.clamp(10, 1000));

            debug!(
                limiter = %self.name,
                wait_ms = wait_time.as_millis() as u64,
                "Rate limited, waiting for token"
            );

            tokio::time::sleep(wait_time).await;
        }
    }

    /// Try to acquire a token without waiting.
    pub fn try_acquire(&self) -> bool {
        self.refill();

        loop {
            let current = self.tokens.load(Ordering::Relaxed);
            if current < SCALE {
                return false;
            }

            if self
                .tokens
                .compare_exchange_weak(current, current - SCALE, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn refill(&self) {
        // A concurrent refill already covers this instant.
        let Ok(mut last_refill) = self.last_refill.try_lock() else {
            return;
        };

        let now = Instant::now();
        let elapsed = now.duration_since(*last_refill);
        let new_tokens = (elapsed.as_secs_f64() * 1000.0 * self.refill_per_ms) as u64;
        if new_tokens == 0 {
            return;
        }

        let max_tokens = u64::from(self.capacity) * SCALE;
        let _ = self
            .tokens
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some((current + new_tokens).min(max_tokens))
            });

        // Advance only by the time actually credited so fractions carry over.
        let credited = Duration::from_secs_f64(new_tokens as f64 / self.refill_per_ms / 1000.0);
        *last_refill += credited.min(elapsed);
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

/// Shared rate limiter that can be cloned.
pub type SharedRateLimiter = Arc<RateLimiter>;
