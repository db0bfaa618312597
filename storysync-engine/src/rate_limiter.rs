//! Token-bucket rate limiter shared by every outbound call in a sync pass.
//!
//! Tokens accrue lazily: each call computes `elapsed × rate` since the last
//! refill, capped at capacity. There is no timer task, so an idle limiter
//! costs nothing. Time is read from `tokio::time::Instant`, which tests can
//! pause and advance.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use storysync_core::config::RateLimitConfig;
use storysync_core::ConfigError;

use crate::error::TOO_MANY_REQUESTS;

/// Longest single sleep in [`RateLimiter::acquire`]; the bucket is re-checked
/// after each one.
pub const MAX_WAIT: Duration = Duration::from_secs(60);

/// Point-in-time view of the bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiterState {
    /// Always within `0..=capacity`.
    pub available_tokens: f64,
    pub capacity: u32,
    pub refill_rate_per_second: f64,
    pub last_refill: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateLimiterStats {
    /// Tokens handed out (immediate or after waiting).
    pub acquired: u64,
    /// `acquire` calls that had to wait at least once.
    pub throttled: u64,
    pub total_wait: Duration,
    /// Rate-limit signals received from the tracker.
    pub rate_limit_hits: u64,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    rate: f64,
    last_refill: Instant,
    stats: RateLimiterStats,
}

impl Bucket {
    fn refill(&mut self, capacity: f64) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(capacity);
        self.last_refill = now;
    }

    /// Time until one token accrues, capped at [`MAX_WAIT`].
    fn wait_for_token(&self) -> Duration {
        Duration::try_from_secs_f64((1.0 - self.tokens) / self.rate)
            .map_or(MAX_WAIT, |wait| wait.min(MAX_WAIT))
    }

    fn take(&mut self) -> bool {
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            self.stats.acquired += 1;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    capacity: u32,
}

impl RateLimiter {
    /// A full bucket of `capacity` tokens refilling at `rate` per second.
    pub fn new(rate: f64, capacity: u32) -> Result<Self, ConfigError> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ConfigError::NonPositiveRate(rate));
        }
        if capacity == 0 {
            return Err(ConfigError::Zero {
                field: "rate limiter capacity",
            });
        }
        Ok(Self {
            bucket: Mutex::new(Bucket {
                tokens: f64::from(capacity),
                rate,
                last_refill: Instant::now(),
                stats: RateLimiterStats::default(),
            }),
            capacity,
        })
    }

    pub fn from_config(config: &RateLimitConfig) -> Result<Self, ConfigError> {
        Self::new(config.requests_per_second, config.burst)
    }

    /// Take a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.lock();
        bucket.refill(self.capacity_f64());
        bucket.take()
    }

    /// Take a token, sleeping until one accrues if the bucket is empty.
    pub async fn acquire(&self) {
        let started = Instant::now();
        let mut waited = false;
        loop {
            let wait = {
                let mut bucket = self.lock();
                bucket.refill(self.capacity_f64());
                if bucket.take() {
                    if waited {
                        bucket.stats.throttled += 1;
                        bucket.stats.total_wait += started.elapsed();
                    }
                    return;
                }
                bucket.wait_for_token()
            };
            waited = true;
            tracing::trace!(wait_ms = wait.as_millis() as u64, "rate limiter waiting for token");
            tokio::time::sleep(wait).await;
        }
    }

    /// React to a tracker response. A 429 halves the refill rate; the rate
    /// is never restored automatically.
    pub fn update_from_response_code(&self, status: u16) {
        if status != TOO_MANY_REQUESTS {
            return;
        }
        let mut bucket = self.lock();
        bucket.refill(self.capacity_f64());
        let previous = bucket.rate;
        bucket.rate = previous / 2.0;
        bucket.stats.rate_limit_hits += 1;
        tracing::warn!(
            previous_rate = previous,
            new_rate = bucket.rate,
            "tracker signalled rate limiting, halving request rate"
        );
    }

    pub fn state(&self) -> RateLimiterState {
        let mut bucket = self.lock();
        bucket.refill(self.capacity_f64());
        RateLimiterState {
            available_tokens: bucket.tokens,
            capacity: self.capacity,
            refill_rate_per_second: bucket.rate,
            last_refill: bucket.last_refill,
        }
    }

    pub fn stats(&self) -> RateLimiterStats {
        self.lock().stats
    }

    pub fn rate(&self) -> f64 {
        self.lock().rate
    }

    fn capacity_f64(&self) -> f64 {
        f64::from(self.capacity)
    }

    fn lock(&self) -> MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
