//! Fixed-window rate limiter.

use std::sync::Arc;

use async_trait::async_trait;

use super::backend::WindowLimiter;
use super::key::RateLimitKey;
use super::window::{RateLimitDecision, Window};
use crate::clock::{to_datetime, Clock};
use crate::deadline::Deadline;
use crate::error::Result;
use crate::store::KvStore;

/// Store key prefix for fixed-window counters.
pub const FIXED_WINDOW_PREFIX: &str = "rl:";

/// Counts events per key in buckets aligned to multiples of the window length.
///
/// Each bucket is a counter at `rl:{key}:{windowStart}` that expires at
/// the end of its window. Up to `2 × limit` events can pass across a bucket
/// boundary; use [`SlidingWindowLimiter`](super::SlidingWindowLimiter) when that
/// matters.
pub struct FixedWindowLimiter {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl FixedWindowLimiter {
    /// Create a fixed-window limiter over `store`.
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Start of the window containing `now_ms`.
    pub fn window_start(now_ms: i64, window: &Window) -> i64 {
        let duration_ms = window.duration_ms();
        now_ms.div_euclid(duration_ms) * duration_ms
    }

    /// Store key of the counter for `key` in the window starting at `window_start`.
    ///
    /// Windows of whole seconds are suffixed with the start in epoch seconds.
    /// Sub-second windows fall back to epoch milliseconds so that consecutive
    /// windows never share a counter.
    pub fn counter_key(key: &RateLimitKey, window_start: i64, window: &Window) -> String {
        let duration_ms = window.duration_ms();
        let suffix = if duration_ms % 1000 == 0 {
            window_start.div_euclid(1000)
        } else {
            window_start
        };
        format!("{}{}:{}", FIXED_WINDOW_PREFIX, key, suffix)
    }
}

#[async_trait]
impl WindowLimiter for FixedWindowLimiter {
    async fn check_and_consume(
        &self,
        key: &RateLimitKey,
        window: &Window,
        deadline: Deadline,
    ) -> Result<RateLimitDecision> {
        let now_ms = self.clock.now_ms();
        let window_start = Self::window_start(now_ms, window);
        let reset_at = window_start + window.duration_ms();

        let counter_key = Self::counter_key(key, window_start, window);
        let count = self
            .store
            .incr_expire_at(&counter_key, reset_at, deadline)
            .await?
            .max(0) as u64;

        Ok(RateLimitDecision::from_count(
            window.limit(),
            count,
            count <= window.limit(),
            to_datetime(reset_at),
        ))
    }
}
