//! Sliding-window rate limiter.

use std::sync::Arc;

use async_trait::async_trait;

use super::backend::WindowLimiter;
use super::key::RateLimitKey;
use super::window::{RateLimitDecision, Window};
use crate::clock::{to_datetime, Clock};
use crate::deadline::Deadline;
use crate::error::Result;
use crate::store::KvStore;

/// Store key prefix for sliding-window event sets.
pub const SLIDING_WINDOW_PREFIX: &str = "rl:sw:";

/// Counts admitted events per key over the closed trailing span
/// `[now - duration, now]`.
///
/// Events live in a sorted set at `rl:sw:{key}`, scored by their millisecond
/// timestamp. Pruning, counting and inserting happen in one atomic store
/// operation, so concurrent callers never both observe a stale count. Denied
/// attempts are not recorded.
///
/// `reset_at` is reported as `now + duration`. The exact reset is the oldest
/// retained event plus the duration; the estimate is never earlier than that.
pub struct SlidingWindowLimiter {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    /// Create a sliding-window limiter over `store`.
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Store key of the event set for `key`.
    pub fn set_key(key: &RateLimitKey) -> String {
        format!("{}{}", SLIDING_WINDOW_PREFIX, key)
    }

    /// Unique sorted-set member for an event at `now_ms`.
    ///
    /// Same-millisecond events must not share a member, or the set would
    /// silently collapse them into one.
    fn member(now_ms: i64) -> String {
        format!("{}-{:016x}", now_ms, rand::random::<u64>())
    }
}

#[async_trait]
impl WindowLimiter for SlidingWindowLimiter {
    async fn check_and_consume(
        &self,
        key: &RateLimitKey,
        window: &Window,
        deadline: Deadline,
    ) -> Result<RateLimitDecision> {
        let now_ms = self.clock.now_ms();
        let window_ms = window.duration_ms();

        let admission = self
            .store
            .window_admit(
                &Self::set_key(key),
                &Self::member(now_ms),
                now_ms,
                window_ms,
                window.limit(),
                window.duration() * 2,
                deadline,
            )
            .await?;

        Ok(RateLimitDecision::from_count(
            window.limit(),
            admission.cardinality,
            admission.admitted,
            to_datetime(now_ms + window_ms),
        ))
    }
}
