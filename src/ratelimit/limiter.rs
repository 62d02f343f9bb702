//! Rate limiter dispatching on algorithm.

use std::sync::Arc;

use tracing::{debug, trace};

use super::backend::WindowLimiter;
use super::fixed::FixedWindowLimiter;
use super::key::RateLimitKey;
use super::sliding::SlidingWindowLimiter;
use super::window::{Algorithm, RateLimitDecision, Window};
use crate::clock::Clock;
use crate::deadline::Deadline;
use crate::error::Result;
use crate::store::KvStore;

/// Entry point for rate limit checks.
///
/// Holds no per-key state: every decision is made by the store, so any number
/// of limiters in any number of processes can share one store.
pub struct RateLimiter {
    fixed: FixedWindowLimiter,
    sliding: SlidingWindowLimiter,
}

impl RateLimiter {
    /// Create a rate limiter over `store`.
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            fixed: FixedWindowLimiter::new(store.clone(), clock.clone()),
            sliding: SlidingWindowLimiter::new(store, clock),
        }
    }

    /// The limiter implementing `algorithm`.
    pub fn limiter(&self, algorithm: Algorithm) -> &dyn WindowLimiter {
        match algorithm {
            Algorithm::Fixed => &self.fixed,
            Algorithm::Sliding => &self.sliding,
        }
    }

    /// Count one event for `key` and decide whether it is within `window`.
    ///
    /// Store failures are returned as errors; whether to fail open or closed
    /// is the caller's decision.
    pub async fn check(
        &self,
        algorithm: Algorithm,
        key: &RateLimitKey,
        window: &Window,
        deadline: Deadline,
    ) -> Result<RateLimitDecision> {
        trace!(
            key = %key,
            algorithm = %algorithm,
            limit = window.limit(),
            window_ms = window.duration().as_millis() as u64,
            "Checking rate limit"
        );

        let decision = self
            .limiter(algorithm)
            .check_and_consume(key, window, deadline)
            .await?;

        if !decision.allowed {
            debug!(
                key = %key,
                algorithm = %algorithm,
                limit = window.limit(),
                reset_at = %decision.reset_at,
                "Rate limit exceeded"
            );
        }

        Ok(decision)
    }
}
