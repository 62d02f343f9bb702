//! Trait abstracting over the window algorithms.

use async_trait::async_trait;

use super::key::RateLimitKey;
use super::window::{RateLimitDecision, Window};
use crate::deadline::Deadline;
use crate::error::Result;

/// A window-based rate limiter.
///
/// Implemented by [`FixedWindowLimiter`](super::FixedWindowLimiter) and
/// [`SlidingWindowLimiter`](super::SlidingWindowLimiter) so
/// [`RateLimiter`](super::RateLimiter) can dispatch on [`Algorithm`](super::Algorithm).
#[async_trait]
pub trait WindowLimiter: Send + Sync {
    /// Count one event for `key` and decide whether it fits in `window`.
    async fn check_and_consume(
        &self,
        key: &RateLimitKey,
        window: &Window,
        deadline: Deadline,
    ) -> Result<RateLimitDecision>;
}
