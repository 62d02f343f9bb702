//! Rate limiting over the shared store.

mod backend;
mod fixed;
mod key;
mod limiter;
mod rules;
mod sliding;
mod window;

pub use backend::WindowLimiter;
pub use fixed::{FixedWindowLimiter, FIXED_WINDOW_PREFIX};
pub use key::RateLimitKey;
pub use limiter::RateLimiter;
pub use rules::{RateLimitRule, RateLimitRules, DEFAULT_RULE_WINDOW};
pub use sliding::{SlidingWindowLimiter, SLIDING_WINDOW_PREFIX};
pub use window::{Algorithm, RateLimitDecision, TimeWindow, Window};
