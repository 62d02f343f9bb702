//! Rate limit windows, algorithms and decisions.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{KvGuardError, Result};
use crate::store::MAX_TTL;

/// Rate limiting algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Counter reset at wall-clock aligned boundaries
    Fixed,
    /// Events counted over a trailing span
    Sliding,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Fixed => f.write_str("fixed"),
            Algorithm::Sliding => f.write_str("sliding"),
        }
    }
}

impl std::str::FromStr for Algorithm {
    type Err = KvGuardError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fixed" => Ok(Algorithm::Fixed),
            "sliding" => Ok(Algorithm::Sliding),
            other => Err(KvGuardError::invalid(format!(
                "unknown algorithm '{other}', expected 'fixed' or 'sliding'"
            ))),
        }
    }
}

/// Common window lengths, also the `unit` of a configured rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    /// Per-second rate limiting
    Second,
    /// Per-minute rate limiting
    Minute,
    /// Per-hour rate limiting
    Hour,
    /// Per-day rate limiting
    Day,
}

impl TimeWindow {
    /// Get the duration of this time window.
    pub fn duration(&self) -> Duration {
        match self {
            TimeWindow::Second => Duration::from_secs(1),
            TimeWindow::Minute => Duration::from_secs(60),
            TimeWindow::Hour => Duration::from_secs(3600),
            TimeWindow::Day => Duration::from_secs(86400),
        }
    }
}

/// A limit of `limit` events per `duration`.
///
/// The duration has millisecond precision and must be at least one millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    limit: u64,
    duration: Duration,
}

impl Window {
    /// Create a window, rejecting durations shorter than a millisecond or
    /// longer than [`MAX_TTL`].
    pub fn new(limit: u64, duration: Duration) -> Result<Self> {
        if duration.as_millis() == 0 {
            return Err(KvGuardError::invalid(
                "window duration must be at least 1ms",
            ));
        }
        if duration > MAX_TTL {
            return Err(KvGuardError::invalid(format!(
                "window duration must be at most {}ms",
                MAX_TTL.as_millis()
            )));
        }
        Ok(Self { limit, duration })
    }

    /// `limit` events per preset window.
    pub fn per(limit: u64, window: TimeWindow) -> Self {
        Self {
            limit,
            duration: window.duration(),
        }
    }

    /// Maximum events allowed per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Window length.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub(crate) fn duration_ms(&self) -> i64 {
        self.duration.as_millis() as i64
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    /// Whether the unit of work may proceed
    pub allowed: bool,
    /// Events still allowed in the current window
    pub remaining: u64,
    /// When the window resets (approximate for sliding windows)
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    pub(crate) fn from_count(limit: u64, count: u64, allowed: bool, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed,
            remaining: limit.saturating_sub(count),
            reset_at,
        }
    }
}
