//! Key-value store adapter.
//!
//! The limiters, the lock and the scanner only talk to the store through
//! [`KvStore`]. Every method is a single round-trip with a single atomic effect
//! on the store, so callers never compose read-modify-write sequences from the
//! application side.

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::deadline::Deadline;
use crate::error::Result;

/// Longest TTL or window accepted anywhere in the crate.
///
/// Keeps every `now + ttl` expiry, including the doubled sliding-window TTL,
/// inside the millisecond range of an `i64`.
pub const MAX_TTL: Duration = Duration::from_millis((i64::MAX / 4) as u64);

/// `ttl` in whole milliseconds, at least 1 and saturating at `i64::MAX`.
pub(crate) fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1)
}

/// Outcome of an atomic sliding-window admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowAdmission {
    /// Whether the event was recorded in the window
    pub admitted: bool,
    /// Entries in the window after the operation
    pub cardinality: u64,
}

/// Atomic primitives required from the backing store.
///
/// Every operation takes a [`Deadline`] and fails with
/// [`KvGuardError::Timeout`](crate::KvGuardError::Timeout) once it passes.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Store `value` under `key` with a TTL, only if `key` does not exist.
    ///
    /// Returns `true` when the value was written.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        deadline: Deadline,
    ) -> Result<bool>;

    /// Increment the integer at `key` and set its absolute expiry, in one transaction.
    ///
    /// Returns the counter value after the increment.
    async fn incr_expire_at(&self, key: &str, expire_at_ms: i64, deadline: Deadline)
        -> Result<i64>;

    /// Sliding-window admission over the sorted set at `key`, as one atomic unit:
    /// drop members scored below `now_ms - window_ms`, add `member` scored
    /// `now_ms` if fewer than `limit` members remain, and refresh the set's TTL.
    async fn window_admit(
        &self,
        key: &str,
        member: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u64,
        ttl: Duration,
        deadline: Deadline,
    ) -> Result<WindowAdmission>;

    /// Delete `key` only if its value equals `expected`, atomically.
    ///
    /// Returns `true` when the key was deleted.
    async fn compare_and_delete(&self, key: &str, expected: &str, deadline: Deadline)
        -> Result<bool>;

    /// One step of cursor-based key iteration.
    ///
    /// Start with cursor 0; iteration is complete when the returned cursor is 0.
    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
        deadline: Deadline,
    ) -> Result<(u64, Vec<String>)>;

    /// Delete the given keys, returning how many existed.
    async fn delete(&self, keys: &[String], deadline: Deadline) -> Result<u64>;

    /// Round-trip health check.
    async fn ping(&self, deadline: Deadline) -> Result<()>;
}
