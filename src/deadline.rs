//! Deadlines bounding every store round-trip.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{KvGuardError, Result};

/// Point in time after which a store operation gives up with [`KvGuardError::Timeout`].
///
/// Dropping an in-flight operation future cancels it; the deadline covers the
/// case where the caller keeps waiting on a slow or partitioned store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// A deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    /// A deadline at a fixed instant.
    pub fn at(at: Instant) -> Self {
        Self { at }
    }

    /// The instant this deadline expires.
    pub fn instant(&self) -> Instant {
        self.at
    }

    /// Whether the deadline is already in the past.
    pub fn has_elapsed(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Time left before expiry, zero once elapsed.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Drive `fut` to completion unless the deadline passes first.
    ///
    /// An already elapsed deadline fails without polling `fut`.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.has_elapsed() {
            return Err(KvGuardError::Timeout);
        }
        match tokio::time::timeout_at(self.at, fut).await {
            Ok(result) => result,
            Err(_) => Err(KvGuardError::Timeout),
        }
    }
}
