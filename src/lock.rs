//! Token-based distributed lock.
//!
//! A lock is a single store key holding the holder's token with a TTL.
//! Acquire is a conditional create; release is an atomic compare-and-delete,
//! so a holder whose TTL already expired can never delete a lock that has
//! since been granted to someone else. The lock is advisory and not
//! re-entrant: acquiring a held lock fails immediately, even for the holder.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::deadline::Deadline;
use crate::error::{KvGuardError, Result};
use crate::store::{KvStore, MAX_TTL};

/// Default bound on the release issued by [`DistributedLock::with_lock`].
pub const DEFAULT_RELEASE_TIMEOUT: Duration = Duration::from_secs(1);

/// Opaque value proving ownership of a held lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    /// Wrap a caller-chosen token.
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(KvGuardError::invalid("lock token must not be empty"));
        }
        Ok(Self(token))
    }

    /// A fresh random token.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// The token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Distributed mutual exclusion keyed by lock name.
pub struct DistributedLock {
    store: Arc<dyn KvStore>,
    release_timeout: Duration,
}

impl DistributedLock {
    /// Create a lock manager over `store`.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            release_timeout: DEFAULT_RELEASE_TIMEOUT,
        }
    }

    /// Set the bound on releases issued by [`with_lock`](Self::with_lock).
    pub fn with_release_timeout(mut self, timeout: Duration) -> Self {
        self.release_timeout = timeout;
        self
    }

    /// Try to take the lock `name` for `ttl`.
    ///
    /// Returns `false` without waiting if the lock is held. The lock expires
    /// after `ttl` even if never released.
    pub async fn acquire(
        &self,
        name: &str,
        token: &LockToken,
        ttl: Duration,
        deadline: Deadline,
    ) -> Result<bool> {
        validate_name(name)?;
        if ttl.as_millis() == 0 {
            return Err(KvGuardError::invalid("lock ttl must be at least 1ms"));
        }
        if ttl > MAX_TTL {
            return Err(KvGuardError::invalid(format!(
                "lock ttl must be at most {}ms",
                MAX_TTL.as_millis()
            )));
        }

        let acquired = self
            .store
            .set_if_absent(name, token.as_str(), ttl, deadline)
            .await?;

        if acquired {
            trace!(lock = %name, ttl_ms = ttl.as_millis() as u64, "Lock acquired");
        } else {
            debug!(lock = %name, "Lock is held elsewhere");
        }
        Ok(acquired)
    }

    /// Release `name` if and only if it is still held with `token`.
    ///
    /// Returns `false` when the lock is absent or held under another token.
    pub async fn release(&self, name: &str, token: &LockToken, deadline: Deadline) -> Result<bool> {
        validate_name(name)?;

        let released = self
            .store
            .compare_and_delete(name, token.as_str(), deadline)
            .await?;

        if released {
            trace!(lock = %name, "Lock released");
        } else {
            debug!(lock = %name, "Release skipped, lock not held by this token");
        }
        Ok(released)
    }

    /// Run `work` while holding `name` under a fresh token.
    ///
    /// Returns `Ok(None)` without running `work` if the lock is held elsewhere.
    /// The lock is released once `work` completes; a failed release is logged
    /// and left to the TTL.
    pub async fn with_lock<F, T>(
        &self,
        name: &str,
        ttl: Duration,
        deadline: Deadline,
        work: F,
    ) -> Result<Option<T>>
    where
        F: Future<Output = T>,
    {
        let token = LockToken::generate();
        if !self.acquire(name, &token, ttl, deadline).await? {
            return Ok(None);
        }

        let output = work.await;

        let release_deadline = Deadline::after(self.release_timeout);
        match self.release(name, &token, release_deadline).await {
            Ok(true) => {}
            Ok(false) => warn!(lock = %name, "Lock expired before work completed"),
            Err(e) => warn!(lock = %name, error = %e, "Failed to release lock"),
        }

        Ok(Some(output))
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(KvGuardError::invalid("lock name must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    fn lock() -> (Arc<ManualClock>, DistributedLock) {
        let clock = Arc::new(ManualClock::new(1_704_067_200_000));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        (clock, DistributedLock::new(store))
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    fn token(s: &str) -> LockToken {
        LockToken::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_job42_scenario() {
        let (_clock, lock) = lock();
        let ttl = Duration::from_secs(5);

        assert!(lock.acquire("job42", &token("tokenA"), ttl, deadline()).await.unwrap());
        assert!(!lock.acquire("job42", &token("tokenB"), ttl, deadline()).await.unwrap());
        assert!(!lock.release("job42", &token("tokenB"), deadline()).await.unwrap());
        assert!(lock.release("job42", &token("tokenA"), deadline()).await.unwrap());
    }

    #[tokio::test]
    async fn test_second_release_returns_false() {
        let (_clock, lock) = lock();
        let t = token("tokenA");

        lock.acquire("job", &t, Duration::from_secs(5), deadline()).await.unwrap();
        assert!(lock.release("job", &t, deadline()).await.unwrap());
        assert!(!lock.release("job", &t, deadline()).await.unwrap());
    }

    #[tokio::test]
    async fn test_not_reentrant() {
        let (_clock, lock) = lock();
        let t = token("tokenA");

        assert!(lock.acquire("job", &t, Duration::from_secs(5), deadline()).await.unwrap());
        assert!(!lock.acquire("job", &t, Duration::from_secs(5), deadline()).await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_holder_cannot_release_new_holder() {
        let (clock, lock) = lock();
        let ttl = Duration::from_secs(5);

        assert!(lock.acquire("job", &token("first"), ttl, deadline()).await.unwrap());
        clock.advance(Duration::from_secs(6));

        assert!(lock.acquire("job", &token("second"), ttl, deadline()).await.unwrap());
        assert!(!lock.release("job", &token("first"), deadline()).await.unwrap());
        assert!(!lock.acquire("job", &token("third"), ttl, deadline()).await.unwrap());
        assert!(lock.release("job", &token("second"), deadline()).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_acquire_single_winner() {
        let (_clock, lock) = lock();
        let lock = Arc::new(lock);

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let lock = lock.clone();
                tokio::spawn(async move {
                    lock.acquire("shared", &token(&format!("t{i}")), Duration::from_secs(5), deadline())
                        .await
                        .unwrap()
                })
            })
            .collect();

        let winners = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_with_lock_runs_and_releases() {
        let (_clock, lock) = lock();

        let out = lock
            .with_lock("job", Duration::from_secs(5), deadline(), async { 7 })
            .await
            .unwrap();
        assert_eq!(out, Some(7));

        // Released afterwards
        assert!(lock.acquire("job", &token("next"), Duration::from_secs(5), deadline()).await.unwrap());

        let skipped = lock
            .with_lock("job", Duration::from_secs(5), deadline(), async { 8 })
            .await
            .unwrap();
        assert_eq!(skipped, None);
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let (_clock, lock) = lock();
        let t = token("a");

        assert!(matches!(
            lock.acquire("", &t, Duration::from_secs(1), deadline()).await,
            Err(KvGuardError::InvalidArgument(_))
        ));
        assert!(matches!(
            lock.acquire("job", &t, Duration::ZERO, deadline()).await,
            Err(KvGuardError::InvalidArgument(_))
        ));
        assert!(matches!(
            lock.acquire("job", &t, Duration::from_millis(i64::MAX as u64), deadline()).await,
            Err(KvGuardError::InvalidArgument(_))
        ));
        assert!(lock.acquire("job", &t, MAX_TTL, deadline()).await.unwrap());
        assert!(LockToken::new("").is_err());
        assert_ne!(LockToken::generate(), LockToken::generate());
    }
}
