//! Facade over the rate limiters, the lock and the scanner.
//!
//! This is what request handlers call: they pass a caller identity or a lock
//! name and get back a decision, a lock outcome, or a purge count. All state
//! lives in the store, so one coordinator can be shared by every handler in a
//! process and any number of processes can share one store.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::KvGuardConfig;
use crate::deadline::Deadline;
use crate::error::{KvGuardError, Result};
use crate::lock::{DistributedLock, LockToken};
use crate::ratelimit::{Algorithm, RateLimitDecision, RateLimitKey, RateLimitRules, RateLimiter, Window};
use crate::scan::Scanner;
use crate::store::{KvStore, RedisStore};

/// Coordination primitives over one shared store.
pub struct Coordinator {
    store: Arc<dyn KvStore>,
    rate_limiter: RateLimiter,
    lock: DistributedLock,
    scanner: Scanner,
    rules: RateLimitRules,
    operation_timeout: Duration,
    batch_size: usize,
}

impl Coordinator {
    /// Create a coordinator over `store` on the system clock.
    pub fn new(store: Arc<dyn KvStore>, config: &KvGuardConfig) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), config)
    }

    /// Create a coordinator over `store` placing events with `clock`.
    pub fn with_clock(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, config: &KvGuardConfig) -> Self {
        let operation_timeout = config.store.operation_timeout();

        Self {
            rate_limiter: RateLimiter::new(store.clone(), clock),
            lock: DistributedLock::new(store.clone()).with_release_timeout(operation_timeout),
            scanner: Scanner::new(store.clone()),
            store,
            rules: config.rate_limiting.clone(),
            operation_timeout,
            batch_size: config.scan.batch_size,
        }
    }

    /// Connect to the Redis store described by `config`.
    pub async fn connect(config: &KvGuardConfig) -> Result<Self> {
        let store = RedisStore::connect(&config.store).await?;
        info!(rules = config.rate_limiting.rules.len(), "Coordinator ready");
        Ok(Self::new(Arc::new(store), config))
    }

    /// A deadline one configured operation timeout from now.
    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.operation_timeout)
    }

    /// Configured default scan batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Count one event for `key` and decide whether it is within `limit` per `window`.
    pub async fn rate_limit(
        &self,
        algorithm: Algorithm,
        key: &str,
        limit: u64,
        window: Duration,
        deadline: Deadline,
    ) -> Result<RateLimitDecision> {
        let key = RateLimitKey::parse(key)?;
        let window = Window::new(limit, window)?;
        self.rate_limiter.check(algorithm, &key, &window, deadline).await
    }

    /// Check `identity` against the configured rule `rule`.
    pub async fn rate_limit_rule(
        &self,
        rule: &str,
        identity: impl Display,
        deadline: Deadline,
    ) -> Result<RateLimitDecision> {
        let rule = self
            .rules
            .get(rule)
            .ok_or_else(|| KvGuardError::invalid(format!("unknown rate limit rule '{rule}'")))?;

        let key = rule.key_for(identity)?;
        let window = rule.window()?;
        self.rate_limiter.check(rule.algorithm, &key, &window, deadline).await
    }

    /// Try to take lock `name` with `token` for `ttl`.
    pub async fn lock(&self, name: &str, token: &str, ttl: Duration, deadline: Deadline) -> Result<bool> {
        let token = LockToken::new(token)?;
        self.lock.acquire(name, &token, ttl, deadline).await
    }

    /// Release lock `name` if it is held with `token`.
    pub async fn unlock(&self, name: &str, token: &str, deadline: Deadline) -> Result<bool> {
        let token = LockToken::new(token)?;
        self.lock.release(name, &token, deadline).await
    }

    /// Every key starting with `prefix`.
    pub async fn scan_prefix(&self, prefix: &str, batch_size: usize, deadline: Deadline) -> Result<Vec<String>> {
        self.scanner.scan_prefix(prefix, batch_size, deadline).await
    }

    /// Delete every key starting with `prefix`.
    pub async fn purge_by_prefix(&self, prefix: &str, batch_size: usize, deadline: Deadline) -> Result<u64> {
        self.scanner.delete_by_prefix(prefix, batch_size, deadline).await
    }

    /// Check the store answers.
    pub async fn ping(&self, deadline: Deadline) -> Result<()> {
        self.store.ping(deadline).await
    }

    /// The rate limiter.
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// The distributed lock.
    pub fn locks(&self) -> &DistributedLock {
        &self.lock
    }

    /// The configured rate limit rules.
    pub fn rules(&self) -> &RateLimitRules {
        &self.rules
    }
}
