//! Prefix scanning and bulk deletion.
//!
//! Keys are enumerated with cursor-based iteration, never a single blocking
//! query over the whole key space. Neither operation is atomic with respect
//! to concurrent writers: keys created during a scan may or may not be seen.
//! Purges are safe to repeat.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::deadline::Deadline;
use crate::error::{KvGuardError, Result};
use crate::store::KvStore;

/// Enumerates and removes keys by prefix.
pub struct Scanner {
    store: Arc<dyn KvStore>,
}

impl Scanner {
    /// Create a scanner over `store`.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Every key starting with `prefix`, in no particular order.
    ///
    /// `batch_size` is the per-step COUNT hint. If the scan is interrupted after
    /// at least one step completed, the error is
    /// [`KvGuardError::PartialScan`] with the number of keys collected so far.
    pub async fn scan_prefix(
        &self,
        prefix: &str,
        batch_size: usize,
        deadline: Deadline,
    ) -> Result<Vec<String>> {
        validate(prefix, batch_size)?;

        let pattern = format!("{}*", escape_glob(prefix));
        let mut keys = HashSet::new();
        let mut cursor = 0;
        let mut steps = 0u64;

        loop {
            let (next, batch) = match self.store.scan(cursor, &pattern, batch_size, deadline).await {
                Ok(step) => step,
                Err(e) if steps == 0 => return Err(e),
                Err(e) => {
                    return Err(KvGuardError::PartialScan {
                        processed: keys.len() as u64,
                        source: Box::new(e),
                    })
                }
            };

            steps += 1;
            keys.extend(batch);

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(prefix = %prefix, steps, keys = keys.len(), "Prefix scan complete");
        Ok(keys.into_iter().collect())
    }

    /// Delete every key starting with `prefix`, returning how many were removed.
    ///
    /// Returns 0 when nothing matches. An interrupted scan deletes nothing and
    /// reports [`KvGuardError::PartialScan`] with `processed: 0`.
    pub async fn delete_by_prefix(
        &self,
        prefix: &str,
        batch_size: usize,
        deadline: Deadline,
    ) -> Result<u64> {
        let keys = self
            .scan_prefix(prefix, batch_size, deadline)
            .await
            .map_err(|e| match e {
                KvGuardError::PartialScan { source, .. } => KvGuardError::PartialScan {
                    processed: 0,
                    source,
                },
                other => other,
            })?;

        if keys.is_empty() {
            debug!(prefix = %prefix, "No keys to purge");
            return Ok(0);
        }

        let deleted = self.store.delete(&keys, deadline).await?;
        info!(prefix = %prefix, matched = keys.len(), deleted, "Purged keys by prefix");
        Ok(deleted)
    }
}

fn validate(prefix: &str, batch_size: usize) -> Result<()> {
    if prefix.is_empty() {
        return Err(KvGuardError::invalid("scan prefix must not be empty"));
    }
    if batch_size == 0 {
        return Err(KvGuardError::invalid("batch size must be > 0"));
    }
    Ok(())
}

/// Escape glob metacharacters so `prefix` matches literally.
pub(crate) fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, WindowAdmission};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    fn seeded() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for i in 0..30 {
            store.insert(&format!("pref:{i}"), "1", None);
        }
        store.insert("other:1", "1", None);
        store.insert("prefix-lookalike", "1", None);
        store
    }

    #[tokio::test]
    async fn test_scan_prefix_collects_all() {
        let store = seeded();
        let scanner = Scanner::new(store);

        let mut keys = scanner.scan_prefix("pref:", 4, deadline()).await.unwrap();
        keys.sort();
        assert_eq!(keys.len(), 30);
        assert!(keys.iter().all(|k| k.starts_with("pref:")));
    }

    #[tokio::test]
    async fn test_purge_then_scan_is_empty() {
        let store = seeded();
        let scanner = Scanner::new(store.clone());

        assert_eq!(scanner.delete_by_prefix("pref:", 7, deadline()).await.unwrap(), 30);
        assert!(scanner.scan_prefix("pref:", 7, deadline()).await.unwrap().is_empty());
        assert_eq!(store.len(), 2);

        // Repeatable
        assert_eq!(scanner.delete_by_prefix("pref:", 7, deadline()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_prefix_matched_literally() {
        let store = Arc::new(MemoryStore::new());
        store.insert("a*b:1", "1", None);
        store.insert("axb:1", "1", None);
        let scanner = Scanner::new(store);

        let keys = scanner.scan_prefix("a*b", 10, deadline()).await.unwrap();
        assert_eq!(keys, vec!["a*b:1".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let scanner = Scanner::new(Arc::new(MemoryStore::new()));
        assert!(matches!(
            scanner.scan_prefix("", 10, deadline()).await,
            Err(KvGuardError::InvalidArgument(_))
        ));
        assert!(matches!(
            scanner.delete_by_prefix("p", 0, deadline()).await,
            Err(KvGuardError::InvalidArgument(_))
        ));
    }

    /// Serves one scan step, then times out.
    struct FlakyStore {
        inner: MemoryStore,
        calls: AtomicU32,
    }

    #[async_trait]
    impl KvStore for FlakyStore {
        async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration, deadline: Deadline) -> Result<bool> {
            self.inner.set_if_absent(key, value, ttl, deadline).await
        }

        async fn incr_expire_at(&self, key: &str, expire_at_ms: i64, deadline: Deadline) -> Result<i64> {
            self.inner.incr_expire_at(key, expire_at_ms, deadline).await
        }

        async fn window_admit(
            &self,
            key: &str,
            member: &str,
            now_ms: i64,
            window_ms: i64,
            limit: u64,
            ttl: Duration,
            deadline: Deadline,
        ) -> Result<WindowAdmission> {
            self.inner
                .window_admit(key, member, now_ms, window_ms, limit, ttl, deadline)
                .await
        }

        async fn compare_and_delete(&self, key: &str, expected: &str, deadline: Deadline) -> Result<bool> {
            self.inner.compare_and_delete(key, expected, deadline).await
        }

        async fn scan(&self, cursor: u64, pattern: &str, count: usize, deadline: Deadline) -> Result<(u64, Vec<String>)> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= 1 {
                return Err(KvGuardError::Timeout);
            }
            self.inner.scan(cursor, pattern, count, deadline).await
        }

        async fn delete(&self, keys: &[String], deadline: Deadline) -> Result<u64> {
            self.inner.delete(keys, deadline).await
        }

        async fn ping(&self, deadline: Deadline) -> Result<()> {
            self.inner.ping(deadline).await
        }
    }

    #[tokio::test]
    async fn test_interrupted_scan_reports_progress() {
        let inner = MemoryStore::new();
        for i in 0..10 {
            inner.insert(&format!("pref:{i}"), "1", None);
        }
        let store = Arc::new(FlakyStore {
            inner,
            calls: AtomicU32::new(0),
        });
        let scanner = Scanner::new(store.clone());

        match scanner.scan_prefix("pref:", 4, deadline()).await {
            Err(KvGuardError::PartialScan { processed, source }) => {
                assert_eq!(processed, 4);
                assert!(matches!(*source, KvGuardError::Timeout));
            }
            other => panic!("expected partial scan, got {other:?}"),
        }

        store.calls.store(1, Ordering::SeqCst);
        let err = scanner.delete_by_prefix("pref:", 4, deadline()).await.unwrap_err();
        assert!(matches!(err, KvGuardError::Timeout));
        assert!(err.is_store_unavailable());
    }

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("rl:sw:"), "rl:sw:");
        assert_eq!(escape_glob("a*b?[c]\\"), "a\\*b\\?\\[c\\]\\\\");
    }
}
