//! Tests against a live Redis server.
//!
//! Set `REDIS_URL` (e.g. `redis://127.0.0.1:6379/`) to run them; without it
//! every test returns early. Each test works under its own random prefix.

use std::sync::Arc;
use std::time::Duration;

use kvguard::clock::{Clock, ManualClock, SystemClock};
use kvguard::config::StoreConfig;
use kvguard::ratelimit::{RateLimitKey, RateLimiter, TimeWindow, Window};
use kvguard::{Algorithm, Deadline, DistributedLock, KvGuardError, KvStore, LockToken, RedisStore, Scanner};
use tokio_test::{assert_err, assert_ok};

async fn store() -> Option<Arc<RedisStore>> {
    let url = std::env::var("REDIS_URL").ok()?;
    let config = StoreConfig {
        url,
        ..StoreConfig::default()
    };
    Some(Arc::new(RedisStore::connect(&config).await.unwrap()))
}

fn prefix() -> String {
    format!("kvguard-test:{:08x}:", rand::random::<u32>())
}

fn deadline() -> Deadline {
    Deadline::after(Duration::from_secs(5))
}

/// A manual clock on the first minute boundary after now, so fixed-window
/// counters expire in the future.
fn aligned_clock() -> Arc<ManualClock> {
    let now = SystemClock.now_ms();
    Arc::new(ManualClock::new((now / 60_000 + 1) * 60_000))
}

#[tokio::test]
async fn test_fixed_window_against_redis() {
    let Some(store) = store().await else { return };
    let clock = aligned_clock();
    let limiter = RateLimiter::new(store.clone(), clock.clone());
    let key = RateLimitKey::parse(format!("{}user:1:msg", prefix())).unwrap();
    let window = Window::per(5, TimeWindow::Minute);

    for expected in (0..5).rev() {
        let decision = limiter.check(Algorithm::Fixed, &key, &window, deadline()).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, expected);
        clock.advance(Duration::from_secs(1));
    }

    let decision = limiter.check(Algorithm::Fixed, &key, &window, deadline()).await.unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.remaining, 0);

    // Next window starts a fresh counter
    clock.advance(Duration::from_secs(60));
    let decision = limiter.check(Algorithm::Fixed, &key, &window, deadline()).await.unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 4);

    let scanner = Scanner::new(store);
    assert_ok!(scanner.delete_by_prefix(&format!("rl:{key}"), 100, deadline()).await);
}

#[tokio::test]
async fn test_sliding_window_against_redis() {
    let Some(store) = store().await else { return };
    let clock = aligned_clock();
    let t0 = clock.now_ms();
    let limiter = RateLimiter::new(store.clone(), clock.clone());
    let key = RateLimitKey::parse(format!("{}user:2:msg", prefix())).unwrap();
    let window = Window::new(3, Duration::from_secs(10)).unwrap();

    for (at, allowed) in [(0, true), (2_000, true), (4_000, true), (5_000, false), (11_000, true)] {
        clock.set(t0 + at);
        let decision = limiter.check(Algorithm::Sliding, &key, &window, deadline()).await.unwrap();
        assert_eq!(decision.allowed, allowed, "at t={at}ms");
    }

    let scanner = Scanner::new(store);
    let deleted = scanner
        .delete_by_prefix(&format!("rl:sw:{key}"), 100, deadline())
        .await
        .unwrap();
    assert_eq!(deleted, 1);
}

#[tokio::test]
async fn test_sliding_boundary_against_redis() {
    let Some(store) = store().await else { return };
    let clock = aligned_clock();
    let t0 = clock.now_ms();
    let limiter = RateLimiter::new(store.clone(), clock.clone());
    let key = RateLimitKey::parse(format!("{}user:3:msg", prefix())).unwrap();
    let window = Window::new(1, Duration::from_millis(1000)).unwrap();

    for (at, allowed) in [(0, true), (1_000, false), (1_001, true)] {
        clock.set(t0 + at);
        let decision = limiter.check(Algorithm::Sliding, &key, &window, deadline()).await.unwrap();
        assert_eq!(decision.allowed, allowed, "at t={at}ms");
    }

    let scanner = Scanner::new(store);
    assert_ok!(scanner.delete_by_prefix(&format!("rl:sw:{key}"), 100, deadline()).await);
}

#[tokio::test]
async fn test_lock_against_redis() {
    let Some(store) = store().await else { return };
    let lock = DistributedLock::new(store);
    let name = format!("{}job42", prefix());
    let ttl = Duration::from_secs(5);
    let a = LockToken::new("tokenA").unwrap();
    let b = LockToken::new("tokenB").unwrap();

    assert!(lock.acquire(&name, &a, ttl, deadline()).await.unwrap());
    assert!(!lock.acquire(&name, &b, ttl, deadline()).await.unwrap());
    assert!(!lock.release(&name, &b, deadline()).await.unwrap());
    assert!(lock.release(&name, &a, deadline()).await.unwrap());
    assert!(!lock.release(&name, &a, deadline()).await.unwrap());
}

#[tokio::test]
async fn test_lock_expires_against_redis() {
    let Some(store) = store().await else { return };
    let lock = DistributedLock::new(store);
    let name = format!("{}short", prefix());

    let first = LockToken::generate();
    assert!(lock.acquire(&name, &first, Duration::from_millis(100), deadline()).await.unwrap());
    tokio::time::sleep(Duration::from_millis(250)).await;

    let second = LockToken::generate();
    assert!(lock.acquire(&name, &second, Duration::from_secs(5), deadline()).await.unwrap());
    assert!(!lock.release(&name, &first, deadline()).await.unwrap());
    assert!(lock.release(&name, &second, deadline()).await.unwrap());
}

#[tokio::test]
async fn test_purge_then_scan_against_redis() {
    let Some(store) = store().await else { return };
    let prefix = prefix();
    for i in 0..250 {
        let key = format!("{prefix}item:{i}");
        assert!(store.set_if_absent(&key, "1", Duration::from_secs(60), deadline()).await.unwrap());
    }

    let scanner = Scanner::new(store);
    let keys = scanner.scan_prefix(&prefix, 50, deadline()).await.unwrap();
    assert_eq!(keys.len(), 250);

    assert_eq!(scanner.delete_by_prefix(&prefix, 50, deadline()).await.unwrap(), 250);
    assert!(scanner.scan_prefix(&prefix, 50, deadline()).await.unwrap().is_empty());
    assert_eq!(scanner.delete_by_prefix(&prefix, 50, deadline()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_elapsed_deadline_against_redis() {
    let Some(store) = store().await else { return };
    let expired = Deadline::after(Duration::ZERO);

    let err = assert_err!(store.ping(expired).await);
    assert!(matches!(err, KvGuardError::Timeout));
    assert!(err.is_store_unavailable());

    let name = format!("{}never", prefix());
    let lock = DistributedLock::new(store.clone());
    assert_err!(lock.acquire(&name, &LockToken::generate(), Duration::from_secs(5), expired).await);
    assert!(store.set_if_absent(&name, "x", Duration::from_secs(1), deadline()).await.unwrap());
    assert_ok!(store.delete(&[name], deadline()).await);
}

#[tokio::test]
async fn test_connect_failure_is_store_error() {
    if std::env::var("REDIS_URL").is_err() {
        return;
    }
    let config = StoreConfig {
        url: "redis://127.0.0.1:1/".to_string(),
        connect_timeout_ms: 500,
        ..StoreConfig::default()
    };

    let err = RedisStore::connect(&config).await.err().unwrap();
    assert!(err.is_store_unavailable());
}
