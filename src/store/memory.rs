//! In-process implementation of [`KvStore`].
//!
//! Mirrors the Redis semantics the limiters and the lock rely on: per-key
//! atomicity, absolute expiry, and cursor-based scanning with glob patterns.
//! Expiry follows the supplied [`Clock`], so window behaviour can be driven
//! deterministically with a [`ManualClock`](crate::clock::ManualClock).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;

use super::{ttl_millis, KvStore, WindowAdmission};
use crate::clock::{Clock, SystemClock};
use crate::deadline::Deadline;
use crate::error::{KvGuardError, Result};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Int(i64),
    SortedSet(HashMap<String, i64>),
}

#[derive(Debug, Clone)]
struct Record {
    value: Value,
    expires_at_ms: Option<i64>,
}

impl Record {
    fn is_expired(&self, now_ms: i64) -> bool {
        matches!(self.expires_at_ms, Some(at) if at <= now_ms)
    }
}

/// A [`KvStore`] held in process memory.
///
/// Only coordinates callers inside one process; use
/// [`RedisStore`](super::RedisStore) to coordinate across processes.
pub struct MemoryStore {
    records: DashMap<String, Record>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create an empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store whose expiry follows `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            clock,
        }
    }

    /// Write a plain string value, replacing whatever was there.
    pub fn insert(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let expires_at_ms = ttl.map(|ttl| self.clock.now_ms().saturating_add(ttl_millis(ttl)));
        self.records.insert(
            key.to_string(),
            Record {
                value: Value::Str(value.to_string()),
                expires_at_ms,
            },
        );
    }

    /// Read a live string or integer value.
    pub fn get(&self, key: &str) -> Option<String> {
        let now_ms = self.clock.now_ms();
        let record = self.records.get(key)?;
        if record.is_expired(now_ms) {
            return None;
        }
        match &record.value {
            Value::Str(s) => Some(s.clone()),
            Value::Int(n) => Some(n.to_string()),
            Value::SortedSet(_) => None,
        }
    }

    /// Members of a live sorted set at `key`, zero if absent.
    pub fn sorted_set_len(&self, key: &str) -> usize {
        let now_ms = self.clock.now_ms();
        match self.records.get(key) {
            Some(record) if !record.is_expired(now_ms) => match &record.value {
                Value::SortedSet(members) => members.len(),
                _ => 0,
            },
            _ => 0,
        }
    }

    /// Absolute expiry of `key` in epoch milliseconds, if it has one.
    pub fn expires_at_ms(&self, key: &str) -> Option<i64> {
        self.records.get(key).and_then(|r| r.expires_at_ms)
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now_ms = self.clock.now_ms();
        self.records.iter().filter(|r| !r.is_expired(now_ms)).count()
    }

    /// Whether the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live entry for `key`, dropping it first if it has expired.
    fn live_entry(&self, key: &str, now_ms: i64) -> MapEntry<'_, String, Record> {
        match self.records.entry(key.to_string()) {
            MapEntry::Occupied(occupied) if occupied.get().is_expired(now_ms) => {
                occupied.remove();
                self.records.entry(key.to_string())
            }
            entry => entry,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn check_deadline(deadline: &Deadline) -> Result<()> {
    if deadline.has_elapsed() {
        return Err(KvGuardError::Timeout);
    }
    Ok(())
}

fn wrong_type(key: &str) -> KvGuardError {
    KvGuardError::Redis(redis::RedisError::from((
        redis::ErrorKind::TypeError,
        "WRONGTYPE Operation against a key holding the wrong kind of value",
        key.to_string(),
    )))
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        deadline: Deadline,
    ) -> Result<bool> {
        check_deadline(&deadline)?;
        let now_ms = self.clock.now_ms();

        match self.live_entry(key, now_ms) {
            MapEntry::Occupied(_) => Ok(false),
            MapEntry::Vacant(vacant) => {
                vacant.insert(Record {
                    value: Value::Str(value.to_string()),
                    expires_at_ms: Some(now_ms.saturating_add(ttl_millis(ttl))),
                });
                Ok(true)
            }
        }
    }

    async fn incr_expire_at(
        &self,
        key: &str,
        expire_at_ms: i64,
        deadline: Deadline,
    ) -> Result<i64> {
        check_deadline(&deadline)?;
        let now_ms = self.clock.now_ms();

        let mut record = self.live_entry(key, now_ms).or_insert(Record {
            value: Value::Int(0),
            expires_at_ms: None,
        });

        let current = match &record.value {
            Value::Int(n) => *n,
            Value::Str(s) => s.parse::<i64>().map_err(|_| wrong_type(key))?,
            Value::SortedSet(_) => return Err(wrong_type(key)),
        };
        let count = current + 1;
        record.value = Value::Int(count);
        record.expires_at_ms = Some(expire_at_ms);
        drop(record);

        // PEXPIREAT in the past deletes the key
        if expire_at_ms <= now_ms {
            self.records.remove(key);
        }

        Ok(count)
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
        check_deadline(&deadline)?;
        let clock_now_ms = self.clock.now_ms();

        let mut record = self.live_entry(key, clock_now_ms).or_insert(Record {
            value: Value::SortedSet(HashMap::new()),
            expires_at_ms: None,
        });

        let Value::SortedSet(members) = &mut record.value else {
            return Err(wrong_type(key));
        };

        let floor = now_ms.saturating_sub(window_ms);
        members.retain(|_, score| *score >= floor);

        let admitted = (members.len() as u64) < limit;
        if admitted {
            members.insert(member.to_string(), now_ms);
        }
        let cardinality = members.len() as u64;

        record.expires_at_ms = Some(clock_now_ms.saturating_add(ttl_millis(ttl)));
        let empty = cardinality == 0;
        drop(record);

        // Redis drops empty sorted sets
        if empty {
            self.records.remove(key);
        }

        Ok(WindowAdmission {
            admitted,
            cardinality,
        })
    }

    async fn compare_and_delete(
        &self,
        key: &str,
        expected: &str,
        deadline: Deadline,
    ) -> Result<bool> {
        check_deadline(&deadline)?;
        let now_ms = self.clock.now_ms();

        match self.live_entry(key, now_ms) {
            MapEntry::Occupied(occupied) => {
                let matches = matches!(&occupied.get().value, Value::Str(s) if s == expected);
                if matches {
                    occupied.remove();
                }
                Ok(matches)
            }
            MapEntry::Vacant(_) => Ok(false),
        }
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
        deadline: Deadline,
    ) -> Result<(u64, Vec<String>)> {
        check_deadline(&deadline)?;
        let now_ms = self.clock.now_ms();

        let mut all: Vec<String> = self
            .records
            .iter()
            .filter(|r| !r.value().is_expired(now_ms))
            .map(|r| r.key().clone())
            .collect();
        all.sort();

        let start = cursor as usize;
        let end = start.saturating_add(count.max(1)).min(all.len());
        let keys = all
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .filter(|key| glob_match(pattern.as_bytes(), key.as_bytes()))
            .cloned()
            .collect();

        let next = if end >= all.len() { 0 } else { end as u64 };
        Ok((next, keys))
    }

    async fn delete(&self, keys: &[String], deadline: Deadline) -> Result<u64> {
        check_deadline(&deadline)?;
        let now_ms = self.clock.now_ms();

        let deleted = keys
            .iter()
            .filter_map(|key| self.records.remove(key))
            .filter(|(_, record)| !record.is_expired(now_ms))
            .count();

        Ok(deleted as u64)
    }

    async fn ping(&self, deadline: Deadline) -> Result<()> {
        check_deadline(&deadline)
    }
}

/// Redis-style glob matching supporting `*`, `?` and backslash escapes.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some(b'*') => (0..=text.len()).any(|skip| glob_match(&pattern[1..], &text[skip..])),
        Some(b'?') => !text.is_empty() && glob_match(&pattern[1..], &text[1..]),
        Some(b'\\') if pattern.len() > 1 => {
            text.first() == Some(&pattern[1]) && glob_match(&pattern[2..], &text[1..])
        }
        Some(c) => text.first() == Some(c) && glob_match(&pattern[1..], &text[1..]),
    }
}
