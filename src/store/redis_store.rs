//! Redis implementation of [`KvStore`].

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{IntoConnectionInfo, Script};
use tracing::{debug, info};

use super::{ttl_millis, KvStore, WindowAdmission};
use crate::config::StoreConfig;
use crate::deadline::Deadline;
use crate::error::Result;

const WINDOW_ADMIT_SCRIPT: &str = r#"
local key = KEYS[1]

local member = ARGV[1]
local now_ms = ARGV[2]
local prune_below = ARGV[3]
local limit = tonumber(ARGV[4])
local ttl_ms = ARGV[5]

redis.call("ZREMRANGEBYSCORE", key, "-inf", prune_below)

local count = redis.call("ZCARD", key)
local admitted = 0

if count < limit then
    redis.call("ZADD", key, now_ms, member)
    count = count + 1
    admitted = 1
end

redis.call("PEXPIRE", key, ttl_ms)

return {admitted, count}
"#;

const COMPARE_AND_DELETE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// A [`KvStore`] backed by a Redis server.
///
/// Cloning is cheap: clones share the underlying [`ConnectionManager`], which
/// multiplexes commands and reconnects on failure.
#[derive(Clone)]
pub struct RedisStore {
    connection_manager: ConnectionManager,
    window_admit: Script,
    compare_and_delete: Script,
}

impl RedisStore {
    /// Wrap an existing connection manager.
    pub fn new(connection_manager: ConnectionManager) -> Self {
        Self {
            connection_manager,
            window_admit: Script::new(WINDOW_ADMIT_SCRIPT),
            compare_and_delete: Script::new(COMPARE_AND_DELETE_SCRIPT),
        }
    }

    /// Connect using `config` and verify the server answers PING within the
    /// connect timeout.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let mut connection_info = config.url.as_str().into_connection_info()?;
        if let Some(ref password) = config.password {
            connection_info.redis.password = Some(password.clone());
        }
        if let Some(db) = config.db {
            connection_info.redis.db = db;
        }

        info!(
            addr = ?connection_info.addr,
            db = connection_info.redis.db,
            "Connecting to store"
        );

        let client = redis::Client::open(connection_info)?;
        let deadline = Deadline::after(config.connect_timeout());

        let connection_manager = deadline
            .run(async { Ok(client.get_connection_manager().await?) })
            .await?;

        let store = Self::new(connection_manager);
        store.ping(deadline).await?;

        info!("Store connection established");
        Ok(store)
    }

    fn connection(&self) -> ConnectionManager {
        self.connection_manager.clone()
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}


#[async_trait]
impl KvStore for RedisStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        deadline: Deadline,
    ) -> Result<bool> {
        let mut conn = self.connection();

        deadline
            .run(async move {
                // SET key value NX PX ttl
                let reply: Option<String> = redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_millis(ttl))
                    .query_async(&mut conn)
                    .await?;
                Ok(reply.is_some())
            })
            .await
    }

    async fn incr_expire_at(
        &self,
        key: &str,
        expire_at_ms: i64,
        deadline: Deadline,
    ) -> Result<i64> {
        let mut conn = self.connection();

        deadline
            .run(async move {
                let mut pipe = redis::pipe();
                pipe.atomic();
                pipe.cmd("INCR").arg(key);
                pipe.cmd("PEXPIREAT").arg(key).arg(expire_at_ms).ignore();

                let (count,): (i64,) = pipe.query_async(&mut conn).await?;
                Ok(count)
            })
            .await
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
        let mut conn = self.connection();
        let script = &self.window_admit;

        deadline
            .run(async move {
                let (admitted, cardinality): (i64, u64) = script
                    .key(key)
                    .arg(member)
                    .arg(now_ms)
                    // Exclusive bound: members scored exactly now - window stay
                    .arg(format!("({}", now_ms.saturating_sub(window_ms)))
                    .arg(limit)
                    .arg(ttl_millis(ttl))
                    .invoke_async(&mut conn)
                    .await?;

                Ok(WindowAdmission {
                    admitted: admitted == 1,
                    cardinality,
                })
            })
            .await
    }

    async fn compare_and_delete(
        &self,
        key: &str,
        expected: &str,
        deadline: Deadline,
    ) -> Result<bool> {
        let mut conn = self.connection();
        let script = &self.compare_and_delete;

        deadline
            .run(async move {
                let deleted: i64 = script
                    .key(key)
                    .arg(expected)
                    .invoke_async(&mut conn)
                    .await?;
                Ok(deleted == 1)
            })
            .await
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
        deadline: Deadline,
    ) -> Result<(u64, Vec<String>)> {
        let mut conn = self.connection();

        deadline
            .run(async move {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(count)
                    .query_async(&mut conn)
                    .await?;
                Ok((next, keys))
            })
            .await
    }

    async fn delete(&self, keys: &[String], deadline: Deadline) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection();

        deadline
            .run(async move {
                let deleted: u64 = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
                debug!(requested = keys.len(), deleted, "Deleted keys");
                Ok(deleted)
            })
            .await
    }

    async fn ping(&self, deadline: Deadline) -> Result<()> {
        let mut conn = self.connection();

        deadline
            .run(async move {
                let _: String = redis::cmd("PING").query_async(&mut conn).await?;
                Ok(())
            })
            .await
    }
}
