//! Redis-backed rate store.
//!
//! Each window is a sorted set scored by request time. The whole
//! prune/count/add/expire sequence runs as one Lua script, which Redis
//! executes atomically, so concurrent gateway instances never admit more
//! than `max` requests per key.

use async_trait::async_trait;
use redis::Script;
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use tracing::debug;
use turnstile_core::StoreError;

use crate::{RateStore, WindowCheck, WindowSpec};

const SLIDING_WINDOW_LUA: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local member = ARGV[4]

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
local allowed = 0
if count < limit then
    redis.call('ZADD', key, now, member)
    count = count + 1
    allowed = 1
end
redis.call('PEXPIRE', key, window)

local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local oldest_score = -1
if oldest[2] then
    oldest_score = tonumber(oldest[2])
end
return {allowed, count, oldest_score}
"#;

pub struct RedisRateStore {
    conn: MultiplexedConnection,
    script: Script,
    key_prefix: String,
}

impl RedisRateStore {
    /// Open a multiplexed connection, giving up after `connect_timeout`.
    pub async fn connect(
        url: &str,
        key_prefix: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Unavailable(format!("Failed to create Redis client: {e}")))?;

        let conn = tokio::time::timeout(connect_timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| StoreError::Timeout {
                millis: connect_timeout.as_millis() as u64,
            })?
            .map_err(|e| StoreError::Unavailable(format!("Failed to get Redis connection: {e}")))?;

        Ok(Self {
            conn,
            script: Script::new(SLIDING_WINDOW_LUA),
            key_prefix: key_prefix.into(),
        })
    }

    fn redis_key(&self, key: &str, window: &WindowSpec) -> String {
        format!("{}:{}:{key}", self.key_prefix, window.kind)
    }
}

/// Decode the script's `{allowed, count, oldest_score}` reply.
fn parse_reply(reply: &[i64]) -> Result<WindowCheck, StoreError> {
    match reply {
        [allowed, count, oldest] => Ok(WindowCheck {
            allowed: *allowed == 1,
            count: u32::try_from(*count).unwrap_or(0),
            oldest_ms: (*oldest >= 0).then_some(*oldest),
        }),
        other => Err(StoreError::Backend(format!(
            "Invalid Redis response: expected 3 values, got {}",
            other.len()
        ))),
    }
}

#[async_trait]
impl RateStore for RedisRateStore {
    fn name(&self) -> &str {
        "redis"
    }

    async fn check_and_record(
        &self,
        key: &str,
        window: &WindowSpec,
        now_ms: i64,
    ) -> Result<WindowCheck, StoreError> {
        let redis_key = self.redis_key(key, window);
        // Unique member so two requests in the same millisecond both count.
        let member = format!("{now_ms}-{}", uuid::Uuid::new_v4().simple());
        let mut conn = self.conn.clone();

        let reply: Vec<i64> = self
            .script
            .key(&redis_key)
            .arg(now_ms)
            .arg(window.kind.size_ms())
            .arg(window.max)
            .arg(member)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        debug!(key = %redis_key, ?reply, "Redis window check");
        parse_reply(&reply)
    }
}
