use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use fairway_core::repository::{RateLimitStatus, RateLimitStore};
use fairway_core::{StoreError, StoreResult};
use tracing::info;

// Check-and-increment in one round trip so concurrent requests from the
// same actor cannot both slip under the limit.
const ACQUIRE_SCRIPT: &str = r#"
    local count = tonumber(redis.call("GET", KEYS[1]) or "0")
    local ttl = redis.call("PTTL", KEYS[1])
    if count >= tonumber(ARGV[1]) then
        return {0, count, ttl}
    end
    count = redis.call("INCR", KEYS[1])
    if count == 1 or ttl < 0 then
        redis.call("PEXPIRE", KEYS[1], ARGV[2])
        ttl = tonumber(ARGV[2])
    end
    return {1, count, ttl}
"#;

const PEEK_SCRIPT: &str = r#"
    local count = tonumber(redis.call("GET", KEYS[1]) or "0")
    local ttl = redis.call("PTTL", KEYS[1])
    return {count, ttl}
"#;

/// Shared edit counters for multi-node deployments
#[derive(Clone)]
pub struct RedisRateLimiter {
    client: redis::Client,
}

impl RedisRateLimiter {
    pub fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        info!("Rate limiter backed by Redis");
        Ok(Self { client })
    }

    fn key(actor_id: &str) -> String {
        format!("ratelimit:edits:{}", actor_id)
    }

    fn reset_at(now: DateTime<Utc>, ttl_ms: i64, window: Duration) -> DateTime<Utc> {
        if ttl_ms > 0 {
            now + Duration::milliseconds(ttl_ms)
        } else {
            now + window
        }
    }
}

fn backend(err: redis::RedisError) -> StoreError {
    StoreError::Backend(err.to_string())
}

#[async_trait]
impl RateLimitStore for RedisRateLimiter {
    async fn peek(
        &self,
        actor_id: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<RateLimitStatus> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(backend)?;
        let (count, ttl): (i64, i64) = redis::Script::new(PEEK_SCRIPT)
            .key(Self::key(actor_id))
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;

        let count = u32::try_from(count).unwrap_or(u32::MAX);
        Ok(RateLimitStatus {
            allowed: count < limit,
            count,
            limit,
            reset_at: Self::reset_at(now, ttl, window),
        })
    }

    async fn try_acquire(
        &self,
        actor_id: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<RateLimitStatus> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(backend)?;
        let (allowed, count, ttl): (i64, i64, i64) = redis::Script::new(ACQUIRE_SCRIPT)
            .key(Self::key(actor_id))
            .arg(limit)
            .arg(window.num_milliseconds())
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;

        Ok(RateLimitStatus {
            allowed: allowed == 1,
            count: u32::try_from(count).unwrap_or(u32::MAX),
            limit,
            reset_at: Self::reset_at(now, ttl, window),
        })
    }
}
