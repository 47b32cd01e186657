use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use fairway_core::repository::{RateLimitStatus, RateLimitStore};
use fairway_core::StoreResult;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// Fixed window per actor, opened by the actor's first edit. A single mutex
/// makes check-and-increment atomic across concurrent requests. Expired
/// windows are dropped on every acquire.
#[derive(Default)]
pub struct InMemoryRateLimiter {
    windows: Mutex<HashMap<String, Window>>,
}

impl InMemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Actors with an open window
    pub async fn tracked_actors(&self) -> usize {
        self.windows.lock().await.len()
    }

    fn current(windows: &HashMap<String, Window>, actor_id: &str, now: DateTime<Utc>) -> Option<Window> {
        windows.get(actor_id).copied().filter(|w| w.reset_at > now)
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimiter {
    async fn peek(
        &self,
        actor_id: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<RateLimitStatus> {
        let windows = self.windows.lock().await;
        let status = match Self::current(&windows, actor_id, now) {
            Some(w) => RateLimitStatus {
                allowed: w.count < limit,
                count: w.count,
                limit,
                reset_at: w.reset_at,
            },
            None => RateLimitStatus {
                allowed: limit > 0,
                count: 0,
                limit,
                reset_at: now + window,
            },
        };
        Ok(status)
    }

    async fn try_acquire(
        &self,
        actor_id: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<RateLimitStatus> {
        let mut windows = self.windows.lock().await;
        windows.retain(|_, w| w.reset_at > now);
        let mut current = Self::current(&windows, actor_id, now).unwrap_or(Window {
            count: 0,
            reset_at: now + window,
        });

        if current.count >= limit {
            return Ok(RateLimitStatus {
                allowed: false,
                count: current.count,
                limit,
                reset_at: current.reset_at,
            });
        }

        current.count += 1;
        windows.insert(actor_id.to_string(), current);
        Ok(RateLimitStatus {
            allowed: true,
            count: current.count,
            limit,
            reset_at: current.reset_at,
        })
    }
}
