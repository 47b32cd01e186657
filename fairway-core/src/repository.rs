use crate::audit::{AuditEntry, AuditFilter};
use crate::booking::Booking;
use crate::payment::{Dispute, PaymentIntent, Refund};
use crate::rules::CourseEditRules;
use crate::{Cents, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Single-record access to bookings. No multi-record transactions.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>>;

    /// Insert or overwrite the booking
    async fn save_booking(&self, booking: &Booking) -> StoreResult<()>;
}

/// Storage for payment intents and their dependent refunds and disputes
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert_intent(&self, intent: &PaymentIntent) -> StoreResult<()>;

    async fn get_intent(&self, id: &str) -> StoreResult<Option<PaymentIntent>>;

    async fn update_intent(&self, intent: &PaymentIntent) -> StoreResult<()>;

    /// Every intent raised for the booking, oldest first
    async fn intents_for_booking(&self, booking_id: Uuid) -> StoreResult<Vec<PaymentIntent>>;

    async fn insert_refund(&self, refund: &Refund) -> StoreResult<()>;

    async fn get_refund(&self, id: &str) -> StoreResult<Option<Refund>>;

    async fn update_refund(&self, refund: &Refund) -> StoreResult<()>;

    async fn refunds_for_intent(&self, intent_id: &str) -> StoreResult<Vec<Refund>>;

    async fn insert_dispute(&self, dispute: &Dispute) -> StoreResult<()>;

    async fn get_dispute(&self, id: &str) -> StoreResult<Option<Dispute>>;

    async fn update_dispute(&self, dispute: &Dispute) -> StoreResult<()>;

    /// Drop records created before `cutoff`. Returns how many were removed.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;
}

/// Append-only audit storage
#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> StoreResult<()>;

    async fn entries_for_booking(&self, booking_id: Uuid) -> StoreResult<Vec<AuditEntry>>;

    /// All entries matching `filter`, in any order. `filter.limit` is ignored here.
    async fn query(&self, filter: &AuditFilter) -> StoreResult<Vec<AuditEntry>>;

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;
}

/// Per-course edit and refund configuration
#[async_trait]
pub trait CourseRulesRepository: Send + Sync {
    async fn rules_for(&self, course_id: Uuid) -> StoreResult<Option<CourseEditRules>>;

    async fn save_rules(&self, course_id: Uuid, rules: &CourseEditRules) -> StoreResult<()>;
}

/// Counter state for one actor's rolling window
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub count: u32,
    pub limit: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitStatus {
    /// How long until the window resets; zero when already allowed.
    pub fn retry_after(&self, now: DateTime<Utc>) -> Duration {
        if self.allowed || self.reset_at <= now {
            Duration::zero()
        } else {
            self.reset_at - now
        }
    }
}

/// Per-actor edit counters. `try_acquire` must check-and-increment atomically.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Read the counter without consuming a unit
    async fn peek(
        &self,
        actor_id: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<RateLimitStatus>;

    /// Consume one unit if the actor is under the limit
    async fn try_acquire(
        &self,
        actor_id: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<RateLimitStatus>;
}

/// Result of claiming an idempotency key
#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyClaim {
    /// First time this key is seen; the caller owns execution
    Acquired,
    /// Another request with this key is still executing
    InFlight,
    /// Already executed with the same input; replay the stored response
    Completed(Value),
    /// The key was used before with different input
    Mismatch,
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Claim `key` for a request whose input hashes to `fingerprint`
    async fn claim(&self, key: &str, fingerprint: &str) -> StoreResult<IdempotencyClaim>;

    /// Record the response so retries replay it
    async fn complete(&self, key: &str, response: Value) -> StoreResult<()>;

    /// Release a claim after a failure so the request can be retried
    async fn release(&self, key: &str) -> StoreResult<()>;
}

/// Tee-sheet capacity, owned by an external service
#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn available_capacity(&self, course_id: Uuid, tee_time: DateTime<Utc>) -> StoreResult<u32>;

    /// Returns false when the slot cannot hold `players` more golfers
    async fn reserve_slot(&self, course_id: Uuid, tee_time: DateTime<Utc>, players: u32) -> StoreResult<bool>;

    /// Safe to call on stale or already-released reservations
    async fn release_slot(&self, course_id: Uuid, tee_time: DateTime<Utc>, players: u32) -> StoreResult<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogAddOn {
    pub id: String,
    pub name: String,
    pub price: Cents,
}

/// Read-only view of a course's add-on catalog
#[async_trait]
pub trait AddOnCatalog: Send + Sync {
    async fn add_on(&self, course_id: Uuid, add_on_id: &str) -> StoreResult<Option<CatalogAddOn>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after() {
        let now = Utc::now();
        let status = RateLimitStatus {
            allowed: false,
            count: 5,
            limit: 5,
            reset_at: now + Duration::minutes(12),
        };
        assert_eq!(status.retry_after(now), Duration::minutes(12));

        let allowed = RateLimitStatus { allowed: true, ..status };
        assert_eq!(allowed.retry_after(now), Duration::zero());
    }
}
