//! In-process repositories. They back tests and single-node deployments and
//! honor the same single-record contract a database adapter would.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use fairway_core::payment::{Dispute, PaymentIntent, Refund};
use fairway_core::repository::{
    AuditRepository, BookingRepository, CourseRulesRepository, IdempotencyClaim, IdempotencyStore,
    PaymentRepository,
};
use fairway_core::{
    AuditEntry, AuditFilter, Booking, Clock, CourseEditRules, StoreError, StoreResult, SystemClock,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryBookingRepository {
    bookings: RwLock<HashMap<Uuid, Booking>>,
}

impl InMemoryBookingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        Ok(self.bookings.read().await.get(&id).cloned())
    }

    async fn save_booking(&self, booking: &Booking) -> StoreResult<()> {
        self.bookings.write().await.insert(booking.id, booking.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryPaymentRepository {
    intents: RwLock<HashMap<String, PaymentIntent>>,
    refunds: RwLock<HashMap<String, Refund>>,
    disputes: RwLock<HashMap<String, Dispute>>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn intent_count(&self) -> usize {
        self.intents.read().await.len()
    }

    pub async fn refund_count(&self) -> usize {
        self.refunds.read().await.len()
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn insert_intent(&self, intent: &PaymentIntent) -> StoreResult<()> {
        let mut intents = self.intents.write().await;
        if intents.contains_key(&intent.id) {
            return Err(StoreError::Conflict(format!("payment intent {} exists", intent.id)));
        }
        intents.insert(intent.id.clone(), intent.clone());
        Ok(())
    }

    async fn get_intent(&self, id: &str) -> StoreResult<Option<PaymentIntent>> {
        Ok(self.intents.read().await.get(id).cloned())
    }

    async fn update_intent(&self, intent: &PaymentIntent) -> StoreResult<()> {
        let mut intents = self.intents.write().await;
        let slot = intents
            .get_mut(&intent.id)
            .ok_or_else(|| StoreError::NotFound(format!("payment intent {}", intent.id)))?;
        *slot = intent.clone();
        Ok(())
    }

    async fn intents_for_booking(&self, booking_id: Uuid) -> StoreResult<Vec<PaymentIntent>> {
        let mut intents: Vec<PaymentIntent> = self
            .intents
            .read()
            .await
            .values()
            .filter(|i| i.booking_id == booking_id)
            .cloned()
            .collect();
        intents.sort_by_key(|i| i.created_at);
        Ok(intents)
    }

    async fn insert_refund(&self, refund: &Refund) -> StoreResult<()> {
        let mut refunds = self.refunds.write().await;
        if refunds.contains_key(&refund.id) {
            return Err(StoreError::Conflict(format!("refund {} exists", refund.id)));
        }
        refunds.insert(refund.id.clone(), refund.clone());
        Ok(())
    }

    async fn get_refund(&self, id: &str) -> StoreResult<Option<Refund>> {
        Ok(self.refunds.read().await.get(id).cloned())
    }

    async fn update_refund(&self, refund: &Refund) -> StoreResult<()> {
        let mut refunds = self.refunds.write().await;
        let slot = refunds
            .get_mut(&refund.id)
            .ok_or_else(|| StoreError::NotFound(format!("refund {}", refund.id)))?;
        *slot = refund.clone();
        Ok(())
    }

    async fn refunds_for_intent(&self, intent_id: &str) -> StoreResult<Vec<Refund>> {
        let mut refunds: Vec<Refund> = self
            .refunds
            .read()
            .await
            .values()
            .filter(|r| r.payment_intent_id == intent_id)
            .cloned()
            .collect();
        refunds.sort_by_key(|r| r.created_at);
        Ok(refunds)
    }

    async fn insert_dispute(&self, dispute: &Dispute) -> StoreResult<()> {
        self.disputes.write().await.insert(dispute.id.clone(), dispute.clone());
        Ok(())
    }

    async fn get_dispute(&self, id: &str) -> StoreResult<Option<Dispute>> {
        Ok(self.disputes.read().await.get(id).cloned())
    }

    async fn update_dispute(&self, dispute: &Dispute) -> StoreResult<()> {
        let mut disputes = self.disputes.write().await;
        let slot = disputes
            .get_mut(&dispute.id)
            .ok_or_else(|| StoreError::NotFound(format!("dispute {}", dispute.id)))?;
        *slot = dispute.clone();
        Ok(())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let mut removed = 0;

        let mut intents = self.intents.write().await;
        let before = intents.len();
        intents.retain(|_, i| i.created_at >= cutoff);
        removed += before - intents.len();

        let mut refunds = self.refunds.write().await;
        let before = refunds.len();
        refunds.retain(|_, r| r.created_at >= cutoff);
        removed += before - refunds.len();

        let mut disputes = self.disputes.write().await;
        let before = disputes.len();
        disputes.retain(|_, d| d.created_at >= cutoff);
        removed += before - disputes.len();

        Ok(removed)
    }
}

#[derive(Default)]
pub struct InMemoryAuditRepository {
    entries: RwLock<Vec<AuditEntry>>,
}

impl InMemoryAuditRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn append(&self, entry: &AuditEntry) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        if entries.iter().any(|e| e.id == entry.id) {
            return Err(StoreError::Conflict(format!("audit entry {} exists", entry.id)));
        }
        entries.push(entry.clone());
        Ok(())
    }

    async fn entries_for_booking(&self, booking_id: Uuid) -> StoreResult<Vec<AuditEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.booking_id == Some(booking_id))
            .cloned()
            .collect())
    }

    async fn query(&self, filter: &AuditFilter) -> StoreResult<Vec<AuditEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.timestamp >= cutoff);
        Ok(before - entries.len())
    }
}

#[derive(Default)]
pub struct InMemoryCourseRulesRepository {
    rules: RwLock<HashMap<Uuid, CourseEditRules>>,
}

impl InMemoryCourseRulesRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CourseRulesRepository for InMemoryCourseRulesRepository {
    async fn rules_for(&self, course_id: Uuid) -> StoreResult<Option<CourseEditRules>> {
        Ok(self.rules.read().await.get(&course_id).cloned())
    }

    async fn save_rules(&self, course_id: Uuid, rules: &CourseEditRules) -> StoreResult<()> {
        self.rules.write().await.insert(course_id, rules.clone());
        Ok(())
    }
}

struct IdempotencyRecord {
    fingerprint: String,
    response: Option<Value>,
    claimed_at: DateTime<Utc>,
}

/// Keys are forgotten `ttl` after they were first claimed, whether or not
/// the request completed.
pub struct InMemoryIdempotencyStore {
    records: Mutex<HashMap<String, IdempotencyRecord>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl InMemoryIdempotencyStore {
    pub const DEFAULT_TTL_HOURS: i64 = 24;

    pub fn new() -> Self {
        Self::with_ttl(Duration::hours(Self::DEFAULT_TTL_HOURS), Arc::new(SystemClock))
    }

    pub fn with_ttl(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    /// Keys currently held, expired ones included until the next claim
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn claim(&self, key: &str, fingerprint: &str) -> StoreResult<IdempotencyClaim> {
        let now = self.clock.now();
        let mut records = self.records.lock().await;
        let ttl = self.ttl;
        records.retain(|_, r| r.claimed_at + ttl > now);

        match records.get(key) {
            Some(record) if record.fingerprint != fingerprint => Ok(IdempotencyClaim::Mismatch),
            Some(IdempotencyRecord { response: Some(response), .. }) => {
                Ok(IdempotencyClaim::Completed(response.clone()))
            }
            Some(_) => Ok(IdempotencyClaim::InFlight),
            None => {
                records.insert(
                    key.to_string(),
                    IdempotencyRecord {
                        fingerprint: fingerprint.to_string(),
                        response: None,
                        claimed_at: now,
                    },
                );
                Ok(IdempotencyClaim::Acquired)
            }
        }
    }

    async fn complete(&self, key: &str, response: Value) -> StoreResult<()> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(format!("idempotency key {}", key)))?;
        record.response = Some(response);
        Ok(())
    }

    async fn release(&self, key: &str) -> StoreResult<()> {
        let mut records = self.records.lock().await;
        if matches!(records.get(key), Some(r) if r.response.is_none()) {
            records.remove(key);
        }
        Ok(())
    }
}
