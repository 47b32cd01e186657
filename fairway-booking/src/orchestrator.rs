use crate::changes::{diff_bookings, BookingChanges};
use crate::pricing::{apply_edit, PriceCalculation};
use crate::validation::{rate_window, temporal_violation, EditViolation};
use crate::{EditError, EditResult};
use chrono::{DateTime, Utc};
use fairway_audit::{AuditError, AuditLog};
use fairway_core::repository::{
    AddOnCatalog, BookingRepository, IdempotencyClaim, IdempotencyStore, InventoryStore, RateLimitStore,
};
use fairway_core::{
    format_cents, Actor, ActorRole, AuditAction, AuditEntry, Booking, BookingPaymentStatus, Cents, Clock,
    CustomerInfo, NewAuditEntry,
};
use fairway_payment::PaymentManager;
use fairway_policy::PolicyEngine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Everything the orchestrator talks to
#[derive(Clone)]
pub struct BookingServices {
    pub bookings: Arc<dyn BookingRepository>,
    pub inventory: Arc<dyn InventoryStore>,
    pub catalog: Arc<dyn AddOnCatalog>,
    pub rate_limiter: Arc<dyn RateLimitStore>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub policy: Arc<PolicyEngine>,
    pub payments: Arc<PaymentManager>,
    pub audit: Arc<AuditLog>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditOutcome {
    pub booking: Booking,
    pub pricing: PriceCalculation,
    pub charge_intent_id: Option<String>,
    pub refund_ids: Vec<String>,
    pub audit_entry_id: Option<Uuid>,
    /// Set when the response was replayed from an earlier identical request
    #[serde(default)]
    pub replayed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub booking: Booking,
    pub transfer_fee: Cents,
    pub fee_intent_id: Option<String>,
    pub audit_entry_id: Uuid,
}

/// Charges and inventory moves made during a commit, so they can be undone
#[derive(Debug, Default)]
struct Compensation {
    charge: Option<(String, Cents)>,
    reserved: Vec<(DateTime<Utc>, u32)>,
    released: Vec<(DateTime<Utc>, u32)>,
}

type LockMap = Arc<std::sync::Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>;

/// Held while a booking is being changed. Dropping it forgets the booking's
/// mutex once no other request holds or waits on it.
pub(crate) struct BookingLock {
    booking_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockMap,
}

impl Drop for BookingLock {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.booking_id)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            locks.remove(&self.booking_id);
        }
    }
}

/// Customers may only act on their own bookings
pub(crate) fn ensure_owner(booking: &Booking, actor: &Actor) -> EditResult<()> {
    if actor.role == ActorRole::Customer && actor.id != booking.customer_info.customer_id {
        return Err(EditError::Forbidden(format!(
            "booking {} belongs to another customer",
            booking.id
        )));
    }
    Ok(())
}

/// Coordinates validation, pricing, payment, inventory and audit for
/// changes to an existing booking.
pub struct BookingOrchestrator {
    pub(crate) bookings: Arc<dyn BookingRepository>,
    pub(crate) inventory: Arc<dyn InventoryStore>,
    pub(crate) catalog: Arc<dyn AddOnCatalog>,
    pub(crate) rate_limiter: Arc<dyn RateLimitStore>,
    pub(crate) idempotency: Arc<dyn IdempotencyStore>,
    pub(crate) policy: Arc<PolicyEngine>,
    pub(crate) payments: Arc<PaymentManager>,
    pub(crate) audit: Arc<AuditLog>,
    pub(crate) clock: Arc<dyn Clock>,
    locks: LockMap,
}

impl BookingOrchestrator {
    pub fn new(services: BookingServices) -> Self {
        Self {
            bookings: services.bookings,
            inventory: services.inventory,
            catalog: services.catalog,
            rate_limiter: services.rate_limiter,
            idempotency: services.idempotency,
            policy: services.policy,
            payments: services.payments,
            audit: services.audit,
            clock: services.clock,
            locks: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }

    pub async fn get_booking(&self, booking_id: Uuid, actor: &Actor) -> EditResult<Booking> {
        let booking = self.load_booking(booking_id).await?;
        ensure_owner(&booking, actor)?;
        Ok(booking)
    }

    /// Bookings with a change in progress or waiting
    pub fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub(crate) async fn load_booking(&self, booking_id: Uuid) -> EditResult<Booking> {
        self.bookings
            .get_booking(booking_id)
            .await?
            .ok_or(EditError::NotFound(booking_id))
    }

    /// Serializes commits against one booking
    pub(crate) async fn lock_booking(&self, booking_id: Uuid) -> BookingLock {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(booking_id).or_default())
        };
        BookingLock {
            booking_id,
            guard: Some(mutex.lock_owned().await),
            locks: Arc::clone(&self.locks),
        }
    }

    /// How long to wait for a refund to leave `pending`
    pub(crate) fn settle_timeout(&self) -> std::time::Duration {
        let policies = self.payments.policies();
        let attempts = u64::from(policies.gateway_max_retries) + 1;
        std::time::Duration::from_millis(
            policies.gateway_timeout_ms.saturating_mul(attempts)
                + policies.gateway_retry_backoff_ms.saturating_mul(attempts)
                + 1000,
        )
    }

    /// Run `op` at most once per key. A completed key replays its stored
    /// response. The op returns its result plus an optional fault that
    /// happened after the change was committed; such faults are reported to
    /// the caller but the key still completes so a retry replays the result.
    pub(crate) async fn run_idempotent<T, F, Fut>(
        &self,
        key: &str,
        fingerprint: String,
        op: F,
    ) -> EditResult<(T, bool)>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = EditResult<(T, Option<String>)>>,
    {
        if key.trim().is_empty() {
            return Err(EditError::Validation("an idempotency key is required".to_string()));
        }

        match self.idempotency.claim(key, &fingerprint).await? {
            IdempotencyClaim::Acquired => {}
            IdempotencyClaim::Completed(response) => {
                info!("Replaying idempotent response for key {}", key);
                return Ok((serde_json::from_value(response)?, true));
            }
            IdempotencyClaim::InFlight => {
                return Err(EditError::IdempotencyConflict(format!(
                    "a request with key {} is still in progress",
                    key
                )))
            }
            IdempotencyClaim::Mismatch => {
                return Err(EditError::IdempotencyConflict(format!(
                    "key {} was already used for a different request",
                    key
                )))
            }
        }

        match op().await {
            Ok((value, fault)) => {
                let stored = serde_json::to_value(&value)?;
                if let Err(e) = self.idempotency.complete(key, stored).await {
                    error!("Failed to record idempotent response for {}: {}", key, e);
                }
                match fault {
                    Some(fault) => Err(EditError::System(fault)),
                    None => Ok((value, false)),
                }
            }
            Err(err) => {
                if let Err(e) = self.idempotency.release(key).await {
                    error!("Failed to release idempotency key {}: {}", key, e);
                }
                Err(err)
            }
        }
    }

    /// Append an audit entry after the change it describes is committed.
    /// A failure here cannot undo the change, so it comes back as a fault message.
    pub(crate) async fn audit_committed(&self, entry: NewAuditEntry) -> Result<AuditEntry, String> {
        let booking_id = entry.booking_id;
        self.audit.log_action(entry).await.map_err(|e| {
            error!("Booking {:?} committed but audit write failed: {}", booking_id, e);
            audit_fault(booking_id, &e)
        })
    }

    // ==========================================
    // Edits
    // ==========================================

    /// Commit an edit. Retrying with the same key and input never repeats
    /// the charge, refund or audit entry.
    pub async fn execute_edit(
        &self,
        booking_id: Uuid,
        changes: &BookingChanges,
        actor: &Actor,
        idempotency_key: &str,
    ) -> EditResult<EditOutcome> {
        let fingerprint = serde_json::to_string(&(booking_id, changes, &actor.id))?;
        let (mut outcome, replayed) = self
            .run_idempotent(idempotency_key, fingerprint, || self.commit_edit(booking_id, changes, actor))
            .await?;
        outcome.replayed = replayed;
        Ok(outcome)
    }

    async fn commit_edit(
        &self,
        booking_id: Uuid,
        changes: &BookingChanges,
        actor: &Actor,
    ) -> EditResult<(EditOutcome, Option<String>)> {
        let _guard = self.lock_booking(booking_id).await;

        // State may have moved since the preview
        let booking = self.load_booking(booking_id).await?;
        ensure_owner(&booking, actor)?;
        let rules = self.policy.course_rules(booking.course_id).await?;
        let validation = self.validate_with_rules(&booking, changes, actor, &rules).await?;
        if !validation.is_valid() {
            return Err(EditError::PolicyViolation(validation.violations));
        }

        let priced = self.price_edit(&booking, changes, &rules).await?;
        let pricing = priced.calculation.clone();
        let mut proposed = apply_edit(&booking, changes, &priced, self.clock.now())?;

        let action = if proposed.tee_time != booking.tee_time {
            AuditAction::BookingRescheduled
        } else {
            AuditAction::BookingModified
        };
        let mut entry = NewAuditEntry::new(Some(booking.id), action, actor.clone())
            .with_metadata("price_calculation", &pricing)
            .with_metadata("warnings", &validation.warnings);
        AuditLog::validate(&entry)?;

        let now = self.clock.now();
        let limit = self
            .rate_limiter
            .try_acquire(&actor.id, rules.max_edits_per_window, rate_window(&rules), now)
            .await?;
        if !limit.allowed {
            return Err(EditError::PolicyViolation(vec![EditViolation::RateLimited {
                limit: limit.limit,
                retry_after_secs: limit.retry_after(now).num_seconds(),
            }]));
        }

        let mut compensation = Compensation::default();

        // Charge
        let mut charge_intent_id = None;
        if pricing.final_amount > 0 {
            let intent = self
                .payments
                .charge(booking.id, pricing.final_amount, "booking edit")
                .await
                .map_err(EditError::PaymentFailure)?;
            compensation.charge = Some((intent.id.clone(), pricing.final_amount));
            charge_intent_id = Some(intent.id);
        }

        // Inventory
        match self.reconcile_inventory(&booking, &proposed, &mut compensation).await {
            Ok(true) => {}
            Ok(false) => {
                let payment_reversed = self.unwind(&booking, actor, compensation, "edit rolled back").await;
                warn!("Edit of booking {} rolled back: slot unavailable", booking.id);
                return Err(EditError::InventoryConflict { payment_reversed });
            }
            Err(e) => {
                self.unwind(&booking, actor, compensation, "edit rolled back").await;
                return Err(e);
            }
        }

        // Refund
        let mut refund_ids = Vec::new();
        let refund_due = -pricing.final_amount;
        if refund_due > 0 && refund_due < self.payments.policies().min_refund_amount {
            info!(
                "Refund of {} for booking {} is below the minimum and was waived",
                format_cents(refund_due),
                booking.id
            );
            entry = entry.with_metadata("refund_waived", refund_due);
        } else if refund_due > 0 {
            let refunds = self
                .payments
                .refund_booking(
                    booking.id,
                    &booking.payment_intent_id,
                    refund_due,
                    "booking edit",
                    self.settle_timeout(),
                )
                .await;
            match refunds {
                Ok(refunds) => {
                    refund_ids = refunds.into_iter().map(|r| r.id).collect();
                    proposed.payment_status = BookingPaymentStatus::PartiallyRefunded;
                }
                Err(e) => {
                    self.unwind(&booking, actor, compensation, "edit rolled back").await;
                    return Err(EditError::PaymentFailure(e));
                }
            }
        }

        if let Err(e) = self.bookings.save_booking(&proposed).await {
            if !refund_ids.is_empty() {
                error!(
                    "Refunds {} issued for booking {} but the edit was not saved",
                    refund_ids.join(", "),
                    booking.id
                );
            }
            self.unwind(&booking, actor, compensation, "edit rolled back").await;
            return Err(e.into());
        }

        let entry = entry
            .with_changes(diff_bookings(&booking, &proposed))
            .with_metadata("charge_intent_id", &charge_intent_id)
            .with_metadata("refund_ids", &refund_ids);
        let (audit_entry_id, fault) = match self.audit_committed(entry).await {
            Ok(logged) => (Some(logged.id), None),
            Err(fault) => (None, Some(fault)),
        };

        info!(
            "Booking {} edited by {} ({})",
            booking.id,
            actor.id,
            format_cents(pricing.final_amount)
        );

        Ok((
            EditOutcome {
                booking: proposed,
                pricing,
                charge_intent_id,
                refund_ids,
                audit_entry_id,
                replayed: false,
            },
            fault,
        ))
    }

    /// Move the reservation to match `after`. Returns false when the new
    /// reservation was refused.
    async fn reconcile_inventory(
        &self,
        before: &Booking,
        after: &Booking,
        compensation: &mut Compensation,
    ) -> EditResult<bool> {
        let course_id = before.course_id;

        if after.tee_time != before.tee_time {
            self.inventory
                .release_slot(course_id, before.tee_time, before.number_of_players)
                .await?;
            compensation.released.push((before.tee_time, before.number_of_players));

            if !self
                .inventory
                .reserve_slot(course_id, after.tee_time, after.number_of_players)
                .await?
            {
                return Ok(false);
            }
            compensation.reserved.push((after.tee_time, after.number_of_players));
        } else if after.number_of_players > before.number_of_players {
            let added = after.number_of_players - before.number_of_players;
            if !self.inventory.reserve_slot(course_id, before.tee_time, added).await? {
                return Ok(false);
            }
            compensation.reserved.push((before.tee_time, added));
        } else if after.number_of_players < before.number_of_players {
            let removed = before.number_of_players - after.number_of_players;
            self.inventory.release_slot(course_id, before.tee_time, removed).await?;
            compensation.released.push((before.tee_time, removed));
        }

        Ok(true)
    }

    /// Undo inventory moves and reverse any charge. Returns whether a charge
    /// was made and successfully refunded; the reversal is audited.
    async fn unwind(&self, booking: &Booking, actor: &Actor, compensation: Compensation, reason: &str) -> bool {
        let course_id = booking.course_id;

        for (tee_time, players) in &compensation.reserved {
            if let Err(e) = self.inventory.release_slot(course_id, *tee_time, *players).await {
                error!("Compensation: failed to release {} at {}: {}", players, tee_time, e);
            }
        }
        for (tee_time, players) in &compensation.released {
            match self.inventory.reserve_slot(course_id, *tee_time, *players).await {
                Ok(true) => warn!("Compensation: restored {} players at {} for {}", players, tee_time, booking.id),
                Ok(false) => error!("Compensation: could not restore slot {} for booking {}", tee_time, booking.id),
                Err(e) => error!("Compensation: restoring slot for booking {} failed: {}", booking.id, e),
            }
        }

        let Some((intent_id, amount)) = compensation.charge else {
            return false;
        };
        match self
            .payments
            .refund_and_wait(&intent_id, amount, reason, self.settle_timeout())
            .await
        {
            Ok(refund) => {
                warn!("Compensation: refunded charge {} via {}", intent_id, refund.id);
                let entry = NewAuditEntry::new(Some(booking.id), AuditAction::RefundIssued, actor.clone())
                    .with_reason(Some(reason.to_string()))
                    .with_metadata("refund_id", &refund.id)
                    .with_metadata("amount", amount)
                    .with_metadata("payment_intent_id", &intent_id);
                if let Err(e) = self.audit.log_action(entry).await {
                    error!("Refund {} for booking {} was not audited: {}", refund.id, booking.id, e);
                }
                true
            }
            Err(e) => {
                error!("Compensation: charge {} for booking {} not reversed: {}", intent_id, booking.id, e);
                false
            }
        }
    }

    // ==========================================
    // Transfers
    // ==========================================

    /// Hand the booking to a new owner for the course's flat transfer fee
    pub async fn transfer_booking(
        &self,
        booking_id: Uuid,
        new_owner: CustomerInfo,
        actor: &Actor,
    ) -> EditResult<TransferOutcome> {
        let _guard = self.lock_booking(booking_id).await;
        let booking = self.load_booking(booking_id).await?;
        ensure_owner(&booking, actor)?;
        let rules = self.policy.course_rules(booking.course_id).await?;
        let now = self.clock.now();

        let mut violations = Vec::new();
        if !booking.status().is_editable() {
            violations.push(EditViolation::NotEditable {
                status: booking.status(),
            });
        }
        if let Some(violation) = temporal_violation(booking.tee_time, rules.lock_window_hours, now) {
            violations.push(violation);
        }
        if booking.payment_status == BookingPaymentStatus::Disputed {
            violations.push(EditViolation::PaymentDisputed);
        }
        if new_owner == booking.customer_info {
            violations.push(EditViolation::NoChanges);
        }
        if !violations.is_empty() {
            return Err(EditError::PolicyViolation(violations));
        }

        let entry = NewAuditEntry::new(Some(booking.id), AuditAction::BookingTransferred, actor.clone())
            .with_metadata("transfer_fee", rules.transfer_fee);
        AuditLog::validate(&entry)?;

        let mut fee_intent_id = None;
        if rules.transfer_fee > 0 {
            let intent = self
                .payments
                .charge_fee(booking.id, rules.transfer_fee, "booking transfer fee")
                .await
                .map_err(EditError::PaymentFailure)?;
            fee_intent_id = Some(intent.id);
        }

        let mut transferred = booking.clone();
        transferred.customer_info = new_owner;
        transferred.updated_at = now;

        if let Err(e) = self.bookings.save_booking(&transferred).await {
            if let Some(intent_id) = &fee_intent_id {
                let compensation = Compensation {
                    charge: Some((intent_id.clone(), rules.transfer_fee)),
                    ..Compensation::default()
                };
                self.unwind(&booking, actor, compensation, "transfer rolled back").await;
            }
            return Err(e.into());
        }

        let entry = entry
            .with_changes(diff_bookings(&booking, &transferred))
            .with_metadata("fee_intent_id", &fee_intent_id);
        let audit_entry_id = self.audit_committed(entry).await.map_err(EditError::System)?.id;

        info!(
            "Booking {} transferred from {} to {}",
            booking.id, booking.customer_info.customer_id, transferred.customer_info.customer_id
        );

        Ok(TransferOutcome {
            booking: transferred,
            transfer_fee: rules.transfer_fee,
            fee_intent_id,
            audit_entry_id,
        })
    }
}

fn audit_fault(booking_id: Option<Uuid>, err: &AuditError) -> String {
    match booking_id {
        Some(id) => format!("booking {} was updated but its audit entry failed: {}", id, err),
        None => format!("change committed but its audit entry failed: {}", err),
    }
}
