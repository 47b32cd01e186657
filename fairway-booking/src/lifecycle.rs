use crate::changes::diff_bookings;
use crate::orchestrator::{ensure_owner, BookingOrchestrator};
use crate::validation::{temporal_violation, EditViolation};
use crate::{EditError, EditResult};
use fairway_audit::AuditLog;
use fairway_core::{
    format_cents, Actor, ActorRole, AuditAction, Booking, BookingPaymentStatus, BookingStatus, NewAuditEntry,
};
use fairway_policy::{AdminOverride, CancellationReason, CancellationRequest, ManualReviewReason, RefundCalculation};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancelBookingRequest {
    pub reason: CancellationReason,
    /// Free-text explanation recorded on the audit entry
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub admin_override: Option<AdminOverride>,
}

impl CancelBookingRequest {
    fn audit_reason(&self) -> String {
        match self.note.as_deref().map(str::trim) {
            Some(note) if !note.is_empty() => note.to_string(),
            _ => self.reason.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CancellationOutcome {
    Canceled {
        booking: Booking,
        calculation: RefundCalculation,
        refund_ids: Vec<String>,
        audit_entry_id: Option<Uuid>,
    },
    /// Nothing moved; a staff member has to decide
    ManualReviewRequired {
        booking_id: Uuid,
        calculation: RefundCalculation,
        review_reasons: Vec<ManualReviewReason>,
        audit_entry_id: Uuid,
    },
}

impl BookingOrchestrator {
    // ==========================================
    // Cancellation
    // ==========================================

    pub async fn cancel_booking(
        &self,
        booking_id: Uuid,
        request: &CancelBookingRequest,
        actor: &Actor,
        idempotency_key: &str,
    ) -> EditResult<CancellationOutcome> {
        let fingerprint = serde_json::to_string(&("cancel", booking_id, request, &actor.id))?;
        let (outcome, _) = self
            .run_idempotent(idempotency_key, fingerprint, || self.commit_cancel(booking_id, request, actor))
            .await?;
        Ok(outcome)
    }

    async fn commit_cancel(
        &self,
        booking_id: Uuid,
        request: &CancelBookingRequest,
        actor: &Actor,
    ) -> EditResult<(CancellationOutcome, Option<String>)> {
        let _guard = self.lock_booking(booking_id).await;
        let booking = self.load_booking(booking_id).await?;
        ensure_owner(&booking, actor)?;
        let rules = self.policy.course_rules(booking.course_id).await?;
        let now = self.clock.now();

        let target = if actor.role == ActorRole::Customer {
            BookingStatus::CanceledCustomer
        } else {
            BookingStatus::CanceledAdmin
        };

        let mut violations = Vec::new();
        if !booking.status().can_transition_to(target) {
            violations.push(EditViolation::NotCancelable {
                status: booking.status(),
            });
        }
        if actor.role == ActorRole::Customer {
            if let Some(violation) = temporal_violation(booking.tee_time, rules.cancellation_lock_hours, now) {
                violations.push(violation);
            }
        }
        if !violations.is_empty() {
            return Err(EditError::PolicyViolation(violations));
        }

        let decision = self
            .policy
            .process_cancellation(CancellationRequest {
                booking: &booking,
                reason: request.reason,
                actor,
                admin_override: request.admin_override.clone(),
            })
            .await?;

        if decision.requires_manual_review {
            let descriptions: Vec<String> = decision.review_reasons.iter().map(|r| r.describe()).collect();
            let entry = NewAuditEntry::new(Some(booking.id), AuditAction::ManualReviewRequested, actor.clone())
                .with_reason(Some(request.audit_reason()))
                .with_metadata("review_reasons", &descriptions)
                .with_metadata("refund_calculation", &decision.calculation)
                .with_metadata("cancellation_reason", request.reason.as_str());
            let logged = self.audit.log_action(entry).await?;

            return Ok((
                CancellationOutcome::ManualReviewRequired {
                    booking_id: booking.id,
                    calculation: decision.calculation,
                    review_reasons: decision.review_reasons,
                    audit_entry_id: logged.id,
                },
                None,
            ));
        }

        let calculation = decision.calculation;
        let mut entry = NewAuditEntry::new(Some(booking.id), AuditAction::BookingCanceled, actor.clone())
            .with_reason(Some(request.audit_reason()))
            .with_metadata("refund_calculation", &calculation)
            .with_metadata("cancellation_reason", request.reason.as_str())
            .with_metadata("override_applied", decision.override_applied);
        AuditLog::validate(&entry)?;

        let override_entry = match (&request.admin_override, decision.override_applied) {
            (Some(admin_override), true) => {
                let entry = NewAuditEntry::new(Some(booking.id), AuditAction::PolicyOverride, actor.clone())
                    .with_reason(admin_override.justification.clone())
                    .with_metadata("refund_percent", admin_override.refund_percent)
                    .with_metadata("net_refund", calculation.net_refund)
                    .with_metadata("cancellation_reason", request.reason.as_str());
                AuditLog::validate(&entry)?;
                Some(entry)
            }
            _ => None,
        };

        let mut canceled = booking.clone();
        canceled.transition_to(target, now)?;

        // Refund first; a refund that fails leaves the booking untouched
        let mut refund_ids = Vec::new();
        let net = calculation.net_refund;
        if net > 0 && net < self.payments.policies().min_refund_amount {
            info!(
                "Refund of {} for booking {} is below the minimum and was waived",
                format_cents(net),
                booking.id
            );
            entry = entry.with_metadata("refund_waived", net);
        } else if net > 0 {
            let refunds = self
                .payments
                .refund_booking(
                    booking.id,
                    &booking.payment_intent_id,
                    net,
                    request.reason.as_str(),
                    self.settle_timeout(),
                )
                .await
                .map_err(EditError::PaymentFailure)?;
            canceled.payment_status = if net >= booking.total_amount {
                BookingPaymentStatus::Refunded
            } else {
                BookingPaymentStatus::PartiallyRefunded
            };
            refund_ids = refunds.into_iter().map(|r| r.id).collect();
        }

        let course_id = booking.course_id;
        self.inventory
            .release_slot(course_id, booking.tee_time, booking.number_of_players)
            .await?;

        if let Err(e) = self.bookings.save_booking(&canceled).await {
            if !refund_ids.is_empty() {
                error!(
                    "Refunds {} issued for booking {} but the cancellation was not saved",
                    refund_ids.join(", "),
                    booking.id
                );
            }
            match self
                .inventory
                .reserve_slot(course_id, booking.tee_time, booking.number_of_players)
                .await
            {
                Ok(true) => warn!("Compensation: restored slot for booking {}", booking.id),
                _ => error!("Compensation: could not restore slot for booking {}", booking.id),
            }
            return Err(e.into());
        }

        let entry = entry
            .with_changes(diff_bookings(&booking, &canceled))
            .with_metadata("refund_ids", &refund_ids);
        let (audit_entry_id, mut fault) = match self.audit_committed(entry).await {
            Ok(logged) => (Some(logged.id), None),
            Err(fault) => (None, Some(fault)),
        };
        if let Some(override_entry) = override_entry {
            if let Err(override_fault) = self.audit_committed(override_entry).await {
                fault.get_or_insert(override_fault);
            }
        }

        info!(
            "Booking {} canceled by {} ({}, refund {})",
            booking.id,
            actor.id,
            request.reason.as_str(),
            format_cents(net)
        );

        Ok((
            CancellationOutcome::Canceled {
                booking: canceled,
                calculation,
                refund_ids,
                audit_entry_id,
            },
            fault,
        ))
    }

    // ==========================================
    // Administrative status changes
    // ==========================================

    /// Move a booking along the status table on behalf of staff
    pub async fn change_status(
        &self,
        booking_id: Uuid,
        new_status: BookingStatus,
        actor: &Actor,
        reason: Option<String>,
    ) -> EditResult<Booking> {
        if !actor.role.is_administrative() {
            return Err(EditError::Validation(format!(
                "role {} cannot change booking status",
                actor.role.as_str()
            )));
        }

        let _guard = self.lock_booking(booking_id).await;
        let booking = self.load_booking(booking_id).await?;
        let now = self.clock.now();

        let reason = reason.filter(|r| !r.trim().is_empty());
        let canceling = new_status.is_canceled();
        let action = if canceling {
            AuditAction::BookingCanceled
        } else {
            AuditAction::StatusChanged
        };

        let mut updated = booking.clone();
        updated.transition_to(new_status, now)?;
        match (booking.status(), new_status) {
            (_, BookingStatus::Disputed) => updated.payment_status = BookingPaymentStatus::Disputed,
            (BookingStatus::Disputed, BookingStatus::Completed) => {
                updated.payment_status = BookingPaymentStatus::Paid
            }
            _ => {}
        }

        let entry = NewAuditEntry::new(Some(booking.id), action, actor.clone())
            .with_reason(reason)
            .with_changes(diff_bookings(&booking, &updated));
        AuditLog::validate(&entry)?;

        if canceling {
            self.inventory
                .release_slot(booking.course_id, booking.tee_time, booking.number_of_players)
                .await?;
        }

        if let Err(e) = self.bookings.save_booking(&updated).await {
            if canceling {
                if let Err(restore) = self
                    .inventory
                    .reserve_slot(booking.course_id, booking.tee_time, booking.number_of_players)
                    .await
                {
                    error!("Compensation: restoring slot for booking {} failed: {}", booking.id, restore);
                }
            }
            return Err(e.into());
        }

        self.audit_committed(entry).await.map_err(EditError::System)?;

        info!(
            "Booking {} moved from {} to {} by {}",
            booking.id,
            booking.status(),
            new_status,
            actor.id
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_reason_falls_back_to_category() {
        let mut request = CancelBookingRequest {
            reason: CancellationReason::Weather,
            note: Some("   ".to_string()),
            admin_override: None,
        };
        assert_eq!(request.audit_reason(), "weather");

        request.note = Some("Lightning in the area".to_string());
        assert_eq!(request.audit_reason(), "Lightning in the area");
    }

    #[test]
    fn test_outcome_is_tagged() {
        let outcome = CancellationOutcome::ManualReviewRequired {
            booking_id: Uuid::nil(),
            calculation: RefundCalculation {
                original_amount: 90000,
                hours_until_booking: 72,
                refund_percent: 100,
                gross_refund: 90000,
                fixed_fee: 0,
                net_refund: 90000,
                description: "Full refund".to_string(),
                fees: Vec::new(),
                applied_policy: None,
                policy_matched: true,
            },
            review_reasons: vec![ManualReviewReason::DisputedPayment],
            audit_entry_id: Uuid::nil(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "manual_review_required");
        assert_eq!(json["review_reasons"][0]["type"], "disputed_payment");
    }
}
