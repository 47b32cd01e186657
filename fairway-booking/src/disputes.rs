use crate::changes::diff_bookings;
use crate::orchestrator::BookingOrchestrator;
use crate::{EditError, EditResult};
use fairway_audit::AuditLog;
use fairway_core::payment::Dispute;
use fairway_core::{format_cents, Actor, AuditAction, Booking, BookingPaymentStatus, BookingStatus, Cents, NewAuditEntry};
use fairway_payment::{DisputeOutcome, PaymentError};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenDisputeRequest {
    /// Intent under dispute; the booking's primary payment when omitted
    #[serde(default)]
    pub payment_intent_id: Option<String>,
    /// Disputed amount; the full intent amount when omitted
    #[serde(default)]
    pub amount: Option<Cents>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputeEvidenceRequest {
    pub description: String,
    #[serde(default)]
    pub documents: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveDisputeRequest {
    pub outcome: DisputeOutcome,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DisputeUpdate {
    pub booking: Booking,
    pub dispute: Dispute,
    pub audit_entry_id: Uuid,
}

fn dispute_error(err: PaymentError) -> EditError {
    match err {
        PaymentError::Validation(msg) | PaymentError::NotFound(msg) => EditError::Validation(msg),
        other => EditError::PaymentFailure(other),
    }
}

fn require_staff(actor: &Actor) -> EditResult<()> {
    if actor.role.is_administrative() {
        Ok(())
    } else {
        Err(EditError::Forbidden(format!(
            "role {} cannot handle payment disputes",
            actor.role.as_str()
        )))
    }
}

impl BookingOrchestrator {
    // ==========================================
    // Disputes
    // ==========================================

    /// Record a chargeback against one of the booking's payments.
    /// A completed booking moves to disputed; payment status follows in every case.
    pub async fn open_dispute(
        &self,
        booking_id: Uuid,
        request: &OpenDisputeRequest,
        actor: &Actor,
    ) -> EditResult<DisputeUpdate> {
        require_staff(actor)?;
        let reason = request.reason.trim();
        if reason.is_empty() {
            return Err(EditError::Validation("dispute reason is required".to_string()));
        }

        let _guard = self.lock_booking(booking_id).await;
        let booking = self.load_booking(booking_id).await?;
        let now = self.clock.now();

        let intent_id = request
            .payment_intent_id
            .clone()
            .unwrap_or_else(|| booking.payment_intent_id.clone());
        let intent = self.payments.get_intent(&intent_id).await.map_err(dispute_error)?;
        if intent.booking_id != booking.id {
            return Err(EditError::Validation(format!(
                "payment {} does not belong to booking {}",
                intent_id, booking.id
            )));
        }

        let mut updated = booking.clone();
        if booking.status() == BookingStatus::Completed {
            updated.transition_to(BookingStatus::Disputed, now)?;
        }
        updated.payment_status = BookingPaymentStatus::Disputed;
        updated.updated_at = now;

        let amount = request.amount.unwrap_or(intent.amount);
        let dispute = self
            .payments
            .open_dispute(&intent.id, amount, reason)
            .await
            .map_err(dispute_error)?;

        let entry = NewAuditEntry::new(Some(booking.id), AuditAction::DisputeOpened, actor.clone())
            .with_reason(Some(reason.to_string()))
            .with_changes(diff_bookings(&booking, &updated))
            .with_metadata("dispute_id", &dispute.id)
            .with_metadata("payment_intent_id", &intent.id)
            .with_metadata("amount", amount);
        self.commit_dispute_change(&booking, updated, dispute, entry).await
    }

    pub async fn submit_dispute_evidence(
        &self,
        booking_id: Uuid,
        dispute_id: &str,
        request: &DisputeEvidenceRequest,
        actor: &Actor,
    ) -> EditResult<DisputeUpdate> {
        require_staff(actor)?;
        let _guard = self.lock_booking(booking_id).await;
        let booking = self.load_booking(booking_id).await?;
        self.dispute_for_booking(&booking, dispute_id).await?;

        let dispute = self
            .payments
            .respond_to_dispute(dispute_id, &request.description, request.documents.clone())
            .await
            .map_err(dispute_error)?;

        let entry = NewAuditEntry::new(Some(booking.id), AuditAction::DisputeResponded, actor.clone())
            .with_metadata("dispute_id", &dispute.id)
            .with_metadata("document_count", request.documents.len());
        let logged = self.audit.log_action(entry).await?;

        Ok(DisputeUpdate {
            booking,
            dispute,
            audit_entry_id: logged.id,
        })
    }

    /// Close a dispute. A won dispute leaves the booking paid; a lost one
    /// means the funds went back to the cardholder.
    pub async fn resolve_dispute(
        &self,
        booking_id: Uuid,
        dispute_id: &str,
        request: &ResolveDisputeRequest,
        actor: &Actor,
    ) -> EditResult<DisputeUpdate> {
        require_staff(actor)?;
        let reason = request.reason.clone().filter(|r| !r.trim().is_empty());

        let _guard = self.lock_booking(booking_id).await;
        let booking = self.load_booking(booking_id).await?;
        let now = self.clock.now();
        self.dispute_for_booking(&booking, dispute_id).await?;

        let mut updated = booking.clone();
        if booking.status() == BookingStatus::Disputed {
            updated.transition_to(BookingStatus::Completed, now)?;
        }
        updated.payment_status = match request.outcome {
            DisputeOutcome::Won => BookingPaymentStatus::Paid,
            DisputeOutcome::Lost => BookingPaymentStatus::Refunded,
        };
        updated.updated_at = now;

        let entry = NewAuditEntry::new(Some(booking.id), AuditAction::DisputeResolved, actor.clone())
            .with_reason(reason)
            .with_changes(diff_bookings(&booking, &updated))
            .with_metadata("dispute_id", dispute_id)
            .with_metadata("outcome", request.outcome);
        AuditLog::validate(&entry)?;

        let dispute = self
            .payments
            .resolve_dispute(dispute_id, request.outcome)
            .await
            .map_err(dispute_error)?;
        self.commit_dispute_change(&booking, updated, dispute, entry).await
    }

    async fn dispute_for_booking(&self, booking: &Booking, dispute_id: &str) -> EditResult<Dispute> {
        let dispute = self.payments.get_dispute(dispute_id).await.map_err(dispute_error)?;
        let intent = self
            .payments
            .get_intent(&dispute.payment_intent_id)
            .await
            .map_err(dispute_error)?;
        if intent.booking_id != booking.id {
            return Err(EditError::Validation(format!(
                "dispute {} does not belong to booking {}",
                dispute_id, booking.id
            )));
        }
        Ok(dispute)
    }

    async fn commit_dispute_change(
        &self,
        booking: &Booking,
        updated: Booking,
        dispute: Dispute,
        entry: NewAuditEntry,
    ) -> EditResult<DisputeUpdate> {
        if let Err(e) = self.bookings.save_booking(&updated).await {
            error!(
                "Dispute {} recorded but booking {} could not be saved: {}",
                dispute.id, booking.id, e
            );
            return Err(e.into());
        }
        let logged = self.audit_committed(entry).await.map_err(EditError::System)?;

        info!(
            "Booking {} dispute {} ({}, {:?})",
            booking.id,
            dispute.id,
            format_cents(dispute.amount),
            dispute.status
        );
        Ok(DisputeUpdate {
            booking: updated,
            dispute,
            audit_entry_id: logged.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fairway_core::ActorRole;

    #[test]
    fn test_customers_cannot_handle_disputes() {
        let customer = Actor::new("cust-1", "Pat", ActorRole::Customer);
        assert!(matches!(require_staff(&customer), Err(EditError::Forbidden(_))));
        assert!(require_staff(&Actor::system()).is_ok());
    }

    #[test]
    fn test_missing_records_surface_as_validation() {
        let err = dispute_error(PaymentError::NotFound("dispute dp_1".to_string()));
        assert!(matches!(err, EditError::Validation(_)));
    }

    #[test]
    fn test_resolve_request_defaults_reason() {
        let request: ResolveDisputeRequest = serde_json::from_str(r#"{"outcome":"won"}"#).unwrap();
        assert_eq!(request.outcome, DisputeOutcome::Won);
        assert!(request.reason.is_none());
    }
}
