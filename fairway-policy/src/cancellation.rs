use crate::engine::{CancellationReason, PolicyEngine, RefundCalculation};
use crate::{PolicyError, PolicyResult};
use fairway_core::{format_cents, Actor, Booking, BookingPaymentStatus, Cents};
use serde::{Deserialize, Serialize};

/// Staff-supplied replacement for the computed refund percent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdminOverride {
    pub refund_percent: u8,
    pub justification: Option<String>,
}

impl AdminOverride {
    fn is_justified(&self) -> bool {
        self.justification
            .as_deref()
            .map_or(false, |j| !j.trim().is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct CancellationRequest<'a> {
    pub booking: &'a Booking,
    pub reason: CancellationReason,
    pub actor: &'a Actor,
    pub admin_override: Option<AdminOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManualReviewReason {
    RefundAboveThreshold { net_refund: Cents, threshold: Cents },
    DisputedPayment,
    UnjustifiedOverride,
}

impl ManualReviewReason {
    pub fn describe(&self) -> String {
        match self {
            ManualReviewReason::RefundAboveThreshold { net_refund, threshold } => format!(
                "Refund of {} exceeds the automatic approval limit of {}",
                format_cents(*net_refund),
                format_cents(*threshold)
            ),
            ManualReviewReason::DisputedPayment => "Payment is under dispute".to_string(),
            ManualReviewReason::UnjustifiedOverride => {
                "Policy override submitted without a written justification".to_string()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CancellationDecision {
    pub calculation: RefundCalculation,
    pub requires_manual_review: bool,
    pub review_reasons: Vec<ManualReviewReason>,
    pub override_applied: bool,
}

impl PolicyEngine {
    /// Compute the refund and decide whether it may settle without a human.
    pub async fn process_cancellation(
        &self,
        request: CancellationRequest<'_>,
    ) -> PolicyResult<CancellationDecision> {
        let booking = request.booking;
        let mut calculation = self
            .calculate_refund(booking.course_id, booking.tee_time, booking.total_amount, request.reason)
            .await?;

        let mut review_reasons = Vec::new();
        let mut override_applied = false;

        if let Some(admin_override) = &request.admin_override {
            if !request.actor.role.is_administrative() {
                return Err(PolicyError::Validation(
                    "only staff can override the cancellation policy".to_string(),
                ));
            }
            if admin_override.refund_percent > 100 {
                return Err(PolicyError::Validation(format!(
                    "override refund percent {} exceeds 100",
                    admin_override.refund_percent
                )));
            }

            if admin_override.is_justified() {
                calculation = apply_override(calculation, admin_override);
                override_applied = true;
            } else {
                review_reasons.push(ManualReviewReason::UnjustifiedOverride);
            }
        }

        if booking.payment_status == BookingPaymentStatus::Disputed {
            review_reasons.push(ManualReviewReason::DisputedPayment);
        }

        let threshold = self.config.manual_review_threshold;
        if calculation.net_refund > threshold {
            review_reasons.push(ManualReviewReason::RefundAboveThreshold {
                net_refund: calculation.net_refund,
                threshold,
            });
        }

        let requires_manual_review = !review_reasons.is_empty();
        if requires_manual_review {
            tracing::info!(
                "Cancellation of booking {} held for manual review ({} reasons)",
                booking.id,
                review_reasons.len()
            );
        }

        Ok(CancellationDecision {
            calculation,
            requires_manual_review,
            review_reasons,
            override_applied,
        })
    }
}

fn apply_override(calculation: RefundCalculation, admin_override: &AdminOverride) -> RefundCalculation {
    let gross = calculation.original_amount * Cents::from(admin_override.refund_percent) / 100;
    RefundCalculation {
        refund_percent: admin_override.refund_percent,
        gross_refund: gross,
        fixed_fee: 0,
        net_refund: gross,
        description: format!(
            "Administrative override ({}% refund): {}",
            admin_override.refund_percent,
            admin_override.justification.as_deref().unwrap_or_default().trim()
        ),
        fees: Vec::new(),
        ..calculation
    }
}
