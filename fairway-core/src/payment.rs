use crate::Cents;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentIntentStatus {
    RequiresConfirmation,
    RequiresCapture,
    Succeeded,
    Canceled,
}

impl PaymentIntentStatus {
    /// Intents only ever move forward.
    pub fn can_advance_to(self, next: PaymentIntentStatus) -> bool {
        use PaymentIntentStatus::*;
        matches!(
            (self, next),
            (RequiresConfirmation, RequiresCapture)
                | (RequiresConfirmation, Canceled)
                | (RequiresCapture, Succeeded)
                | (RequiresCapture, Canceled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentIntentStatus::RequiresConfirmation => "requires_confirmation",
            PaymentIntentStatus::RequiresCapture => "requires_capture",
            PaymentIntentStatus::Succeeded => "succeeded",
            PaymentIntentStatus::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMethod {
    Automatic,
    Manual,
}

#[derive(Debug, thiserror::Error)]
#[error("Payment intent {intent_id} cannot move from {from} to {to}")]
pub struct InvalidPaymentTransition {
    pub intent_id: String,
    pub from: &'static str,
    pub to: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub booking_id: Uuid,
    pub amount: Cents,
    pub currency: String,
    pub status: PaymentIntentStatus,
    pub capture_method: CaptureMethod,
    pub authorized_at: Option<DateTime<Utc>>,
    pub captured_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub authorization_expires_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub gateway_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl PaymentIntent {
    pub fn new(
        booking_id: Uuid,
        amount: Cents,
        currency: &str,
        capture_method: CaptureMethod,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("pi_{}", Uuid::new_v4().simple()),
            booking_id,
            amount,
            currency: currency.to_string(),
            status: PaymentIntentStatus::RequiresConfirmation,
            capture_method,
            authorized_at: None,
            captured_at: None,
            canceled_at: None,
            authorization_expires_at: None,
            cancellation_reason: None,
            gateway_reference: None,
            created_at: now,
            metadata: serde_json::Map::new(),
        }
    }

    /// Move to `next`, stamping the matching timestamp.
    pub fn advance(
        &mut self,
        next: PaymentIntentStatus,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidPaymentTransition> {
        if !self.status.can_advance_to(next) {
            return Err(InvalidPaymentTransition {
                intent_id: self.id.clone(),
                from: self.status.as_str(),
                to: next.as_str(),
            });
        }
        match next {
            PaymentIntentStatus::RequiresCapture => self.authorized_at = Some(now),
            PaymentIntentStatus::Succeeded => self.captured_at = Some(now),
            PaymentIntentStatus::Canceled => self.canceled_at = Some(now),
            PaymentIntentStatus::RequiresConfirmation => {}
        }
        self.status = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    pub payment_intent_id: String,
    pub amount: Cents,
    pub reason: String,
    pub status: RefundStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl Refund {
    /// Failed refunds never moved money, so they do not count against the intent.
    pub fn counts_against_balance(&self) -> bool {
        self.status != RefundStatus::Failed
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    NeedsResponse,
    UnderReview,
    Won,
    Lost,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputeEvidence {
    pub description: String,
    /// References to supporting documents (receipts, tee sheets, photos)
    pub documents: Vec<String>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispute {
    pub id: String,
    pub payment_intent_id: String,
    pub amount: Cents,
    pub reason: String,
    pub status: DisputeStatus,
    pub evidence_due_by: DateTime<Utc>,
    pub evidence: Option<DisputeEvidence>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// What the gateway hands back for a successful operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayReceipt {
    pub reference: String,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("Payment declined: {0}")]
    Declined(String),
    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),
    #[error("Payment gateway timed out")]
    Timeout,
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_) | GatewayError::Timeout)
    }
}

/// Behavioral contract of the external card processor
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Place a hold for `amount` against the customer's payment method
    async fn authorize(
        &self,
        intent_id: &str,
        amount: Cents,
        currency: &str,
    ) -> Result<GatewayReceipt, GatewayError>;

    /// Convert a hold into a charge
    async fn capture(&self, intent_id: &str, amount: Cents) -> Result<GatewayReceipt, GatewayError>;

    /// Release a hold without charging
    async fn cancel(&self, intent_id: &str) -> Result<GatewayReceipt, GatewayError>;

    /// Return money from a captured intent
    async fn refund(
        &self,
        refund_id: &str,
        intent_id: &str,
        amount: Cents,
    ) -> Result<GatewayReceipt, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_moves_forward_only() {
        let now = Utc::now();
        let mut intent = PaymentIntent::new(Uuid::new_v4(), 5000, "usd", CaptureMethod::Manual, now);
        intent.advance(PaymentIntentStatus::RequiresCapture, now).unwrap();
        assert_eq!(intent.authorized_at, Some(now));
        intent.advance(PaymentIntentStatus::Succeeded, now).unwrap();
        assert!(intent.advance(PaymentIntentStatus::Canceled, now).is_err());
        assert!(intent.advance(PaymentIntentStatus::RequiresCapture, now).is_err());
        assert_eq!(intent.status, PaymentIntentStatus::Succeeded);
    }

    #[test]
    fn test_gateway_error_retryable() {
        assert!(GatewayError::Timeout.is_retryable());
        assert!(GatewayError::Unavailable("503".into()).is_retryable());
        assert!(!GatewayError::Declined("card_declined".into()).is_retryable());
    }
}
