pub mod gateway;
pub mod guards;
pub mod manager;

pub use gateway::MockPaymentGateway;
pub use guards::{allocate_refund, can_refund, is_authorization_expiring, AuthorizationHealth, RefundDenial};
pub use manager::{DisputeOutcome, PaymentManager, REFUNDABLE_KEY};

use fairway_core::payment::{GatewayError, InvalidPaymentTransition};
use fairway_core::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Payment record not found: {0}")]
    NotFound(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidPaymentTransition),
    #[error("Authorization for {intent_id} expired at {expired_at}")]
    AuthorizationExpired {
        intent_id: String,
        expired_at: chrono::DateTime<chrono::Utc>,
    },
    #[error("Refund denied: {0}")]
    RefundDenied(#[from] RefundDenial),
    #[error("Refund {refund_id} failed: {reason}")]
    RefundFailed { refund_id: String, reason: String },
    #[error("Refund {refund_id} did not settle in time")]
    RefundTimeout { refund_id: String },
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PaymentError {
    /// Whether the same call may succeed if tried again later
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::Gateway(err) => err.is_retryable(),
            PaymentError::RefundTimeout { .. } => true,
            PaymentError::Store(StoreError::Backend(_)) => true,
            _ => false,
        }
    }
}

pub type PaymentResult<T> = Result<T, PaymentError>;
