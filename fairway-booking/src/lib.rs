pub mod changes;
pub mod disputes;
pub mod lifecycle;
pub mod orchestrator;
pub mod pricing;
pub mod validation;

pub use changes::{diff_bookings, AddOnSelection, BookingChanges};
pub use disputes::{DisputeEvidenceRequest, DisputeUpdate, OpenDisputeRequest, ResolveDisputeRequest};
pub use lifecycle::{CancelBookingRequest, CancellationOutcome};
pub use orchestrator::{BookingOrchestrator, BookingServices, EditOutcome, TransferOutcome};
pub use pricing::{EditPreview, PriceCalculation};
pub use validation::{EditValidation, EditViolation, EditWarning};

use fairway_audit::AuditError;
use fairway_core::{InvalidTransition, StoreError};
use fairway_payment::PaymentError;
use fairway_policy::PolicyError;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum EditError {
    #[error("Booking not found: {0}")]
    NotFound(Uuid),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not allowed: {}", .0.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("; "))]
    PolicyViolation(Vec<EditViolation>),

    #[error("Payment failed: {0}")]
    PaymentFailure(#[source] PaymentError),

    #[error("Tee time no longer available (payment reversed: {payment_reversed})")]
    InventoryConflict { payment_reversed: bool },

    #[error("Idempotency key conflict: {0}")]
    IdempotencyConflict(String),

    #[error("System fault: {0}")]
    System(String),
}

impl EditError {
    /// Whether retrying the same request (with the same idempotency key) may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            EditError::PaymentFailure(err) => err.is_retryable(),
            EditError::System(_) => true,
            _ => false,
        }
    }
}

impl From<StoreError> for EditError {
    fn from(err: StoreError) -> Self {
        EditError::System(err.to_string())
    }
}

impl From<PolicyError> for EditError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::InvalidPolicy(msg) | PolicyError::Validation(msg) => EditError::Validation(msg),
            PolicyError::Store(e) => e.into(),
        }
    }
}

impl From<AuditError> for EditError {
    fn from(err: AuditError) -> Self {
        if err.is_validation() {
            EditError::Validation(err.to_string())
        } else {
            EditError::System(err.to_string())
        }
    }
}

impl From<InvalidTransition> for EditError {
    fn from(err: InvalidTransition) -> Self {
        EditError::PolicyViolation(vec![EditViolation::InvalidTransition {
            from: err.from,
            to: err.to,
        }])
    }
}

impl From<serde_json::Error> for EditError {
    fn from(err: serde_json::Error) -> Self {
        EditError::System(format!("serialization: {}", err))
    }
}

pub type EditResult<T> = Result<T, EditError>;
