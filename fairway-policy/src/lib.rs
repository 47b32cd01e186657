pub mod cancellation;
pub mod engine;

pub use cancellation::{AdminOverride, CancellationDecision, CancellationRequest, ManualReviewReason};
pub use engine::{
    calculate_refund_at, hours_until, validate_policies, CancellationReason, FeeItem, PolicyEngine, RefundCalculation,
};

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("Invalid cancellation policy: {0}")]
    InvalidPolicy(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] fairway_core::StoreError),
}

pub type PolicyResult<T> = Result<T, PolicyError>;
