pub mod audit;
pub mod booking;
pub mod clock;
pub mod payment;
pub mod repository;
pub mod rules;
pub mod settings;

pub use audit::{Actor, ActorRole, AuditAction, AuditEntry, AuditFilter, FieldChange, NewAuditEntry};
pub use booking::{AddOn, Booking, BookingPaymentStatus, BookingStatus, CustomerInfo, InvalidTransition};
pub use clock::{Clock, FixedClock, SystemClock};
pub use rules::{CancellationPolicy, CourseEditRules};
pub use settings::{AuditConfig, CancellationConfig, PaymentPolicies};

/// Money in minor units (cents). Never use floats for amounts.
pub type Cents = i64;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Record conflict: {0}")]
    Conflict(String),
    #[error("Storage backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Render cents as a dollar string, e.g. `-1050` -> `-$10.50`.
pub fn format_cents(amount: Cents) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{}${}.{:02}", sign, abs / 100, abs % 100)
}
