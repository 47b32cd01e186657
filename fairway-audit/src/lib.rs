pub mod export;
pub mod log;

pub use export::{write_csv, AuditExport, EXPORT_HEADER};
pub use log::{ActorActivity, AuditAlert, AuditLog, AuditSummary};

use fairway_core::{AuditAction, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Audit action {0} requires a reason")]
    MissingReason(AuditAction),
    #[error("Audit action {action} is missing metadata: {}", .keys.join(", "))]
    MissingMetadata { action: AuditAction, keys: Vec<String> },
    #[error("Audit export failed: {0}")]
    Export(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuditError {
    /// Caller mistakes, as opposed to storage or export faults
    pub fn is_validation(&self) -> bool {
        matches!(self, AuditError::MissingReason(_) | AuditError::MissingMetadata { .. })
    }
}

pub type AuditResult<T> = Result<T, AuditError>;
