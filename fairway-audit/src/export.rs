use crate::{AuditError, AuditResult};
use fairway_core::AuditEntry;
use serde::{Deserialize, Serialize};

pub const EXPORT_HEADER: [&str; 10] = [
    "ID",
    "Booking ID",
    "Action",
    "Performed By",
    "Role",
    "Timestamp",
    "Changes",
    "Reason",
    "Notes",
    "IP Address",
];

/// A flat export of audit entries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditExport {
    pub record_count: usize,
    pub csv: String,
}

/// Render entries as CSV, one row per entry. The Changes column holds the
/// field changes as a JSON array.
pub fn write_csv(entries: &[AuditEntry]) -> AuditResult<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(EXPORT_HEADER).map_err(export_err)?;

    for entry in entries {
        let changes = serde_json::to_string(&entry.changes).map_err(|e| AuditError::Export(e.to_string()))?;
        let booking_id = entry.booking_id.map(|id| id.to_string()).unwrap_or_default();
        let timestamp = entry.timestamp.to_rfc3339();

        writer
            .write_record([
                entry.id.to_string().as_str(),
                booking_id.as_str(),
                entry.action.as_str(),
                entry.performed_by.name.as_str(),
                entry.performed_by.role.as_str(),
                timestamp.as_str(),
                changes.as_str(),
                entry.reason.as_deref().unwrap_or(""),
                entry.notes.as_deref().unwrap_or(""),
                entry.ip_address.as_deref().unwrap_or(""),
            ])
            .map_err(export_err)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| AuditError::Export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| AuditError::Export(e.to_string()))
}

fn export_err(err: csv::Error) -> AuditError {
    AuditError::Export(err.to_string())
}
