use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    BookingModified,
    BookingRescheduled,
    BookingTransferred,
    BookingCanceled,
    StatusChanged,
    RefundIssued,
    PolicyOverride,
    DisputeOpened,
    DisputeResponded,
    DisputeResolved,
    ManualReviewRequested,
    DataDeleted,
    DataExported,
}

impl AuditAction {
    /// Actions that are rejected without a written reason.
    pub fn requires_reason(self) -> bool {
        matches!(
            self,
            AuditAction::BookingCanceled
                | AuditAction::PolicyOverride
                | AuditAction::DataDeleted
                | AuditAction::DisputeResolved
        )
    }

    /// Actions that raise an alert and always appear in summaries.
    pub fn is_critical(self) -> bool {
        matches!(
            self,
            AuditAction::PolicyOverride
                | AuditAction::DataDeleted
                | AuditAction::DisputeOpened
                | AuditAction::DisputeResolved
                | AuditAction::ManualReviewRequested
        )
    }

    /// Metadata keys that must be present when the action is logged.
    pub fn required_metadata_keys(self) -> &'static [&'static str] {
        match self {
            AuditAction::BookingModified | AuditAction::BookingRescheduled => &["price_calculation"],
            AuditAction::BookingTransferred => &["transfer_fee"],
            AuditAction::RefundIssued => &["refund_id", "amount"],
            AuditAction::DisputeOpened | AuditAction::DisputeResolved => &["dispute_id"],
            AuditAction::DataDeleted => &["record_count"],
            AuditAction::DataExported => &["record_count", "filter"],
            AuditAction::ManualReviewRequested => &["review_reasons"],
            _ => &[],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::BookingModified => "booking_modified",
            AuditAction::BookingRescheduled => "booking_rescheduled",
            AuditAction::BookingTransferred => "booking_transferred",
            AuditAction::BookingCanceled => "booking_canceled",
            AuditAction::StatusChanged => "status_changed",
            AuditAction::RefundIssued => "refund_issued",
            AuditAction::PolicyOverride => "policy_override",
            AuditAction::DisputeOpened => "dispute_opened",
            AuditAction::DisputeResponded => "dispute_responded",
            AuditAction::DisputeResolved => "dispute_resolved",
            AuditAction::ManualReviewRequested => "manual_review_requested",
            AuditAction::DataDeleted => "data_deleted",
            AuditAction::DataExported => "data_exported",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Customer,
    Staff,
    Admin,
    System,
}

impl ActorRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ActorRole::Customer => "customer",
            ActorRole::Staff => "staff",
            ActorRole::Admin => "admin",
            ActorRole::System => "system",
        }
    }

    pub fn is_administrative(self) -> bool {
        !matches!(self, ActorRole::Customer)
    }
}

/// Who performed an action
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub name: String,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: ActorRole) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
        }
    }

    pub fn system() -> Self {
        Self::new("system", "System", ActorRole::System)
    }
}

/// Old and new value of a single booking field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub field: String,
    pub old_value: Value,
    pub new_value: Value,
}

impl FieldChange {
    pub fn new(field: impl Into<String>, old_value: impl Serialize, new_value: impl Serialize) -> Self {
        Self {
            field: field.into(),
            old_value: serde_json::to_value(old_value).unwrap_or(Value::Null),
            new_value: serde_json::to_value(new_value).unwrap_or(Value::Null),
        }
    }
}

/// An immutable audit record as stored
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub id: Uuid,
    pub booking_id: Option<Uuid>,
    pub action: AuditAction,
    pub performed_by: Actor,
    pub timestamp: DateTime<Utc>,
    pub changes: Vec<FieldChange>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub metadata: Map<String, Value>,
    pub ip_address: Option<String>,
}

/// An audit record before the log assigns its id and timestamp
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAuditEntry {
    pub booking_id: Option<Uuid>,
    pub action: AuditAction,
    pub performed_by: Actor,
    pub changes: Vec<FieldChange>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub metadata: Map<String, Value>,
    pub ip_address: Option<String>,
}

impl NewAuditEntry {
    pub fn new(booking_id: Option<Uuid>, action: AuditAction, performed_by: Actor) -> Self {
        Self {
            booking_id,
            action,
            performed_by,
            changes: Vec::new(),
            reason: None,
            notes: None,
            metadata: Map::new(),
            ip_address: None,
        }
    }

    pub fn with_changes(mut self, changes: Vec<FieldChange>) -> Self {
        self.changes = changes;
        self
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Serialize) -> Self {
        self.metadata
            .insert(key.to_string(), serde_json::to_value(value).unwrap_or(Value::Null));
        self
    }

    pub fn with_ip_address(mut self, ip_address: Option<String>) -> Self {
        self.ip_address = ip_address;
        self
    }
}

/// Criteria for searching the audit trail. Empty fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditFilter {
    pub booking_id: Option<Uuid>,
    pub actor_id: Option<String>,
    pub actions: Vec<AuditAction>,
    pub role: Option<ActorRole>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub changed_field: Option<String>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if self.booking_id.is_some() && entry.booking_id != self.booking_id {
            return false;
        }
        if let Some(actor_id) = &self.actor_id {
            if &entry.performed_by.id != actor_id {
                return false;
            }
        }
        if !self.actions.is_empty() && !self.actions.contains(&entry.action) {
            return false;
        }
        if let Some(role) = self.role {
            if entry.performed_by.role != role {
                return false;
            }
        }
        if let Some(from) = self.from {
            if entry.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if entry.timestamp > to {
                return false;
            }
        }
        if let Some(field) = &self.changed_field {
            if !entry.changes.iter().any(|c| &c.field == field) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(action: AuditAction, field: &str) -> AuditEntry {
        AuditEntry {
            id: Uuid::new_v4(),
            booking_id: Some(Uuid::new_v4()),
            action,
            performed_by: Actor::new("admin-1", "Alex", ActorRole::Admin),
            timestamp: Utc::now(),
            changes: vec![FieldChange::new(field, 2, 4)],
            reason: None,
            notes: None,
            metadata: Map::new(),
            ip_address: None,
        }
    }

    #[test]
    fn test_filter_matches_changed_field_and_role() {
        let e = entry(AuditAction::BookingModified, "number_of_players");
        let filter = AuditFilter {
            role: Some(ActorRole::Admin),
            changed_field: Some("number_of_players".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&e));

        let filter = AuditFilter {
            changed_field: Some("tee_time".to_string()),
            ..Default::default()
        };
        assert!(!filter.matches(&e));
    }

    #[test]
    fn test_field_change_serializes_camel_case() {
        let change = FieldChange::new("number_of_players", 4, 2);
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["oldValue"], 4);
        assert_eq!(json["newValue"], 2);
    }

    #[test]
    fn test_reason_required_set() {
        assert!(AuditAction::BookingCanceled.requires_reason());
        assert!(AuditAction::DataDeleted.requires_reason());
        assert!(!AuditAction::BookingModified.requires_reason());
    }
}
