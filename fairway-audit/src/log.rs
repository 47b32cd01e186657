use crate::export::{write_csv, AuditExport};
use crate::{AuditError, AuditResult};
use chrono::{DateTime, Duration, Utc};
use fairway_core::repository::AuditRepository;
use fairway_core::{Actor, AuditAction, AuditConfig, AuditEntry, AuditFilter, Clock, NewAuditEntry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

const TOP_ACTORS: usize = 10;
const RECENT_ACTIVITY: usize = 20;

/// Pushed to subscribers without blocking the writer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditAlert {
    CriticalAction {
        entry_id: Uuid,
        booking_id: Option<Uuid>,
        action: AuditAction,
        actor_id: String,
    },
    LargeExport {
        record_count: usize,
        threshold: usize,
        actor_id: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActorActivity {
    pub actor_id: String,
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSummary {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub total_entries: usize,
    pub actions: BTreeMap<AuditAction, usize>,
    pub top_actors: Vec<ActorActivity>,
    pub recent_activity: Vec<AuditEntry>,
    pub critical_entries: Vec<AuditEntry>,
}

/// Append-only record of everything that happens to a booking.
pub struct AuditLog {
    repo: Arc<dyn AuditRepository>,
    config: AuditConfig,
    clock: Arc<dyn Clock>,
    alerts: broadcast::Sender<AuditAlert>,
}

impl AuditLog {
    pub fn new(repo: Arc<dyn AuditRepository>, config: AuditConfig, clock: Arc<dyn Clock>) -> Self {
        let (alerts, _) = broadcast::channel(config.alert_channel_capacity.max(1));
        Self {
            repo,
            config,
            clock,
            alerts,
        }
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<AuditAlert> {
        self.alerts.subscribe()
    }

    fn alert(&self, alert: AuditAlert) {
        // No subscribers is fine
        let _ = self.alerts.send(alert);
    }

    /// Check that an entry carries everything its action demands
    pub fn validate(entry: &NewAuditEntry) -> AuditResult<()> {
        if entry.action.requires_reason() {
            let has_reason = entry.reason.as_deref().map_or(false, |r| !r.trim().is_empty());
            if !has_reason {
                return Err(AuditError::MissingReason(entry.action));
            }
        }

        let missing: Vec<String> = entry
            .action
            .required_metadata_keys()
            .iter()
            .filter(|key| !entry.metadata.contains_key(**key))
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(AuditError::MissingMetadata {
                action: entry.action,
                keys: missing,
            });
        }
        Ok(())
    }

    pub async fn log_action(&self, new_entry: NewAuditEntry) -> AuditResult<AuditEntry> {
        Self::validate(&new_entry)?;

        let entry = AuditEntry {
            id: Uuid::new_v4(),
            booking_id: new_entry.booking_id,
            action: new_entry.action,
            performed_by: new_entry.performed_by,
            timestamp: self.clock.now(),
            changes: new_entry.changes,
            reason: new_entry.reason,
            notes: new_entry.notes,
            metadata: new_entry.metadata,
            ip_address: new_entry.ip_address,
        };
        self.repo.append(&entry).await?;

        debug!(
            "Audit {} by {} ({}) on {:?}",
            entry.action, entry.performed_by.id, entry.performed_by.role.as_str(), entry.booking_id
        );

        if entry.action.is_critical() {
            warn!("Critical audit action {} by {}", entry.action, entry.performed_by.id);
            self.alert(AuditAlert::CriticalAction {
                entry_id: entry.id,
                booking_id: entry.booking_id,
                action: entry.action,
                actor_id: entry.performed_by.id.clone(),
            });
        }

        Ok(entry)
    }

    /// Every entry for the booking, newest first
    pub async fn get_booking_audit_history(&self, booking_id: Uuid) -> AuditResult<Vec<AuditEntry>> {
        let mut entries = self.repo.entries_for_booking(booking_id).await?;
        newest_first(&mut entries);
        Ok(entries)
    }

    /// Matching entries, newest first, capped at the configured maximum
    pub async fn search_audit_entries(&self, filter: &AuditFilter) -> AuditResult<Vec<AuditEntry>> {
        let mut entries = self.repo.query(filter).await?;
        newest_first(&mut entries);

        let cap = filter
            .limit
            .map_or(self.config.max_search_results, |l| l.min(self.config.max_search_results));
        entries.truncate(cap);
        Ok(entries)
    }

    pub async fn get_audit_summary(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> AuditResult<AuditSummary> {
        let filter = AuditFilter {
            from,
            to,
            ..AuditFilter::default()
        };
        let mut entries = self.repo.query(&filter).await?;
        newest_first(&mut entries);

        let mut actions = BTreeMap::new();
        let mut actors: HashMap<String, ActorActivity> = HashMap::new();
        for entry in &entries {
            *actions.entry(entry.action).or_insert(0) += 1;
            actors
                .entry(entry.performed_by.id.clone())
                .or_insert_with(|| ActorActivity {
                    actor_id: entry.performed_by.id.clone(),
                    name: entry.performed_by.name.clone(),
                    count: 0,
                })
                .count += 1;
        }

        let mut top_actors: Vec<ActorActivity> = actors.into_values().collect();
        top_actors.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.actor_id.cmp(&b.actor_id)));
        top_actors.truncate(TOP_ACTORS);

        let critical_entries = entries.iter().filter(|e| e.action.is_critical()).cloned().collect();
        let recent_activity = entries.iter().take(RECENT_ACTIVITY).cloned().collect();

        Ok(AuditSummary {
            from,
            to,
            total_entries: entries.len(),
            actions,
            top_actors,
            recent_activity,
            critical_entries,
        })
    }

    /// Export matching entries as CSV and record the export itself.
    pub async fn export_audit_data(&self, filter: &AuditFilter, actor: &Actor) -> AuditResult<AuditExport> {
        let mut entries = self.repo.query(filter).await?;
        newest_first(&mut entries);
        if let Some(limit) = filter.limit {
            entries.truncate(limit);
        }

        let csv = write_csv(&entries)?;
        let record_count = entries.len();

        self.log_action(
            NewAuditEntry::new(filter.booking_id, AuditAction::DataExported, actor.clone())
                .with_metadata("record_count", record_count)
                .with_metadata("filter", filter),
        )
        .await?;

        info!("Exported {} audit entries for {}", record_count, actor.id);
        if record_count > self.config.export_alert_threshold {
            warn!(
                "Large audit export by {}: {} rows (threshold {})",
                actor.id, record_count, self.config.export_alert_threshold
            );
            self.alert(AuditAlert::LargeExport {
                record_count,
                threshold: self.config.export_alert_threshold,
                actor_id: actor.id.clone(),
            });
        }

        Ok(AuditExport { record_count, csv })
    }

    /// Purge entries older than the retention horizon. The purge is logged
    /// but does not write an audit entry of its own.
    pub async fn cleanup_old_entries(&self) -> AuditResult<usize> {
        let cutoff = self.clock.now() - Duration::days(self.config.retention_days);
        let removed = self.repo.purge_before(cutoff).await?;
        info!("Purged {} audit entries older than {}", removed, cutoff);
        Ok(removed)
    }
}

// Stable under equal timestamps: later appends sort first.
fn newest_first(entries: &mut [AuditEntry]) {
    entries.reverse();
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}
