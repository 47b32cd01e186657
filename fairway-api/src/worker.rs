use std::sync::Arc;

use fairway_audit::{AuditAlert, AuditLog};
use fairway_core::{Actor, AuditAction, NewAuditEntry};
use fairway_payment::PaymentManager;
use tokio::sync::broadcast;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

/// Periodically drop payment and audit records past their retention period
pub async fn run_retention_sweeps(payments: Arc<PaymentManager>, audit: Arc<AuditLog>, every: Duration) {
    if every.is_zero() {
        warn!("Retention sweep interval is zero; retention worker not started");
        return;
    }
    let mut ticker = interval(every);
    info!("Retention worker started, sweeping every {:?}", every);

    loop {
        ticker.tick().await;
        sweep_once(&payments, &audit).await;
    }
}

/// One retention pass. Anything removed is recorded as a `DataDeleted` entry.
pub async fn sweep_once(payments: &PaymentManager, audit: &AuditLog) -> usize {
    let payment_records = match payments.purge_expired_records().await {
        Ok(n) => n,
        Err(e) => {
            error!("Payment retention sweep failed: {}", e);
            0
        }
    };
    let audit_entries = match audit.cleanup_old_entries().await {
        Ok(n) => n,
        Err(e) => {
            error!("Audit retention sweep failed: {}", e);
            0
        }
    };

    let removed = payment_records + audit_entries;
    if removed == 0 {
        return 0;
    }
    info!(
        "Purged {} expired payment records and {} audit entries",
        payment_records, audit_entries
    );

    let entry = NewAuditEntry::new(None, AuditAction::DataDeleted, Actor::system())
        .with_reason(Some("retention period elapsed".to_string()))
        .with_metadata("record_count", removed)
        .with_metadata("payment_records", payment_records)
        .with_metadata("audit_entries", audit_entries);
    if let Err(e) = audit.log_action(entry).await {
        error!("Retention sweep removed {} records but was not audited: {}", removed, e);
    }
    removed
}

/// Surface audit alerts in the service log
pub async fn log_audit_alerts(mut alerts: broadcast::Receiver<AuditAlert>) {
    loop {
        match alerts.recv().await {
            Ok(AuditAlert::CriticalAction {
                entry_id,
                booking_id,
                action,
                actor_id,
            }) => warn!(
                "Critical audit action {} by {} (entry {}, booking {:?})",
                action, actor_id, entry_id, booking_id
            ),
            Ok(AuditAlert::LargeExport {
                record_count,
                threshold,
                actor_id,
            }) => warn!(
                "{} exported {} audit records (threshold {})",
                actor_id, record_count, threshold
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Audit alert logger skipped {} alerts", skipped)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
