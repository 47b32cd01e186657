use crate::Cents;
use serde::{Deserialize, Serialize};

/// Knobs for the payment manager
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PaymentPolicies {
    pub currency: String,
    /// Authorization holds are released by the card network after this long
    pub hold_days: i64,
    pub min_refund_amount: Cents,
    /// Refunds are refused this many days after capture
    pub max_refund_age_days: i64,
    pub dispute_evidence_days: i64,
    pub min_evidence_chars: usize,
    pub gateway_timeout_ms: u64,
    pub gateway_max_retries: u32,
    pub gateway_retry_backoff_ms: u64,
    /// When set, manual-capture intents are captured after this delay
    pub auto_capture_delay_secs: Option<u64>,
    pub retention_days: i64,
}

impl Default for PaymentPolicies {
    fn default() -> Self {
        Self {
            currency: "usd".to_string(),
            hold_days: 7,
            min_refund_amount: 50,
            max_refund_age_days: 180,
            dispute_evidence_days: 7,
            min_evidence_chars: 20,
            gateway_timeout_ms: 10_000,
            gateway_max_retries: 2,
            gateway_retry_backoff_ms: 200,
            auto_capture_delay_secs: None,
            retention_days: 2555,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CancellationConfig {
    /// Net refunds above this need a human to approve them
    pub manual_review_threshold: Cents,
}

impl Default for CancellationConfig {
    fn default() -> Self {
        Self {
            manual_review_threshold: 50_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuditConfig {
    pub max_search_results: usize,
    /// Exports larger than this raise an alert
    pub export_alert_threshold: usize,
    pub retention_days: i64,
    pub alert_channel_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_search_results: 1000,
            export_alert_threshold: 10_000,
            retention_days: 2555,
            alert_channel_capacity: 256,
        }
    }
}
