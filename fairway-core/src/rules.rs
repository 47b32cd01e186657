use crate::Cents;
use serde::{Deserialize, Serialize};

/// One refund tier: applies while `hours_before_min <= hours < hours_before_max`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CancellationPolicy {
    pub hours_before_min: i64,
    /// `None` means unbounded above (the most generous tier).
    pub hours_before_max: Option<i64>,
    pub refund_percent: u8,
    pub fixed_fee: Cents,
    pub description: String,
}

impl CancellationPolicy {
    pub fn contains(&self, hours_until_booking: i64) -> bool {
        hours_until_booking >= self.hours_before_min
            && self.hours_before_max.map_or(true, |max| hours_until_booking < max)
    }
}

/// Tiers used when a course has not configured its own.
pub fn default_cancellation_policies() -> Vec<CancellationPolicy> {
    vec![
        CancellationPolicy {
            hours_before_min: 48,
            hours_before_max: None,
            refund_percent: 100,
            fixed_fee: 0,
            description: "Full refund for cancellations 48 hours or more before tee time".to_string(),
        },
        CancellationPolicy {
            hours_before_min: 24,
            hours_before_max: Some(48),
            refund_percent: 50,
            fixed_fee: 0,
            description: "50% refund for cancellations between 24 and 48 hours before tee time".to_string(),
        },
        CancellationPolicy {
            hours_before_min: 0,
            hours_before_max: Some(24),
            refund_percent: 0,
            fixed_fee: 1000,
            description: "No refund within 24 hours of tee time; $10 processing fee applies".to_string(),
        },
    ]
}

/// Per-course edit configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CourseEditRules {
    /// Edits and transfers are refused this close to tee time
    pub lock_window_hours: i64,
    /// Customer cancellations are refused this close to tee time
    pub cancellation_lock_hours: i64,
    pub free_reschedules: u32,
    pub max_reschedules_per_booking: u32,
    pub reschedule_fee: Cents,
    pub transfer_fee: Cents,
    pub min_players: u32,
    pub max_players: u32,
    /// Player reductions closer than this lose the full per-seat refund
    pub player_reduction_lead_hours: i64,
    /// A new tee time must be at least this far in the future
    pub min_booking_lead_hours: i64,
    pub max_edits_per_window: u32,
    pub rate_limit_window_minutes: i64,
    pub cancellation_policies: Vec<CancellationPolicy>,
}

impl Default for CourseEditRules {
    fn default() -> Self {
        Self {
            lock_window_hours: 6,
            cancellation_lock_hours: 0,
            free_reschedules: 1,
            max_reschedules_per_booking: 3,
            reschedule_fee: 1500,
            transfer_fee: 2500,
            min_players: 1,
            max_players: 4,
            player_reduction_lead_hours: 24,
            min_booking_lead_hours: 2,
            max_edits_per_window: 5,
            rate_limit_window_minutes: 60,
            cancellation_policies: default_cancellation_policies(),
        }
    }
}
