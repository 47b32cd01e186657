use crate::changes::BookingChanges;
use crate::orchestrator::BookingOrchestrator;
use crate::EditResult;
use chrono::{DateTime, Duration, Utc};
use fairway_core::{format_cents, Actor, Booking, BookingPaymentStatus, BookingStatus, Cents, CourseEditRules};
use fairway_policy::hours_until;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A reason an edit, transfer or cancellation is refused
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum EditViolation {
    #[error("no changes requested")]
    NoChanges,
    #[error("bookings in status {status} cannot be edited")]
    NotEditable { status: BookingStatus },
    #[error("bookings in status {status} cannot be canceled")]
    NotCancelable { status: BookingStatus },
    #[error("changes are locked {lock_window_hours}h before tee time ({hours_until}h remaining)")]
    InsideLockWindow { hours_until: i64, lock_window_hours: i64 },
    #[error("the tee time has already passed")]
    TeeTimePassed,
    #[error("edit limit of {limit} reached; retry in {retry_after_secs}s")]
    RateLimited { limit: u32, retry_after_secs: i64 },
    #[error("booking has used {used} of {max} reschedules")]
    RescheduleLimitReached { used: u32, max: u32 },
    #[error("{requested} players is outside the allowed {min}-{max}")]
    PlayerCountOutOfRange { requested: u32, min: u32, max: u32 },
    #[error("the new tee time is not in the future")]
    NewTimeInPast,
    #[error("the new tee time must be at least {min_hours}h away")]
    InsufficientLeadTime { min_hours: i64 },
    #[error("only {available} spots left, {requested} needed")]
    InsufficientCapacity { available: u32, requested: u32 },
    #[error("payment is under dispute")]
    PaymentDisputed,
    #[error("unknown add-on {id}")]
    UnknownAddOn { id: String },
    #[error("add-on {id} needs a quantity of at least 1")]
    InvalidAddOnQuantity { id: String },
    #[error("add-on {id} is listed more than once")]
    DuplicateAddOn { id: String },
    #[error("cannot move from {from} to {to}")]
    InvalidTransition { from: BookingStatus, to: BookingStatus },
}

/// Non-blocking notes shown alongside a valid edit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum EditWarning {
    /// Removed seats are refunded at the cancellation tier, not in full
    ReducedSeatRefund { hours_until: i64, lead_hours: i64 },
    RescheduleFeeApplies { fee: Cents },
}

impl EditWarning {
    pub fn message(&self) -> String {
        match self {
            EditWarning::ReducedSeatRefund { hours_until, lead_hours } => format!(
                "Removing players within {}h of tee time ({}h remaining) reduces the refund",
                lead_hours, hours_until
            ),
            EditWarning::RescheduleFeeApplies { fee } => {
                format!("Free reschedules used up; a {} fee applies", format_cents(*fee))
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EditValidation {
    pub violations: Vec<EditViolation>,
    pub warnings: Vec<EditWarning>,
}

impl EditValidation {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Lock-window check shared by edits, transfers and customer cancellations
pub(crate) fn temporal_violation(
    tee_time: DateTime<Utc>,
    lock_window_hours: i64,
    now: DateTime<Utc>,
) -> Option<EditViolation> {
    if tee_time <= now {
        Some(EditViolation::TeeTimePassed)
    } else if tee_time - now < Duration::hours(lock_window_hours) {
        Some(EditViolation::InsideLockWindow {
            hours_until: hours_until(tee_time, now),
            lock_window_hours,
        })
    } else {
        None
    }
}

impl BookingOrchestrator {
    /// Check a proposed change set against the course rules. Every failing
    /// check is reported. The rate-limit counter is read, not consumed.
    pub async fn validate_edit(
        &self,
        booking: &Booking,
        changes: &BookingChanges,
        actor: &Actor,
    ) -> EditResult<EditValidation> {
        let rules = self.policy.course_rules(booking.course_id).await?;
        self.validate_with_rules(booking, changes, actor, &rules).await
    }

    pub(crate) async fn validate_with_rules(
        &self,
        booking: &Booking,
        changes: &BookingChanges,
        actor: &Actor,
        rules: &CourseEditRules,
    ) -> EditResult<EditValidation> {
        let now = self.clock.now();
        let mut result = EditValidation::default();
        let violations = &mut result.violations;

        if changes.is_noop(booking) {
            violations.push(EditViolation::NoChanges);
        }

        // Status
        if !booking.status().is_editable() {
            violations.push(EditViolation::NotEditable {
                status: booking.status(),
            });
        }

        // Lock window
        if let Some(violation) = temporal_violation(booking.tee_time, rules.lock_window_hours, now) {
            violations.push(violation);
        }

        // Rate limit
        let limit = self
            .rate_limiter
            .peek(&actor.id, rules.max_edits_per_window, rate_window(rules), now)
            .await?;
        if !limit.allowed {
            violations.push(EditViolation::RateLimited {
                limit: limit.limit,
                retry_after_secs: limit.retry_after(now).num_seconds(),
            });
        }

        let new_time = changes.new_tee_time(booking);

        // Reschedule ceiling
        if new_time.is_some() && booking.reschedules_used >= rules.max_reschedules_per_booking {
            violations.push(EditViolation::RescheduleLimitReached {
                used: booking.reschedules_used,
                max: rules.max_reschedules_per_booking,
            });
        }

        // Player count
        let mut players_in_range = true;
        if let Some(players) = changes.new_player_count(booking) {
            if players < rules.min_players || players > rules.max_players {
                players_in_range = false;
                violations.push(EditViolation::PlayerCountOutOfRange {
                    requested: players,
                    min: rules.min_players,
                    max: rules.max_players,
                });
            } else if players < booking.number_of_players {
                let hours = hours_until(booking.tee_time, now);
                if hours < rules.player_reduction_lead_hours {
                    result.warnings.push(EditWarning::ReducedSeatRefund {
                        hours_until: hours,
                        lead_hours: rules.player_reduction_lead_hours,
                    });
                }
            }
        }

        // New tee time
        if let Some(time) = new_time {
            if time <= now {
                violations.push(EditViolation::NewTimeInPast);
            } else if time - now < Duration::hours(rules.min_booking_lead_hours) {
                violations.push(EditViolation::InsufficientLeadTime {
                    min_hours: rules.min_booking_lead_hours,
                });
            }
            if booking.reschedules_used >= rules.free_reschedules {
                result.warnings.push(EditWarning::RescheduleFeeApplies {
                    fee: rules.reschedule_fee,
                });
            }
        }

        // Capacity
        let players = changes.effective_players(booking);
        let needed = if new_time.is_some() {
            players
        } else {
            players.saturating_sub(booking.number_of_players)
        };
        if needed > 0 && players_in_range {
            let available = self
                .inventory
                .available_capacity(booking.course_id, changes.effective_tee_time(booking))
                .await?;
            if available < needed {
                violations.push(EditViolation::InsufficientCapacity {
                    available,
                    requested: needed,
                });
            }
        }

        if booking.payment_status == BookingPaymentStatus::Disputed {
            violations.push(EditViolation::PaymentDisputed);
        }

        // Add-ons
        if let Some(selections) = &changes.add_ons {
            let mut seen = HashSet::new();
            for selection in selections {
                if !seen.insert(selection.id.as_str()) {
                    violations.push(EditViolation::DuplicateAddOn {
                        id: selection.id.clone(),
                    });
                    continue;
                }
                if selection.quantity == 0 {
                    violations.push(EditViolation::InvalidAddOnQuantity {
                        id: selection.id.clone(),
                    });
                }
                if self.catalog.add_on(booking.course_id, &selection.id).await?.is_none() {
                    violations.push(EditViolation::UnknownAddOn {
                        id: selection.id.clone(),
                    });
                }
            }
        }

        Ok(result)
    }
}

pub(crate) fn rate_window(rules: &CourseEditRules) -> Duration {
    Duration::minutes(rules.rate_limit_window_minutes)
}
