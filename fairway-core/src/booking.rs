use crate::Cents;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Booking status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Rescheduled,
    CheckedIn,
    Completed,
    Disputed,
    CanceledCustomer,
    CanceledAdmin,
    NoShow,
}

impl BookingStatus {
    /// Statuses reachable from `self` in one step.
    pub fn allowed_transitions(self) -> &'static [BookingStatus] {
        use BookingStatus::*;
        match self {
            Pending => &[Confirmed, CanceledAdmin, CanceledCustomer],
            Confirmed => &[Rescheduled, CheckedIn, CanceledAdmin, CanceledCustomer, NoShow],
            Rescheduled => &[Confirmed, CheckedIn, CanceledAdmin, CanceledCustomer, NoShow],
            CheckedIn => &[Completed, NoShow],
            Completed => &[Disputed],
            Disputed => &[Completed],
            CanceledCustomer | CanceledAdmin | NoShow => &[],
        }
    }

    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Only confirmed and rescheduled bookings accept customer edits.
    pub fn is_editable(self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::Rescheduled)
    }

    pub fn is_canceled(self) -> bool {
        matches!(self, BookingStatus::CanceledCustomer | BookingStatus::CanceledAdmin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Rescheduled => "rescheduled",
            BookingStatus::CheckedIn => "checked_in",
            BookingStatus::Completed => "completed",
            BookingStatus::Disputed => "disputed",
            BookingStatus::CanceledCustomer => "canceled_customer",
            BookingStatus::CanceledAdmin => "canceled_admin",
            BookingStatus::NoShow => "no_show",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Money state of the booking as seen by the edit rules
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingPaymentStatus {
    Pending,
    Authorized,
    Paid,
    PartiallyRefunded,
    Refunded,
    Disputed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddOn {
    pub id: String,
    pub name: String,
    /// Unit price at the time it was added to the booking
    pub price: Cents,
    pub quantity: u32,
}

impl AddOn {
    pub fn line_total(&self) -> Cents {
        self.price * Cents::from(self.quantity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomerInfo {
    pub customer_id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid status transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: BookingStatus,
    pub to: BookingStatus,
}

/// A paid tee-time reservation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: Uuid,
    pub course_id: Uuid,
    status: BookingStatus,
    pub tee_time: DateTime<Utc>,
    pub number_of_players: u32,
    pub add_ons: Vec<AddOn>,
    pub total_amount: Cents,
    pub payment_intent_id: String,
    pub payment_status: BookingPaymentStatus,
    pub customer_info: CustomerInfo,
    pub reschedules_used: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// A freshly paid booking, as handed over by the booking-creation flow.
    pub fn new(
        course_id: Uuid,
        tee_time: DateTime<Utc>,
        number_of_players: u32,
        total_amount: Cents,
        payment_intent_id: String,
        customer_info: CustomerInfo,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            course_id,
            status: BookingStatus::Confirmed,
            tee_time,
            number_of_players,
            add_ons: Vec::new(),
            total_amount,
            payment_intent_id,
            payment_status: BookingPaymentStatus::Paid,
            customer_info,
            reschedules_used: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> BookingStatus {
        self.status
    }

    /// The only way to change status. Rejects anything outside the table.
    pub fn transition_to(
        &mut self,
        next: BookingStatus,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition { from: self.status, to: next });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Per-seat rate used to price player-count changes.
    pub fn price_per_player(&self) -> Cents {
        if self.number_of_players == 0 {
            return 0;
        }
        self.total_amount / Cents::from(self.number_of_players)
    }

    pub fn add_ons_total(&self) -> Cents {
        self.add_ons.iter().map(AddOn::line_total).sum()
    }
}
