use chrono::{DateTime, Utc};
use fairway_core::{Booking, CustomerInfo, FieldChange};
use serde::{Deserialize, Serialize};

/// Desired quantity of one catalog add-on
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddOnSelection {
    pub id: String,
    pub quantity: u32,
}

/// A proposed edit. Absent fields are left alone; `add_ons` replaces the
/// whole add-on list when present.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BookingChanges {
    pub tee_time: Option<DateTime<Utc>>,
    pub number_of_players: Option<u32>,
    pub add_ons: Option<Vec<AddOnSelection>>,
    pub customer_info: Option<CustomerInfo>,
}

impl BookingChanges {
    /// New tee time, if it differs from the booking's
    pub fn new_tee_time(&self, booking: &Booking) -> Option<DateTime<Utc>> {
        self.tee_time.filter(|t| *t != booking.tee_time)
    }

    pub fn new_player_count(&self, booking: &Booking) -> Option<u32> {
        self.number_of_players.filter(|n| *n != booking.number_of_players)
    }

    pub fn add_ons_changed(&self, booking: &Booking) -> bool {
        let Some(selections) = &self.add_ons else {
            return false;
        };
        let mut requested: Vec<(&str, u32)> = selections
            .iter()
            .filter(|s| s.quantity > 0)
            .map(|s| (s.id.as_str(), s.quantity))
            .collect();
        let mut current: Vec<(&str, u32)> = booking.add_ons.iter().map(|a| (a.id.as_str(), a.quantity)).collect();
        requested.sort_unstable();
        current.sort_unstable();
        requested != current
    }

    pub fn new_customer_info(&self, booking: &Booking) -> Option<&CustomerInfo> {
        self.customer_info.as_ref().filter(|c| **c != booking.customer_info)
    }

    /// True when nothing would actually change
    pub fn is_noop(&self, booking: &Booking) -> bool {
        self.new_tee_time(booking).is_none()
            && self.new_player_count(booking).is_none()
            && !self.add_ons_changed(booking)
            && self.new_customer_info(booking).is_none()
    }

    /// Player count once the edit applies
    pub fn effective_players(&self, booking: &Booking) -> u32 {
        self.number_of_players.unwrap_or(booking.number_of_players)
    }

    pub fn effective_tee_time(&self, booking: &Booking) -> DateTime<Utc> {
        self.tee_time.unwrap_or(booking.tee_time)
    }
}

/// Field-level differences between two versions of a booking
pub fn diff_bookings(before: &Booking, after: &Booking) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    if before.tee_time != after.tee_time {
        changes.push(FieldChange::new("tee_time", before.tee_time, after.tee_time));
    }
    if before.number_of_players != after.number_of_players {
        changes.push(FieldChange::new(
            "number_of_players",
            before.number_of_players,
            after.number_of_players,
        ));
    }
    if before.add_ons != after.add_ons {
        changes.push(FieldChange::new("add_ons", &before.add_ons, &after.add_ons));
    }
    if before.customer_info != after.customer_info {
        changes.push(FieldChange::new("customer_info", &before.customer_info, &after.customer_info));
    }
    if before.total_amount != after.total_amount {
        changes.push(FieldChange::new("total_amount", before.total_amount, after.total_amount));
    }
    if before.status() != after.status() {
        changes.push(FieldChange::new("status", before.status(), after.status()));
    }
    if before.payment_status != after.payment_status {
        changes.push(FieldChange::new("payment_status", before.payment_status, after.payment_status));
    }
    if before.reschedules_used != after.reschedules_used {
        changes.push(FieldChange::new(
            "reschedules_used",
            before.reschedules_used,
            after.reschedules_used,
        ));
    }

    changes
}
