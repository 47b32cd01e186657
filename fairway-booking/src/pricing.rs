use crate::changes::{diff_bookings, BookingChanges};
use crate::orchestrator::{ensure_owner, BookingOrchestrator};
use crate::validation::EditValidation;
use crate::EditResult;
use chrono::{DateTime, Utc};
use fairway_core::{AddOn, Actor, Booking, BookingStatus, Cents, CourseEditRules, FieldChange, InvalidTransition};
use fairway_policy::{calculate_refund_at, hours_until, CancellationReason};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Money side of an edit. `final_amount > 0` is charged to the customer,
/// `final_amount < 0` is refunded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceCalculation {
    pub current_total: Cents,
    pub price_per_player: Cents,
    pub players_added: u32,
    pub players_removed: u32,
    pub seat_charge: Cents,
    pub seat_refund_percent: u8,
    pub seat_refund: Cents,
    pub add_on_charge: Cents,
    pub add_on_refund: Cents,
    pub reschedule_fee: Cents,
    pub price_delta: Cents,
    pub fees: Cents,
    pub refunds: Cents,
    pub final_amount: Cents,
    pub new_total: Cents,
}

/// What the customer sees before confirming an edit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditPreview {
    pub booking_id: Uuid,
    pub validation: EditValidation,
    pub pricing: PriceCalculation,
    pub changes: Vec<FieldChange>,
    pub policy_text: String,
}

/// Pricing plus the add-on list the edit produces
pub(crate) struct PricedEdit {
    pub calculation: PriceCalculation,
    pub add_ons: Option<Vec<AddOn>>,
}

impl BookingOrchestrator {
    pub async fn calculate_edit_preview(
        &self,
        booking_id: Uuid,
        changes: &BookingChanges,
        actor: &Actor,
    ) -> EditResult<EditPreview> {
        let booking = self.load_booking(booking_id).await?;
        ensure_owner(&booking, actor)?;
        let rules = self.policy.course_rules(booking.course_id).await?;

        let validation = self.validate_with_rules(&booking, changes, actor, &rules).await?;
        let priced = self.price_edit(&booking, changes, &rules).await?;
        let proposed = apply_edit(&booking, changes, &priced, self.clock.now())?;

        Ok(EditPreview {
            booking_id,
            validation,
            changes: diff_bookings(&booking, &proposed),
            pricing: priced.calculation,
            policy_text: self.policy.policy_text(booking.course_id).await?,
        })
    }

    pub(crate) async fn price_edit(
        &self,
        booking: &Booking,
        changes: &BookingChanges,
        rules: &CourseEditRules,
    ) -> EditResult<PricedEdit> {
        let now = self.clock.now();
        let mut calc = PriceCalculation {
            current_total: booking.total_amount,
            price_per_player: booking.price_per_player(),
            ..PriceCalculation::default()
        };

        if changes.new_tee_time(booking).is_some() && booking.reschedules_used >= rules.free_reschedules {
            calc.reschedule_fee = rules.reschedule_fee;
        }

        // Seats
        let players = changes.effective_players(booking);
        let mut removed_value = 0;
        if players > booking.number_of_players {
            calc.players_added = players - booking.number_of_players;
            calc.seat_charge = Cents::from(calc.players_added) * calc.price_per_player;
        } else if players < booking.number_of_players {
            calc.players_removed = booking.number_of_players - players;
            removed_value = Cents::from(calc.players_removed) * calc.price_per_player;
            calc.seat_refund_percent = seat_refund_percent(booking, rules, now);
            calc.seat_refund = removed_value * Cents::from(calc.seat_refund_percent) / 100;
        }

        // Add-ons
        let mut add_ons = None;
        if let Some(selections) = changes.add_ons.as_ref().filter(|_| changes.add_ons_changed(booking)) {
            let mut next = Vec::new();
            for selection in selections.iter().filter(|s| s.quantity > 0) {
                let Some(item) = self.catalog.add_on(booking.course_id, &selection.id).await? else {
                    continue;
                };
                match booking.add_ons.iter().find(|a| a.id == selection.id) {
                    Some(current) => {
                        if selection.quantity > current.quantity {
                            calc.add_on_charge += Cents::from(selection.quantity - current.quantity) * item.price;
                        } else {
                            calc.add_on_refund += Cents::from(current.quantity - selection.quantity) * current.price;
                        }
                        next.push(AddOn {
                            quantity: selection.quantity,
                            ..current.clone()
                        });
                    }
                    None => {
                        calc.add_on_charge += Cents::from(selection.quantity) * item.price;
                        next.push(AddOn {
                            id: item.id,
                            name: item.name,
                            price: item.price,
                            quantity: selection.quantity,
                        });
                    }
                }
            }
            for dropped in booking
                .add_ons
                .iter()
                .filter(|a| !selections.iter().any(|s| s.id == a.id && s.quantity > 0))
            {
                calc.add_on_refund += dropped.line_total();
            }
            add_ons = Some(next);
        }

        calc.price_delta = calc.seat_charge + calc.add_on_charge;
        calc.fees = calc.reschedule_fee;
        calc.refunds = calc.seat_refund + calc.add_on_refund;
        calc.final_amount = calc.price_delta + calc.fees - calc.refunds;
        calc.new_total = booking.total_amount + calc.price_delta - removed_value - calc.add_on_refund;

        Ok(PricedEdit {
            calculation: calc,
            add_ons,
        })
    }
}

/// Removed seats are refunded in full outside the reduction lead window,
/// otherwise at the cancellation tier for the current tee time.
fn seat_refund_percent(booking: &Booking, rules: &CourseEditRules, now: DateTime<Utc>) -> u8 {
    if hours_until(booking.tee_time, now) >= rules.player_reduction_lead_hours {
        return 100;
    }
    calculate_refund_at(
        &rules.cancellation_policies,
        booking.tee_time,
        booking.total_amount,
        CancellationReason::CustomerRequest,
        now,
    )
    .refund_percent
}

/// The booking as it would look after the edit
pub(crate) fn apply_edit(
    booking: &Booking,
    changes: &BookingChanges,
    priced: &PricedEdit,
    now: DateTime<Utc>,
) -> Result<Booking, InvalidTransition> {
    let mut next = booking.clone();

    if let Some(time) = changes.new_tee_time(booking) {
        next.tee_time = time;
        next.reschedules_used += 1;
        // A second reschedule keeps the status as is
        if next.status() == BookingStatus::Confirmed {
            next.transition_to(BookingStatus::Rescheduled, now)?;
        }
    }
    if let Some(players) = changes.new_player_count(booking) {
        next.number_of_players = players;
    }
    if let Some(add_ons) = &priced.add_ons {
        next.add_ons = add_ons.clone();
    }
    if let Some(customer) = changes.new_customer_info(booking) {
        next.customer_info = customer.clone();
    }

    next.total_amount = priced.calculation.new_total;
    next.updated_at = now;
    Ok(next)
}
