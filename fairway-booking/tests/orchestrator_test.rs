use chrono::{Duration, Utc};
use fairway_audit::AuditLog;
use fairway_booking::{
    AddOnSelection, BookingChanges, BookingOrchestrator, BookingServices, CancelBookingRequest, CancellationOutcome,
    DisputeEvidenceRequest, EditError, EditViolation, EditWarning, OpenDisputeRequest, ResolveDisputeRequest,
};
use fairway_core::repository::{AuditRepository, BookingRepository, CourseRulesRepository};
use fairway_core::{
    Actor, ActorRole, AddOn, AuditAction, AuditConfig, Booking, BookingPaymentStatus, BookingStatus,
    CancellationConfig, Clock, CourseEditRules, CustomerInfo, FixedClock, PaymentPolicies,
};
use fairway_payment::{DisputeOutcome, MockPaymentGateway, PaymentManager};
use fairway_policy::{AdminOverride, CancellationReason, PolicyEngine};
use fairway_store::{
    InMemoryAddOnCatalog, InMemoryAuditRepository, InMemoryBookingRepository, InMemoryCourseRulesRepository,
    InMemoryIdempotencyStore, InMemoryInventory, InMemoryPaymentRepository, InMemoryRateLimiter,
};
use std::sync::Arc;
use uuid::Uuid;

struct Harness {
    orchestrator: BookingOrchestrator,
    bookings: Arc<InMemoryBookingRepository>,
    payment_repo: Arc<InMemoryPaymentRepository>,
    payments: Arc<PaymentManager>,
    gateway: Arc<MockPaymentGateway>,
    inventory: Arc<InMemoryInventory>,
    catalog: Arc<InMemoryAddOnCatalog>,
    audit_repo: Arc<InMemoryAuditRepository>,
    rules: Arc<InMemoryCourseRulesRepository>,
    clock: Arc<FixedClock>,
    course_id: Uuid,
}

impl Harness {
    fn new() -> Self {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let bookings = Arc::new(InMemoryBookingRepository::new());
        let payment_repo = Arc::new(InMemoryPaymentRepository::new());
        let gateway = Arc::new(MockPaymentGateway::new());
        let inventory = Arc::new(InMemoryInventory::new(4));
        let catalog = Arc::new(InMemoryAddOnCatalog::new());
        let audit_repo = Arc::new(InMemoryAuditRepository::new());
        let rules = Arc::new(InMemoryCourseRulesRepository::new());

        let payments = Arc::new(PaymentManager::new(
            payment_repo.clone(),
            gateway.clone(),
            PaymentPolicies::default(),
            clock.clone(),
        ));
        let policy = Arc::new(PolicyEngine::new(
            rules.clone(),
            CourseEditRules::default(),
            CancellationConfig::default(),
            clock.clone(),
        ));
        let audit = Arc::new(AuditLog::new(audit_repo.clone(), AuditConfig::default(), clock.clone()));

        let orchestrator = BookingOrchestrator::new(BookingServices {
            bookings: bookings.clone(),
            inventory: inventory.clone(),
            catalog: catalog.clone(),
            rate_limiter: Arc::new(InMemoryRateLimiter::new()),
            idempotency: Arc::new(InMemoryIdempotencyStore::new()),
            policy,
            payments: payments.clone(),
            audit,
            clock: clock.clone(),
        });

        Self {
            orchestrator,
            bookings,
            payment_repo,
            payments,
            gateway,
            inventory,
            catalog,
            audit_repo,
            rules,
            clock,
            course_id: Uuid::new_v4(),
        }
    }

    /// A paid booking `hours_out` hours away whose players hold their slot
    async fn booking(&self, hours_out: i64, players: u32, total: i64) -> Booking {
        let now = self.clock.now();
        let mut booking = Booking::new(
            self.course_id,
            now + Duration::hours(hours_out),
            players,
            total,
            String::new(),
            customer("cust-1", "Pat Golfer"),
            now,
        );
        let intent = self.payments.charge(booking.id, total, "booking").await.unwrap();
        booking.payment_intent_id = intent.id;
        self.inventory
            .initialize(self.course_id, booking.tee_time, 4, players)
            .await;
        self.bookings.save_booking(&booking).await.unwrap();
        booking
    }

    async fn stored(&self, id: Uuid) -> Booking {
        self.bookings.get_booking(id).await.unwrap().unwrap()
    }

    async fn audit_actions(&self, booking_id: Uuid) -> Vec<AuditAction> {
        self.audit_repo
            .entries_for_booking(booking_id)
            .await
            .unwrap()
            .iter()
            .map(|e| e.action)
            .collect()
    }

    async fn set_rules(&self, rules: CourseEditRules) {
        self.rules.save_rules(self.course_id, &rules).await.unwrap();
    }
}

fn customer(id: &str, name: &str) -> CustomerInfo {
    CustomerInfo {
        customer_id: id.to_string(),
        name: name.to_string(),
        email: format!("{}@example.com", id),
        phone: None,
    }
}

fn golfer() -> Actor {
    Actor::new("cust-1", "Pat Golfer", ActorRole::Customer)
}

fn staff() -> Actor {
    Actor::new("staff-1", "Pro Shop", ActorRole::Staff)
}

fn players(n: u32) -> BookingChanges {
    BookingChanges {
        number_of_players: Some(n),
        ..BookingChanges::default()
    }
}

// ==========================================
// Edits
// ==========================================

#[tokio::test]
async fn test_player_reduction_refunds_full_seat_price_outside_lead_window() {
    let h = Harness::new();
    let booking = h.booking(30, 4, 20000).await;

    let preview = h
        .orchestrator
        .calculate_edit_preview(booking.id, &players(2), &golfer())
        .await
        .unwrap();
    assert!(preview.validation.is_valid());
    assert_eq!(preview.pricing.price_per_player, 5000);
    assert_eq!(preview.pricing.seat_refund_percent, 100);
    assert_eq!(preview.pricing.seat_refund, 10000);
    assert_eq!(preview.pricing.final_amount, -10000);
    assert!(!preview.policy_text.is_empty());

    let outcome = h
        .orchestrator
        .execute_edit(booking.id, &players(2), &golfer(), "edit-1")
        .await
        .unwrap();

    assert_eq!(outcome.booking.number_of_players, 2);
    assert_eq!(outcome.booking.total_amount, 10000);
    assert_eq!(outcome.booking.payment_status, BookingPaymentStatus::PartiallyRefunded);
    assert_eq!(outcome.refund_ids.len(), 1);
    let refund = h.payments.get_refund(&outcome.refund_ids[0]).await.unwrap();
    assert_eq!(refund.amount, 10000);
    assert_eq!(h.inventory.slot(h.course_id, booking.tee_time).await.reserved, 2);
    assert_eq!(h.audit_actions(booking.id).await, vec![AuditAction::BookingModified]);
}

#[tokio::test]
async fn test_player_reduction_inside_lead_window_uses_tier_percent() {
    let h = Harness::new();
    let booking = h.booking(30, 4, 20000).await;
    h.clock.advance(Duration::hours(10));

    let preview = h
        .orchestrator
        .calculate_edit_preview(booking.id, &players(2), &golfer())
        .await
        .unwrap();

    assert!(preview.validation.is_valid());
    assert!(matches!(
        preview.validation.warnings[0],
        EditWarning::ReducedSeatRefund { hours_until: 20, lead_hours: 24 }
    ));
    assert_eq!(preview.pricing.seat_refund_percent, 0);
    assert_eq!(preview.pricing.final_amount, 0);
    assert_eq!(preview.pricing.new_total, 10000);
}

#[tokio::test]
async fn test_reschedule_ceiling_blocks_without_side_effects() {
    let h = Harness::new();
    let mut booking = h.booking(72, 4, 20000).await;
    booking.reschedules_used = 3;
    h.bookings.save_booking(&booking).await.unwrap();
    let gateway_calls = h.gateway.total_calls();

    let changes = BookingChanges {
        tee_time: Some(booking.tee_time + Duration::hours(24)),
        ..BookingChanges::default()
    };
    let err = h
        .orchestrator
        .execute_edit(booking.id, &changes, &golfer(), "edit-1")
        .await
        .unwrap_err();

    match err {
        EditError::PolicyViolation(violations) => {
            assert!(violations.contains(&EditViolation::RescheduleLimitReached { used: 3, max: 3 }))
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(h.gateway.total_calls(), gateway_calls);
    assert_eq!(h.inventory.reserve_calls(), 0);
    assert_eq!(h.inventory.release_calls(), 0);
    assert_eq!(h.stored(booking.id).await, booking);
    assert!(h.audit_repo.is_empty().await);
}

#[tokio::test]
async fn test_validation_reports_every_failure() {
    let h = Harness::new();
    let mut booking = h.booking(3, 4, 20000).await;
    booking.payment_status = BookingPaymentStatus::Disputed;
    h.bookings.save_booking(&booking).await.unwrap();

    let changes = BookingChanges {
        number_of_players: Some(6),
        add_ons: Some(vec![AddOnSelection {
            id: "caddie".to_string(),
            quantity: 0,
        }]),
        ..BookingChanges::default()
    };
    let validation = h.orchestrator.validate_edit(&booking, &changes, &golfer()).await.unwrap();

    assert!(!validation.is_valid());
    let violations = &validation.violations;
    assert!(violations.iter().any(|v| matches!(v, EditViolation::InsideLockWindow { .. })));
    assert!(violations.contains(&EditViolation::PlayerCountOutOfRange {
        requested: 6,
        min: 1,
        max: 4
    }));
    assert!(violations.contains(&EditViolation::PaymentDisputed));
    assert!(violations.contains(&EditViolation::InvalidAddOnQuantity {
        id: "caddie".to_string()
    }));
    assert!(violations.contains(&EditViolation::UnknownAddOn {
        id: "caddie".to_string()
    }));
}

#[tokio::test]
async fn test_add_player_charges_and_replays_on_retry() {
    let h = Harness::new();
    let booking = h.booking(72, 2, 10000).await;
    let captures = h.gateway.capture_calls();

    let first = h
        .orchestrator
        .execute_edit(booking.id, &players(3), &golfer(), "edit-42")
        .await
        .unwrap();
    assert!(!first.replayed);
    assert_eq!(first.pricing.final_amount, 5000);
    assert_eq!(first.booking.total_amount, 15000);
    assert!(first.charge_intent_id.is_some());

    let again = h
        .orchestrator
        .execute_edit(booking.id, &players(3), &golfer(), "edit-42")
        .await
        .unwrap();
    assert!(again.replayed);
    assert_eq!(again.charge_intent_id, first.charge_intent_id);
    assert_eq!(again.audit_entry_id, first.audit_entry_id);

    assert_eq!(h.gateway.capture_calls(), captures + 1);
    assert_eq!(h.audit_repo.len().await, 1);
    assert_eq!(h.inventory.slot(h.course_id, booking.tee_time).await.reserved, 3);
}

#[tokio::test]
async fn test_reused_key_with_different_input_is_rejected() {
    let h = Harness::new();
    let booking = h.booking(72, 2, 10000).await;

    h.orchestrator
        .execute_edit(booking.id, &players(3), &golfer(), "edit-1")
        .await
        .unwrap();
    let err = h
        .orchestrator
        .execute_edit(booking.id, &players(1), &golfer(), "edit-1")
        .await
        .unwrap_err();

    assert!(matches!(err, EditError::IdempotencyConflict(_)));
    assert_eq!(h.stored(booking.id).await.number_of_players, 3);
}

#[tokio::test]
async fn test_failed_edit_releases_key_for_retry() {
    let h = Harness::new();
    let booking = h.booking(72, 2, 10000).await;
    h.gateway.decline_authorizations(true);

    let err = h
        .orchestrator
        .execute_edit(booking.id, &players(3), &golfer(), "edit-1")
        .await
        .unwrap_err();
    assert!(matches!(err, EditError::PaymentFailure(_)));
    assert_eq!(h.stored(booking.id).await, booking);
    assert_eq!(h.inventory.slot(h.course_id, booking.tee_time).await.reserved, 2);

    h.gateway.decline_authorizations(false);
    let outcome = h
        .orchestrator
        .execute_edit(booking.id, &players(3), &golfer(), "edit-1")
        .await
        .unwrap();
    assert!(!outcome.replayed);
    assert_eq!(outcome.booking.number_of_players, 3);
}

#[tokio::test]
async fn test_reschedule_with_fee_moves_inventory() {
    let h = Harness::new();
    let mut booking = h.booking(72, 4, 20000).await;
    booking.reschedules_used = 1;
    h.bookings.save_booking(&booking).await.unwrap();
    let new_time = booking.tee_time + Duration::hours(24);

    let changes = BookingChanges {
        tee_time: Some(new_time),
        ..BookingChanges::default()
    };
    let outcome = h
        .orchestrator
        .execute_edit(booking.id, &changes, &golfer(), "move-1")
        .await
        .unwrap();

    assert_eq!(outcome.pricing.reschedule_fee, 1500);
    assert_eq!(outcome.pricing.final_amount, 1500);
    assert_eq!(outcome.booking.tee_time, new_time);
    assert_eq!(outcome.booking.status(), BookingStatus::Rescheduled);
    assert_eq!(outcome.booking.reschedules_used, 2);
    assert_eq!(h.inventory.slot(h.course_id, booking.tee_time).await.reserved, 0);
    assert_eq!(h.inventory.slot(h.course_id, new_time).await.reserved, 4);
    assert_eq!(h.audit_actions(booking.id).await, vec![AuditAction::BookingRescheduled]);
}

#[tokio::test]
async fn test_lost_slot_rolls_back_charge_and_inventory() {
    let h = Harness::new();
    let mut booking = h.booking(72, 4, 20000).await;
    booking.reschedules_used = 1;
    h.bookings.save_booking(&booking).await.unwrap();
    let new_time = booking.tee_time + Duration::hours(24);
    h.inventory.reject_slot(h.course_id, new_time).await;

    let changes = BookingChanges {
        tee_time: Some(new_time),
        ..BookingChanges::default()
    };
    let err = h
        .orchestrator
        .execute_edit(booking.id, &changes, &golfer(), "move-1")
        .await
        .unwrap_err();

    assert!(matches!(err, EditError::InventoryConflict { payment_reversed: true }));
    assert_eq!(h.stored(booking.id).await, booking);
    assert_eq!(h.inventory.slot(h.course_id, booking.tee_time).await.reserved, 4);
    assert_eq!(h.gateway.refund_calls(), 1);
    assert_eq!(h.payment_repo.refund_count().await, 1);

    // Only the reversal is on record; the edit itself never happened
    let history = h.audit_repo.entries_for_booking(booking.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, AuditAction::RefundIssued);
    assert_eq!(history[0].metadata["amount"], 1500);
    assert_eq!(history[0].reason.as_deref(), Some("edit rolled back"));
}

#[tokio::test]
async fn test_failed_refund_restores_seats_and_booking() {
    let h = Harness::new();
    let booking = h.booking(72, 4, 20000).await;
    h.gateway.fail_refunds(true);

    let err = h
        .orchestrator
        .execute_edit(booking.id, &players(2), &golfer(), "edit-1")
        .await
        .unwrap_err();

    assert!(matches!(err, EditError::PaymentFailure(_)));
    assert_eq!(h.stored(booking.id).await, booking);
    assert_eq!(h.inventory.slot(h.course_id, booking.tee_time).await.reserved, 4);
    assert!(h.audit_repo.is_empty().await);
}

#[tokio::test]
async fn test_refund_below_minimum_is_waived_and_recorded() {
    let h = Harness::new();
    let mut booking = h.booking(72, 2, 10000).await;
    booking.add_ons.push(AddOn {
        id: "tees".to_string(),
        name: "Tee pack".to_string(),
        price: 40,
        quantity: 1,
    });
    booking.total_amount = 10040;
    h.bookings.save_booking(&booking).await.unwrap();

    let changes = BookingChanges {
        add_ons: Some(Vec::new()),
        ..BookingChanges::default()
    };
    let outcome = h
        .orchestrator
        .execute_edit(booking.id, &changes, &golfer(), "edit-1")
        .await
        .unwrap();

    assert_eq!(outcome.pricing.final_amount, -40);
    assert_eq!(outcome.booking.total_amount, 10000);
    assert!(outcome.refund_ids.is_empty());
    assert_eq!(outcome.booking.payment_status, BookingPaymentStatus::Paid);
    assert_eq!(h.gateway.refund_calls(), 0);

    let history = h.audit_repo.entries_for_booking(booking.id).await.unwrap();
    assert_eq!(history[0].metadata["refund_waived"], 40);
}

#[tokio::test]
async fn test_booking_lock_entries_are_pruned() {
    let h = Harness::new();
    let booking = h.booking(72, 2, 10000).await;

    h.orchestrator
        .execute_edit(booking.id, &players(3), &golfer(), "edit-1")
        .await
        .unwrap();
    h.orchestrator
        .calculate_edit_preview(booking.id, &players(4), &golfer())
        .await
        .unwrap();

    assert_eq!(h.orchestrator.tracked_locks(), 0);
}

#[tokio::test]
async fn test_customer_cannot_touch_another_customers_booking() {
    let h = Harness::new();
    let booking = h.booking(72, 4, 20000).await;
    let stranger = Actor::new("cust-9", "Lee Stranger", ActorRole::Customer);

    let err = h
        .orchestrator
        .calculate_edit_preview(booking.id, &players(2), &stranger)
        .await
        .unwrap_err();
    assert!(matches!(err, EditError::Forbidden(_)));

    let err = h.orchestrator.get_booking(booking.id, &stranger).await.unwrap_err();
    assert!(matches!(err, EditError::Forbidden(_)));

    let err = h
        .orchestrator
        .execute_edit(booking.id, &players(2), &stranger, "edit-1")
        .await
        .unwrap_err();
    assert!(matches!(err, EditError::Forbidden(_)));

    let err = h
        .orchestrator
        .cancel_booking(
            booking.id,
            &cancel_request(CancellationReason::CustomerRequest),
            &stranger,
            "cancel-1",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EditError::Forbidden(_)));

    let err = h
        .orchestrator
        .transfer_booking(booking.id, customer("cust-9", "Lee Stranger"), &stranger)
        .await
        .unwrap_err();
    assert!(matches!(err, EditError::Forbidden(_)));

    assert_eq!(h.stored(booking.id).await, booking);
    assert_eq!(h.gateway.refund_calls(), 0);

    // Staff act on any booking
    assert!(h.orchestrator.get_booking(booking.id, &staff()).await.is_ok());
}

#[tokio::test]
async fn test_add_on_changes_price_at_catalog_and_recorded_rates() {
    let h = Harness::new();
    h.catalog.insert(h.course_id, "cart", "Golf cart", 2000).await;
    h.catalog.insert(h.course_id, "range", "Range balls", 500).await;
    let mut booking = h.booking(72, 2, 10000).await;
    booking.add_ons.push(AddOn {
        id: "range".to_string(),
        name: "Range balls".to_string(),
        price: 400,
        quantity: 2,
    });
    booking.total_amount = 10800;
    h.bookings.save_booking(&booking).await.unwrap();

    let changes = BookingChanges {
        add_ons: Some(vec![AddOnSelection {
            id: "cart".to_string(),
            quantity: 1,
        }]),
        ..BookingChanges::default()
    };
    let preview = h
        .orchestrator
        .calculate_edit_preview(booking.id, &changes, &golfer())
        .await
        .unwrap();

    assert!(preview.validation.is_valid());
    assert_eq!(preview.pricing.add_on_charge, 2000);
    assert_eq!(preview.pricing.add_on_refund, 800);
    assert_eq!(preview.pricing.final_amount, 1200);
    assert_eq!(preview.pricing.new_total, 12000);
    assert!(preview.changes.iter().any(|c| c.field == "add_ons"));
}

#[tokio::test]
async fn test_commit_consumes_rate_limit() {
    let h = Harness::new();
    h.set_rules(CourseEditRules {
        max_edits_per_window: 1,
        ..CourseEditRules::default()
    })
    .await;
    let booking = h.booking(72, 2, 10000).await;

    // Previews only read the counter
    for _ in 0..3 {
        let preview = h
            .orchestrator
            .calculate_edit_preview(booking.id, &players(3), &golfer())
            .await
            .unwrap();
        assert!(preview.validation.is_valid());
    }

    h.orchestrator
        .execute_edit(booking.id, &players(3), &golfer(), "edit-1")
        .await
        .unwrap();
    let err = h
        .orchestrator
        .execute_edit(booking.id, &players(4), &golfer(), "edit-2")
        .await
        .unwrap_err();

    match err {
        EditError::PolicyViolation(violations) => assert!(violations
            .iter()
            .any(|v| matches!(v, EditViolation::RateLimited { limit: 1, .. }))),
        other => panic!("unexpected error: {:?}", other),
    }
}

// ==========================================
// Transfers
// ==========================================

#[tokio::test]
async fn test_transfer_charges_fee_and_records_owners() {
    let h = Harness::new();
    let booking = h.booking(72, 2, 10000).await;
    let new_owner = customer("cust-2", "Sam Putter");

    let outcome = h
        .orchestrator
        .transfer_booking(booking.id, new_owner.clone(), &golfer())
        .await
        .unwrap();

    assert_eq!(outcome.transfer_fee, 2500);
    assert_eq!(outcome.booking.customer_info, new_owner);
    let fee = h.payments.get_intent(outcome.fee_intent_id.as_deref().unwrap()).await.unwrap();
    assert_eq!(fee.amount, 2500);

    let history = h.audit_repo.entries_for_booking(booking.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, AuditAction::BookingTransferred);
    assert_eq!(history[0].metadata["transfer_fee"], 2500);
    let change = history[0].changes.iter().find(|c| c.field == "customer_info").unwrap();
    assert_eq!(change.old_value["customer_id"], "cust-1");
    assert_eq!(change.new_value["customer_id"], "cust-2");
}

#[tokio::test]
async fn test_transfer_inside_lock_window_rejected() {
    let h = Harness::new();
    let booking = h.booking(4, 2, 10000).await;
    let intents = h.payment_repo.intent_count().await;

    let err = h
        .orchestrator
        .transfer_booking(booking.id, customer("cust-2", "Sam Putter"), &golfer())
        .await
        .unwrap_err();

    assert!(matches!(err, EditError::PolicyViolation(_)));
    assert_eq!(h.payment_repo.intent_count().await, intents);
    assert_eq!(h.stored(booking.id).await, booking);
}

// ==========================================
// Cancellation
// ==========================================

fn cancel_request(reason: CancellationReason) -> CancelBookingRequest {
    CancelBookingRequest {
        reason,
        note: None,
        admin_override: None,
    }
}

#[tokio::test]
async fn test_early_cancellation_refunds_in_full() {
    let h = Harness::new();
    let booking = h.booking(50, 4, 20000).await;

    let outcome = h
        .orchestrator
        .cancel_booking(
            booking.id,
            &cancel_request(CancellationReason::CustomerRequest),
            &golfer(),
            "cancel-1",
        )
        .await
        .unwrap();

    let CancellationOutcome::Canceled {
        booking: canceled,
        calculation,
        refund_ids,
        ..
    } = outcome
    else {
        panic!("expected a cancellation");
    };
    assert_eq!(calculation.net_refund, 20000);
    assert_eq!(canceled.status(), BookingStatus::CanceledCustomer);
    assert_eq!(canceled.payment_status, BookingPaymentStatus::Refunded);
    assert_eq!(refund_ids.len(), 1);
    assert_eq!(h.inventory.slot(h.course_id, booking.tee_time).await.reserved, 0);
    assert_eq!(h.audit_actions(booking.id).await, vec![AuditAction::BookingCanceled]);

    // Same key replays instead of refunding twice
    h.orchestrator
        .cancel_booking(
            booking.id,
            &cancel_request(CancellationReason::CustomerRequest),
            &golfer(),
            "cancel-1",
        )
        .await
        .unwrap();
    assert_eq!(h.gateway.refund_calls(), 1);
}

#[tokio::test]
async fn test_cancel_after_upsize_refunds_full_total() {
    let h = Harness::new();
    let booking = h.booking(72, 2, 10000).await;

    let edit = h
        .orchestrator
        .execute_edit(booking.id, &players(4), &golfer(), "edit-1")
        .await
        .unwrap();
    assert_eq!(edit.booking.total_amount, 20000);

    let outcome = h
        .orchestrator
        .cancel_booking(
            booking.id,
            &cancel_request(CancellationReason::CustomerRequest),
            &golfer(),
            "cancel-1",
        )
        .await
        .unwrap();

    let CancellationOutcome::Canceled {
        booking: canceled,
        calculation,
        refund_ids,
        ..
    } = outcome
    else {
        panic!("expected a cancellation");
    };
    assert_eq!(calculation.net_refund, 20000);
    assert_eq!(canceled.payment_status, BookingPaymentStatus::Refunded);
    assert_eq!(refund_ids.len(), 2);

    let primary = h.payments.get_refund(&refund_ids[0]).await.unwrap();
    assert_eq!(primary.payment_intent_id, booking.payment_intent_id);
    assert_eq!(primary.amount, 10000);
    let upsize = h.payments.get_refund(&refund_ids[1]).await.unwrap();
    assert_eq!(Some(upsize.payment_intent_id), edit.charge_intent_id);
    assert_eq!(upsize.amount, 10000);
    assert_eq!(h.inventory.slot(h.course_id, booking.tee_time).await.reserved, 0);
}

#[tokio::test]
async fn test_late_cancellation_keeps_payment() {
    let h = Harness::new();
    let booking = h.booking(10, 4, 20000).await;

    let outcome = h
        .orchestrator
        .cancel_booking(
            booking.id,
            &cancel_request(CancellationReason::CustomerRequest),
            &golfer(),
            "cancel-1",
        )
        .await
        .unwrap();

    let CancellationOutcome::Canceled {
        booking: canceled,
        calculation,
        refund_ids,
        ..
    } = outcome
    else {
        panic!("expected a cancellation");
    };
    assert_eq!(calculation.net_refund, 0);
    assert_eq!(calculation.fixed_fee, 1000);
    assert!(refund_ids.is_empty());
    assert_eq!(canceled.payment_status, BookingPaymentStatus::Paid);
    assert_eq!(h.gateway.refund_calls(), 0);
}

#[tokio::test]
async fn test_large_refund_goes_to_manual_review() {
    let h = Harness::new();
    let booking = h.booking(72, 4, 90000).await;

    let outcome = h
        .orchestrator
        .cancel_booking(
            booking.id,
            &cancel_request(CancellationReason::CustomerRequest),
            &golfer(),
            "cancel-1",
        )
        .await
        .unwrap();

    assert!(matches!(outcome, CancellationOutcome::ManualReviewRequired { .. }));
    assert_eq!(h.stored(booking.id).await, booking);
    assert_eq!(h.gateway.refund_calls(), 0);
    assert_eq!(h.audit_actions(booking.id).await, vec![AuditAction::ManualReviewRequested]);
}

#[tokio::test]
async fn test_justified_override_cancels_as_admin() {
    let h = Harness::new();
    let booking = h.booking(10, 4, 20000).await;
    let request = CancelBookingRequest {
        reason: CancellationReason::Medical,
        note: Some("Doctor's note on file".to_string()),
        admin_override: Some(AdminOverride {
            refund_percent: 50,
            justification: Some("Medical emergency".to_string()),
        }),
    };

    let outcome = h
        .orchestrator
        .cancel_booking(booking.id, &request, &staff(), "cancel-1")
        .await
        .unwrap();

    let CancellationOutcome::Canceled {
        booking: canceled,
        calculation,
        ..
    } = outcome
    else {
        panic!("expected a cancellation");
    };
    assert_eq!(calculation.net_refund, 10000);
    assert_eq!(canceled.status(), BookingStatus::CanceledAdmin);
    assert_eq!(canceled.payment_status, BookingPaymentStatus::PartiallyRefunded);

    assert_eq!(
        h.audit_actions(booking.id).await,
        vec![AuditAction::BookingCanceled, AuditAction::PolicyOverride]
    );
    let history = h.audit_repo.entries_for_booking(booking.id).await.unwrap();
    assert_eq!(history[0].reason.as_deref(), Some("Doctor's note on file"));
    assert_eq!(history[0].metadata["override_applied"], true);
    assert_eq!(history[1].reason.as_deref(), Some("Medical emergency"));
    assert_eq!(history[1].metadata["refund_percent"], 50);
    assert_eq!(history[1].metadata["net_refund"], 10000);
}

#[tokio::test]
async fn test_customer_cannot_cancel_after_tee_time() {
    let h = Harness::new();
    let booking = h.booking(2, 4, 20000).await;
    h.clock.advance(Duration::hours(3));

    let err = h
        .orchestrator
        .cancel_booking(
            booking.id,
            &cancel_request(CancellationReason::CustomerRequest),
            &golfer(),
            "cancel-1",
        )
        .await
        .unwrap_err();

    match err {
        EditError::PolicyViolation(violations) => assert_eq!(violations, vec![EditViolation::TeeTimePassed]),
        other => panic!("unexpected error: {:?}", other),
    }
}

// ==========================================
// Status changes
// ==========================================

#[tokio::test]
async fn test_status_changes_follow_the_table() {
    let h = Harness::new();
    let booking = h.booking(72, 4, 20000).await;

    for status in [BookingStatus::CheckedIn, BookingStatus::Completed] {
        h.orchestrator
            .change_status(booking.id, status, &staff(), None)
            .await
            .unwrap();
    }

    let disputed = h
        .orchestrator
        .change_status(booking.id, BookingStatus::Disputed, &staff(), Some("chargeback".to_string()))
        .await
        .unwrap();
    assert_eq!(disputed.payment_status, BookingPaymentStatus::Disputed);

    let resolved = h
        .orchestrator
        .change_status(booking.id, BookingStatus::Completed, &staff(), None)
        .await
        .unwrap();
    assert_eq!(resolved.payment_status, BookingPaymentStatus::Paid);

    let err = h
        .orchestrator
        .change_status(booking.id, BookingStatus::Confirmed, &staff(), None)
        .await
        .unwrap_err();
    match err {
        EditError::PolicyViolation(violations) => assert_eq!(
            violations,
            vec![EditViolation::InvalidTransition {
                from: BookingStatus::Completed,
                to: BookingStatus::Confirmed,
            }]
        ),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(h.audit_repo.len().await, 4);
}

#[tokio::test]
async fn test_status_change_requires_staff_and_cancel_reason() {
    let h = Harness::new();
    let booking = h.booking(72, 4, 20000).await;

    let err = h
        .orchestrator
        .change_status(booking.id, BookingStatus::CheckedIn, &golfer(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EditError::Validation(_)));

    let err = h
        .orchestrator
        .change_status(booking.id, BookingStatus::CanceledAdmin, &staff(), Some("  ".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, EditError::Validation(_)));
    assert_eq!(h.inventory.release_calls(), 0);

    let canceled = h
        .orchestrator
        .change_status(
            booking.id,
            BookingStatus::CanceledAdmin,
            &staff(),
            Some("Course flooded".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(canceled.status(), BookingStatus::CanceledAdmin);
    assert_eq!(h.inventory.slot(h.course_id, booking.tee_time).await.reserved, 0);
    assert_eq!(h.audit_actions(booking.id).await, vec![AuditAction::BookingCanceled]);
}

// ==========================================
// Disputes
// ==========================================

async fn completed(h: &Harness) -> Booking {
    let booking = h.booking(72, 4, 20000).await;
    for status in [BookingStatus::CheckedIn, BookingStatus::Completed] {
        h.orchestrator
            .change_status(booking.id, status, &staff(), None)
            .await
            .unwrap();
    }
    booking
}

#[tokio::test]
async fn test_dispute_lifecycle_is_audited() {
    let h = Harness::new();
    let booking = completed(&h).await;

    let opened = h
        .orchestrator
        .open_dispute(
            booking.id,
            &OpenDisputeRequest {
                payment_intent_id: None,
                amount: None,
                reason: "Cardholder says round was rained out".to_string(),
            },
            &Actor::system(),
        )
        .await
        .unwrap();
    assert_eq!(opened.booking.status(), BookingStatus::Disputed);
    assert_eq!(opened.booking.payment_status, BookingPaymentStatus::Disputed);
    assert_eq!(opened.dispute.amount, 20000);
    assert_eq!(opened.dispute.payment_intent_id, booking.payment_intent_id);

    let dispute_id = opened.dispute.id.clone();
    h.orchestrator
        .submit_dispute_evidence(
            booking.id,
            &dispute_id,
            &DisputeEvidenceRequest {
                description: "Tee sheet shows the group finished 18 holes".to_string(),
                documents: vec!["tee-sheet.pdf".to_string()],
            },
            &staff(),
        )
        .await
        .unwrap();

    // Closing a dispute needs a written reason
    let err = h
        .orchestrator
        .resolve_dispute(
            booking.id,
            &dispute_id,
            &ResolveDisputeRequest {
                outcome: DisputeOutcome::Won,
                reason: None,
            },
            &staff(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EditError::Validation(_)));

    let resolved = h
        .orchestrator
        .resolve_dispute(
            booking.id,
            &dispute_id,
            &ResolveDisputeRequest {
                outcome: DisputeOutcome::Won,
                reason: Some("Issuer accepted the tee sheet".to_string()),
            },
            &staff(),
        )
        .await
        .unwrap();
    assert_eq!(resolved.booking.status(), BookingStatus::Completed);
    assert_eq!(resolved.booking.payment_status, BookingPaymentStatus::Paid);
    assert_eq!(h.stored(booking.id).await, resolved.booking);

    assert_eq!(
        h.audit_actions(booking.id).await,
        vec![
            AuditAction::StatusChanged,
            AuditAction::StatusChanged,
            AuditAction::DisputeOpened,
            AuditAction::DisputeResponded,
            AuditAction::DisputeResolved,
        ]
    );
    let history = h.audit_repo.entries_for_booking(booking.id).await.unwrap();
    assert_eq!(history[2].metadata["dispute_id"], dispute_id.as_str());
    assert_eq!(history[4].metadata["outcome"], "won");
}

#[tokio::test]
async fn test_lost_dispute_marks_booking_refunded() {
    let h = Harness::new();
    let booking = completed(&h).await;
    let opened = h
        .orchestrator
        .open_dispute(
            booking.id,
            &OpenDisputeRequest {
                payment_intent_id: None,
                amount: Some(5000),
                reason: "Duplicate charge".to_string(),
            },
            &staff(),
        )
        .await
        .unwrap();
    h.orchestrator
        .submit_dispute_evidence(
            booking.id,
            &opened.dispute.id,
            &DisputeEvidenceRequest {
                description: "Single charge on the tee sheet ledger".to_string(),
                documents: Vec::new(),
            },
            &staff(),
        )
        .await
        .unwrap();

    let resolved = h
        .orchestrator
        .resolve_dispute(
            booking.id,
            &opened.dispute.id,
            &ResolveDisputeRequest {
                outcome: DisputeOutcome::Lost,
                reason: Some("Issuer sided with the cardholder".to_string()),
            },
            &staff(),
        )
        .await
        .unwrap();
    assert_eq!(resolved.booking.payment_status, BookingPaymentStatus::Refunded);
}

#[tokio::test]
async fn test_disputes_are_staff_only_and_scoped_to_the_booking() {
    let h = Harness::new();
    let booking = completed(&h).await;
    let other = h.booking(96, 2, 10000).await;
    let request = OpenDisputeRequest {
        payment_intent_id: None,
        amount: None,
        reason: "Unrecognized charge".to_string(),
    };

    let err = h.orchestrator.open_dispute(booking.id, &request, &golfer()).await.unwrap_err();
    assert!(matches!(err, EditError::Forbidden(_)));

    let foreign = OpenDisputeRequest {
        payment_intent_id: Some(other.payment_intent_id.clone()),
        ..request.clone()
    };
    let err = h.orchestrator.open_dispute(booking.id, &foreign, &staff()).await.unwrap_err();
    assert!(matches!(err, EditError::Validation(_)));

    let opened = h.orchestrator.open_dispute(booking.id, &request, &staff()).await.unwrap();
    let err = h
        .orchestrator
        .resolve_dispute(
            other.id,
            &opened.dispute.id,
            &ResolveDisputeRequest {
                outcome: DisputeOutcome::Won,
                reason: Some("wrong booking".to_string()),
            },
            &staff(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EditError::Validation(_)));
    assert_eq!(h.stored(other.id).await, other);
}
