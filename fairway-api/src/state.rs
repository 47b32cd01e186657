use std::sync::Arc;

use fairway_audit::AuditLog;
use fairway_booking::{BookingOrchestrator, BookingServices};
use fairway_core::repository::{BookingRepository, RateLimitStore};
use fairway_core::Clock;
use fairway_payment::{MockPaymentGateway, PaymentManager};
use fairway_policy::{validate_policies, PolicyEngine, PolicyResult};
use fairway_store::app_config::Config;
use fairway_store::{
    InMemoryAddOnCatalog, InMemoryAuditRepository, InMemoryBookingRepository, InMemoryCourseRulesRepository,
    InMemoryIdempotencyStore, InMemoryInventory, InMemoryPaymentRepository,
};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<BookingOrchestrator>,
    pub audit: Arc<AuditLog>,
    pub payments: Arc<PaymentManager>,
    pub bookings: Arc<dyn BookingRepository>,
}

impl AppState {
    /// Wire the services over in-process stores and the simulated gateway.
    /// Rate limits go through `rate_limiter` so they can be shared across nodes.
    /// Fails when the default cancellation tiers are malformed.
    pub fn in_memory(
        config: &Config,
        rate_limiter: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
    ) -> PolicyResult<Self> {
        validate_policies(&config.edit_rules.cancellation_policies)?;
        let bookings: Arc<dyn BookingRepository> = Arc::new(InMemoryBookingRepository::new());

        let payments = Arc::new(PaymentManager::new(
            Arc::new(InMemoryPaymentRepository::new()),
            Arc::new(MockPaymentGateway::new()),
            config.payments.clone(),
            clock.clone(),
        ));
        let policy = Arc::new(PolicyEngine::new(
            Arc::new(InMemoryCourseRulesRepository::new()),
            config.edit_rules.clone(),
            config.cancellation.clone(),
            clock.clone(),
        ));
        let audit = Arc::new(AuditLog::new(
            Arc::new(InMemoryAuditRepository::new()),
            config.audit.clone(),
            clock.clone(),
        ));

        let orchestrator = Arc::new(BookingOrchestrator::new(BookingServices {
            bookings: bookings.clone(),
            inventory: Arc::new(InMemoryInventory::new(config.edit_rules.max_players)),
            catalog: Arc::new(InMemoryAddOnCatalog::new()),
            rate_limiter,
            idempotency: Arc::new(InMemoryIdempotencyStore::with_ttl(
                chrono::Duration::hours(config.server.idempotency_ttl_hours),
                clock.clone(),
            )),
            policy,
            payments: payments.clone(),
            audit: audit.clone(),
            clock,
        }));

        Ok(Self {
            orchestrator,
            audit,
            payments,
            bookings,
        })
    }
}
