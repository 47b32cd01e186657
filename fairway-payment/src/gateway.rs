use async_trait::async_trait;
use chrono::Utc;
use fairway_core::payment::{GatewayError, GatewayReceipt, PaymentGateway};
use fairway_core::Cents;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// Simulated card processor for tests and local runs.
///
/// Every call sleeps for the configured latency, then consults the failure
/// switches. References encode the operation and target id so log lines stay
/// readable.
#[derive(Default)]
pub struct MockPaymentGateway {
    latency: Duration,
    decline_authorizations: AtomicBool,
    fail_refunds: AtomicBool,
    // Upcoming calls (of any kind) that fail as `Unavailable`
    outages: AtomicU32,
    authorize_calls: AtomicUsize,
    capture_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
    refund_calls: AtomicUsize,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn decline_authorizations(&self, decline: bool) {
        self.decline_authorizations.store(decline, Ordering::SeqCst);
    }

    pub fn fail_refunds(&self, fail: bool) {
        self.fail_refunds.store(fail, Ordering::SeqCst);
    }

    /// Make the next `count` calls fail with a retryable outage
    pub fn fail_next(&self, count: u32) {
        self.outages.store(count, Ordering::SeqCst);
    }

    pub fn authorize_calls(&self) -> usize {
        self.authorize_calls.load(Ordering::SeqCst)
    }

    pub fn capture_calls(&self) -> usize {
        self.capture_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    pub fn refund_calls(&self) -> usize {
        self.refund_calls.load(Ordering::SeqCst)
    }

    /// Total calls of every kind
    pub fn total_calls(&self) -> usize {
        self.authorize_calls() + self.capture_calls() + self.cancel_calls() + self.refund_calls()
    }

    async fn simulate(&self, op: &str, target: &str) -> Result<GatewayReceipt, GatewayError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let outage = self
            .outages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if outage {
            return Err(GatewayError::Unavailable(format!("simulated outage during {}", op)));
        }

        Ok(GatewayReceipt {
            reference: format!("mock_{}_{}", op, target),
            processed_at: Utc::now(),
        })
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn authorize(
        &self,
        intent_id: &str,
        _amount: Cents,
        _currency: &str,
    ) -> Result<GatewayReceipt, GatewayError> {
        self.authorize_calls.fetch_add(1, Ordering::SeqCst);
        if self.decline_authorizations.load(Ordering::SeqCst) {
            return Err(GatewayError::Declined("card_declined".to_string()));
        }
        self.simulate("auth", intent_id).await
    }

    async fn capture(&self, intent_id: &str, _amount: Cents) -> Result<GatewayReceipt, GatewayError> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate("capture", intent_id).await
    }

    async fn cancel(&self, intent_id: &str) -> Result<GatewayReceipt, GatewayError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate("cancel", intent_id).await
    }

    async fn refund(
        &self,
        refund_id: &str,
        _intent_id: &str,
        _amount: Cents,
    ) -> Result<GatewayReceipt, GatewayError> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(GatewayError::Declined("refund_rejected".to_string()));
        }
        self.simulate("refund", refund_id).await
    }
}
