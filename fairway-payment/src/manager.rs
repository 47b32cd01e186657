use crate::guards::{allocate_refund, can_refund, is_authorization_expiring, AuthorizationHealth};
use crate::{PaymentError, PaymentResult};
use chrono::Duration;
use fairway_core::payment::{
    CaptureMethod, Dispute, DisputeEvidence, DisputeStatus, GatewayError, GatewayReceipt,
    InvalidPaymentTransition, PaymentGateway, PaymentIntent, PaymentIntentStatus, Refund, RefundStatus,
};
use fairway_core::repository::PaymentRepository;
use fairway_core::{format_cents, Cents, Clock, PaymentPolicies};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Intent metadata flag; fees charged with it set to false are never returned
/// by booking-level refunds.
pub const REFUNDABLE_KEY: &str = "refundable";

const REFUND_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(10);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DisputeOutcome {
    Won,
    Lost,
}

enum GatewayCall<'a> {
    Authorize { intent_id: &'a str, amount: Cents, currency: &'a str },
    Capture { intent_id: &'a str, amount: Cents },
    Cancel { intent_id: &'a str },
    Refund { refund_id: &'a str, intent_id: &'a str, amount: Cents },
}

impl GatewayCall<'_> {
    fn name(&self) -> &'static str {
        match self {
            GatewayCall::Authorize { .. } => "authorize",
            GatewayCall::Capture { .. } => "capture",
            GatewayCall::Cancel { .. } => "cancel",
            GatewayCall::Refund { .. } => "refund",
        }
    }
}

/// Gateway wrapper enforcing the per-call timeout and retry budget
#[derive(Clone)]
struct GatewayClient {
    gateway: Arc<dyn PaymentGateway>,
    timeout: std::time::Duration,
    max_retries: u32,
    backoff: std::time::Duration,
}

impl GatewayClient {
    fn new(gateway: Arc<dyn PaymentGateway>, policies: &PaymentPolicies) -> Self {
        Self {
            gateway,
            timeout: std::time::Duration::from_millis(policies.gateway_timeout_ms),
            max_retries: policies.gateway_max_retries,
            backoff: std::time::Duration::from_millis(policies.gateway_retry_backoff_ms),
        }
    }

    async fn dispatch(&self, call: &GatewayCall<'_>) -> Result<GatewayReceipt, GatewayError> {
        match *call {
            GatewayCall::Authorize { intent_id, amount, currency } => {
                self.gateway.authorize(intent_id, amount, currency).await
            }
            GatewayCall::Capture { intent_id, amount } => self.gateway.capture(intent_id, amount).await,
            GatewayCall::Cancel { intent_id } => self.gateway.cancel(intent_id).await,
            GatewayCall::Refund { refund_id, intent_id, amount } => {
                self.gateway.refund(refund_id, intent_id, amount).await
            }
        }
    }

    async fn call(&self, call: GatewayCall<'_>) -> Result<GatewayReceipt, GatewayError> {
        let mut attempt: u32 = 0;
        loop {
            let result = match tokio::time::timeout(self.timeout, self.dispatch(&call)).await {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Timeout),
            };

            match result {
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!("Gateway {} failed ({}), retry {}/{}", call.name(), err, attempt, self.max_retries);
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(err) => {
                    error!("Gateway {} failed: {}", call.name(), err);
                    return Err(err);
                }
                Ok(receipt) => return Ok(receipt),
            }
        }
    }
}

/// Owns the payment intent state machine and the refunds and disputes
/// layered on top of captured intents.
pub struct PaymentManager {
    repo: Arc<dyn PaymentRepository>,
    client: GatewayClient,
    policies: PaymentPolicies,
    clock: Arc<dyn Clock>,
    // Serializes the remaining-balance check with the pending refund insert
    refund_guard: Mutex<()>,
}

impl PaymentManager {
    pub fn new(
        repo: Arc<dyn PaymentRepository>,
        gateway: Arc<dyn PaymentGateway>,
        policies: PaymentPolicies,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            client: GatewayClient::new(gateway, &policies),
            policies,
            clock,
            refund_guard: Mutex::new(()),
        }
    }

    pub fn policies(&self) -> &PaymentPolicies {
        &self.policies
    }

    pub async fn get_intent(&self, intent_id: &str) -> PaymentResult<PaymentIntent> {
        self.repo
            .get_intent(intent_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("payment intent {}", intent_id)))
    }

    pub async fn get_refund(&self, refund_id: &str) -> PaymentResult<Refund> {
        self.repo
            .get_refund(refund_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("refund {}", refund_id)))
    }

    pub async fn get_dispute(&self, dispute_id: &str) -> PaymentResult<Dispute> {
        self.repo
            .get_dispute(dispute_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("dispute {}", dispute_id)))
    }

    // ==========================================
    // Intents
    // ==========================================

    /// Create an intent and place the authorization hold right away.
    /// Automatic-capture intents are captured in the same call.
    pub async fn create_payment_intent(
        &self,
        booking_id: Uuid,
        amount: Cents,
        capture_method: CaptureMethod,
    ) -> PaymentResult<PaymentIntent> {
        if amount <= 0 {
            return Err(PaymentError::Validation(format!(
                "payment amount must be positive, got {}",
                format_cents(amount)
            )));
        }

        let now = self.clock.now();
        let mut intent = PaymentIntent::new(booking_id, amount, &self.policies.currency, capture_method, now);
        self.repo.insert_intent(&intent).await?;

        let authorization = self
            .client
            .call(GatewayCall::Authorize {
                intent_id: &intent.id,
                amount,
                currency: &intent.currency,
            })
            .await;

        let receipt = match authorization {
            Ok(receipt) => receipt,
            Err(err) => {
                intent.advance(PaymentIntentStatus::Canceled, self.clock.now())?;
                intent.cancellation_reason = Some(format!("authorization failed: {}", err));
                self.repo.update_intent(&intent).await?;
                return Err(err.into());
            }
        };

        let authorized_at = self.clock.now();
        intent.advance(PaymentIntentStatus::RequiresCapture, authorized_at)?;
        intent.authorization_expires_at = Some(authorized_at + Duration::days(self.policies.hold_days));
        intent.gateway_reference = Some(receipt.reference);
        self.repo.update_intent(&intent).await?;
        info!("Authorized {} for booking {} ({})", intent.id, booking_id, format_cents(amount));

        if capture_method == CaptureMethod::Automatic {
            return self.capture_payment(&intent.id).await;
        }
        Ok(intent)
    }

    pub async fn capture_payment(&self, intent_id: &str) -> PaymentResult<PaymentIntent> {
        let mut intent = self.get_intent(intent_id).await?;
        let now = self.clock.now();

        if !intent.status.can_advance_to(PaymentIntentStatus::Succeeded) {
            return Err(illegal_move(&intent, PaymentIntentStatus::Succeeded));
        }
        if let AuthorizationHealth::Expired { expired_at } = is_authorization_expiring(&intent, 0, now) {
            return Err(PaymentError::AuthorizationExpired {
                intent_id: intent.id,
                expired_at,
            });
        }

        let receipt = self
            .client
            .call(GatewayCall::Capture {
                intent_id: &intent.id,
                amount: intent.amount,
            })
            .await?;

        intent.advance(PaymentIntentStatus::Succeeded, self.clock.now())?;
        intent.gateway_reference = Some(receipt.reference);
        self.repo.update_intent(&intent).await?;
        info!("Captured {} ({})", intent.id, format_cents(intent.amount));
        Ok(intent)
    }

    /// Release an uncaptured hold
    pub async fn cancel_authorization(&self, intent_id: &str, reason: &str) -> PaymentResult<PaymentIntent> {
        let mut intent = self.get_intent(intent_id).await?;
        if intent.status != PaymentIntentStatus::RequiresCapture {
            return Err(illegal_move(&intent, PaymentIntentStatus::Canceled));
        }

        self.client.call(GatewayCall::Cancel { intent_id: &intent.id }).await?;

        intent.advance(PaymentIntentStatus::Canceled, self.clock.now())?;
        intent.cancellation_reason = Some(reason.to_string());
        self.repo.update_intent(&intent).await?;
        info!("Canceled authorization {}: {}", intent.id, reason);
        Ok(intent)
    }

    /// Authorize and capture in one step. Used for edit surcharges.
    pub async fn charge(&self, booking_id: Uuid, amount: Cents, description: &str) -> PaymentResult<PaymentIntent> {
        self.charge_with(booking_id, amount, description, true).await
    }

    /// Like [`PaymentManager::charge`], but the money stays with the course
    /// when the booking is later refunded.
    pub async fn charge_fee(&self, booking_id: Uuid, amount: Cents, description: &str) -> PaymentResult<PaymentIntent> {
        self.charge_with(booking_id, amount, description, false).await
    }

    async fn charge_with(
        &self,
        booking_id: Uuid,
        amount: Cents,
        description: &str,
        refundable: bool,
    ) -> PaymentResult<PaymentIntent> {
        let mut intent = self
            .create_payment_intent(booking_id, amount, CaptureMethod::Automatic)
            .await?;
        intent
            .metadata
            .insert("description".to_string(), serde_json::Value::String(description.to_string()));
        intent
            .metadata
            .insert(REFUNDABLE_KEY.to_string(), serde_json::Value::Bool(refundable));
        self.repo.update_intent(&intent).await?;
        Ok(intent)
    }

    /// Capture a manual intent once the configured delay passes, unless it
    /// was captured or canceled in the meantime.
    pub fn schedule_auto_capture(self: &Arc<Self>, intent_id: String) -> Option<JoinHandle<()>> {
        let delay = self.policies.auto_capture_delay_secs?;
        let manager = Arc::clone(self);

        Some(tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(delay)).await;

            match manager.get_intent(&intent_id).await {
                Ok(intent) if intent.status == PaymentIntentStatus::RequiresCapture => {
                    if let Err(e) = manager.capture_payment(&intent_id).await {
                        error!("Auto-capture of {} failed: {}", intent_id, e);
                    }
                }
                Ok(intent) => {
                    info!("Skipping auto-capture of {} (status {})", intent_id, intent.status.as_str());
                }
                Err(e) => error!("Auto-capture lookup of {} failed: {}", intent_id, e),
            }
        }))
    }

    pub async fn authorization_health(&self, intent_id: &str, warning_days: i64) -> PaymentResult<AuthorizationHealth> {
        let intent = self.get_intent(intent_id).await?;
        Ok(is_authorization_expiring(&intent, warning_days, self.clock.now()))
    }

    // ==========================================
    // Refunds
    // ==========================================

    /// Sum of pending and succeeded refunds against the intent
    pub async fn refunded_total(&self, intent_id: &str) -> PaymentResult<Cents> {
        let refunds = self.repo.refunds_for_intent(intent_id).await?;
        Ok(refunds
            .iter()
            .filter(|r| r.counts_against_balance())
            .map(|r| r.amount)
            .sum())
    }

    /// Record a pending refund and hand it to the gateway in the background.
    /// Use [`PaymentManager::await_refund`] to observe the outcome.
    pub async fn create_refund(&self, intent_id: &str, amount: Cents, reason: &str) -> PaymentResult<Refund> {
        let refund = {
            let _guard = self.refund_guard.lock().await;

            let intent = self.get_intent(intent_id).await?;
            let refunded = self.refunded_total(intent_id).await?;
            let now = self.clock.now();
            can_refund(&intent, refunded, amount, &self.policies, now)?;

            let refund = Refund {
                id: format!("re_{}", Uuid::new_v4().simple()),
                payment_intent_id: intent.id.clone(),
                amount,
                reason: reason.to_string(),
                status: RefundStatus::Pending,
                created_at: now,
                processed_at: None,
                failure_reason: None,
            };
            self.repo.insert_refund(&refund).await?;
            refund
        };

        info!("Refund {} of {} pending on {}", refund.id, format_cents(amount), intent_id);

        let repo = Arc::clone(&self.repo);
        let client = self.client.clone();
        let clock = Arc::clone(&self.clock);
        let pending = refund.clone();
        tokio::spawn(async move {
            process_refund(repo, client, clock, pending).await;
        });

        Ok(refund)
    }

    /// Wait until the refund leaves `pending`, up to `timeout`
    pub async fn await_refund(&self, refund_id: &str, timeout: std::time::Duration) -> PaymentResult<Refund> {
        let wait = async {
            loop {
                let refund = self.get_refund(refund_id).await?;
                if refund.status != RefundStatus::Pending {
                    return Ok::<Refund, PaymentError>(refund);
                }
                tokio::time::sleep(REFUND_POLL_INTERVAL).await;
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(PaymentError::RefundTimeout {
                refund_id: refund_id.to_string(),
            }),
        }
    }

    /// Create a refund and wait for it to settle. A failed refund becomes an error.
    pub async fn refund_and_wait(
        &self,
        intent_id: &str,
        amount: Cents,
        reason: &str,
        timeout: std::time::Duration,
    ) -> PaymentResult<Refund> {
        let refund = self.create_refund(intent_id, amount, reason).await?;
        let settled = self.await_refund(&refund.id, timeout).await?;

        match settled.status {
            RefundStatus::Succeeded => Ok(settled),
            _ => Err(PaymentError::RefundFailed {
                refund_id: settled.id,
                reason: settled.failure_reason.unwrap_or_else(|| "unknown".to_string()),
            }),
        }
    }

    /// Remaining refundable balance per captured intent of the booking,
    /// `primary` first and the rest oldest first. Fees and intents past the
    /// refund window are left out.
    pub async fn refundable_balances(&self, booking_id: Uuid, primary: &str) -> PaymentResult<Vec<(String, Cents)>> {
        let now = self.clock.now();
        let mut intents = self.repo.intents_for_booking(booking_id).await?;
        intents.sort_by_key(|i| (i.id != primary, i.created_at));

        let mut balances = Vec::new();
        for intent in intents {
            let refundable = intent
                .metadata
                .get(REFUNDABLE_KEY)
                .and_then(|v| v.as_bool())
                .unwrap_or(true);
            let in_window = intent
                .captured_at
                .is_some_and(|at| now <= at + Duration::days(self.policies.max_refund_age_days));
            if !refundable || !in_window || intent.status != PaymentIntentStatus::Succeeded {
                continue;
            }
            let remaining = intent.amount - self.refunded_total(&intent.id).await?;
            if remaining > 0 {
                balances.push((intent.id, remaining));
            }
        }
        Ok(balances)
    }

    /// Refund `amount` of what the booking paid, spread over its captures and
    /// settled one slice at a time. Stops at the first slice that fails.
    pub async fn refund_booking(
        &self,
        booking_id: Uuid,
        primary: &str,
        amount: Cents,
        reason: &str,
        timeout: std::time::Duration,
    ) -> PaymentResult<Vec<Refund>> {
        let balances = self.refundable_balances(booking_id, primary).await?;
        let plan = allocate_refund(&balances, amount, self.policies.min_refund_amount)?;

        let mut settled: Vec<Refund> = Vec::with_capacity(plan.len());
        for (intent_id, slice) in plan {
            match self.refund_and_wait(&intent_id, slice, reason, timeout).await {
                Ok(refund) => settled.push(refund),
                Err(e) => {
                    if !settled.is_empty() {
                        let issued: Vec<&str> = settled.iter().map(|r| r.id.as_str()).collect();
                        error!(
                            "Refund for booking {} stopped part way; already issued: {}",
                            booking_id,
                            issued.join(", ")
                        );
                    }
                    return Err(e);
                }
            }
        }

        info!(
            "Refunded {} to booking {} in {} slice(s)",
            format_cents(amount),
            booking_id,
            settled.len()
        );
        Ok(settled)
    }

    // ==========================================
    // Disputes
    // ==========================================

    pub async fn open_dispute(&self, intent_id: &str, amount: Cents, reason: &str) -> PaymentResult<Dispute> {
        let intent = self.get_intent(intent_id).await?;
        if intent.status != PaymentIntentStatus::Succeeded {
            return Err(PaymentError::Validation(format!(
                "cannot dispute payment {} in status {}",
                intent_id,
                intent.status.as_str()
            )));
        }
        if amount <= 0 || amount > intent.amount {
            return Err(PaymentError::Validation(format!(
                "dispute amount {} is outside 0..{}",
                format_cents(amount),
                format_cents(intent.amount)
            )));
        }

        let now = self.clock.now();
        let dispute = Dispute {
            id: format!("dp_{}", Uuid::new_v4().simple()),
            payment_intent_id: intent.id,
            amount,
            reason: reason.to_string(),
            status: DisputeStatus::NeedsResponse,
            evidence_due_by: now + Duration::days(self.policies.dispute_evidence_days),
            evidence: None,
            created_at: now,
            resolved_at: None,
        };
        self.repo.insert_dispute(&dispute).await?;
        warn!("Dispute {} opened on {} for {}", dispute.id, intent_id, format_cents(amount));
        Ok(dispute)
    }

    pub async fn respond_to_dispute(
        &self,
        dispute_id: &str,
        description: &str,
        documents: Vec<String>,
    ) -> PaymentResult<Dispute> {
        let mut dispute = self.get_dispute(dispute_id).await?;
        let now = self.clock.now();

        if dispute.status != DisputeStatus::NeedsResponse {
            return Err(PaymentError::Validation(format!(
                "dispute {} is not awaiting a response",
                dispute_id
            )));
        }
        if now > dispute.evidence_due_by {
            return Err(PaymentError::Validation(format!(
                "evidence for dispute {} was due by {}",
                dispute_id, dispute.evidence_due_by
            )));
        }
        let description = description.trim();
        if description.chars().count() < self.policies.min_evidence_chars {
            return Err(PaymentError::Validation(format!(
                "evidence description needs at least {} characters",
                self.policies.min_evidence_chars
            )));
        }

        dispute.evidence = Some(DisputeEvidence {
            description: description.to_string(),
            documents,
            submitted_at: now,
        });
        dispute.status = DisputeStatus::UnderReview;
        self.repo.update_dispute(&dispute).await?;
        info!("Evidence submitted for dispute {}", dispute.id);
        Ok(dispute)
    }

    pub async fn resolve_dispute(&self, dispute_id: &str, outcome: DisputeOutcome) -> PaymentResult<Dispute> {
        let mut dispute = self.get_dispute(dispute_id).await?;
        if dispute.status != DisputeStatus::UnderReview {
            return Err(PaymentError::Validation(format!(
                "dispute {} must be under review to resolve",
                dispute_id
            )));
        }

        dispute.status = match outcome {
            DisputeOutcome::Won => DisputeStatus::Won,
            DisputeOutcome::Lost => DisputeStatus::Lost,
        };
        dispute.resolved_at = Some(self.clock.now());
        self.repo.update_dispute(&dispute).await?;
        info!("Dispute {} resolved: {:?}", dispute.id, outcome);
        Ok(dispute)
    }

    /// Drop payment records older than the retention horizon
    pub async fn purge_expired_records(&self) -> PaymentResult<usize> {
        let cutoff = self.clock.now() - Duration::days(self.policies.retention_days);
        let removed = self.repo.purge_before(cutoff).await?;
        info!("Purged {} payment records created before {}", removed, cutoff);
        Ok(removed)
    }
}

fn illegal_move(intent: &PaymentIntent, to: PaymentIntentStatus) -> PaymentError {
    PaymentError::InvalidTransition(InvalidPaymentTransition {
        intent_id: intent.id.clone(),
        from: intent.status.as_str(),
        to: to.as_str(),
    })
}

async fn process_refund(
    repo: Arc<dyn PaymentRepository>,
    client: GatewayClient,
    clock: Arc<dyn Clock>,
    mut refund: Refund,
) {
    let result = client
        .call(GatewayCall::Refund {
            refund_id: &refund.id,
            intent_id: &refund.payment_intent_id,
            amount: refund.amount,
        })
        .await;

    refund.processed_at = Some(clock.now());
    match result {
        Ok(_) => {
            refund.status = RefundStatus::Succeeded;
            info!("Refund {} succeeded", refund.id);
        }
        Err(e) => {
            refund.status = RefundStatus::Failed;
            refund.failure_reason = Some(e.to_string());
            warn!("Refund {} failed: {}", refund.id, e);
        }
    }

    if let Err(e) = repo.update_refund(&refund).await {
        error!("Failed to record outcome of refund {}: {}", refund.id, e);
    }
}
