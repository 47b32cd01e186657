use crate::{PolicyError, PolicyResult};
use chrono::{DateTime, Utc};
use fairway_core::repository::CourseRulesRepository;
use fairway_core::{format_cents, CancellationConfig, CancellationPolicy, Cents, Clock, CourseEditRules};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancellationReason {
    CustomerRequest,
    Weather,
    CourseClosure,
    Medical,
    Other,
}

impl CancellationReason {
    /// Cancellations the golfer did not cause are refunded in full.
    pub fn bypasses_policy(self) -> bool {
        matches!(self, CancellationReason::Weather | CancellationReason::CourseClosure)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CancellationReason::CustomerRequest => "customer_request",
            CancellationReason::Weather => "weather",
            CancellationReason::CourseClosure => "course_closure",
            CancellationReason::Medical => "medical",
            CancellationReason::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeeItem {
    pub label: String,
    pub amount: Cents,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefundCalculation {
    pub original_amount: Cents,
    pub hours_until_booking: i64,
    pub refund_percent: u8,
    pub gross_refund: Cents,
    pub fixed_fee: Cents,
    pub net_refund: Cents,
    pub description: String,
    pub fees: Vec<FeeItem>,
    /// The tier that produced the numbers, if one did
    pub applied_policy: Option<CancellationPolicy>,
    /// False when the fallback tier was used because nothing matched
    pub policy_matched: bool,
}

fn gross_refund(amount: Cents, percent: u8) -> Cents {
    amount * Cents::from(percent) / 100
}

/// `floor((booking - now) / 1h)`, negative once the tee time has passed.
pub fn hours_until(booking_time: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (booking_time - now).num_seconds().div_euclid(3600)
}

/// Pure tier selection. Deterministic for a given `now`.
pub fn calculate_refund_at(
    policies: &[CancellationPolicy],
    booking_time: DateTime<Utc>,
    total_amount: Cents,
    reason: CancellationReason,
    now: DateTime<Utc>,
) -> RefundCalculation {
    let hours_until_booking = hours_until(booking_time, now);

    if reason.bypasses_policy() {
        return RefundCalculation {
            original_amount: total_amount,
            hours_until_booking,
            refund_percent: 100,
            gross_refund: total_amount,
            fixed_fee: 0,
            net_refund: total_amount,
            description: format!("Full refund: cancellation due to {}", reason.as_str().replace('_', " ")),
            fees: Vec::new(),
            applied_policy: None,
            policy_matched: true,
        };
    }

    let mut tiers = policies.to_vec();
    tiers.sort_by_key(|t| -t.hours_before_min);

    let (tier, matched) = match tiers.iter().find(|t| t.contains(hours_until_booking)) {
        Some(tier) => (Some(tier.clone()), true),
        None => (most_restrictive(&tiers), false),
    };

    let (percent, fee) = tier
        .as_ref()
        .map(|t| (t.refund_percent, t.fixed_fee))
        .unwrap_or((0, 0));
    let gross = gross_refund(total_amount, percent);
    let net = (gross - fee).max(0);

    let description = match (&tier, matched) {
        (Some(t), true) => t.description.clone(),
        (Some(t), false) => format!(
            "No applicable policy for {} hours before tee time; applying most restrictive tier: {}",
            hours_until_booking, t.description
        ),
        (None, _) => "No applicable policy configured; no refund".to_string(),
    };

    let fees = if fee > 0 {
        vec![FeeItem {
            label: format!("Processing fee ({})", format_cents(fee)),
            amount: fee,
        }]
    } else {
        Vec::new()
    };

    RefundCalculation {
        original_amount: total_amount,
        hours_until_booking,
        refund_percent: percent,
        gross_refund: gross,
        fixed_fee: fee,
        net_refund: net,
        description,
        fees,
        applied_policy: tier,
        policy_matched: matched,
    }
}

fn most_restrictive(tiers: &[CancellationPolicy]) -> Option<CancellationPolicy> {
    tiers
        .iter()
        .min_by(|a, b| {
            a.refund_percent
                .cmp(&b.refund_percent)
                .then_with(|| b.fixed_fee.cmp(&a.fixed_fee))
        })
        .cloned()
}

/// Tiers must start at 0h, touch end to end, and leave exactly the top one unbounded.
pub fn validate_policies(policies: &[CancellationPolicy]) -> PolicyResult<()> {
    if policies.is_empty() {
        return Err(PolicyError::InvalidPolicy("at least one tier is required".to_string()));
    }

    let mut tiers = policies.to_vec();
    tiers.sort_by_key(|t| -t.hours_before_min);

    for tier in &tiers {
        if tier.refund_percent > 100 {
            return Err(PolicyError::InvalidPolicy(format!(
                "refund percent {} exceeds 100",
                tier.refund_percent
            )));
        }
        if tier.fixed_fee < 0 {
            return Err(PolicyError::InvalidPolicy("fixed fee cannot be negative".to_string()));
        }
        if let Some(max) = tier.hours_before_max {
            if max <= tier.hours_before_min {
                return Err(PolicyError::InvalidPolicy(format!(
                    "tier [{}h, {}h) is empty",
                    tier.hours_before_min, max
                )));
            }
        }
    }

    if tiers[0].hours_before_max.is_some() {
        return Err(PolicyError::InvalidPolicy("the longest-notice tier must be unbounded".to_string()));
    }

    for pair in tiers.windows(2) {
        let (upper, lower) = (&pair[0], &pair[1]);
        match lower.hours_before_max {
            Some(max) if max == upper.hours_before_min => {}
            Some(max) => {
                return Err(PolicyError::InvalidPolicy(format!(
                    "tiers are not contiguous: {}h does not meet {}h",
                    max, upper.hours_before_min
                )));
            }
            None => {
                return Err(PolicyError::InvalidPolicy("only one tier may be unbounded".to_string()));
            }
        }
    }

    let lowest = tiers.last().map(|t| t.hours_before_min).unwrap_or_default();
    if lowest != 0 {
        return Err(PolicyError::InvalidPolicy(format!(
            "tiers must start at 0 hours, found {}h",
            lowest
        )));
    }

    Ok(())
}

/// Refund policy lookup and calculation, per course
pub struct PolicyEngine {
    rules: Arc<dyn CourseRulesRepository>,
    defaults: CourseEditRules,
    pub(crate) config: CancellationConfig,
    pub(crate) clock: Arc<dyn Clock>,
}

impl PolicyEngine {
    pub fn new(
        rules: Arc<dyn CourseRulesRepository>,
        defaults: CourseEditRules,
        config: CancellationConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rules,
            defaults,
            config,
            clock,
        }
    }

    /// Edit rules for a course, falling back to the configured defaults
    pub async fn course_rules(&self, course_id: Uuid) -> PolicyResult<CourseEditRules> {
        Ok(self
            .rules
            .rules_for(course_id)
            .await?
            .unwrap_or_else(|| self.defaults.clone()))
    }

    pub async fn policies_for(&self, course_id: Uuid) -> PolicyResult<Vec<CancellationPolicy>> {
        Ok(self.course_rules(course_id).await?.cancellation_policies)
    }

    /// Replace a course's tiers after checking they are well formed
    pub async fn set_course_policies(
        &self,
        course_id: Uuid,
        policies: Vec<CancellationPolicy>,
    ) -> PolicyResult<()> {
        validate_policies(&policies)?;
        let mut rules = self.course_rules(course_id).await?;
        rules.cancellation_policies = policies;
        self.rules.save_rules(course_id, &rules).await?;
        tracing::info!("Cancellation policies updated for course {}", course_id);
        Ok(())
    }

    pub async fn calculate_refund(
        &self,
        course_id: Uuid,
        booking_time: DateTime<Utc>,
        total_amount: Cents,
        reason: CancellationReason,
    ) -> PolicyResult<RefundCalculation> {
        let policies = self.policies_for(course_id).await?;
        let calculation = calculate_refund_at(&policies, booking_time, total_amount, reason, self.clock.now());
        if !calculation.policy_matched {
            tracing::warn!(
                "No cancellation tier matched course {} at {}h; fell back to most restrictive",
                course_id,
                calculation.hours_until_booking
            );
        }
        Ok(calculation)
    }

    /// Human-readable summary of a course's tiers for pre-commit display
    pub async fn policy_text(&self, course_id: Uuid) -> PolicyResult<String> {
        let mut tiers = self.policies_for(course_id).await?;
        tiers.sort_by_key(|t| -t.hours_before_min);
        Ok(tiers
            .iter()
            .map(|t| t.description.as_str())
            .collect::<Vec<_>>()
            .join("; "))
    }
}
