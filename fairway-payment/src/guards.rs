use chrono::{DateTime, Duration, Utc};
use fairway_core::payment::{PaymentIntent, PaymentIntentStatus};
use fairway_core::{format_cents, Cents, PaymentPolicies};
use serde::{Deserialize, Serialize};

/// The specific constraint a refund request violates
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefundDenial {
    #[error("payment {intent_id} has not been captured (status {status})")]
    NotCaptured { intent_id: String, status: &'static str },
    #[error("refund of {} is below the minimum of {}", format_cents(*.amount), format_cents(*.minimum))]
    BelowMinimum { amount: Cents, minimum: Cents },
    #[error("refund of {} exceeds the remaining balance of {}", format_cents(*.requested), format_cents(*.remaining))]
    ExceedsBalance { requested: Cents, remaining: Cents },
    #[error("refund window closed {max_age_days} days after capture")]
    WindowClosed { captured_at: DateTime<Utc>, max_age_days: i64 },
}

/// Check a refund of `amount` against an intent that has already had
/// `already_refunded` returned (pending and succeeded refunds).
pub fn can_refund(
    intent: &PaymentIntent,
    already_refunded: Cents,
    amount: Cents,
    policies: &PaymentPolicies,
    now: DateTime<Utc>,
) -> Result<(), RefundDenial> {
    let captured_at = match (intent.status, intent.captured_at) {
        (PaymentIntentStatus::Succeeded, Some(at)) => at,
        _ => {
            return Err(RefundDenial::NotCaptured {
                intent_id: intent.id.clone(),
                status: intent.status.as_str(),
            })
        }
    };

    if amount < policies.min_refund_amount {
        return Err(RefundDenial::BelowMinimum {
            amount,
            minimum: policies.min_refund_amount,
        });
    }

    let remaining = (intent.amount - already_refunded).max(0);
    if amount > remaining {
        return Err(RefundDenial::ExceedsBalance {
            requested: amount,
            remaining,
        });
    }

    if now > captured_at + Duration::days(policies.max_refund_age_days) {
        return Err(RefundDenial::WindowClosed {
            captured_at,
            max_age_days: policies.max_refund_age_days,
        });
    }

    Ok(())
}

/// Split a refund of `amount` across `(intent_id, refundable balance)` pairs,
/// taking from each in order. Balances below `minimum` cannot be refunded and
/// are skipped. A trailing slice below `minimum` borrows from the one before it.
pub fn allocate_refund(
    balances: &[(String, Cents)],
    amount: Cents,
    minimum: Cents,
) -> Result<Vec<(String, Cents)>, RefundDenial> {
    if amount < minimum {
        return Err(RefundDenial::BelowMinimum { amount, minimum });
    }

    let mut slices: Vec<(String, Cents)> = Vec::new();
    let mut left = amount;
    for (intent_id, balance) in balances {
        if left == 0 {
            break;
        }
        if *balance < minimum {
            continue;
        }
        let take = left.min(*balance);
        slices.push((intent_id.clone(), take));
        left -= take;
    }

    if left > 0 {
        return Err(RefundDenial::ExceedsBalance {
            requested: amount,
            remaining: amount - left,
        });
    }

    if let [.., (_, previous), (_, last)] = slices.as_mut_slice() {
        if *last < minimum {
            let short = minimum - *last;
            if *previous - short < minimum {
                return Err(RefundDenial::BelowMinimum {
                    amount: *last,
                    minimum,
                });
            }
            *previous -= short;
            *last = minimum;
        }
    }

    Ok(slices)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AuthorizationHealth {
    Healthy { expires_at: DateTime<Utc> },
    /// Inside the warning window; re-authorize or capture before `expires_at`
    Expiring { expires_at: DateTime<Utc>, hours_remaining: i64 },
    Expired { expired_at: DateTime<Utc> },
    /// No live hold: never authorized, already captured or canceled
    NotAuthorized,
}

pub fn is_authorization_expiring(
    intent: &PaymentIntent,
    warning_days: i64,
    now: DateTime<Utc>,
) -> AuthorizationHealth {
    let expires_at = match (intent.status, intent.authorization_expires_at) {
        (PaymentIntentStatus::RequiresCapture, Some(at)) => at,
        _ => return AuthorizationHealth::NotAuthorized,
    };

    if now >= expires_at {
        AuthorizationHealth::Expired { expired_at: expires_at }
    } else if expires_at - now <= Duration::days(warning_days) {
        AuthorizationHealth::Expiring {
            expires_at,
            hours_remaining: (expires_at - now).num_hours(),
        }
    } else {
        AuthorizationHealth::Healthy { expires_at }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fairway_core::payment::CaptureMethod;
    use uuid::Uuid;

    fn captured(amount: Cents, now: DateTime<Utc>) -> PaymentIntent {
        let mut intent = PaymentIntent::new(Uuid::new_v4(), amount, "usd", CaptureMethod::Automatic, now);
        intent.advance(PaymentIntentStatus::RequiresCapture, now).unwrap();
        intent.advance(PaymentIntentStatus::Succeeded, now).unwrap();
        intent
    }

    #[test]
    fn test_refund_reasons() {
        let now = Utc::now();
        let policies = PaymentPolicies::default();
        let intent = captured(10000, now);

        assert_eq!(can_refund(&intent, 0, 10000, &policies, now), Ok(()));
        assert_eq!(
            can_refund(&intent, 0, 49, &policies, now),
            Err(RefundDenial::BelowMinimum { amount: 49, minimum: 50 })
        );
        assert_eq!(
            can_refund(&intent, 8000, 3000, &policies, now),
            Err(RefundDenial::ExceedsBalance {
                requested: 3000,
                remaining: 2000
            })
        );
        assert!(matches!(
            can_refund(&intent, 0, 1000, &policies, now + Duration::days(181)),
            Err(RefundDenial::WindowClosed { max_age_days: 180, .. })
        ));
    }

    #[test]
    fn test_uncaptured_intent_cannot_refund() {
        let now = Utc::now();
        let intent = PaymentIntent::new(Uuid::new_v4(), 5000, "usd", CaptureMethod::Manual, now);
        let denial = can_refund(&intent, 0, 1000, &PaymentPolicies::default(), now).unwrap_err();
        assert!(matches!(denial, RefundDenial::NotCaptured { .. }));
        assert!(denial.to_string().contains("requires_confirmation"));
    }

    #[test]
    fn test_refund_spreads_across_balances_in_order() {
        let balances = vec![("pi_booking".to_string(), 10000), ("pi_edit".to_string(), 5000)];

        assert_eq!(
            allocate_refund(&balances, 15000, 50),
            Ok(vec![("pi_booking".to_string(), 10000), ("pi_edit".to_string(), 5000)])
        );
        assert_eq!(
            allocate_refund(&balances, 4000, 50),
            Ok(vec![("pi_booking".to_string(), 4000)])
        );
        assert_eq!(
            allocate_refund(&balances, 15001, 50),
            Err(RefundDenial::ExceedsBalance {
                requested: 15001,
                remaining: 15000
            })
        );
    }

    #[test]
    fn test_refund_slices_respect_minimum() {
        // The 30 cent remainder borrows from the first slice
        let balances = vec![("pi_a".to_string(), 10000), ("pi_b".to_string(), 5000)];
        assert_eq!(
            allocate_refund(&balances, 10030, 50),
            Ok(vec![("pi_a".to_string(), 9980), ("pi_b".to_string(), 50)])
        );

        // Dust balances are skipped
        let balances = vec![("pi_a".to_string(), 20), ("pi_b".to_string(), 5000)];
        assert_eq!(allocate_refund(&balances, 3000, 50), Ok(vec![("pi_b".to_string(), 3000)]));

        assert_eq!(
            allocate_refund(&balances, 30, 50),
            Err(RefundDenial::BelowMinimum { amount: 30, minimum: 50 })
        );
    }

    #[test]
    fn test_authorization_health() {
        let now = Utc::now();
        let mut intent = PaymentIntent::new(Uuid::new_v4(), 5000, "usd", CaptureMethod::Manual, now);
        assert_eq!(is_authorization_expiring(&intent, 2, now), AuthorizationHealth::NotAuthorized);

        intent.advance(PaymentIntentStatus::RequiresCapture, now).unwrap();
        let expires_at = now + Duration::days(7);
        intent.authorization_expires_at = Some(expires_at);

        assert_eq!(
            is_authorization_expiring(&intent, 2, now),
            AuthorizationHealth::Healthy { expires_at }
        );
        assert_eq!(
            is_authorization_expiring(&intent, 2, now + Duration::days(6)),
            AuthorizationHealth::Expiring {
                expires_at,
                hours_remaining: 24
            }
        );
        assert_eq!(
            is_authorization_expiring(&intent, 2, now + Duration::days(8)),
            AuthorizationHealth::Expired { expired_at: expires_at }
        );
    }
}
