//! Promo code evaluation.
//!
//! Pure functions: looking a code up and counting its usage belong to the
//! checkout service and the promo repository.

use crate::types::{
    CommissionTerms, DiscountType, Money, OrderId, PromoCode, PromoRedemption, PromoSnapshot,
};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Why a promo code cannot be applied.
///
/// Both variants render as the same message so callers cannot probe which
/// codes exist.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoRejection {
    /// No code with that name
    #[error("invalid promo code")]
    NotFound,
    /// Switched off, expired, used up or misconfigured
    #[error("invalid promo code")]
    Inactive,
}

/// Result of applying a valid code to a base amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedDiscount {
    /// Normalised code that was applied
    pub code: String,
    /// Amount taken off the base
    pub amount: Money,
}

/// Evaluate a promo record against `base` (subtotal plus add-ons) at `now`.
///
/// # Errors
///
/// - [`PromoRejection::NotFound`] when `promo` is `None`
/// - [`PromoRejection::Inactive`] when the code is switched off, expired,
///   exhausted or has an unusable discount value
pub fn evaluate(
    promo: Option<&PromoCode>,
    base: Money,
    now: DateTime<Utc>,
) -> Result<AppliedDiscount, PromoRejection> {
    let promo = promo.ok_or(PromoRejection::NotFound)?;

    if !is_redeemable(promo, now) {
        return Err(PromoRejection::Inactive);
    }

    Ok(AppliedDiscount {
        code: promo.code.clone(),
        amount: discount_amount(&promo.discount, base),
    })
}

/// Evaluate and build the snapshot copied onto the order.
///
/// # Errors
///
/// Same as [`evaluate`].
pub fn snapshot(
    promo: Option<&PromoCode>,
    base: Money,
    now: DateTime<Utc>,
) -> Result<PromoSnapshot, PromoRejection> {
    let applied = evaluate(promo, base, now)?;
    let promo = promo.ok_or(PromoRejection::NotFound)?;

    Ok(PromoSnapshot {
        code: applied.code,
        discount: promo.discount,
        discount_amount: applied.amount,
        referrer: promo.referrer,
        commission: promo.commission,
    })
}

/// Whether the record can be used right now.
#[must_use]
pub fn is_redeemable(promo: &PromoCode, now: DateTime<Utc>) -> bool {
    if !promo.active || !promo.discount.is_well_formed() {
        return false;
    }
    if promo.expires_at.is_some_and(|expiry| now >= expiry) {
        return false;
    }
    if promo.max_uses.is_some_and(|max| promo.times_used >= max) {
        return false;
    }
    true
}

/// Discount for `base`; never exceeds `base`.
#[must_use]
pub fn discount_amount(discount: &DiscountType, base: Money) -> Money {
    match *discount {
        DiscountType::Percentage { basis_points } => base.percentage(basis_points.min(10_000)),
        DiscountType::Fixed { amount } => amount.min(base),
    }
}

/// Commission owed to the referrer for a paid order with final `total`.
#[must_use]
pub fn commission_due(terms: &CommissionTerms, total: Money) -> Money {
    match *terms {
        CommissionTerms::Percentage { basis_points } => total.percentage(basis_points.min(10_000)),
        CommissionTerms::Fixed { amount } => amount.min(total),
    }
}

/// Redemption to record for a paid order that used `snapshot`.
///
/// Commission is only owed when the code names a referrer.
#[must_use]
pub fn redemption(
    order_id: OrderId,
    snapshot: &PromoSnapshot,
    total: Money,
    at: DateTime<Utc>,
) -> PromoRedemption {
    PromoRedemption {
        order_id,
        code: snapshot.code.clone(),
        referrer: snapshot.referrer,
        commission: snapshot
            .referrer
            .and(snapshot.commission)
            .map(|terms| commission_due(&terms, total)),
        redeemed_at: at,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use boxoffice_core::environment::Clock;
    use boxoffice_testing::test_clock;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        test_clock().now()
    }

    #[test]
    fn twenty_percent_of_ten_thousand() {
        let promo = PromoCode::new("SAVE20", DiscountType::percent(20));
        let applied = evaluate(Some(&promo), Money::from_cents(10_000), now()).unwrap();
        assert_eq!(applied.amount, Money::from_cents(2_000));
        assert_eq!(applied.code, "SAVE20");
    }

    #[test]
    fn fixed_discount_is_capped_at_base() {
        let promo = PromoCode::new("FLAT5", DiscountType::Fixed { amount: Money::from_cents(500) });
        let applied = evaluate(Some(&promo), Money::from_cents(300), now()).unwrap();
        assert_eq!(applied.amount, Money::from_cents(300));
    }

    #[test]
    fn ten_percent_of_subtotal_plus_add_ons() {
        let promo = PromoCode::new("save10", DiscountType::percent(10));
        let applied = evaluate(Some(&promo), Money::from_cents(5_500), now()).unwrap();
        assert_eq!(applied.amount, Money::from_cents(550));
    }

    #[test]
    fn missing_code_is_not_found() {
        assert_eq!(
            evaluate(None, Money::from_cents(100), now()),
            Err(PromoRejection::NotFound)
        );
    }

    #[test]
    fn inactive_expired_and_exhausted_codes_are_rejected() {
        let mut inactive = PromoCode::new("OFF", DiscountType::percent(10));
        inactive.active = false;

        let mut expired = PromoCode::new("OLD", DiscountType::percent(10));
        expired.expires_at = Some(now() - Duration::minutes(1));

        let mut exhausted = PromoCode::new("GONE", DiscountType::percent(10));
        exhausted.max_uses = Some(3);
        exhausted.times_used = 3;

        for promo in [inactive, expired, exhausted] {
            assert_eq!(
                evaluate(Some(&promo), Money::from_cents(1_000), now()),
                Err(PromoRejection::Inactive),
                "{} should be rejected",
                promo.code
            );
        }
    }

    #[test]
    fn code_with_future_expiry_and_remaining_uses_applies() {
        let mut promo = PromoCode::new("LIVE", DiscountType::percent(50));
        promo.expires_at = Some(now() + Duration::days(1));
        promo.max_uses = Some(3);
        promo.times_used = 2;

        assert!(evaluate(Some(&promo), Money::from_cents(1_000), now()).is_ok());
    }

    #[test]
    fn rejections_render_identically() {
        assert_eq!(PromoRejection::NotFound.to_string(), PromoRejection::Inactive.to_string());
    }

    #[test]
    fn snapshot_copies_referrer_terms() {
        let mut promo = PromoCode::new("INFLUENCER", DiscountType::percent(10));
        promo.referrer = Some(crate::types::ReferrerId::new());
        promo.commission = Some(CommissionTerms::Percentage { basis_points: 500 });

        let snap = snapshot(Some(&promo), Money::from_cents(5_500), now()).unwrap();
        assert_eq!(snap.discount_amount, Money::from_cents(550));
        assert_eq!(snap.referrer, promo.referrer);
        assert_eq!(snap.commission, promo.commission);
    }

    #[test]
    fn commission_due_on_final_total() {
        let pct = CommissionTerms::Percentage { basis_points: 500 };
        assert_eq!(commission_due(&pct, Money::from_cents(4_950)), Money::from_cents(248));

        let fixed = CommissionTerms::Fixed { amount: Money::from_cents(1_000) };
        assert_eq!(commission_due(&fixed, Money::from_cents(400)), Money::from_cents(400));
    }

    #[test]
    fn redemption_owes_commission_only_with_a_referrer() {
        let mut promo = PromoCode::new("INFLUENCER", DiscountType::percent(10));
        promo.commission = Some(CommissionTerms::Percentage { basis_points: 500 });
        let order_id = OrderId::new();

        let anonymous = snapshot(Some(&promo), Money::from_cents(5_500), now()).unwrap();
        let record = redemption(order_id, &anonymous, Money::from_cents(4_950), now());
        assert_eq!(record.commission, None);

        promo.referrer = Some(crate::types::ReferrerId::new());
        let referred = snapshot(Some(&promo), Money::from_cents(5_500), now()).unwrap();
        let record = redemption(order_id, &referred, Money::from_cents(4_950), now());
        assert_eq!(record.order_id, order_id);
        assert_eq!(record.code, "INFLUENCER");
        assert_eq!(record.referrer, promo.referrer);
        assert_eq!(record.commission, Some(Money::from_cents(248)));
    }
}
