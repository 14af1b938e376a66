//! Order aggregate.
//!
//! An order is created `Pending` at checkout with its totals fixed, collects
//! the correlation tokens of every payment attempt and is finalized exactly
//! once, to `Paid` or `Failed`.

use crate::promo::{self, PromoRejection};
use crate::types::{
    AddOn, ContactInfo, CorrelationToken, LineItem, Money, OrderId, OrderStatus, OrderTotals,
    PaymentEvidence, PaymentRail, PromoCode, PromoSnapshot,
};
use crate::validation::{is_valid_email, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from order creation and status transitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    /// Checkout input rejected
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Promo code rejected
    #[error(transparent)]
    Promo(#[from] PromoRejection),

    /// Provider reported a different amount than the order total
    #[error("payment amount {actual} does not match order total {expected}")]
    AmountMismatch {
        /// Order total
        expected: Money,
        /// Amount reported by the provider
        actual: Money,
    },

    /// Order already reached a terminal status
    #[error("order is already {status}")]
    AlreadyFinalized {
        /// Current status
        status: OrderStatus,
    },
}

/// Outcome of a status transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// Status changed
    Applied,
    /// Request repeated an earlier transition; nothing changed
    Unchanged,
}

/// What the buyer submitted at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDraft {
    /// Buyer contact
    pub contact: ContactInfo,
    /// Payment rail
    pub rail: PaymentRail,
    /// Purchased items
    pub items: Vec<LineItem>,
    /// Extras
    #[serde(default)]
    pub add_ons: Vec<AddOn>,
}

/// Purchase attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order id
    pub id: OrderId,
    /// Buyer contact
    pub contact: ContactInfo,
    /// Payment rail
    pub rail: PaymentRail,
    /// Purchased items
    pub items: Vec<LineItem>,
    /// Extras
    pub add_ons: Vec<AddOn>,
    /// Totals fixed at creation
    pub totals: OrderTotals,
    /// Promo applied at checkout
    pub promo: Option<PromoSnapshot>,
    /// Status
    pub status: OrderStatus,
    /// Tokens of every payment initiation, oldest first
    pub tokens: Vec<CorrelationToken>,
    /// Provider confirmation once paid
    pub evidence: Option<PaymentEvidence>,
    /// Reason once failed
    pub failure_reason: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// When the order became paid or failed
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Create a pending order, computing its totals.
    ///
    /// The promo (if any) is evaluated against subtotal plus add-ons.
    ///
    /// # Errors
    ///
    /// - [`OrderError::Validation`] for empty items, zero quantities, blank
    ///   names, a missing contact name, a malformed email or overflowing totals
    /// - [`OrderError::Promo`] when a promo record is given but not redeemable
    pub fn create(
        id: OrderId,
        draft: OrderDraft,
        promo: Option<&PromoCode>,
        now: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        validate_draft(&draft)?;

        let subtotal = draft
            .items
            .iter()
            .map(LineItem::line_total)
            .try_fold(Money::ZERO, |acc, line| acc.checked_add(line?))
            .ok_or(ValidationError::AmountOverflow)?;
        let add_ons = Money::checked_sum(draft.add_ons.iter().map(|a| a.amount))
            .ok_or(ValidationError::AmountOverflow)?;
        let base = subtotal
            .checked_add(add_ons)
            .ok_or(ValidationError::AmountOverflow)?;

        let promo = promo
            .map(|record| promo::snapshot(Some(record), base, now))
            .transpose()?;
        let discount = promo.as_ref().map_or(Money::ZERO, |p| p.discount_amount);
        let total = base
            .checked_sub(discount)
            .ok_or(ValidationError::AmountOverflow)?;

        Ok(Self {
            id,
            contact: draft.contact,
            rail: draft.rail,
            items: draft.items,
            add_ons: draft.add_ons,
            totals: OrderTotals {
                subtotal,
                add_ons,
                discount,
                total,
            },
            promo,
            status: OrderStatus::Pending,
            tokens: Vec::new(),
            evidence: None,
            failure_reason: None,
            created_at: now,
            finalized_at: None,
        })
    }

    /// Number of units across all line items.
    #[must_use]
    pub fn unit_count(&self) -> u64 {
        self.items.iter().map(|i| u64::from(i.quantity)).sum()
    }

    /// Record a payment initiation token.
    ///
    /// Appending a token the order already holds is a no-op.
    ///
    /// # Errors
    ///
    /// [`OrderError::AlreadyFinalized`] when the order is no longer pending.
    pub fn attach_token(&mut self, token: CorrelationToken) -> Result<(), OrderError> {
        if self.status.is_terminal() {
            return Err(OrderError::AlreadyFinalized {
                status: self.status,
            });
        }
        if !self.tokens.contains(&token) {
            self.tokens.push(token);
        }
        Ok(())
    }

    /// Mark the order paid.
    ///
    /// # Errors
    ///
    /// - [`OrderError::AmountMismatch`] when the evidence amount differs from
    ///   the total (the order stays pending)
    /// - [`OrderError::AlreadyFinalized`] when the order failed, or was paid
    ///   under a different provider reference
    pub fn transition_to_paid(&mut self, evidence: PaymentEvidence) -> Result<Transition, OrderError> {
        match self.status {
            OrderStatus::Pending => {
                if evidence.amount != self.totals.total {
                    return Err(OrderError::AmountMismatch {
                        expected: self.totals.total,
                        actual: evidence.amount,
                    });
                }
                self.status = OrderStatus::Paid;
                self.finalized_at = Some(evidence.confirmed_at);
                self.evidence = Some(evidence);
                Ok(Transition::Applied)
            },
            OrderStatus::Paid
                if self
                    .evidence
                    .as_ref()
                    .is_some_and(|e| e.provider_reference == evidence.provider_reference) =>
            {
                Ok(Transition::Unchanged)
            },
            status => Err(OrderError::AlreadyFinalized { status }),
        }
    }

    /// Mark the order failed.
    ///
    /// # Errors
    ///
    /// [`OrderError::AlreadyFinalized`] when the order is paid.
    pub fn transition_to_failed(
        &mut self,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Transition, OrderError> {
        match self.status {
            OrderStatus::Pending => {
                self.status = OrderStatus::Failed;
                self.failure_reason = Some(reason.into());
                self.finalized_at = Some(now);
                Ok(Transition::Applied)
            },
            OrderStatus::Failed => Ok(Transition::Unchanged),
            OrderStatus::Paid => Err(OrderError::AlreadyFinalized {
                status: OrderStatus::Paid,
            }),
        }
    }
}

fn validate_draft(draft: &OrderDraft) -> Result<(), ValidationError> {
    if draft.contact.name.trim().is_empty() {
        return Err(ValidationError::MissingContactName);
    }
    if let Some(email) = draft.contact.email.as_deref() {
        if !is_valid_email(email) {
            return Err(ValidationError::InvalidEmail(email.to_string()));
        }
    }
    if draft.items.is_empty() {
        return Err(ValidationError::NoLineItems);
    }
    for (index, item) in draft.items.iter().enumerate() {
        if item.quantity == 0 {
            return Err(ValidationError::ZeroQuantity { index });
        }
        if item.name.trim().is_empty() {
            return Err(ValidationError::EmptyName {
                field: format!("items[{index}].name"),
            });
        }
    }
    for (index, add_on) in draft.add_ons.iter().enumerate() {
        if add_on.name.trim().is_empty() {
            return Err(ValidationError::EmptyName {
                field: format!("add_ons[{index}].name"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{DiscountType, EventId, ListingRef};
    use boxoffice_core::environment::Clock;
    use boxoffice_testing::test_clock;
    use proptest::prelude::*;

    fn contact() -> ContactInfo {
        ContactInfo {
            name: "Wanjiru Kamau".to_string(),
            email: Some("wanjiru@example.com".to_string()),
            phone: Some("0712345678".to_string()),
        }
    }

    fn item(unit_price: u64, quantity: u32) -> LineItem {
        LineItem {
            listing: ListingRef::Event(EventId::new()),
            name: "Nairobi Jazz Night".to_string(),
            unit_price: Money::from_cents(unit_price),
            quantity,
            variant_label: Some("Regular".to_string()),
        }
    }

    fn draft(items: Vec<LineItem>, add_ons: Vec<AddOn>) -> OrderDraft {
        OrderDraft {
            contact: contact(),
            rail: PaymentRail::MobileMoney,
            items,
            add_ons,
        }
    }

    fn evidence(reference: &str, amount: u64) -> PaymentEvidence {
        PaymentEvidence {
            provider_reference: reference.to_string(),
            amount: Money::from_cents(amount),
            confirmed_at: test_clock().now(),
        }
    }

    fn pending_order(total: u64) -> Order {
        Order::create(OrderId::new(), draft(vec![item(total, 1)], vec![]), None, test_clock().now()).unwrap()
    }

    #[test]
    fn totals_apply_promo_to_subtotal_plus_add_ons() {
        let promo = PromoCode::new("SAVE10", DiscountType::percent(10));
        let add_on = AddOn {
            name: "Shuttle".to_string(),
            amount: Money::from_cents(500),
        };
        let order = Order::create(
            OrderId::new(),
            draft(vec![item(5_000, 1)], vec![add_on]),
            Some(&promo),
            test_clock().now(),
        )
        .unwrap();

        assert_eq!(order.totals.subtotal, Money::from_cents(5_000));
        assert_eq!(order.totals.add_ons, Money::from_cents(500));
        assert_eq!(order.totals.discount, Money::from_cents(550));
        assert_eq!(order.totals.total, Money::from_cents(4_950));
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.promo.as_ref().map(|p| p.code.as_str()), Some("SAVE10"));
    }

    #[test]
    fn create_rejects_invalid_drafts() {
        let now = test_clock().now();

        let empty = Order::create(OrderId::new(), draft(vec![], vec![]), None, now);
        assert_eq!(empty, Err(OrderError::Validation(ValidationError::NoLineItems)));

        let zero = Order::create(OrderId::new(), draft(vec![item(100, 0)], vec![]), None, now);
        assert_eq!(zero, Err(OrderError::Validation(ValidationError::ZeroQuantity { index: 0 })));

        let mut bad_email = draft(vec![item(100, 1)], vec![]);
        bad_email.contact.email = Some("not-an-email".to_string());
        assert!(matches!(
            Order::create(OrderId::new(), bad_email, None, now),
            Err(OrderError::Validation(ValidationError::InvalidEmail(_)))
        ));

        let mut no_name = draft(vec![item(100, 1)], vec![]);
        no_name.contact.name = "  ".to_string();
        assert_eq!(
            Order::create(OrderId::new(), no_name, None, now),
            Err(OrderError::Validation(ValidationError::MissingContactName))
        );
    }

    #[test]
    fn create_rejects_overflowing_totals() {
        let result = Order::create(
            OrderId::new(),
            draft(vec![item(u64::MAX, 2)], vec![]),
            None,
            test_clock().now(),
        );
        assert_eq!(result, Err(OrderError::Validation(ValidationError::AmountOverflow)));
    }

    #[test]
    fn inactive_promo_fails_creation() {
        let mut promo = PromoCode::new("OFF", DiscountType::percent(10));
        promo.active = false;
        let result = Order::create(
            OrderId::new(),
            draft(vec![item(1_000, 1)], vec![]),
            Some(&promo),
            test_clock().now(),
        );
        assert_eq!(result, Err(OrderError::Promo(PromoRejection::Inactive)));
    }

    #[test]
    fn paid_is_terminal_and_idempotent_per_reference() {
        let mut order = pending_order(1_000);

        assert_eq!(order.transition_to_paid(evidence("QK1", 1_000)), Ok(Transition::Applied));
        assert_eq!(order.status, OrderStatus::Paid);

        assert_eq!(order.transition_to_paid(evidence("QK1", 1_000)), Ok(Transition::Unchanged));
        assert_eq!(
            order.transition_to_paid(evidence("QK2", 1_000)),
            Err(OrderError::AlreadyFinalized { status: OrderStatus::Paid })
        );
        assert_eq!(
            order.transition_to_failed("cancelled", test_clock().now()),
            Err(OrderError::AlreadyFinalized { status: OrderStatus::Paid })
        );
        assert_eq!(order.status, OrderStatus::Paid);
    }

    #[test]
    fn amount_mismatch_leaves_order_pending() {
        let mut order = pending_order(1_000);

        assert_eq!(
            order.transition_to_paid(evidence("QK1", 999)),
            Err(OrderError::AmountMismatch {
                expected: Money::from_cents(1_000),
                actual: Money::from_cents(999),
            })
        );
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.evidence.is_none());
    }

    #[test]
    fn failed_is_terminal() {
        let mut order = pending_order(1_000);
        let now = test_clock().now();

        assert_eq!(order.transition_to_failed("insufficient funds", now), Ok(Transition::Applied));
        assert_eq!(order.transition_to_failed("again", now), Ok(Transition::Unchanged));
        assert_eq!(order.failure_reason.as_deref(), Some("insufficient funds"));
        assert_eq!(
            order.transition_to_paid(evidence("QK1", 1_000)),
            Err(OrderError::AlreadyFinalized { status: OrderStatus::Failed })
        );
        assert_eq!(
            order.attach_token(CorrelationToken::new("ws_CO_1")),
            Err(OrderError::AlreadyFinalized { status: OrderStatus::Failed })
        );
    }

    #[test]
    fn tokens_are_appended_once() {
        let mut order = pending_order(1_000);
        order.attach_token(CorrelationToken::new("ws_CO_1")).unwrap();
        order.attach_token(CorrelationToken::new("ws_CO_2")).unwrap();
        order.attach_token(CorrelationToken::new("ws_CO_1")).unwrap();
        assert_eq!(order.tokens.len(), 2);
    }

    fn discount_strategy() -> impl Strategy<Value = DiscountType> {
        prop_oneof![
            (1_u32..=10_000).prop_map(|basis_points| DiscountType::Percentage { basis_points }),
            (1_u64..2_000_000).prop_map(|cents| DiscountType::Fixed { amount: Money::from_cents(cents) }),
        ]
    }

    proptest! {
        #[test]
        fn totals_invariant_holds(
            lines in prop::collection::vec((0_u64..1_000_000, 1_u32..20), 1..6),
            add_ons in prop::collection::vec(0_u64..100_000, 0..4),
            discount in prop::option::of(discount_strategy()),
        ) {
            let items = lines.iter().map(|(price, qty)| item(*price, *qty)).collect();
            let add_ons = add_ons
                .iter()
                .map(|cents| AddOn { name: "Extra".to_string(), amount: Money::from_cents(*cents) })
                .collect();
            let promo = discount.map(|d| PromoCode::new("PROP", d));

            let order = Order::create(
                OrderId::new(),
                draft(items, add_ons),
                promo.as_ref(),
                test_clock().now(),
            )
            .unwrap();

            let t = order.totals;
            let base = t.subtotal.cents() + t.add_ons.cents();
            prop_assert!(t.discount.cents() <= base);
            prop_assert_eq!(t.total.cents() + t.discount.cents(), base);
        }
    }
}
