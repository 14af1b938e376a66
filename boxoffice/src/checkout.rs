//! Checkout and payment reconciliation.
//!
//! [`CheckoutService`] persists a pending order before asking a gateway to
//! start the payment, attaches every returned token to the order and applies
//! provider results (callback notifications or verify queries) through the
//! repository's conditional finalize. Every caller that observes the order
//! paid records its promo redemption and issues its tickets; both are keyed
//! by order, so the redemption is counted once and tickets are minted once.

use crate::aggregates::{Order, OrderDraft, OrderError, Transition};
use crate::issuance::{IssuanceError, TicketIssuer};
use crate::metrics;
use crate::payment_gateway::{
    validate_request, GatewayError, PaymentGateways, PaymentRequest, ProviderStatus,
};
use crate::promo::{self, AppliedDiscount, PromoRejection};
use crate::storage::{Repositories, StorageError};
use crate::types::{
    normalize_code, AddOn, ContactInfo, CorrelationToken, LineItem, Money, OrderId, OrderStatus,
    OrderTotals, PaymentEvidence, PaymentRail, PromoCode, RedemptionOutcome, Ticket,
};
use crate::validation::ValidationError;
use boxoffice_core::environment::Clock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Checkout errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckoutError {
    /// Input rejected; nothing persisted
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Promo code not usable
    #[error(transparent)]
    Promo(#[from] PromoRejection),

    /// Status transition refused
    #[error(transparent)]
    Order(OrderError),

    /// Provider or network failure; the order stays pending
    #[error("payment initiation failed for order {order_id}: {source}")]
    Gateway {
        /// Order left pending
        order_id: OrderId,
        /// Gateway error
        source: GatewayError,
    },

    /// No such order
    #[error("order {0} not found")]
    NotFound(OrderId),

    /// Token not attached to any order
    #[error("unknown payment token {0}")]
    UnknownToken(CorrelationToken),

    /// Payment can no longer be initiated
    #[error("order {order_id} is already {status}")]
    NotPending {
        /// Order
        order_id: OrderId,
        /// Its status
        status: OrderStatus,
    },

    /// Repository failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Order is paid but its tickets could not be issued
    #[error(transparent)]
    Issuance(#[from] IssuanceError),
}

impl From<OrderError> for CheckoutError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::Validation(e) => Self::Validation(e),
            OrderError::Promo(e) => Self::Promo(e),
            other => Self::Order(other),
        }
    }
}

/// Checkout form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    /// Buyer contact
    pub contact: ContactInfo,
    /// Payment rail
    pub rail: PaymentRail,
    /// Purchased items
    pub items: Vec<LineItem>,
    /// Extras
    #[serde(default)]
    pub add_ons: Vec<AddOn>,
    /// Optional promo code, any case
    #[serde(default)]
    pub promo_code: Option<String>,
}

/// Result of a successful initiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutReceipt {
    /// Pending order
    pub order_id: OrderId,
    /// Token to poll and correlate notifications with
    pub correlation_token: CorrelationToken,
    /// Mobile-money checkout-request id
    pub checkout_request_id: Option<String>,
    /// Hosted checkout page
    pub redirect_url: Option<String>,
    /// Totals charged
    pub totals: OrderTotals,
}

/// Provider result for a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentResult {
    /// Provider confirmed payment
    Success {
        /// Receipt / transaction reference
        provider_reference: String,
        /// Amount paid
        amount: Money,
    },
    /// Provider reported failure
    Failure {
        /// Provider reason
        reason: String,
    },
}

/// Payment status as seen by pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Awaiting payment
    Pending,
    /// Paid
    Paid,
    /// Failed
    Failed,
    /// Token not known
    Unknown,
}

impl From<OrderStatus> for PaymentStatus {
    fn from(status: OrderStatus) -> Self {
        match status {
            OrderStatus::Pending => Self::Pending,
            OrderStatus::Paid => Self::Paid,
            OrderStatus::Failed => Self::Failed,
        }
    }
}

/// Read-only status answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentStatusView {
    /// Status
    pub status: PaymentStatus,
    /// Order the token belongs to
    pub order_id: Option<OrderId>,
    /// Failure reason for failed orders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PaymentStatusView {
    /// View for a token no order holds
    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            status: PaymentStatus::Unknown,
            order_id: None,
            reason: None,
        }
    }

    fn of(order: &Order) -> Self {
        Self {
            status: order.status.into(),
            order_id: Some(order.id),
            reason: order.failure_reason.clone(),
        }
    }
}

/// Outcome of applying a provider result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Order after reconciliation
    pub order: Order,
    /// Whether this call changed the order
    pub transition: Transition,
    /// Tickets, once paid
    pub tickets: Vec<Ticket>,
}

/// Order with its tickets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderView {
    /// Order
    pub order: Order,
    /// Tickets (empty until paid)
    pub tickets: Vec<Ticket>,
}

/// Checkout, reconciliation and order lookup.
#[derive(Clone)]
pub struct CheckoutService {
    repos: Repositories,
    gateways: PaymentGateways,
    issuer: TicketIssuer,
    clock: Arc<dyn Clock>,
}

impl CheckoutService {
    /// Create the service
    #[must_use]
    pub fn new(repos: Repositories, gateways: PaymentGateways, clock: Arc<dyn Clock>) -> Self {
        let issuer = TicketIssuer::new(Arc::clone(&repos.tickets), Arc::clone(&clock));
        Self {
            repos,
            gateways,
            issuer,
            clock,
        }
    }

    /// Repositories the service works on
    #[must_use]
    pub const fn repositories(&self) -> &Repositories {
        &self.repos
    }

    /// Evaluate a promo code against `base` without side effects.
    ///
    /// # Errors
    ///
    /// - [`CheckoutError::Promo`] for unknown or unusable codes
    /// - [`CheckoutError::Storage`] on repository failures
    pub async fn validate_promo(&self, code: &str, base: Money) -> Result<AppliedDiscount, CheckoutError> {
        let record = self.lookup_promo(code).await?;
        Ok(promo::evaluate(record.as_ref(), base, self.clock.now())?)
    }

    /// Create a pending order and start its payment.
    ///
    /// The order is stored before the gateway is called. A gateway failure
    /// leaves it pending so [`CheckoutService::retry_payment`] can try again.
    ///
    /// # Errors
    ///
    /// - [`CheckoutError::Validation`] / [`CheckoutError::Promo`] before
    ///   anything is stored
    /// - [`CheckoutError::Gateway`] when the provider call fails
    /// - [`CheckoutError::Storage`] on repository failures
    #[tracing::instrument(skip(self, request), fields(rail = %request.rail))]
    pub async fn submit(&self, request: CheckoutRequest) -> Result<CheckoutReceipt, CheckoutError> {
        let promo = match request.promo_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => Some(
                self.lookup_promo(code)
                    .await?
                    .ok_or(PromoRejection::NotFound)?,
            ),
            _ => None,
        };

        let draft = OrderDraft {
            contact: request.contact,
            rail: request.rail,
            items: request.items,
            add_ons: request.add_ons,
        };
        let order = Order::create(OrderId::new(), draft, promo.as_ref(), self.clock.now())?;

        validate_request(
            order.rail,
            order.totals.total,
            order.contact.phone.as_deref(),
            order.contact.email.as_deref(),
        )?;

        self.repos.orders.insert(&order).await?;
        metrics::record_order_created();
        tracing::info!(
            order_id = %order.id,
            total_cents = order.totals.total.cents(),
            promo = order.promo.as_ref().map(|p| p.code.as_str()),
            "Order created"
        );

        self.initiate(&order, 0).await
    }

    /// Start a new payment attempt for a pending order.
    ///
    /// # Errors
    ///
    /// - [`CheckoutError::NotFound`] / [`CheckoutError::NotPending`]
    /// - [`CheckoutError::Gateway`] when the provider call fails
    #[tracing::instrument(skip(self))]
    pub async fn retry_payment(&self, order_id: OrderId) -> Result<CheckoutReceipt, CheckoutError> {
        let order = self
            .repos
            .orders
            .find(order_id)
            .await?
            .ok_or(CheckoutError::NotFound(order_id))?;

        if order.status != OrderStatus::Pending {
            return Err(CheckoutError::NotPending {
                order_id,
                status: order.status,
            });
        }

        let attempt = u32::try_from(order.tokens.len()).unwrap_or(u32::MAX);
        self.initiate(&order, attempt).await
    }

    /// Apply a provider notification for `token`.
    ///
    /// # Errors
    ///
    /// - [`CheckoutError::UnknownToken`] when no order holds the token
    /// - [`CheckoutError::Order`] for amount mismatches and conflicting
    ///   terminal results
    #[tracing::instrument(skip(self, token, result), fields(token = %token))]
    pub async fn apply_notification(
        &self,
        token: &CorrelationToken,
        result: PaymentResult,
    ) -> Result<ReconcileOutcome, CheckoutError> {
        let order = self
            .repos
            .orders
            .find_by_token(token)
            .await?
            .ok_or_else(|| CheckoutError::UnknownToken(token.clone()))?;

        self.reconcile(order, &result).await
    }

    /// Current status for a token. Read only.
    ///
    /// # Errors
    ///
    /// [`CheckoutError::Storage`] on repository failures.
    pub async fn status(&self, token: &CorrelationToken) -> Result<PaymentStatusView, CheckoutError> {
        Ok(self
            .repos
            .orders
            .find_by_token(token)
            .await?
            .map_or_else(PaymentStatusView::unknown, |order| PaymentStatusView::of(&order)))
    }

    /// Ask the provider about `token` and reconcile a pending order.
    ///
    /// # Errors
    ///
    /// - [`CheckoutError::Gateway`] when the provider query fails
    /// - [`CheckoutError::Order`] for amount mismatches
    #[tracing::instrument(skip(self, token), fields(token = %token))]
    pub async fn verify(&self, token: &CorrelationToken) -> Result<PaymentStatusView, CheckoutError> {
        let Some(order) = self.repos.orders.find_by_token(token).await? else {
            return Ok(PaymentStatusView::unknown());
        };
        if order.status.is_terminal() {
            return Ok(PaymentStatusView::of(&order));
        }

        let provider = self
            .gateways
            .for_rail(order.rail)
            .query(token)
            .await
            .map_err(|source| CheckoutError::Gateway {
                order_id: order.id,
                source,
            })?;

        let result = match provider {
            ProviderStatus::Pending => return Ok(PaymentStatusView::of(&order)),
            ProviderStatus::Paid {
                provider_reference,
                amount,
            } => PaymentResult::Success {
                provider_reference,
                amount: amount.unwrap_or(order.totals.total),
            },
            ProviderStatus::Failed { reason } => PaymentResult::Failure { reason },
        };

        let outcome = self.reconcile(order, &result).await?;
        Ok(PaymentStatusView::of(&outcome.order))
    }

    /// Order with its tickets.
    ///
    /// # Errors
    ///
    /// [`CheckoutError::NotFound`] for unknown ids.
    pub async fn order(&self, order_id: OrderId) -> Result<OrderView, CheckoutError> {
        let order = self
            .repos
            .orders
            .find(order_id)
            .await?
            .ok_or(CheckoutError::NotFound(order_id))?;

        let tickets = if order.status == OrderStatus::Paid {
            self.repos.tickets.for_order(order_id).await?
        } else {
            Vec::new()
        };

        Ok(OrderView { order, tickets })
    }

    async fn lookup_promo(&self, code: &str) -> Result<Option<PromoCode>, CheckoutError> {
        Ok(self.repos.promos.find_by_code(&normalize_code(code)).await?)
    }

    async fn initiate(&self, order: &Order, attempt: u32) -> Result<CheckoutReceipt, CheckoutError> {
        let gateway = self.gateways.for_rail(order.rail);
        let request = PaymentRequest {
            order_id: order.id,
            amount: order.totals.total,
            phone: order.contact.phone.clone(),
            email: order.contact.email.clone(),
            description: describe(order),
            attempt,
        };

        let initiated = match gateway.initiate(request).await {
            Ok(initiated) => initiated,
            Err(GatewayError::Validation(e)) => {
                metrics::record_payment_initiation(order.rail, "rejected");
                return Err(CheckoutError::Validation(e));
            },
            Err(source) => {
                metrics::record_payment_initiation(order.rail, "error");
                tracing::warn!(order_id = %order.id, error = %source, "Payment initiation failed");
                return Err(CheckoutError::Gateway {
                    order_id: order.id,
                    source,
                });
            },
        };
        metrics::record_payment_initiation(order.rail, "ok");

        if !self.repos.orders.attach_token(order.id, &initiated.token).await? {
            // Finalized between load and initiation
            let status = self
                .repos
                .orders
                .find(order.id)
                .await?
                .map_or(OrderStatus::Failed, |o| o.status);
            return Err(CheckoutError::NotPending {
                order_id: order.id,
                status,
            });
        }

        tracing::info!(order_id = %order.id, token = %initiated.token, attempt, "Payment initiated");

        Ok(CheckoutReceipt {
            order_id: order.id,
            correlation_token: initiated.token,
            checkout_request_id: initiated.checkout_request_id,
            redirect_url: initiated.redirect_url,
            totals: order.totals,
        })
    }

    async fn reconcile(&self, order: Order, result: &PaymentResult) -> Result<ReconcileOutcome, CheckoutError> {
        let mut candidate = order;
        let mut transition = self.transition(&mut candidate, result)?;

        if transition == Transition::Applied {
            if self.repos.orders.finalize(&candidate).await? {
                record_finalized(&candidate);
            } else {
                // Another caller finalized first; judge the result against what it stored
                let id = candidate.id;
                candidate = self
                    .repos
                    .orders
                    .find(id)
                    .await?
                    .ok_or(CheckoutError::NotFound(id))?;
                transition = self.transition(&mut candidate, result)?;
            }
        }

        // Both steps are keyed by order, so a replay finishes whatever an
        // earlier attempt left undone
        let tickets = if candidate.status == OrderStatus::Paid {
            self.redeem_promo(&candidate).await?;
            self.issuer.issue_tickets(&candidate).await?
        } else {
            Vec::new()
        };

        Ok(ReconcileOutcome {
            order: candidate,
            transition,
            tickets,
        })
    }

    fn transition(&self, order: &mut Order, result: &PaymentResult) -> Result<Transition, CheckoutError> {
        let now = self.clock.now();
        let transition = match result {
            PaymentResult::Success {
                provider_reference,
                amount,
            } => order.transition_to_paid(PaymentEvidence {
                provider_reference: provider_reference.clone(),
                amount: *amount,
                confirmed_at: now,
            }),
            PaymentResult::Failure { reason } => order.transition_to_failed(reason.clone(), now),
        };

        transition.map_err(|e| {
            tracing::warn!(order_id = %order.id, error = %e, "Payment result rejected");
            CheckoutError::from(e)
        })
    }

    async fn redeem_promo(&self, order: &Order) -> Result<(), CheckoutError> {
        let Some(snapshot) = &order.promo else {
            return Ok(());
        };

        let redemption = promo::redemption(order.id, snapshot, order.totals.total, self.clock.now());
        let outcome = self.repos.promos.redeem(&redemption).await?;
        match outcome {
            RedemptionOutcome::Counted => tracing::info!(
                order_id = %order.id,
                code = %redemption.code,
                commission_cents = redemption.commission.as_ref().map(Money::cents),
                "Promo redemption recorded"
            ),
            RedemptionOutcome::OverCap => tracing::warn!(
                order_id = %order.id,
                code = %redemption.code,
                "Promo code was at its usage cap when the order was paid"
            ),
            RedemptionOutcome::AlreadyRecorded => return Ok(()),
        }
        metrics::record_promo_redemption(outcome);
        Ok(())
    }
}

fn record_finalized(order: &Order) {
    match order.status {
        OrderStatus::Paid => {
            let elapsed = order
                .finalized_at
                .and_then(|at| (at - order.created_at).to_std().ok())
                .map_or(0.0, |d| d.as_secs_f64());
            metrics::record_order_paid(order.totals.total, elapsed);
            tracing::info!(order_id = %order.id, "Order paid");
        },
        OrderStatus::Failed => {
            metrics::record_order_failed();
            tracing::info!(
                order_id = %order.id,
                reason = order.failure_reason.as_deref().unwrap_or_default(),
                "Order failed"
            );
        },
        OrderStatus::Pending => {},
    }
}

fn describe(order: &Order) -> String {
    match order.items.as_slice() {
        [only] => format!("{} x{}", only.name, only.quantity),
        [first, rest @ ..] => format!("{} and {} more", first.name, rest.len()),
        [] => format!("Order {}", order.id),
    }
}
