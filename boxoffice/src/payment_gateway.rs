//! Payment initiation gateways.
//!
//! Two rails sit behind one [`PaymentGateway`] capability:
//!
//! - [`MobileMoneyGateway`]: push prompt to the buyer's phone; the token is the
//!   provider's checkout-request id
//! - [`HostedCheckoutGateway`]: redirect to a hosted card page; the token is
//!   the transaction reference
//!
//! Input is validated before any network call. [`MockPaymentGateway`] is a
//! deterministic stand-in for local development and tests.

use crate::types::{CorrelationToken, Money, OrderId, PaymentRail};
use crate::validation::{is_valid_email, ValidationError};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Payment gateway result
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Boxed future returned by gateway operations
pub type GatewayFuture<T> = Pin<Box<dyn Future<Output = GatewayResult<T>> + Send>>;

/// Payment gateway error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Input rejected before contacting the provider
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Provider answered but declined the request
    #[error("payment request rejected: {message}")]
    Rejected {
        /// Provider message
        message: String,
    },

    /// Provider returned a non-success HTTP status
    #[error("provider error (status {status}): {message}")]
    Provider {
        /// HTTP status code
        status: u16,
        /// Response body
        message: String,
    },

    /// Request never got an answer
    #[error("network error: {0}")]
    Network(String),

    /// Response body could not be parsed
    #[error("unexpected provider response: {0}")]
    Decode(String),
}

/// What a gateway needs to start a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    /// Order being paid
    pub order_id: OrderId,
    /// Order total
    pub amount: Money,
    /// Buyer phone (mobile money)
    pub phone: Option<String>,
    /// Buyer email (hosted checkout)
    pub email: Option<String>,
    /// Short description shown to the buyer
    pub description: String,
    /// Zero for the first initiation, incremented on every retry
    pub attempt: u32,
}

/// Result of a successful initiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiatedPayment {
    /// Token used to correlate notifications and status checks
    pub token: CorrelationToken,
    /// Hosted page the buyer is sent to
    pub redirect_url: Option<String>,
    /// Provider checkout-request id (mobile money)
    pub checkout_request_id: Option<String>,
}

/// Provider's view of a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProviderStatus {
    /// Not settled yet
    Pending,
    /// Settled
    Paid {
        /// Receipt / transaction reference
        provider_reference: String,
        /// Amount the provider reports, when it reports one
        amount: Option<Money>,
    },
    /// Declined, cancelled or abandoned
    Failed {
        /// Provider reason
        reason: String,
    },
}

/// Payment gateway trait
///
/// Abstraction over the payment rails the marketplace accepts.
pub trait PaymentGateway: Send + Sync {
    /// Rail served by this gateway
    fn rail(&self) -> PaymentRail;

    /// Start a payment
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Validation`] for a missing or malformed phone or
    ///   email, or a zero amount (no network call is made)
    /// - [`GatewayError::Rejected`], [`GatewayError::Provider`],
    ///   [`GatewayError::Network`] or [`GatewayError::Decode`] when the
    ///   provider call fails
    fn initiate(&self, request: PaymentRequest) -> GatewayFuture<InitiatedPayment>;

    /// Ask the provider for the current state of a payment
    ///
    /// # Errors
    ///
    /// Same provider errors as [`PaymentGateway::initiate`].
    fn query(&self, token: &CorrelationToken) -> GatewayFuture<ProviderStatus>;
}

/// Normalise a Kenyan mobile number to `2547XXXXXXXX` / `2541XXXXXXXX`.
///
/// Accepts `07…`/`01…` (10 digits), `7…`/`1…` (9 digits) and `2547…`/`2541…`
/// (12 digits) after stripping `+`, spaces and dashes.
///
/// # Errors
///
/// [`ValidationError::InvalidPhone`] for anything else.
pub fn normalize_msisdn(raw: &str) -> Result<String, ValidationError> {
    let digits: String = raw
        .chars()
        .filter(|c| !matches!(c, '+' | ' ' | '-'))
        .collect();

    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidPhone(raw.to_string()));
    }

    let subscriber = match digits.len() {
        10 if digits.starts_with("07") || digits.starts_with("01") => &digits[1..],
        9 if digits.starts_with('7') || digits.starts_with('1') => digits.as_str(),
        12 if digits.starts_with("2547") || digits.starts_with("2541") => &digits[3..],
        _ => return Err(ValidationError::InvalidPhone(raw.to_string())),
    };

    Ok(format!("254{subscriber}"))
}

fn require_positive(amount: Money) -> Result<(), ValidationError> {
    if amount.is_zero() {
        return Err(ValidationError::NonPositiveAmount);
    }
    Ok(())
}

/// Validate a request for `rail` without contacting any provider.
///
/// Returns the normalised phone number for mobile money.
///
/// # Errors
///
/// The [`ValidationError`] the gateway for `rail` would raise.
pub fn validate_request(
    rail: PaymentRail,
    amount: Money,
    phone: Option<&str>,
    email: Option<&str>,
) -> Result<Option<String>, ValidationError> {
    require_positive(amount)?;
    match rail {
        PaymentRail::MobileMoney => {
            let phone = phone
                .filter(|p| !p.trim().is_empty())
                .ok_or(ValidationError::MissingPhone)?;
            normalize_msisdn(phone).map(Some)
        },
        PaymentRail::HostedCard => {
            let email = email
                .filter(|e| !e.trim().is_empty())
                .ok_or(ValidationError::MissingEmail)?;
            if !is_valid_email(email) {
                return Err(ValidationError::InvalidEmail(email.to_string()));
            }
            Ok(None)
        },
    }
}

fn network_error(err: &reqwest::Error) -> GatewayError {
    GatewayError::Network(err.to_string())
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> GatewayResult<T> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(GatewayError::Provider {
            status: status.as_u16(),
            message,
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| GatewayError::Decode(e.to_string()))
}

// ============================================================================
// Mobile money push
// ============================================================================

/// Mobile-money push settings
#[derive(Debug, Clone)]
pub struct MobileMoneyConfig {
    /// Provider API base URL
    pub base_url: String,
    /// Bearer credential
    pub api_key: String,
    /// Merchant short code
    pub short_code: String,
    /// Where the provider posts the result
    pub callback_url: String,
}

#[derive(Serialize)]
struct PushRequest<'a> {
    phone_number: &'a str,
    amount: u64,
    account_reference: String,
    transaction_desc: &'a str,
    callback_url: &'a str,
    short_code: &'a str,
}

#[derive(Deserialize)]
struct PushResponse {
    checkout_request_id: String,
    response_code: String,
    #[serde(default)]
    response_description: Option<String>,
}

#[derive(Serialize)]
struct PushQueryRequest<'a> {
    checkout_request_id: &'a str,
    short_code: &'a str,
}

#[derive(Deserialize)]
struct PushQueryResponse {
    #[serde(default)]
    result_code: Option<String>,
    #[serde(default)]
    result_desc: Option<String>,
    #[serde(default)]
    receipt_number: Option<String>,
    #[serde(default)]
    amount: Option<u64>,
}

/// Mobile-money push gateway
#[derive(Clone)]
pub struct MobileMoneyGateway {
    client: Client,
    config: Arc<MobileMoneyConfig>,
}

impl MobileMoneyGateway {
    /// Create a gateway with a default HTTP client
    #[must_use]
    pub fn new(config: MobileMoneyConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    /// Create a gateway sharing an existing HTTP client
    #[must_use]
    pub fn with_client(client: Client, config: MobileMoneyConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
        }
    }
}

impl PaymentGateway for MobileMoneyGateway {
    fn rail(&self) -> PaymentRail {
        PaymentRail::MobileMoney
    }

    fn initiate(&self, request: PaymentRequest) -> GatewayFuture<InitiatedPayment> {
        let client = self.client.clone();
        let config = Arc::clone(&self.config);

        Box::pin(async move {
            let phone = validate_request(
                PaymentRail::MobileMoney,
                request.amount,
                request.phone.as_deref(),
                None,
            )?
            .ok_or(ValidationError::MissingPhone)?;

            let body = PushRequest {
                phone_number: &phone,
                amount: request.amount.cents(),
                account_reference: request.order_id.to_string(),
                transaction_desc: &request.description,
                callback_url: &config.callback_url,
                short_code: &config.short_code,
            };

            let response = client
                .post(format!("{}/stkpush", config.base_url))
                .bearer_auth(&config.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| network_error(&e))?;

            let push: PushResponse = decode(response).await?;
            if push.response_code != "0" {
                return Err(GatewayError::Rejected {
                    message: push
                        .response_description
                        .unwrap_or_else(|| format!("response code {}", push.response_code)),
                });
            }

            tracing::info!(
                order_id = %request.order_id,
                checkout_request_id = %push.checkout_request_id,
                "Mobile money push sent"
            );

            Ok(InitiatedPayment {
                token: CorrelationToken::new(push.checkout_request_id.clone()),
                redirect_url: None,
                checkout_request_id: Some(push.checkout_request_id),
            })
        })
    }

    fn query(&self, token: &CorrelationToken) -> GatewayFuture<ProviderStatus> {
        let client = self.client.clone();
        let config = Arc::clone(&self.config);
        let token = token.clone();

        Box::pin(async move {
            let body = PushQueryRequest {
                checkout_request_id: token.as_str(),
                short_code: &config.short_code,
            };

            let response = client
                .post(format!("{}/stkpush/query", config.base_url))
                .bearer_auth(&config.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| network_error(&e))?;

            let result: PushQueryResponse = decode(response).await?;
            Ok(match result.result_code.as_deref() {
                None => ProviderStatus::Pending,
                Some("0") => ProviderStatus::Paid {
                    provider_reference: result
                        .receipt_number
                        .unwrap_or_else(|| token.as_str().to_string()),
                    amount: result.amount.map(Money::from_cents),
                },
                Some(code) => ProviderStatus::Failed {
                    reason: result
                        .result_desc
                        .unwrap_or_else(|| format!("result code {code}")),
                },
            })
        })
    }
}

// ============================================================================
// Hosted card checkout
// ============================================================================

/// Hosted-checkout settings
#[derive(Debug, Clone)]
pub struct HostedCheckoutConfig {
    /// Provider API base URL
    pub base_url: String,
    /// Secret key
    pub secret_key: String,
    /// Where the provider sends the buyer afterwards
    pub callback_url: String,
}

#[derive(Serialize)]
struct InitializeRequest<'a> {
    email: &'a str,
    amount: u64,
    reference: &'a str,
    callback_url: &'a str,
}

#[derive(Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Deserialize)]
struct InitializeData {
    authorization_url: String,
    reference: String,
}

#[derive(Deserialize)]
struct VerifyData {
    status: String,
    reference: String,
    amount: u64,
    #[serde(default)]
    gateway_response: Option<String>,
}

/// Transaction reference for an initiation attempt.
///
/// The first attempt uses the order id; retries get a suffix so the provider
/// sees a fresh reference.
#[must_use]
pub fn hosted_reference(order_id: OrderId, attempt: u32) -> String {
    if attempt == 0 {
        order_id.to_string()
    } else {
        format!("{order_id}-r{attempt}")
    }
}

/// Hosted card checkout gateway
#[derive(Clone)]
pub struct HostedCheckoutGateway {
    client: Client,
    config: Arc<HostedCheckoutConfig>,
}

impl HostedCheckoutGateway {
    /// Create a gateway with a default HTTP client
    #[must_use]
    pub fn new(config: HostedCheckoutConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    /// Create a gateway sharing an existing HTTP client
    #[must_use]
    pub fn with_client(client: Client, config: HostedCheckoutConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
        }
    }
}

impl PaymentGateway for HostedCheckoutGateway {
    fn rail(&self) -> PaymentRail {
        PaymentRail::HostedCard
    }

    fn initiate(&self, request: PaymentRequest) -> GatewayFuture<InitiatedPayment> {
        let client = self.client.clone();
        let config = Arc::clone(&self.config);

        Box::pin(async move {
            validate_request(
                PaymentRail::HostedCard,
                request.amount,
                None,
                request.email.as_deref(),
            )?;
            let email = request.email.as_deref().unwrap_or_default().trim();
            let reference = hosted_reference(request.order_id, request.attempt);

            let body = InitializeRequest {
                email,
                amount: request.amount.cents(),
                reference: &reference,
                callback_url: &config.callback_url,
            };

            let response = client
                .post(format!("{}/transaction/initialize", config.base_url))
                .bearer_auth(&config.secret_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| network_error(&e))?;

            let envelope: Envelope<InitializeData> = decode(response).await?;
            let data = match envelope {
                Envelope {
                    status: true,
                    data: Some(data),
                    ..
                } => data,
                Envelope { message, .. } => return Err(GatewayError::Rejected { message }),
            };

            tracing::info!(
                order_id = %request.order_id,
                reference = %data.reference,
                "Hosted checkout initialised"
            );

            Ok(InitiatedPayment {
                token: CorrelationToken::new(data.reference),
                redirect_url: Some(data.authorization_url),
                checkout_request_id: None,
            })
        })
    }

    fn query(&self, token: &CorrelationToken) -> GatewayFuture<ProviderStatus> {
        let client = self.client.clone();
        let config = Arc::clone(&self.config);
        let token = token.clone();

        Box::pin(async move {
            let response = client
                .get(format!("{}/transaction/verify/{}", config.base_url, token.as_str()))
                .bearer_auth(&config.secret_key)
                .send()
                .await
                .map_err(|e| network_error(&e))?;

            let envelope: Envelope<VerifyData> = decode(response).await?;
            let data = match envelope {
                Envelope {
                    status: true,
                    data: Some(data),
                    ..
                } => data,
                Envelope { message, .. } => return Err(GatewayError::Rejected { message }),
            };

            Ok(match data.status.as_str() {
                "success" => ProviderStatus::Paid {
                    provider_reference: data.reference,
                    amount: Some(Money::from_cents(data.amount)),
                },
                "failed" | "abandoned" | "reversed" => ProviderStatus::Failed {
                    reason: data.gateway_response.unwrap_or(data.status),
                },
                _ => ProviderStatus::Pending,
            })
        })
    }
}

// ============================================================================
// Mock gateway
// ============================================================================

#[derive(Default)]
struct MockState {
    statuses: HashMap<CorrelationToken, ProviderStatus>,
    queries: HashMap<CorrelationToken, u32>,
}

/// Deterministic gateway for development and tests.
///
/// Tokens are `mock-{rail}-{order_id}-{attempt}`. Every payment stays
/// `Pending` until [`MockPaymentGateway::set_status`] says otherwise.
#[derive(Clone)]
pub struct MockPaymentGateway {
    rail: PaymentRail,
    state: Arc<Mutex<MockState>>,
    fail_next: Arc<AtomicBool>,
    initiations: Arc<AtomicU64>,
}

impl MockPaymentGateway {
    /// Creates a new mock gateway for `rail`
    #[must_use]
    pub fn new(rail: PaymentRail) -> Self {
        Self {
            rail,
            state: Arc::new(Mutex::new(MockState::default())),
            fail_next: Arc::new(AtomicBool::new(false)),
            initiations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Token the mock hands out for an initiation
    #[must_use]
    pub fn token_for(rail: PaymentRail, order_id: OrderId, attempt: u32) -> CorrelationToken {
        CorrelationToken::new(format!("mock-{}-{order_id}-{attempt}", rail.as_str()))
    }

    /// Set what `query` reports for `token`
    pub fn set_status(&self, token: &CorrelationToken, status: ProviderStatus) {
        self.lock().statuses.insert(token.clone(), status);
    }

    /// Make the next `initiate` fail with a network error
    pub fn fail_next_initiation(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Successful initiations so far
    #[must_use]
    pub fn initiations(&self) -> u64 {
        self.initiations.load(Ordering::SeqCst)
    }

    /// Number of `query` calls for `token`
    #[must_use]
    pub fn queries(&self, token: &CorrelationToken) -> u32 {
        self.lock().queries.get(token).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PaymentGateway for MockPaymentGateway {
    fn rail(&self) -> PaymentRail {
        self.rail
    }

    fn initiate(&self, request: PaymentRequest) -> GatewayFuture<InitiatedPayment> {
        let rail = self.rail;
        let validated =
            validate_request(rail, request.amount, request.phone.as_deref(), request.email.as_deref());
        let fail = validated.is_ok() && self.fail_next.swap(false, Ordering::SeqCst);
        let initiations = Arc::clone(&self.initiations);

        Box::pin(async move {
            validated?;
            if fail {
                return Err(GatewayError::Network("mock gateway unavailable".to_string()));
            }
            initiations.fetch_add(1, Ordering::SeqCst);

            let token = Self::token_for(rail, request.order_id, request.attempt);
            tracing::debug!(order_id = %request.order_id, %token, "Mock payment initiated");

            Ok(match rail {
                PaymentRail::MobileMoney => InitiatedPayment {
                    checkout_request_id: Some(token.as_str().to_string()),
                    token,
                    redirect_url: None,
                },
                PaymentRail::HostedCard => InitiatedPayment {
                    redirect_url: Some(format!("https://checkout.mock.local/pay/{token}")),
                    token,
                    checkout_request_id: None,
                },
            })
        })
    }

    fn query(&self, token: &CorrelationToken) -> GatewayFuture<ProviderStatus> {
        let status = {
            let mut state = self.lock();
            *state.queries.entry(token.clone()).or_insert(0) += 1;
            state
                .statuses
                .get(token)
                .cloned()
                .unwrap_or(ProviderStatus::Pending)
        };
        Box::pin(async move { Ok(status) })
    }
}

/// One gateway per rail.
#[derive(Clone)]
pub struct PaymentGateways {
    mobile_money: Arc<dyn PaymentGateway>,
    hosted: Arc<dyn PaymentGateway>,
}

impl PaymentGateways {
    /// Bundle the two rails
    #[must_use]
    pub fn new(mobile_money: Arc<dyn PaymentGateway>, hosted: Arc<dyn PaymentGateway>) -> Self {
        Self {
            mobile_money,
            hosted,
        }
    }

    /// Gateway serving `rail`
    #[must_use]
    pub fn for_rail(&self, rail: PaymentRail) -> &Arc<dyn PaymentGateway> {
        match rail {
            PaymentRail::MobileMoney => &self.mobile_money,
            PaymentRail::HostedCard => &self.hosted,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn request(phone: Option<&str>, email: Option<&str>, cents: u64) -> PaymentRequest {
        PaymentRequest {
            order_id: OrderId::new(),
            amount: Money::from_cents(cents),
            phone: phone.map(str::to_string),
            email: email.map(str::to_string),
            description: "Tickets".to_string(),
            attempt: 0,
        }
    }

    #[test]
    fn msisdn_normalisation() {
        assert_eq!(normalize_msisdn("0712345678").unwrap(), "254712345678");
        assert_eq!(normalize_msisdn("0112 345 678").unwrap(), "254112345678");
        assert_eq!(normalize_msisdn("712345678").unwrap(), "254712345678");
        assert_eq!(normalize_msisdn("+254-712-345-678").unwrap(), "254712345678");
        assert_eq!(normalize_msisdn("254112345678").unwrap(), "254112345678");

        for bad in ["", "0812345678", "07123456", "2558123456789", "07x2345678"] {
            assert!(normalize_msisdn(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn validation_per_rail() {
        let zero = validate_request(PaymentRail::MobileMoney, Money::ZERO, Some("0712345678"), None);
        assert_eq!(zero, Err(ValidationError::NonPositiveAmount));

        let no_phone = validate_request(PaymentRail::MobileMoney, Money::from_cents(1), None, None);
        assert_eq!(no_phone, Err(ValidationError::MissingPhone));

        let no_email = validate_request(PaymentRail::HostedCard, Money::from_cents(1), None, Some(" "));
        assert_eq!(no_email, Err(ValidationError::MissingEmail));

        let ok = validate_request(PaymentRail::HostedCard, Money::from_cents(1), None, Some("a@b.co"));
        assert_eq!(ok, Ok(None));
    }

    #[test]
    fn retry_references_are_distinct() {
        let id = OrderId::new();
        assert_eq!(hosted_reference(id, 0), id.to_string());
        assert_eq!(hosted_reference(id, 2), format!("{id}-r2"));
    }

    #[tokio::test]
    async fn mock_gateway_is_deterministic() {
        let gateway = MockPaymentGateway::new(PaymentRail::MobileMoney);
        let req = request(Some("0712345678"), None, 4_950);
        let expected = MockPaymentGateway::token_for(PaymentRail::MobileMoney, req.order_id, 0);

        let initiated = gateway.initiate(req).await.unwrap();
        assert_eq!(initiated.token, expected);
        assert_eq!(gateway.query(&expected).await.unwrap(), ProviderStatus::Pending);

        gateway.set_status(
            &expected,
            ProviderStatus::Failed {
                reason: "cancelled by user".to_string(),
            },
        );
        assert!(matches!(
            gateway.query(&expected).await.unwrap(),
            ProviderStatus::Failed { .. }
        ));
        assert_eq!(gateway.queries(&expected), 2);
    }

    #[tokio::test]
    async fn mock_gateway_validates_before_failing() {
        let gateway = MockPaymentGateway::new(PaymentRail::HostedCard);
        gateway.fail_next_initiation();

        let invalid = gateway.initiate(request(None, None, 100)).await;
        assert_eq!(invalid, Err(GatewayError::Validation(ValidationError::MissingEmail)));

        let unavailable = gateway.initiate(request(None, Some("a@b.co"), 100)).await;
        assert!(matches!(unavailable, Err(GatewayError::Network(_))));
        assert_eq!(gateway.initiations(), 0);
    }
}
