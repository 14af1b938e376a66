//! Where the poller gets payment status from.

use crate::checkout::{CheckoutService, PaymentStatusView};
use crate::types::CorrelationToken;
use reqwest::Client;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Status check failure. Counts as an attempt; polling continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("status check failed: {0}")]
pub struct SourceError(pub String);

/// Boxed future returned by a status check
pub type StatusFuture = Pin<Box<dyn Future<Output = Result<PaymentStatusView, SourceError>> + Send>>;

/// Answers "is this payment settled yet?".
pub trait StatusSource: Send + Sync {
    /// Check the status for `token` once
    fn check(&self, token: &CorrelationToken) -> StatusFuture;
}

/// How an in-process source answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    /// Read the stored status only
    ReadOnly,
    /// Ask the provider and reconcile a pending order
    Reconciling,
}

/// In-process source backed by the checkout service.
#[derive(Clone)]
pub struct CheckoutStatusSource {
    service: CheckoutService,
    mode: SourceMode,
}

impl CheckoutStatusSource {
    /// Source that reads stored status
    #[must_use]
    pub const fn read_only(service: CheckoutService) -> Self {
        Self {
            service,
            mode: SourceMode::ReadOnly,
        }
    }

    /// Source that queries the provider for pending orders
    #[must_use]
    pub const fn reconciling(service: CheckoutService) -> Self {
        Self {
            service,
            mode: SourceMode::Reconciling,
        }
    }
}

impl StatusSource for CheckoutStatusSource {
    fn check(&self, token: &CorrelationToken) -> StatusFuture {
        let service = self.service.clone();
        let mode = self.mode;
        let token = token.clone();

        Box::pin(async move {
            let result = match mode {
                SourceMode::ReadOnly => service.status(&token).await,
                SourceMode::Reconciling => service.verify(&token).await,
            };
            result.map_err(|e| SourceError(e.to_string()))
        })
    }
}

/// HTTP client for `GET /api/payments/status/{token}`.
#[derive(Clone)]
pub struct HttpStatusSource {
    client: Client,
    base_url: String,
}

impl HttpStatusSource {
    /// Source calling the API at `base_url` (e.g. `http://localhost:8080`)
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Source sharing an existing HTTP client
    #[must_use]
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl StatusSource for HttpStatusSource {
    fn check(&self, token: &CorrelationToken) -> StatusFuture {
        let client = self.client.clone();
        let url = format!("{}/api/payments/status/{}", self.base_url, token.as_str());

        Box::pin(async move {
            let response = client
                .get(url)
                .send()
                .await
                .map_err(|e| SourceError(e.to_string()))?;

            if !response.status().is_success() {
                return Err(SourceError(format!("status endpoint returned {}", response.status())));
            }

            response
                .json::<PaymentStatusView>()
                .await
                .map_err(|e| SourceError(e.to_string()))
        })
    }
}
