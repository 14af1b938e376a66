//! Application coordinator - wires together all components.
//!
//! Builds, from a [`Config`]:
//! - Repositories (in-memory or `PostgreSQL`)
//! - Payment gateways (mock or live)
//! - Checkout service and verification gate
//! - HTTP router with its shared state

use crate::checkout::CheckoutService;
use crate::config::{Config, GatewayMode, StorageBackend};
use crate::metrics::register_business_metrics;
use crate::payment_gateway::{
    HostedCheckoutConfig, HostedCheckoutGateway, MobileMoneyConfig, MobileMoneyGateway,
    MockPaymentGateway, PaymentGateways,
};
use crate::poller::PollerConfig;
use crate::server::{build_router, AppState};
use crate::storage::{PostgresRepository, Repositories, StorageError};
use crate::types::PaymentRail;
use crate::verification::VerificationGate;
use axum::Router;
use boxoffice_core::environment::{Clock, SystemClock};
use boxoffice_runtime::metrics::{MetricsError, MetricsServer};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Startup errors
#[derive(Error, Debug)]
pub enum StartupError {
    /// Database connection failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Database migration failed
    #[error("Migration error: {0}")]
    Migration(#[from] StorageError),

    /// Metrics recorder could not be installed
    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    /// Server socket error
    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Main box office application.
pub struct BoxOfficeApp {
    /// Shared handler state
    pub state: AppState,
    /// Configuration
    config: Config,
}

impl BoxOfficeApp {
    /// Initialize the application with all components.
    ///
    /// # Errors
    ///
    /// Returns error if the database is unreachable, migrations fail or the
    /// metrics recorder cannot be installed.
    pub async fn new(config: Config) -> Result<Self, StartupError> {
        tracing::info!("Initializing box office...");

        let repos = match config.storage {
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage; data is lost on restart");
                Repositories::in_memory()
            },
            StorageBackend::Postgres => {
                tracing::info!("Connecting to PostgreSQL");
                let pool = PgPoolOptions::new()
                    .max_connections(config.postgres.max_connections)
                    .min_connections(config.postgres.min_connections)
                    .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
                    .connect(&config.postgres.url)
                    .await?;

                let backend = Arc::new(PostgresRepository::new(pool));
                if config.postgres.run_migrations {
                    tracing::info!("Running database migrations...");
                    backend.migrate().await?;
                }
                Repositories::from_backend(backend)
            },
        };

        let mut metrics = MetricsServer::new(config.server.metrics_socket());
        metrics.start()?;
        register_business_metrics();

        let state = build_state(&config, repos, Arc::new(SystemClock)).with_metrics(Arc::new(metrics));
        tracing::info!(
            storage = ?config.storage,
            gateways = ?config.gateways,
            "✓ Application initialized"
        );

        Ok(Self { state, config })
    }

    /// The HTTP router
    #[must_use]
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Bind and serve until Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns error if the address cannot be bound.
    pub async fn serve(self) -> Result<(), StartupError> {
        let addr = self.config.server.bind_addr();
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(%addr, "🎫 Box office listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for shutdown signal");
                }
                tracing::info!("Shutting down gracefully...");
            })
            .await?;

        Ok(())
    }
}

/// Build handler state over `repos` according to `config`.
#[must_use]
pub fn build_state(config: &Config, repos: Repositories, clock: Arc<dyn Clock>) -> AppState {
    let gateways = match config.gateways {
        GatewayMode::Mock => {
            tracing::warn!("Using mock payment gateways");
            PaymentGateways::new(
                Arc::new(MockPaymentGateway::new(PaymentRail::MobileMoney)),
                Arc::new(MockPaymentGateway::new(PaymentRail::HostedCard)),
            )
        },
        GatewayMode::Live => {
            let client = reqwest::Client::new();
            PaymentGateways::new(
                Arc::new(MobileMoneyGateway::with_client(
                    client.clone(),
                    MobileMoneyConfig {
                        base_url: config.mobile_money.base_url.clone(),
                        api_key: config.mobile_money.api_key.clone(),
                        short_code: config.mobile_money.short_code.clone(),
                        callback_url: config.mobile_money.callback_url.clone(),
                    },
                )),
                Arc::new(HostedCheckoutGateway::with_client(
                    client,
                    HostedCheckoutConfig {
                        base_url: config.hosted_checkout.base_url.clone(),
                        secret_key: config.hosted_checkout.secret_key.clone(),
                        callback_url: config.hosted_checkout.callback_url.clone(),
                    },
                )),
            )
        },
    };

    let gate = VerificationGate::new(
        Arc::clone(&repos.tickets),
        Arc::clone(&repos.assignments),
        Arc::clone(&clock),
    );
    let checkout = CheckoutService::new(repos, gateways, clock);

    let state = AppState::new(checkout, gate);
    if config.poller.enabled {
        state.with_background_reconciliation(PollerConfig {
            interval: config.poller.interval(),
            max_attempts: config.poller.max_attempts,
        })
    } else {
        state
    }
}
