//! Box office server
//!
//! Serves the checkout, payment and check-in API.
//!
//! # Usage
//!
//! ```bash
//! # In-memory storage and mock gateways
//! cargo run --bin server
//!
//! # PostgreSQL
//! STORAGE_BACKEND=postgres DATABASE_URL=postgres://... cargo run --bin server
//! ```

use boxoffice::{BoxOfficeApp, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,boxoffice=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("🎫 Starting box office server...");

    let config = Config::from_env();
    tracing::info!(
        bind = %config.server.bind_addr(),
        storage = ?config.storage,
        gateways = ?config.gateways,
        "Configuration loaded"
    );

    let app = BoxOfficeApp::new(config).await?;
    app.serve().await?;

    Ok(())
}
