use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use coinvault_server::milestones::LoggingMilestoneEvaluator;
use coinvault_server::payment_providers::create_provider;
use coinvault_server::sweeper::spawn_expiry_sweeper;
use coinvault_server::{create_router, db, register_all, Config, PurchaseService, PurchaseSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = db::create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    db::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;

    let provider = create_provider(&config)?;
    let extensions = Arc::new(register_all(&config));
    let service = PurchaseService::new(
        pool,
        extensions,
        provider,
        Arc::new(LoggingMilestoneEvaluator),
        PurchaseSettings::from_config(&config),
    );

    spawn_expiry_sweeper(service.clone(), config.sweep_interval());

    let app = create_router(service);
    let addr: SocketAddr = ([0, 0, 0, 0], config.server_port).into();
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(
        %addr,
        provider = %config.payment_provider,
        "CoinVault server listening"
    );
    axum::serve(listener, app).await?;
    Ok(())
}
