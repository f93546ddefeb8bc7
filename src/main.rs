// src/main.rs
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use poll_engine::config::Config;
use poll_engine::handlers::AppState;
use poll_engine::notifier::BroadcastNotifier;
use poll_engine::poll::PgPollStore;
use poll_engine::services::{PgEventDirectory, PgMembershipGate};
use poll_engine::{db, routes, sweeper, DecisionEngine};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,poll_engine=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    tracing::info!("Connecting to database...");
    let pool = db::create_pool(&config).await?;
    db::run_migrations(&pool).await?;
    tracing::info!("Database ready");

    let notifier = BroadcastNotifier::with_capacity(config.notifier_capacity);
    let engine = DecisionEngine::new(
        Arc::new(PgPollStore::new(pool.clone())),
        Arc::new(PgEventDirectory::new(pool.clone())),
        Arc::new(PgMembershipGate::new(pool.clone())),
        Arc::new(notifier.clone()),
    );

    let _sweeper = sweeper::spawn(engine.clone(), config.poll_sweep_interval);

    let app = routes::create_routes(AppState {
        engine,
        notifier,
        db_pool: Some(pool),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    axum_server::bind(addr)
        .serve(app.into_make_service())
        .await
        .context("Server error")?;

    Ok(())
}
