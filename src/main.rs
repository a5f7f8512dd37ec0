use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use wallet_ledger::api::{create_router, AppState, RateLimiter};
use wallet_ledger::config::{Settings, StorageBackend};
use wallet_ledger::observability::{init_logging, init_metrics};
use wallet_ledger::repositories::{InMemoryLedgerStore, LedgerStore, PgLedgerStore};
use wallet_ledger::services::{LedgerPolicy, PinHasher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::new().context("failed to load configuration")?;
    init_logging(&settings.logging).context("failed to initialize logging")?;
    info!("Configuration loaded");

    let store: Arc<dyn LedgerStore> = match settings.storage.backend {
        StorageBackend::Postgres => {
            info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(settings.database.pool_size)
                .acquire_timeout(Duration::from_secs(settings.database.acquire_timeout_secs))
                .connect(&settings.database.url)
                .await
                .context("failed to connect to the database")?;
            info!("Database connection established");

            if settings.database.run_migrations {
                info!("Running database migrations...");
                sqlx::migrate!("./migrations")
                    .run(&pool)
                    .await
                    .context("failed to run migrations")?;
                info!("Migrations applied successfully");
            }

            Arc::new(PgLedgerStore::new(pool, settings.storage.lock_timeout()))
        }
        StorageBackend::Memory => {
            warn!("Using the in-memory store; all data is lost on shutdown");
            Arc::new(InMemoryLedgerStore::new(settings.storage.lock_timeout()))
        }
    };

    let pins = PinHasher::new(&settings.security).context("invalid PIN hashing parameters")?;
    let policy = LedgerPolicy::from(&settings.ledger);

    let mut state = AppState::new(store, pins, policy);

    match init_metrics() {
        Ok(handle) => state = state.with_metrics(handle),
        Err(e) => warn!(error = %e, "Metrics exporter disabled"),
    }

    if settings.rate_limit.enabled {
        let limiter = Arc::new(RateLimiter::new(&settings.rate_limit));
        Arc::clone(&limiter).spawn_eviction();
        state = state.with_rate_limiter(limiter);
    }

    let app = create_router(state);

    let addr = format!("{}:{}", settings.application.host, settings.application.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
