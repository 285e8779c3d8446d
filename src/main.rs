//! Bank accounts service
//!
//! Serves the account and ledger API and provisions accounts from the
//! user-created event stream.

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bank_accounts::api::{self, AppState};
use bank_accounts::handlers::{AccountHandler, LedgerHandler};
use bank_accounts::jobs::JobScheduler;
use bank_accounts::provisioning::ProvisioningPipeline;
use bank_accounts::store::PgStore;
use bank_accounts::stream::{PgEventStream, PgStreamConfig};
use bank_accounts::{db, Config};

/// Initialize tracing/logging
fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "bank_accounts=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;
    init_tracing(config.json_logs);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(
        environment = %config.environment,
        production = config.is_production(),
        "Starting bank accounts service"
    );
    tracing::info!("Connecting to database...");

    // Create database pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    db::verify_connection(&pool).await?;

    // Verify database schema
    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");

    let store = Arc::new(PgStore::new(pool.clone()));
    let accounts = Arc::new(AccountHandler::new(store.clone()));
    let ledger = Arc::new(LedgerHandler::new(store.clone(), store));

    // Provisioning consumers
    let stream = Arc::new(PgEventStream::new(
        pool.clone(),
        PgStreamConfig::new(&config.event_topic, &config.consumer_group)
            .with_poll_interval(config.stream_poll_interval),
    ));
    let pipeline = Arc::new(
        ProvisioningPipeline::new(accounts.clone())
            .with_retry_policy(config.provisioning_retry.clone())
            .with_redelivery_delay(config.provisioning_redelivery_delay),
    );
    let pipeline_handle = pipeline.start(stream, config.partitions());
    tracing::info!(
        topic = %config.event_topic,
        consumer_group = %config.consumer_group,
        partitions = config.consumer_partitions,
        "Provisioning pipeline started"
    );

    // Background maintenance
    let jobs = JobScheduler::new(pool.clone()).start();

    // Build router and start server
    let app = api::build_router(AppState::new(accounts, ledger));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    tracing::info!("Server shutting down...");
    pipeline_handle.shutdown().await;
    jobs.abort();
    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
