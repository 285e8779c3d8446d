//! Common test utilities
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use bank_accounts::handlers::{AccountHandler, LedgerHandler};
use bank_accounts::provisioning::{ProvisioningPipeline, RetryPolicy};
use bank_accounts::store::MemoryStore;

/// Handlers wired to one in-memory store
pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub accounts: Arc<AccountHandler>,
    pub ledger: Arc<LedgerHandler>,
}

pub fn memory_app() -> TestApp {
    app_with_store(Arc::new(MemoryStore::new()))
}

pub fn app_with_store(store: Arc<MemoryStore>) -> TestApp {
    let accounts = Arc::new(AccountHandler::new(store.clone()));
    let ledger = Arc::new(LedgerHandler::new(store.clone(), store.clone()));
    TestApp {
        store,
        accounts,
        ledger,
    }
}

/// Pipeline with millisecond backoff so retry paths finish quickly
pub fn fast_pipeline(accounts: Arc<AccountHandler>) -> Arc<ProvisioningPipeline> {
    Arc::new(
        ProvisioningPipeline::new(accounts)
            .with_retry_policy(RetryPolicy::exponential(
                3,
                Duration::from_millis(1),
                Duration::from_millis(5),
            ))
            .with_redelivery_delay(Duration::from_millis(10)),
    )
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Connect to the test database and make sure migrations have run.
///
/// Tables are shared between tests, so each test works on its own holders
/// and topics instead of truncating.
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    assert!(
        bank_accounts::db::check_schema(&pool).await.unwrap(),
        "run migrations before the database tests"
    );

    pool
}
