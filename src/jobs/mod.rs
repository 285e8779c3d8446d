//! Scheduled Jobs
//!
//! Background jobs for periodic maintenance tasks: ledger reconciliation
//! and pruning of stream messages every consumer has moved past.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::interval;
use uuid::Uuid;

use crate::domain::Transaction;
use crate::store::{AccountStore, LedgerStore, StoreError};

// =========================================================================
// Ledger Reconciliation
// =========================================================================

/// An account whose stored balance disagrees with its ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceMismatch {
    pub account_id: Uuid,
    pub balance: Decimal,
    pub ledger_total: Decimal,
}

/// Signed sum of a ledger: deposits positive, withdrawals negative
pub fn ledger_total(transactions: &[Transaction]) -> Decimal {
    transactions.iter().map(Transaction::signed_amount).sum()
}

/// Compare one account's balance with its ledger through the store traits
pub async fn verify_account_ledger(
    accounts: &dyn AccountStore,
    ledger: &dyn LedgerStore,
    account_id: Uuid,
) -> Result<Option<BalanceMismatch>, JobError> {
    let Some(account) = accounts.find_by_id(account_id).await? else {
        return Ok(None);
    };
    let transactions = ledger.find_by_account_id(account_id).await?;

    let total = ledger_total(&transactions);
    if total == account.balance.value() {
        return Ok(None);
    }

    Ok(Some(BalanceMismatch {
        account_id,
        balance: account.balance.value(),
        ledger_total: total,
    }))
}

/// Find every account whose balance differs from the signed sum of its
/// transactions. Mismatches are reported, never repaired.
pub async fn reconcile_balances(pool: &PgPool) -> Result<Vec<BalanceMismatch>, JobError> {
    let rows: Vec<(Uuid, Decimal, Decimal)> = sqlx::query_as(
        r#"
        SELECT a.id, a.balance, COALESCE(l.total, 0)
        FROM accounts a
        LEFT JOIN (
            SELECT account_id,
                   SUM(CASE WHEN transaction_type = 'deposit' THEN amount ELSE -amount END) AS total
            FROM transactions
            GROUP BY account_id
        ) l ON l.account_id = a.id
        WHERE a.balance <> COALESCE(l.total, 0)
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mismatches: Vec<BalanceMismatch> = rows
        .into_iter()
        .map(|(account_id, balance, ledger_total)| BalanceMismatch {
            account_id,
            balance,
            ledger_total,
        })
        .collect();

    for mismatch in &mismatches {
        tracing::error!(
            account_id = %mismatch.account_id,
            balance = %mismatch.balance,
            ledger_total = %mismatch.ledger_total,
            "Account balance does not match its ledger"
        );
    }

    Ok(mismatches)
}

// =========================================================================
// Stream Message Pruning
// =========================================================================

/// Delete stream messages older than `retention` that every consumer group
/// has committed. Partitions nobody has committed on are left alone.
pub async fn prune_committed_messages(pool: &PgPool, retention: Duration) -> Result<u64, JobError> {
    let result = sqlx::query(
        r#"
        DELETE FROM stream_messages m
        WHERE m.published_at < NOW() - make_interval(secs => $1)
          AND m.stream_offset <= (
              SELECT MIN(o.committed_offset)
              FROM consumer_offsets o
              WHERE o.topic = m.topic AND o.partition_id = m.partition_id
          )
        "#,
    )
    .bind(retention.as_secs_f64())
    .execute(pool)
    .await?;

    let rows_deleted = result.rows_affected();

    if rows_deleted > 0 {
        tracing::info!(rows_deleted = rows_deleted, "Pruned committed stream messages");
    }

    Ok(rows_deleted)
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval for ledger reconciliation (default: 5 minutes)
    pub reconciliation_interval: Duration,
    /// Interval for stream pruning (default: 1 hour)
    pub stream_prune_interval: Duration,
    /// How long committed stream messages are kept (default: 7 days)
    pub stream_retention: Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            reconciliation_interval: Duration::from_secs(300),
            stream_prune_interval: Duration::from_secs(3600),
            stream_retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks
pub struct JobScheduler {
    pool: PgPool,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    /// Create a new job scheduler
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            config: JobSchedulerConfig::default(),
        }
    }

    /// Create with custom configuration
    pub fn with_config(pool: PgPool, config: JobSchedulerConfig) -> Self {
        Self { pool, config }
    }

    /// Start the job scheduler in the background
    /// Returns a handle that can be used to abort the scheduler
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the scheduler loop
    async fn run(&self) {
        tracing::info!("Job scheduler started");

        let mut reconciliation_interval = interval(self.config.reconciliation_interval);
        let mut prune_interval = interval(self.config.stream_prune_interval);

        loop {
            tokio::select! {
                _ = reconciliation_interval.tick() => {
                    if let Err(e) = reconcile_balances(&self.pool).await {
                        tracing::error!(error = %e, "Ledger reconciliation failed");
                    }
                }
                _ = prune_interval.tick() => {
                    if let Err(e) = prune_committed_messages(&self.pool, self.config.stream_retention).await {
                        tracing::error!(error = %e, "Stream pruning failed");
                    }
                }
            }
        }
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match reconcile_balances(&self.pool).await {
            Ok(mismatches) => report.balance_mismatches = mismatches,
            Err(e) => report.errors.push(format!("Reconciliation: {}", e)),
        }

        match prune_committed_messages(&self.pool, self.config.stream_retention).await {
            Ok(count) => report.stream_messages_pruned = count,
            Err(e) => report.errors.push(format!("Stream pruning: {}", e)),
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub balance_mismatches: Vec<BalanceMismatch>,
    pub stream_messages_pruned: u64,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Account, Amount, TransactionType};
    use crate::store::{LedgerEntry, MemoryStore};

    fn txn(kind: TransactionType, amount: &str) -> Transaction {
        Transaction::new(Uuid::new_v4(), amount.parse::<Amount>().unwrap(), kind, None)
    }

    #[test]
    fn test_ledger_total() {
        let ledger = vec![
            txn(TransactionType::Deposit, "100.00"),
            txn(TransactionType::Withdrawal, "30.50"),
            txn(TransactionType::Deposit, "0.50"),
        ];
        assert_eq!(ledger_total(&ledger), Decimal::new(7000, 2));
        assert_eq!(ledger_total(&[]), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_verify_account_ledger_consistent() {
        let store = MemoryStore::new();
        let account = Account::open(Uuid::new_v4(), "1234567890".parse().unwrap());
        store.insert(&account).await.unwrap();

        let amount: Amount = "20.00".parse().unwrap();
        store
            .append_entry(LedgerEntry {
                expected_version: 0,
                new_balance: account.deposit(&amount).unwrap(),
                transaction: Transaction::new(account.id, amount, TransactionType::Deposit, None),
            })
            .await
            .unwrap();

        assert_eq!(verify_account_ledger(&store, &store, account.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_verify_account_ledger_detects_drift() {
        let store = MemoryStore::new();
        let account = Account::open(Uuid::new_v4(), "1234567890".parse().unwrap());
        store.insert(&account).await.unwrap();

        // Balance moved without a matching transaction
        let amount: Amount = "5.00".parse().unwrap();
        let mut drifted = account.clone();
        drifted.balance = account.deposit(&amount).unwrap();
        store.delete(account.id).await.unwrap();
        store.insert(&drifted).await.unwrap();

        let mismatch = verify_account_ledger(&store, &store, account.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mismatch.balance, Decimal::new(500, 2));
        assert_eq!(mismatch.ledger_total, Decimal::ZERO);
    }

    #[test]
    fn test_job_scheduler_config_default() {
        let config = JobSchedulerConfig::default();
        assert_eq!(config.reconciliation_interval, Duration::from_secs(300));
        assert_eq!(config.stream_prune_interval, Duration::from_secs(3600));
        assert_eq!(config.stream_retention, Duration::from_secs(604_800));
    }

    #[test]
    fn test_maintenance_report_default() {
        let report = MaintenanceReport::default();
        assert!(report.balance_mismatches.is_empty());
        assert_eq!(report.stream_messages_pruned, 0);
        assert!(report.errors.is_empty());
    }
}
