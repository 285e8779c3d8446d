//! Postgres-backed account and ledger store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Account, AccountNumber, Amount, Balance, InvalidAccountNumber, Transaction};

use super::{AccountStore, LedgerEntry, LedgerStore, StoreError, UniqueKey};

const HOLDER_CONSTRAINT: &str = "accounts_account_holder_id_key";
const NUMBER_CONSTRAINT: &str = "accounts_account_number_key";

const ACCOUNT_COLUMNS: &str =
    "id, account_number, account_holder_id, balance, version, created_at";

type AccountRow = (Uuid, String, Uuid, Decimal, i64, DateTime<Utc>);

type TransactionRow = (Uuid, Uuid, Decimal, String, DateTime<Utc>, Option<String>);

/// Store backed by the `accounts` and `transactions` tables
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn select_by(column: &str) -> String {
        format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE {column} = $1")
    }
}

fn account_from_row(row: AccountRow) -> Result<Account, StoreError> {
    let (id, account_number, account_holder_id, balance, version, created_at) = row;
    Ok(Account {
        id,
        account_number: account_number
            .parse()
            .map_err(|e: InvalidAccountNumber| StoreError::CorruptRow(e.to_string()))?,
        account_holder_id,
        balance: Balance::new(balance).map_err(|e| StoreError::CorruptRow(e.to_string()))?,
        version,
        created_at,
    })
}

fn transaction_from_row(row: TransactionRow) -> Result<Transaction, StoreError> {
    let (id, account_id, amount, transaction_type, timestamp, description) = row;
    Ok(Transaction {
        id,
        account_id,
        amount: Amount::new(amount).map_err(|e| StoreError::CorruptRow(e.to_string()))?,
        transaction_type: transaction_type.parse().map_err(StoreError::CorruptRow)?,
        timestamp,
        description,
    })
}

/// Translate unique violations on the accounts table into `UniqueViolation`
fn map_insert_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            match db.constraint() {
                Some(HOLDER_CONSTRAINT) => return StoreError::UniqueViolation(UniqueKey::HolderId),
                Some(NUMBER_CONSTRAINT) => {
                    return StoreError::UniqueViolation(UniqueKey::AccountNumber)
                }
                _ => {}
            }
        }
    }
    StoreError::Database(err)
}

#[async_trait]
impl AccountStore for PgStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(&Self::select_by("id"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(account_from_row).transpose()
    }

    async fn find_by_holder_id(&self, holder_id: Uuid) -> Result<Option<Account>, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(&Self::select_by("account_holder_id"))
            .bind(holder_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(account_from_row).transpose()
    }

    async fn find_by_account_number(
        &self,
        number: &AccountNumber,
    ) -> Result<Option<Account>, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(&Self::select_by("account_number"))
            .bind(number.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(account_from_row).transpose()
    }

    async fn exists_by_holder_id(&self, holder_id: Uuid) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM accounts WHERE account_holder_id = $1)",
        )
        .bind(holder_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn exists_by_account_number(&self, number: &AccountNumber) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM accounts WHERE account_number = $1)",
        )
        .bind(number.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn insert(&self, account: &Account) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, account_number, account_holder_id, balance, version, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(account.id)
        .bind(account.account_number.as_str())
        .bind(account.account_holder_id)
        .bind(account.balance.value())
        .bind(account.version)
        .bind(account.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_insert_error)?;

        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM transactions WHERE account_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let rows = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        Ok(rows > 0)
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn append_entry(&self, entry: LedgerEntry) -> Result<Account, StoreError> {
        let account_id = entry.account_id();
        let mut tx = self.pool.begin().await?;

        // Conditional write: takes the row lock and fails if the version moved
        let sql = format!(
            r#"
            UPDATE accounts
            SET balance = $1, version = version + 1
            WHERE id = $2 AND version = $3
            RETURNING {ACCOUNT_COLUMNS}
            "#
        );
        let updated: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(entry.new_balance.value())
            .bind(account_id)
            .bind(entry.expected_version)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = updated else {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM accounts WHERE id = $1)")
                    .bind(account_id)
                    .fetch_one(&mut *tx)
                    .await?;
            tx.rollback().await?;

            return Err(if exists {
                StoreError::VersionConflict {
                    account_id,
                    expected: entry.expected_version,
                }
            } else {
                StoreError::AccountNotFound(account_id)
            });
        };

        let txn = &entry.transaction;
        sqlx::query(
            r#"
            INSERT INTO transactions (id, account_id, amount, transaction_type, created_at, description)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(txn.id)
        .bind(txn.account_id)
        .bind(txn.amount.value())
        .bind(txn.transaction_type.as_str())
        .bind(txn.timestamp)
        .bind(&txn.description)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        account_from_row(row)
    }

    async fn find_by_account_id(&self, account_id: Uuid) -> Result<Vec<Transaction>, StoreError> {
        let rows: Vec<TransactionRow> = sqlx::query_as(
            r#"
            SELECT id, account_id, amount, transaction_type, created_at, description
            FROM transactions
            WHERE account_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(transaction_from_row).collect()
    }
}
