//! Persistence module
//!
//! Account and ledger storage behind traits, with a Postgres implementation
//! for production and an in-memory one for tests and local runs.

mod memory;
mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{Account, AccountNumber, Balance, Transaction};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Which uniqueness constraint a write violated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueKey {
    HolderId,
    AccountNumber,
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Unique constraint violated on {0:?}")]
    UniqueViolation(UniqueKey),

    #[error("Version conflict on account {account_id}: expected {expected}")]
    VersionConflict { account_id: Uuid, expected: i64 },

    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Errors worth retrying with backoff: the store may recover on its own
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Tls(_)
            ),
            _ => false,
        }
    }
}

/// A balance change and the ledger record that explains it.
///
/// Applied atomically: the transaction row is written only if the account
/// is still at `expected_version`, and the balance moves with it.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub expected_version: i64,
    pub new_balance: Balance,
    pub transaction: Transaction,
}

impl LedgerEntry {
    pub fn account_id(&self) -> Uuid {
        self.transaction.account_id
    }
}

/// Durable account records
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError>;

    async fn find_by_holder_id(&self, holder_id: Uuid) -> Result<Option<Account>, StoreError>;

    async fn find_by_account_number(
        &self,
        number: &AccountNumber,
    ) -> Result<Option<Account>, StoreError>;

    async fn exists_by_holder_id(&self, holder_id: Uuid) -> Result<bool, StoreError>;

    async fn exists_by_account_number(&self, number: &AccountNumber) -> Result<bool, StoreError>;

    /// Insert a new account. Violating the holder or account number
    /// uniqueness constraint yields `StoreError::UniqueViolation`.
    async fn insert(&self, account: &Account) -> Result<(), StoreError>;

    /// Delete an account together with its ledger. Returns false if absent.
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;
}

/// Append-only transaction ledger
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Commit a transaction record and the matching balance update as one unit
    async fn append_entry(&self, entry: LedgerEntry) -> Result<Account, StoreError>;

    /// Ledger for an account, oldest first
    async fn find_by_account_id(&self, account_id: Uuid) -> Result<Vec<Transaction>, StoreError>;
}
