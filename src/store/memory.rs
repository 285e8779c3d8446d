//! In-memory store
//!
//! Mirrors the Postgres constraints (unique holder, unique account number,
//! conditional balance writes) so services behave the same against it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{Account, AccountNumber, Transaction};

use super::{AccountStore, LedgerEntry, LedgerStore, StoreError, UniqueKey};

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<Uuid, Account>,
    transactions: Vec<Transaction>,
}

#[derive(Debug)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    unique_account_numbers: bool,
    failures_remaining: AtomicU32,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            unique_account_numbers: true,
            failures_remaining: AtomicU32::new(0),
        }
    }

    /// A store with no uniqueness constraint on account numbers, so the
    /// generator's existence check is the only guard.
    pub fn without_account_number_constraint() -> Self {
        Self {
            unique_account_numbers: false,
            ..Self::new()
        }
    }

    /// Make the next `count` operations fail with `StoreError::Unavailable`
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Snapshot of every stored account
    pub fn accounts(&self) -> Vec<Account> {
        self.lock_unchecked().accounts.values().cloned().collect()
    }

    fn lock_unchecked(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(self.lock_unchecked())
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.lock()?.accounts.get(&id).cloned())
    }

    async fn find_by_holder_id(&self, holder_id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self
            .lock()?
            .accounts
            .values()
            .find(|a| a.account_holder_id == holder_id)
            .cloned())
    }

    async fn find_by_account_number(
        &self,
        number: &AccountNumber,
    ) -> Result<Option<Account>, StoreError> {
        Ok(self
            .lock()?
            .accounts
            .values()
            .find(|a| &a.account_number == number)
            .cloned())
    }

    async fn exists_by_holder_id(&self, holder_id: Uuid) -> Result<bool, StoreError> {
        Ok(self
            .lock()?
            .accounts
            .values()
            .any(|a| a.account_holder_id == holder_id))
    }

    async fn exists_by_account_number(&self, number: &AccountNumber) -> Result<bool, StoreError> {
        Ok(self
            .lock()?
            .accounts
            .values()
            .any(|a| &a.account_number == number))
    }

    async fn insert(&self, account: &Account) -> Result<(), StoreError> {
        let mut tables = self.lock()?;

        if tables
            .accounts
            .values()
            .any(|a| a.account_holder_id == account.account_holder_id)
        {
            return Err(StoreError::UniqueViolation(UniqueKey::HolderId));
        }
        if self.unique_account_numbers
            && tables
                .accounts
                .values()
                .any(|a| a.account_number == account.account_number)
        {
            return Err(StoreError::UniqueViolation(UniqueKey::AccountNumber));
        }

        tables.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.lock()?;
        if tables.accounts.remove(&id).is_none() {
            return Ok(false);
        }
        tables.transactions.retain(|t| t.account_id != id);
        Ok(true)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn append_entry(&self, entry: LedgerEntry) -> Result<Account, StoreError> {
        let account_id = entry.account_id();
        let mut tables = self.lock()?;

        let account = tables
            .accounts
            .get_mut(&account_id)
            .ok_or(StoreError::AccountNotFound(account_id))?;

        if account.version != entry.expected_version {
            return Err(StoreError::VersionConflict {
                account_id,
                expected: entry.expected_version,
            });
        }

        account.balance = entry.new_balance;
        account.version += 1;
        let updated = account.clone();

        tables.transactions.push(entry.transaction);
        Ok(updated)
    }

    async fn find_by_account_id(&self, account_id: Uuid) -> Result<Vec<Transaction>, StoreError> {
        Ok(self
            .lock()?
            .transactions
            .iter()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect())
    }
}
