//! Account number uniqueness under concurrent creation

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use bank_accounts::handlers::{AccountHandler, AccountNumberGenerator, CreateAccountCommand};
use bank_accounts::store::{AccountStore, MemoryStore, StoreError};
use bank_accounts::{Account, AccountNumber};

/// Store that lets a rival account grab the same number right before the
/// first insert, reproducing two creators passing the existence check at
/// the same time.
struct RacingStore {
    inner: MemoryStore,
    rival_pending: AtomicBool,
}

impl RacingStore {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            rival_pending: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl AccountStore for RacingStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_holder_id(&self, holder_id: Uuid) -> Result<Option<Account>, StoreError> {
        self.inner.find_by_holder_id(holder_id).await
    }

    async fn find_by_account_number(
        &self,
        number: &AccountNumber,
    ) -> Result<Option<Account>, StoreError> {
        self.inner.find_by_account_number(number).await
    }

    async fn exists_by_holder_id(&self, holder_id: Uuid) -> Result<bool, StoreError> {
        self.inner.exists_by_holder_id(holder_id).await
    }

    async fn exists_by_account_number(&self, number: &AccountNumber) -> Result<bool, StoreError> {
        self.inner.exists_by_account_number(number).await
    }

    async fn insert(&self, account: &Account) -> Result<(), StoreError> {
        if self.rival_pending.swap(false, Ordering::SeqCst) {
            let rival = Account::open(Uuid::new_v4(), account.account_number.clone());
            self.inner.insert(&rival).await?;
        }
        self.inner.insert(account).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete(id).await
    }
}

fn numbers(accounts: &[Account]) -> HashSet<String> {
    accounts
        .iter()
        .map(|a| a.account_number.to_string())
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creations_get_distinct_numbers() {
    let store = Arc::new(MemoryStore::new());
    let handler = Arc::new(AccountHandler::new(store.clone()));

    let tasks: Vec<_> = (0..100)
        .map(|_| {
            let handler = handler.clone();
            tokio::spawn(async move {
                handler
                    .create_account(CreateAccountCommand::new(Uuid::new_v4()))
                    .await
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let accounts = store.accounts();
    assert_eq!(accounts.len(), 100);
    assert_eq!(numbers(&accounts).len(), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_identical_generators_never_share_a_number() {
    // Every handler draws the same candidate sequence
    let store = Arc::new(MemoryStore::new());

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                let generator = AccountNumberGenerator::with_seed(store.clone(), 2024)
                    .with_retry_delay(Duration::ZERO);
                AccountHandler::with_generator(store, generator)
                    .create_account(CreateAccountCommand::new(Uuid::new_v4()))
                    .await
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let accounts = store.accounts();
    assert_eq!(accounts.len(), 4);
    assert_eq!(numbers(&accounts).len(), 4);
}

#[tokio::test]
async fn test_unique_constraint_forces_regeneration() {
    let store = Arc::new(RacingStore::new(MemoryStore::new()));
    let handler = AccountHandler::new(store.clone());

    let account = handler
        .create_account(CreateAccountCommand::new(Uuid::new_v4()))
        .await
        .unwrap();

    let accounts = store.inner.accounts();
    assert_eq!(accounts.len(), 2);
    assert_eq!(numbers(&accounts).len(), 2);
    assert!(accounts.contains(&account));
}

#[tokio::test]
async fn test_without_constraint_the_race_duplicates_numbers() {
    let store = Arc::new(RacingStore::new(
        MemoryStore::without_account_number_constraint(),
    ));
    let handler = AccountHandler::new(store.clone());

    handler
        .create_account(CreateAccountCommand::new(Uuid::new_v4()))
        .await
        .unwrap();

    let accounts = store.inner.accounts();
    assert_eq!(accounts.len(), 2);
    assert_eq!(numbers(&accounts).len(), 1);
}
