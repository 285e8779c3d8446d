//! Ledger engine tests: balance/ledger invariant and concurrent writers

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use bank_accounts::handlers::{CreateAccountCommand, LedgerHandler, TransactionCommand};
use bank_accounts::jobs::{ledger_total, verify_account_ledger};
use bank_accounts::store::{AccountStore, LedgerEntry, LedgerStore, MemoryStore, StoreError};
use bank_accounts::{Account, Amount, AppError, DomainError, Transaction, TransactionType};

mod common;

async fn open_account(app: &common::TestApp) -> Account {
    app.accounts
        .create_account(CreateAccountCommand::new(Uuid::new_v4()))
        .await
        .unwrap()
}

#[derive(Debug, Clone)]
enum Op {
    Deposit(i64),
    Withdraw(i64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1i64..100_000).prop_map(Op::Deposit),
        (1i64..100_000).prop_map(Op::Withdraw),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_balance_matches_ledger_after_every_call(ops in prop::collection::vec(op_strategy(), 1..30)) {
        tokio_test::block_on(async {
            let app = common::memory_app();
            let account = open_account(&app).await;
            let mut expected = Decimal::ZERO;

            for op in ops {
                let before = app.store.find_by_account_id(account.id).await.unwrap().len();

                let (cents, result) = match op {
                    Op::Deposit(cents) => {
                        let amount = Decimal::new(cents, 2).to_string();
                        (cents, app.ledger.deposit(TransactionCommand::new(account.id, amount)).await)
                    }
                    Op::Withdraw(cents) => {
                        let amount = Decimal::new(cents, 2).to_string();
                        (-cents, app.ledger.withdraw(TransactionCommand::new(account.id, amount)).await)
                    }
                };

                let ledger = app.store.find_by_account_id(account.id).await.unwrap();
                match result {
                    Ok(updated) => {
                        expected += Decimal::new(cents, 2);
                        assert_eq!(ledger.len(), before + 1);
                        assert_eq!(updated.balance.value(), expected);
                    }
                    Err(AppError::Domain(DomainError::InsufficientFunds { .. })) => {
                        assert!(cents < 0);
                        assert!(expected < Decimal::new(-cents, 2));
                        assert_eq!(ledger.len(), before);
                    }
                    Err(other) => panic!("unexpected error: {other:?}"),
                }

                let current = app.accounts.get_account_by_id(account.id).await.unwrap();
                assert_eq!(current.balance.value(), ledger_total(&ledger));
                assert!(current.balance.value() >= Decimal::ZERO);
            }
        });
    }
}

#[tokio::test]
async fn test_insufficient_funds_leaves_state_unchanged() {
    let app = common::memory_app();
    let account = open_account(&app).await;

    app.ledger
        .deposit(TransactionCommand::new(account.id, "25.00"))
        .await
        .unwrap();

    let err = app
        .ledger
        .withdraw(TransactionCommand::new(account.id, "25.01"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Domain(DomainError::InsufficientFunds { .. })));

    let current = app.accounts.get_account_by_id(account.id).await.unwrap();
    assert_eq!(current.balance.value(), dec!(25.00));
    assert_eq!(current.version, 1);
    assert_eq!(app.ledger.get_transactions(account.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_deleted_account_rejects_movements() {
    let app = common::memory_app();
    let account = open_account(&app).await;
    app.ledger
        .deposit(TransactionCommand::new(account.id, "5.00"))
        .await
        .unwrap();

    app.accounts.delete_account(account.id).await.unwrap();

    let err = app
        .ledger
        .deposit(TransactionCommand::new(account.id, "1.00"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Domain(DomainError::AccountNotFound(_))));
    assert!(app.ledger.get_transactions(account.id).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deposits_are_not_lost() {
    let app = common::memory_app();
    let account = open_account(&app).await;

    let account_id = account.id;
    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let ledger = app.ledger.clone();
            tokio::spawn(async move {
                ledger
                    .deposit(TransactionCommand::new(account_id, "1.00"))
                    .await
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let current = app.accounts.get_account_by_id(account.id).await.unwrap();
    assert_eq!(current.balance.value(), dec!(20.00));
    assert_eq!(current.version, 20);
    assert_eq!(app.ledger.get_transactions(account.id).await.unwrap().len(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_mixed_movements_keep_invariant() {
    let app = common::memory_app();
    let account = open_account(&app).await;
    app.ledger
        .deposit(TransactionCommand::new(account.id, "100.00"))
        .await
        .unwrap();

    let account_id = account.id;
    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let ledger = app.ledger.clone();
            tokio::spawn(async move {
                let command = TransactionCommand::new(account_id, "1.00");
                if i % 2 == 0 {
                    ledger.deposit(command).await
                } else {
                    ledger.withdraw(command).await
                }
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let current = app.accounts.get_account_by_id(account.id).await.unwrap();
    assert_eq!(current.balance.value(), dec!(100.00));
    assert_eq!(
        verify_account_ledger(app.store.as_ref(), app.store.as_ref(), account.id)
            .await
            .unwrap(),
        None
    );
}

/// Ledger where a rival writer deposits 5.00 right before each of the
/// first `rivals` appends, so those appends carry a stale version.
struct ContendedLedger {
    inner: Arc<MemoryStore>,
    rivals_remaining: AtomicU32,
    appends: AtomicU32,
}

impl ContendedLedger {
    fn new(inner: Arc<MemoryStore>, rivals: u32) -> Self {
        Self {
            inner,
            rivals_remaining: AtomicU32::new(rivals),
            appends: AtomicU32::new(0),
        }
    }

    async fn rival_deposit(&self, account_id: Uuid) -> Result<(), StoreError> {
        let current = self
            .inner
            .find_by_id(account_id)
            .await?
            .ok_or(StoreError::AccountNotFound(account_id))?;
        let amount: Amount = "5.00".parse().unwrap();
        let entry = LedgerEntry {
            expected_version: current.version,
            new_balance: current.balance.credit(&amount).unwrap(),
            transaction: Transaction::new(
                account_id,
                amount,
                TransactionType::Deposit,
                Some("rival".to_string()),
            ),
        };
        self.inner.append_entry(entry).await.map(|_| ())
    }
}

#[async_trait]
impl LedgerStore for ContendedLedger {
    async fn append_entry(&self, entry: LedgerEntry) -> Result<Account, StoreError> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        let rival = self
            .rivals_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rival {
            self.rival_deposit(entry.account_id()).await?;
        }
        self.inner.append_entry(entry).await
    }

    async fn find_by_account_id(&self, account_id: Uuid) -> Result<Vec<Transaction>, StoreError> {
        self.inner.find_by_account_id(account_id).await
    }
}

async fn contended(rivals: u32) -> (Arc<MemoryStore>, Arc<ContendedLedger>, LedgerHandler, Account) {
    let store = Arc::new(MemoryStore::new());
    let account = Account::open(Uuid::new_v4(), "4815162342".parse().unwrap());
    store.insert(&account).await.unwrap();

    let ledger = Arc::new(ContendedLedger::new(store.clone(), rivals));
    let handler = LedgerHandler::new(store.clone(), ledger.clone());
    (store, ledger, handler, account)
}

#[tokio::test]
async fn test_stale_version_is_recomputed_from_fresh_read() {
    let (store, ledger, handler, account) = contended(1).await;

    let updated = handler
        .deposit(TransactionCommand::new(account.id, "10.00"))
        .await
        .unwrap();

    // First append lost to the rival, second one applied on top of it
    assert_eq!(ledger.appends.load(Ordering::SeqCst), 2);
    assert_eq!(updated.balance.value(), dec!(15.00));
    assert_eq!(updated.version, 2);

    let rows = store.find_by_account_id(account.id).await.unwrap();
    assert_eq!(rows.len(), 2);
    let ours: Vec<_> = rows
        .iter()
        .filter(|t| t.amount.value() == dec!(10.00))
        .collect();
    assert_eq!(ours.len(), 1);
    assert_eq!(ledger_total(&rows), dec!(15.00));
    assert_eq!(
        verify_account_ledger(store.as_ref(), store.as_ref(), account.id)
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn test_endless_contention_gives_up_without_writing() {
    let (store, ledger, handler, account) = contended(u32::MAX).await;

    let err = handler
        .deposit(TransactionCommand::new(account.id, "10.00"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Domain(DomainError::VersionConflict(_))));
    assert_eq!(ledger.appends.load(Ordering::SeqCst), 8);

    // Only the rival deposits landed
    let rows = store.find_by_account_id(account.id).await.unwrap();
    assert_eq!(rows.len(), 8);
    assert!(rows.iter().all(|t| t.amount.value() == dec!(5.00)));

    let current = store.find_by_id(account.id).await.unwrap().unwrap();
    assert_eq!(current.balance.value(), dec!(40.00));
    assert_eq!(current.version, 8);
}
