//! Deposit and withdrawal handler
//!
//! Each movement reads the account, computes the new balance and hands the
//! store a `LedgerEntry` conditioned on the version it read. The store
//! writes the transaction row and the balance together or not at all; a
//! concurrent writer shows up as a version conflict and the movement is
//! recomputed from a fresh read.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use uuid::Uuid;

use crate::domain::{
    Account, Amount, AmountError, Balance, DomainError, Transaction, TransactionType,
};
use crate::error::AppError;
use crate::store::{AccountStore, LedgerEntry, LedgerStore, StoreError};

use super::TransactionCommand;

/// Attempts per movement before reporting a version conflict
const MAX_WRITE_ATTEMPTS: u32 = 8;

/// Backoff step between conflicting attempts (multiplied by attempt number,
/// plus up to 5 ms of jitter)
const CONFLICT_BACKOFF: Duration = Duration::from_millis(5);

pub struct LedgerHandler {
    accounts: Arc<dyn AccountStore>,
    ledger: Arc<dyn LedgerStore>,
}

impl LedgerHandler {
    pub fn new(accounts: Arc<dyn AccountStore>, ledger: Arc<dyn LedgerStore>) -> Self {
        Self { accounts, ledger }
    }

    /// Credit an account and record the deposit
    pub async fn deposit(&self, command: TransactionCommand) -> Result<Account, AppError> {
        self.apply(command, TransactionType::Deposit).await
    }

    /// Debit an account and record the withdrawal.
    ///
    /// # Errors
    /// - `DomainError::InsufficientFunds` if the balance is below the amount;
    ///   nothing is written in that case
    pub async fn withdraw(&self, command: TransactionCommand) -> Result<Account, AppError> {
        self.apply(command, TransactionType::Withdrawal).await
    }

    /// Ledger for an account, oldest first. Unknown accounts have an empty ledger.
    pub async fn get_transactions(&self, account_id: Uuid) -> Result<Vec<Transaction>, AppError> {
        Ok(self.ledger.find_by_account_id(account_id).await?)
    }

    async fn apply(
        &self,
        command: TransactionCommand,
        transaction_type: TransactionType,
    ) -> Result<Account, AppError> {
        let amount: Amount = command
            .amount
            .parse()
            .map_err(|e: AmountError| DomainError::InvalidAmount(e.to_string()))?;

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let account = self
                .accounts
                .find_by_id(command.account_id)
                .await?
                .ok_or_else(|| DomainError::AccountNotFound(command.account_id.to_string()))?;

            let new_balance = next_balance(&account, &amount, transaction_type)?;
            let entry = LedgerEntry {
                expected_version: account.version,
                new_balance,
                transaction: Transaction::new(
                    account.id,
                    amount,
                    transaction_type,
                    command.description.clone(),
                ),
            };

            match self.ledger.append_entry(entry).await {
                Ok(updated) => {
                    tracing::info!(
                        account_id = %updated.id,
                        transaction_type = %transaction_type,
                        amount = %amount,
                        balance = %updated.balance,
                        version = updated.version,
                        "Ledger entry recorded"
                    );
                    return Ok(updated);
                }
                Err(StoreError::VersionConflict { expected, .. }) => {
                    tracing::debug!(
                        account_id = %command.account_id,
                        expected_version = expected,
                        attempt,
                        "Concurrent balance update, retrying"
                    );
                    if attempt < MAX_WRITE_ATTEMPTS {
                        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..5));
                        tokio::time::sleep(CONFLICT_BACKOFF * attempt + jitter).await;
                    }
                }
                Err(StoreError::AccountNotFound(id)) => {
                    return Err(DomainError::AccountNotFound(id.to_string()).into());
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::warn!(
            account_id = %command.account_id,
            attempts = MAX_WRITE_ATTEMPTS,
            "Gave up on contended balance update"
        );
        Err(DomainError::VersionConflict(command.account_id.to_string()).into())
    }
}

fn next_balance(
    account: &Account,
    amount: &Amount,
    transaction_type: TransactionType,
) -> Result<Balance, DomainError> {
    match transaction_type {
        TransactionType::Deposit => account.deposit(amount),
        TransactionType::Withdrawal => account.withdraw(amount),
    }
}
