//! Account lifecycle handler
//!
//! Opens, looks up and deletes accounts. Opening is idempotent per holder:
//! the existence check catches ordinary duplicates and the store's unique
//! constraint catches the ones that race past it.

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::{Account, AccountNumber, DomainError, InvalidAccountNumber};
use crate::error::AppError;
use crate::store::{AccountStore, StoreError, UniqueKey};

use super::{AccountNumberGenerator, CreateAccountCommand};

/// Fresh numbers drawn after the store rejects one as already taken
const MAX_NUMBER_CONFLICTS: u32 = 3;

pub struct AccountHandler {
    accounts: Arc<dyn AccountStore>,
    generator: AccountNumberGenerator,
}

impl AccountHandler {
    pub fn new(accounts: Arc<dyn AccountStore>) -> Self {
        let generator = AccountNumberGenerator::new(Arc::clone(&accounts));
        Self::with_generator(accounts, generator)
    }

    pub fn with_generator(accounts: Arc<dyn AccountStore>, generator: AccountNumberGenerator) -> Self {
        Self {
            accounts,
            generator,
        }
    }

    /// Open a zero-balance account for a holder.
    ///
    /// # Errors
    /// - `DomainError::AccountAlreadyExists` if the holder already has one
    /// - `DomainError::AccountNumberExhausted` if no free number was found
    pub async fn create_account(&self, command: CreateAccountCommand) -> Result<Account, AppError> {
        let holder_id = command.account_holder_id;

        if self.accounts.exists_by_holder_id(holder_id).await? {
            return Err(DomainError::AccountAlreadyExists(holder_id.to_string()).into());
        }

        let mut conflicts = 0;
        loop {
            let number = self.generator.generate().await?;
            let account = Account::open(holder_id, number);

            match self.accounts.insert(&account).await {
                Ok(()) => {
                    tracing::info!(
                        account_id = %account.id,
                        account_holder_id = %holder_id,
                        account_number = %account.account_number,
                        "Account created"
                    );
                    return Ok(account);
                }
                Err(StoreError::UniqueViolation(UniqueKey::HolderId)) => {
                    return Err(DomainError::AccountAlreadyExists(holder_id.to_string()).into());
                }
                Err(StoreError::UniqueViolation(UniqueKey::AccountNumber))
                    if conflicts < MAX_NUMBER_CONFLICTS =>
                {
                    conflicts += 1;
                    tracing::warn!(
                        account_holder_id = %holder_id,
                        account_number = %account.account_number,
                        conflicts,
                        "Account number taken concurrently, regenerating"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn get_account_by_id(&self, id: Uuid) -> Result<Account, AppError> {
        self.accounts
            .find_by_id(id)
            .await?
            .ok_or_else(|| DomainError::AccountNotFound(id.to_string()).into())
    }

    pub async fn get_account_by_holder_id(&self, holder_id: Uuid) -> Result<Account, AppError> {
        self.accounts
            .find_by_holder_id(holder_id)
            .await?
            .ok_or_else(|| DomainError::AccountNotFound(format!("holder {holder_id}")).into())
    }

    pub async fn get_account_by_number(&self, account_number: &str) -> Result<Account, AppError> {
        let number: AccountNumber = account_number
            .parse()
            .map_err(|e: InvalidAccountNumber| AppError::InvalidRequest(e.to_string()))?;

        self.accounts
            .find_by_account_number(&number)
            .await?
            .ok_or_else(|| DomainError::AccountNotFound(number.to_string()).into())
    }

    /// Delete an account and its ledger
    pub async fn delete_account(&self, id: Uuid) -> Result<(), AppError> {
        if !self.accounts.delete(id).await? {
            return Err(DomainError::AccountNotFound(id.to_string()).into());
        }
        tracing::info!(account_id = %id, "Account deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn handler(store: Arc<MemoryStore>) -> AccountHandler {
        AccountHandler::new(store)
    }

    #[tokio::test]
    async fn test_create_then_lookup() {
        let store = Arc::new(MemoryStore::new());
        let handler = handler(store);
        let holder = Uuid::new_v4();

        let account = handler.create_account(CreateAccountCommand::new(holder)).await.unwrap();

        assert_eq!(handler.get_account_by_id(account.id).await.unwrap(), account);
        assert_eq!(handler.get_account_by_holder_id(holder).await.unwrap(), account);
        assert_eq!(
            handler
                .get_account_by_number(account.account_number.as_str())
                .await
                .unwrap(),
            account
        );
    }

    #[tokio::test]
    async fn test_second_account_for_holder_rejected() {
        let store = Arc::new(MemoryStore::new());
        let handler = handler(store.clone());
        let holder = Uuid::new_v4();

        handler.create_account(CreateAccountCommand::new(holder)).await.unwrap();
        let err = handler
            .create_account(CreateAccountCommand::new(holder))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Domain(DomainError::AccountAlreadyExists(_))));
        assert_eq!(store.accounts().len(), 1);
    }

    #[tokio::test]
    async fn test_identical_seeds_get_distinct_numbers() {
        // Both generators draw the same sequence; the second must skip the
        // number the first one took.
        let store = Arc::new(MemoryStore::new());
        let first = AccountHandler::with_generator(
            store.clone(),
            AccountNumberGenerator::with_seed(store.clone(), 11),
        );
        let second = AccountHandler::with_generator(
            store.clone(),
            AccountNumberGenerator::with_seed(store.clone(), 11).with_retry_delay(Duration::ZERO),
        );

        let a = first.create_account(CreateAccountCommand::new(Uuid::new_v4())).await.unwrap();
        let b = second.create_account(CreateAccountCommand::new(Uuid::new_v4())).await.unwrap();

        assert_ne!(a.account_number, b.account_number);
    }

    #[tokio::test]
    async fn test_lookup_errors() {
        let store = Arc::new(MemoryStore::new());
        let handler = handler(store);

        let err = handler.get_account_by_id(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::Domain(DomainError::AccountNotFound(_))));

        let err = handler.get_account_by_number("12ab").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));

        let err = handler.delete_account(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::Domain(DomainError::AccountNotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_account() {
        let store = Arc::new(MemoryStore::new());
        let handler = handler(store);
        let account = handler
            .create_account(CreateAccountCommand::new(Uuid::new_v4()))
            .await
            .unwrap();

        handler.delete_account(account.id).await.unwrap();
        assert!(handler.get_account_by_id(account.id).await.is_err());
    }
}
