//! Domain Error Types
//!
//! Business rule failures that don't depend on infrastructure.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised by account and ledger business rules.
///
/// None of these are retried by the service; they propagate to the caller
/// as typed failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// No account for the given lookup key
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Holder already owns an account
    #[error("Account already exists for holder {0}")]
    AccountAlreadyExists(String),

    /// Withdrawal exceeds balance
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    /// Deposit is valid on its own but would push the balance past the cap
    #[error("Deposit of {amount} would exceed the maximum balance (current balance {balance})")]
    BalanceLimitExceeded { amount: Decimal, balance: Decimal },

    /// Invalid amount (zero, negative, too precise or too large)
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Could not find a free account number within the attempt budget
    #[error("Failed to generate unique account number after {attempts} attempts")]
    AccountNumberExhausted { attempts: u32 },

    /// Balance was modified concurrently and retries ran out
    #[error("Version conflict on account {0}: concurrent modification detected")]
    VersionConflict(String),
}

impl DomainError {
    pub fn insufficient_funds(required: Decimal, available: Decimal) -> Self {
        Self::InsufficientFunds {
            required,
            available,
        }
    }

    /// Check if this is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InsufficientFunds { .. }
                | Self::BalanceLimitExceeded { .. }
                | Self::InvalidAmount(_)
                | Self::AccountNotFound(_)
        )
    }

    /// Check if this is a conflict error (state changed underneath the caller)
    pub fn is_conflict_error(&self) -> bool {
        matches!(
            self,
            Self::AccountAlreadyExists(_) | Self::VersionConflict(_)
        )
    }
}
