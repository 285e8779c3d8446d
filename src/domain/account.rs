//! Account and ledger records

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{Amount, AmountError, Balance, DomainError};

/// Number of digits in an account number
pub const ACCOUNT_NUMBER_LENGTH: usize = 10;

/// Externally visible account identifier: 10 decimal digits, no leading zero.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountNumber(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid account number: {0:?}")]
pub struct InvalidAccountNumber(pub String);

impl AccountNumber {
    /// Smallest valid account number (10^9)
    pub const MIN: u64 = 1_000_000_000;
    /// Largest valid account number (10^10 - 1)
    pub const MAX: u64 = 9_999_999_999;

    /// Uniformly random number in `[MIN, MAX]`
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(rng.gen_range(Self::MIN..=Self::MAX).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for AccountNumber {
    type Err = InvalidAccountNumber;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.len() == ACCOUNT_NUMBER_LENGTH
            && s.bytes().all(|b| b.is_ascii_digit())
            && !s.starts_with('0');
        if !valid {
            return Err(InvalidAccountNumber(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for AccountNumber {
    type Error = InvalidAccountNumber;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AccountNumber> for String {
    fn from(number: AccountNumber) -> Self {
        number.0
    }
}

impl fmt::Display for AccountNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A bank account owned by exactly one holder.
///
/// `version` is the optimistic concurrency token: every balance write is
/// conditional on the version that was read and bumps it by one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub account_number: AccountNumber,
    pub account_holder_id: Uuid,
    pub balance: Balance,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Open a new zero-balance account for a holder
    pub fn open(account_holder_id: Uuid, account_number: AccountNumber) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_number,
            account_holder_id,
            balance: Balance::zero(),
            version: 0,
            created_at: Utc::now(),
        }
    }

    /// Balance after depositing `amount`
    pub fn deposit(&self, amount: &Amount) -> Result<Balance, DomainError> {
        self.balance.credit(amount).map_err(|e| match e {
            AmountError::Overflow => DomainError::BalanceLimitExceeded {
                amount: amount.value(),
                balance: self.balance.value(),
            },
            other => DomainError::InvalidAmount(other.to_string()),
        })
    }

    /// Balance after withdrawing `amount`; never goes below zero
    pub fn withdraw(&self, amount: &Amount) -> Result<Balance, DomainError> {
        if !self.balance.is_sufficient_for(amount) {
            return Err(DomainError::insufficient_funds(
                amount.value(),
                self.balance.value(),
            ));
        }
        self.balance
            .debit(amount)
            .map_err(|e| DomainError::InvalidAmount(e.to_string()))
    }
}

/// Direction of a ledger movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionType::Deposit),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            other => Err(format!("unknown transaction type: {other}")),
        }
    }
}

/// Immutable ledger entry. Never updated or deleted individually.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub account_id: Uuid,
    pub amount: Amount,
    pub transaction_type: TransactionType,
    pub timestamp: DateTime<Utc>,
    pub description: Option<String>,
}

impl Transaction {
    pub fn new(
        account_id: Uuid,
        amount: Amount,
        transaction_type: TransactionType,
        description: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            amount,
            transaction_type,
            timestamp: Utc::now(),
            description,
        }
    }

    /// Deposits count positive, withdrawals negative
    pub fn signed_amount(&self) -> Decimal {
        match self.transaction_type {
            TransactionType::Deposit => self.amount.value(),
            TransactionType::Withdrawal => -self.amount.value(),
        }
    }
}
