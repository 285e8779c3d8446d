//! Command definitions
//!
//! Commands represent intentions to change account state.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Command to open an account for a holder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountCommand {
    pub account_holder_id: Uuid,
}

impl CreateAccountCommand {
    pub fn new(account_holder_id: Uuid) -> Self {
        Self { account_holder_id }
    }
}

/// Command to deposit into or withdraw from an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionCommand {
    pub account_id: Uuid,
    /// Amount to move (as string for precise decimal)
    pub amount: String,
    pub description: Option<String>,
}

impl TransactionCommand {
    pub fn new(account_id: Uuid, amount: impl Into<String>) -> Self {
        Self {
            account_id,
            amount: amount.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
