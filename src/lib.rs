//! Bank accounts library
//!
//! Account provisioning from user-created events and a deposit/withdraw
//! ledger. Re-exports modules for the server binary and integration tests.

pub mod api;
pub mod config;
pub mod db;
pub mod domain;
mod error;
pub mod handlers;
pub mod jobs;
pub mod provisioning;
pub mod store;
pub mod stream;

pub use config::Config;
pub use domain::{Account, AccountNumber, Amount, AmountError, Balance, DomainError};
pub use domain::{Transaction, TransactionType};
pub use error::{AppError, AppResult, ErrorResponse};
