//! Command handlers module
//!
//! Account lifecycle and ledger operations. Handlers own the business
//! rules and talk to storage only through the store traits.

mod account_handler;
mod account_number;
mod commands;
mod ledger_handler;

pub use account_handler::AccountHandler;
pub use account_number::{AccountNumberGenerator, GENERATION_RETRY_DELAY, MAX_GENERATION_ATTEMPTS};
pub use commands::*;
pub use ledger_handler::LedgerHandler;
