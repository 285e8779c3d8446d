//! Account number generation
//!
//! Draws a random 10-digit number and checks it against the account store,
//! retrying on collision. The check is not a reservation: two callers can
//! both see a number as free, so the store's unique constraint has the
//! final say and `AccountHandler` regenerates when it fires.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::domain::{AccountNumber, DomainError};
use crate::error::AppError;
use crate::store::AccountStore;

/// Candidates drawn before giving up
pub const MAX_GENERATION_ATTEMPTS: u32 = 5;

/// Pause between colliding candidates
pub const GENERATION_RETRY_DELAY: Duration = Duration::from_millis(100);

pub struct AccountNumberGenerator {
    accounts: Arc<dyn AccountStore>,
    rng: Mutex<StdRng>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl AccountNumberGenerator {
    pub fn new(accounts: Arc<dyn AccountStore>) -> Self {
        Self::with_rng(accounts, StdRng::from_entropy())
    }

    /// Deterministic candidate sequence, for reproducing collisions
    pub fn with_seed(accounts: Arc<dyn AccountStore>, seed: u64) -> Self {
        Self::with_rng(accounts, StdRng::seed_from_u64(seed))
    }

    fn with_rng(accounts: Arc<dyn AccountStore>, rng: StdRng) -> Self {
        Self {
            accounts,
            rng: Mutex::new(rng),
            max_attempts: MAX_GENERATION_ATTEMPTS,
            retry_delay: GENERATION_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Draw the next candidate without checking the store
    pub fn candidate(&self) -> AccountNumber {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        AccountNumber::random(&mut *rng)
    }

    /// A number no stored account is using right now.
    ///
    /// # Errors
    /// - `DomainError::AccountNumberExhausted` if every attempt collided
    /// - `AppError::Store` if the existence check fails
    pub async fn generate(&self) -> Result<AccountNumber, AppError> {
        for attempt in 1..=self.max_attempts {
            let candidate = self.candidate();

            if !self.accounts.exists_by_account_number(&candidate).await? {
                return Ok(candidate);
            }

            tracing::debug!(
                attempt,
                max_attempts = self.max_attempts,
                "Account number collision, drawing again"
            );

            if attempt < self.max_attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        tracing::warn!(
            attempts = self.max_attempts,
            "Could not find a free account number"
        );
        Err(DomainError::AccountNumberExhausted {
            attempts: self.max_attempts,
        }
        .into())
    }
}
