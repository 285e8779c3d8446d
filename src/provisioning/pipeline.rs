//! User-created event handling
//!
//! One message, one decision: open an account, recognise a duplicate
//! delivery, or skip a payload that can never succeed.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::domain::{Account, DomainError};
use crate::error::AppError;
use crate::handlers::{AccountHandler, CreateAccountCommand};
use crate::stream::EventStream;

use super::consumer::{self, PipelineHandle};
use super::{ProvisionError, RetryPolicy};

/// Pause before rewinding to the committed offset once retries run out
pub const DEFAULT_REDELIVERY_DELAY: Duration = Duration::from_secs(5);

/// What processing a message did
#[derive(Debug, Clone, PartialEq)]
pub enum ProvisionOutcome {
    /// A new account was opened
    Created(Account),
    /// The holder already had an account; nothing was written
    AlreadyProvisioned { account_holder_id: Uuid },
    /// The payload can never be processed and is acknowledged as-is
    Skipped { reason: String },
}

pub struct ProvisioningPipeline {
    accounts: Arc<AccountHandler>,
    retry_policy: RetryPolicy,
    redelivery_delay: Duration,
}

impl ProvisioningPipeline {
    pub fn new(accounts: Arc<AccountHandler>) -> Self {
        Self {
            accounts,
            retry_policy: RetryPolicy::default(),
            redelivery_delay: DEFAULT_REDELIVERY_DELAY,
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_redelivery_delay(mut self, redelivery_delay: Duration) -> Self {
        self.redelivery_delay = redelivery_delay;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn redelivery_delay(&self) -> Duration {
        self.redelivery_delay
    }

    /// Turn one "user created" payload into at most one account.
    ///
    /// The payload is the holder id as a bare UUID string. Anything else is
    /// `Skipped` rather than an error so the caller acknowledges it.
    pub async fn process(&self, payload: &str) -> Result<ProvisionOutcome, ProvisionError> {
        let account_holder_id = match Uuid::parse_str(payload.trim()) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(
                    payload = %payload,
                    error = %e,
                    "Malformed user-created payload, skipping"
                );
                return Ok(ProvisionOutcome::Skipped {
                    reason: e.to_string(),
                });
            }
        };

        match self
            .accounts
            .create_account(CreateAccountCommand::new(account_holder_id))
            .await
        {
            Ok(account) => Ok(ProvisionOutcome::Created(account)),
            Err(AppError::Domain(DomainError::AccountAlreadyExists(_))) => {
                tracing::info!(
                    account_holder_id = %account_holder_id,
                    "Holder already has an account, treating as duplicate delivery"
                );
                Ok(ProvisionOutcome::AlreadyProvisioned { account_holder_id })
            }
            Err(e) => Err(ProvisionError::Account(e)),
        }
    }

    /// Spawn one consumer task per partition
    pub fn start(
        self: Arc<Self>,
        stream: Arc<dyn EventStream>,
        partitions: impl IntoIterator<Item = i32>,
    ) -> PipelineHandle {
        consumer::spawn(self, stream, partitions)
    }
}
