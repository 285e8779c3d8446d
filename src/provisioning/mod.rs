//! Account provisioning module
//!
//! Consumes "user created" events and opens exactly one account per holder.
//! Delivery is at-least-once; the holder id is the de-duplication key.

mod consumer;
mod pipeline;
mod retry;

use crate::error::AppError;
use crate::stream::StreamError;

pub use consumer::PipelineHandle;
pub use pipeline::{ProvisionOutcome, ProvisioningPipeline, DEFAULT_REDELIVERY_DELAY};
pub use retry::RetryPolicy;

/// Failures while provisioning a single message
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("Account creation failed: {0}")]
    Account(#[from] AppError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),
}

impl ProvisionError {
    /// Whether retrying the message after a backoff may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ProvisionError::Account(e) => e.is_transient(),
            ProvisionError::Stream(e) => e.is_transient(),
        }
    }
}
