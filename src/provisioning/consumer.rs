//! Per-partition consumer tasks
//!
//! Messages within a partition are handled strictly in order. An offset is
//! committed only after its message has been processed, so a crash between
//! the two leads to redelivery, which `ProvisioningPipeline::process`
//! absorbs as a duplicate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::stream::{EventStream, Offset, StreamError, StreamMessage, Subscription};

use super::{ProvisionError, ProvisionOutcome, ProvisioningPipeline};

/// Consecutive rewinds of one offset after which the message is reported
/// as blocking its partition
const STALLED_REDELIVERIES: u32 = 3;

/// Handle to the running consumers. Dropping it stops them as well.
#[derive(Debug)]
pub struct PipelineHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    redeliveries: Arc<AtomicU64>,
}

impl PipelineHandle {
    /// Signal every consumer to stop and wait until they have closed their
    /// subscriptions
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Provisioning consumer task failed");
            }
        }
        tracing::info!("Provisioning pipeline stopped");
    }

    /// Number of consumer tasks still running
    pub fn running(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_finished()).count()
    }

    /// Messages left unacknowledged and rewound for redelivery, across all
    /// partitions
    pub fn redeliveries(&self) -> u64 {
        self.redeliveries.load(Ordering::Relaxed)
    }
}

pub(super) fn spawn(
    pipeline: Arc<ProvisioningPipeline>,
    stream: Arc<dyn EventStream>,
    partitions: impl IntoIterator<Item = i32>,
) -> PipelineHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let redeliveries = Arc::new(AtomicU64::new(0));

    let tasks = partitions
        .into_iter()
        .map(|partition| {
            let consumer = PartitionConsumer {
                pipeline: Arc::clone(&pipeline),
                stream: Arc::clone(&stream),
                partition,
                shutdown: shutdown_rx.clone(),
                redeliveries: Arc::clone(&redeliveries),
                stalled: None,
            };
            tokio::spawn(consumer.run())
        })
        .collect();

    PipelineHandle {
        shutdown: shutdown_tx,
        tasks,
        redeliveries,
    }
}

/// What the consumer loop does after a message
enum Flow {
    Continue,
    /// Read position is unreliable; drop the subscription and start over
    /// from the committed offset
    Resubscribe,
    Stop,
}

struct PartitionConsumer {
    pipeline: Arc<ProvisioningPipeline>,
    stream: Arc<dyn EventStream>,
    partition: i32,
    shutdown: watch::Receiver<bool>,
    redeliveries: Arc<AtomicU64>,
    /// Offset being redelivered and how many times in a row
    stalled: Option<(Offset, u32)>,
}

impl PartitionConsumer {
    async fn run(mut self) {
        tracing::info!(partition = self.partition, "Provisioning consumer started");

        let mut failures = 0;
        while !self.is_shutting_down() {
            let mut subscription = match self.stream.subscribe(self.partition).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    failures += 1;
                    let delay = self.pipeline.retry_policy().delay_for_attempt(failures);
                    tracing::warn!(
                        partition = self.partition,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Failed to subscribe to stream"
                    );
                    if self.sleep_or_shutdown(delay).await {
                        break;
                    }
                    continue;
                }
            };
            failures = 0;

            let flow = self.consume(subscription.as_mut()).await;

            if let Err(e) = subscription.close().await {
                tracing::warn!(partition = self.partition, error = %e, "Failed to close subscription");
            }
            if matches!(flow, Flow::Stop) {
                break;
            }
        }

        tracing::info!(partition = self.partition, "Provisioning consumer stopped");
    }

    async fn consume(&mut self, subscription: &mut dyn Subscription) -> Flow {
        let mut receive_failures = 0;
        loop {
            if self.is_shutting_down() {
                return Flow::Stop;
            }

            let received = tokio::select! {
                _ = self.shutdown.changed() => return Flow::Stop,
                received = subscription.receive() => received,
            };

            let flow = match received {
                Ok(Some(message)) => {
                    receive_failures = 0;
                    self.handle(subscription, message).await
                }
                Ok(None) | Err(StreamError::Closed) => {
                    tracing::info!(partition = self.partition, "Stream closed");
                    Flow::Stop
                }
                Err(e) => {
                    receive_failures += 1;
                    let delay = self.pipeline.retry_policy().delay_for_attempt(receive_failures);
                    tracing::warn!(
                        partition = self.partition,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Failed to receive from stream"
                    );
                    if self.sleep_or_shutdown(delay).await {
                        Flow::Stop
                    } else {
                        Flow::Continue
                    }
                }
            };

            if !matches!(flow, Flow::Continue) {
                return flow;
            }
        }
    }

    /// Process a message and commit its offset, retrying the pair on
    /// transient failures. Gives up on the message for now once the policy
    /// is exhausted and rewinds so it is delivered again.
    async fn handle(&mut self, subscription: &mut dyn Subscription, message: StreamMessage) -> Flow {
        let policy = self.pipeline.retry_policy().clone();
        let mut attempt = 0;

        loop {
            let error = match self.process_and_commit(subscription, &message).await {
                Ok(()) => {
                    self.stalled = None;
                    return Flow::Continue;
                }
                Err(e) => e,
            };

            if error.is_retryable() && policy.should_retry(attempt) {
                attempt += 1;
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    partition = message.partition,
                    offset = message.offset,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %error,
                    "Provisioning attempt failed, retrying"
                );
                if self.sleep_or_shutdown(delay).await {
                    return Flow::Stop;
                }
                continue;
            }

            let redeliveries = self.record_redelivery(message.offset);
            if redeliveries >= STALLED_REDELIVERIES {
                tracing::error!(
                    partition = message.partition,
                    offset = message.offset,
                    redeliveries,
                    error = %error,
                    "Message keeps failing and is blocking its partition"
                );
            } else {
                tracing::warn!(
                    partition = message.partition,
                    offset = message.offset,
                    attempts = attempt + 1,
                    redeliveries,
                    error = %error,
                    "Provisioning failed, leaving message for redelivery"
                );
            }
            if self.sleep_or_shutdown(self.pipeline.redelivery_delay()).await {
                return Flow::Stop;
            }

            return match subscription.seek_to_committed().await {
                Ok(()) => Flow::Continue,
                Err(e) => {
                    tracing::warn!(
                        partition = message.partition,
                        error = %e,
                        "Failed to rewind subscription, resubscribing"
                    );
                    Flow::Resubscribe
                }
            };
        }
    }

    async fn process_and_commit(
        &self,
        subscription: &mut dyn Subscription,
        message: &StreamMessage,
    ) -> Result<(), ProvisionError> {
        let outcome = self.pipeline.process(&message.payload).await?;

        match &outcome {
            ProvisionOutcome::Created(account) => tracing::info!(
                partition = message.partition,
                offset = message.offset,
                account_id = %account.id,
                account_holder_id = %account.account_holder_id,
                "Provisioned account"
            ),
            ProvisionOutcome::AlreadyProvisioned { account_holder_id } => tracing::debug!(
                partition = message.partition,
                offset = message.offset,
                account_holder_id = %account_holder_id,
                "Duplicate delivery acknowledged"
            ),
            ProvisionOutcome::Skipped { .. } => tracing::warn!(
                partition = message.partition,
                offset = message.offset,
                "Skipped unprocessable message"
            ),
        }

        subscription.commit(message.offset).await?;
        Ok(())
    }

    /// Count a rewind of `offset`; returns how many times in a row it has
    /// been rewound
    fn record_redelivery(&mut self, offset: Offset) -> u32 {
        self.redeliveries.fetch_add(1, Ordering::Relaxed);
        let count = match self.stalled {
            Some((stalled, count)) if stalled == offset => count + 1,
            _ => 1,
        };
        self.stalled = Some((offset, count));
        count
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Sleep for `delay`; true if shutdown was requested meanwhile
    async fn sleep_or_shutdown(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.changed() => true,
            _ = tokio::time::sleep(delay) => self.is_shutting_down(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::AccountHandler;
    use crate::store::MemoryStore;
    use crate::stream::MemoryEventStream;

    fn consumer() -> PartitionConsumer {
        let accounts = Arc::new(AccountHandler::new(Arc::new(MemoryStore::new())));
        let (_tx, shutdown) = watch::channel(false);
        PartitionConsumer {
            pipeline: Arc::new(ProvisioningPipeline::new(accounts)),
            stream: Arc::new(MemoryEventStream::new()),
            partition: 0,
            shutdown,
            redeliveries: Arc::new(AtomicU64::new(0)),
            stalled: None,
        }
    }

    #[test]
    fn test_redeliveries_count_per_offset() {
        let mut consumer = consumer();

        assert_eq!(consumer.record_redelivery(7), 1);
        assert_eq!(consumer.record_redelivery(7), 2);
        assert_eq!(consumer.record_redelivery(7), STALLED_REDELIVERIES);

        // A different offset starts over; the total keeps counting
        assert_eq!(consumer.record_redelivery(8), 1);
        assert_eq!(consumer.redeliveries.load(Ordering::Relaxed), 4);
    }
}
