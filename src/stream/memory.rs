//! In-process event stream
//!
//! Keeps one log per partition plus a committed offset per partition, which is
//! enough to reproduce redelivery after a crash or a rewind.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{EventStream, Offset, StreamError, StreamMessage, Subscription};

#[derive(Debug, Default)]
struct Topic {
    logs: HashMap<i32, Vec<String>>,
    committed: HashMap<i32, Offset>,
    commit_failures: u32,
    closed: bool,
}

/// Cloneable handle to an in-process topic
#[derive(Debug, Clone, Default)]
pub struct MemoryEventStream {
    topic: Arc<Mutex<Topic>>,
    notify: Arc<Notify>,
}

impl MemoryEventStream {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Topic> {
        self.topic.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a payload and return its offset (offsets start at 0)
    pub fn publish(&self, partition: i32, payload: impl Into<String>) -> Offset {
        let offset = {
            let mut topic = self.lock();
            let log = topic.logs.entry(partition).or_default();
            log.push(payload.into());
            (log.len() - 1) as Offset
        };
        self.notify.notify_waiters();
        offset
    }

    /// Stop accepting waits: subscribers drain what is left, then see `None`
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Last committed offset for a partition, if any
    pub fn committed_offset(&self, partition: i32) -> Option<Offset> {
        self.lock().committed.get(&partition).copied()
    }

    /// Make the next `count` commits fail with `StreamError::Unavailable`
    pub fn fail_next_commits(&self, count: u32) {
        self.lock().commit_failures = count;
    }

    fn next_position(&self, partition: i32) -> Offset {
        self.committed_offset(partition).map_or(0, |offset| offset + 1)
    }
}

#[async_trait]
impl EventStream for MemoryEventStream {
    async fn subscribe(&self, partition: i32) -> Result<Box<dyn Subscription>, StreamError> {
        Ok(Box::new(MemorySubscription {
            stream: self.clone(),
            partition,
            position: self.next_position(partition),
            closed: false,
        }))
    }
}

struct MemorySubscription {
    stream: MemoryEventStream,
    partition: i32,
    /// Offset of the next message to deliver
    position: Offset,
    closed: bool,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn receive(&mut self) -> Result<Option<StreamMessage>, StreamError> {
        loop {
            if self.closed {
                return Err(StreamError::Closed);
            }

            // Register interest before looking, so a publish in between is not missed
            let notified = self.stream.notify.notified();
            {
                let topic = self.stream.lock();
                let payload = topic
                    .logs
                    .get(&self.partition)
                    .and_then(|log| log.get(self.position as usize));

                if let Some(payload) = payload {
                    let message = StreamMessage {
                        partition: self.partition,
                        offset: self.position,
                        payload: payload.clone(),
                    };
                    self.position += 1;
                    return Ok(Some(message));
                }
                if topic.closed {
                    return Ok(None);
                }
            }
            notified.await;
        }
    }

    async fn commit(&mut self, offset: Offset) -> Result<(), StreamError> {
        let mut topic = self.stream.lock();
        if topic.commit_failures > 0 {
            topic.commit_failures -= 1;
            return Err(StreamError::Unavailable("injected commit failure".to_string()));
        }
        let committed = topic.committed.entry(self.partition).or_insert(offset);
        *committed = (*committed).max(offset);
        Ok(())
    }

    async fn seek_to_committed(&mut self) -> Result<(), StreamError> {
        self.position = self.stream.next_position(self.partition);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        self.closed = true;
        Ok(())
    }
}
