//! Postgres-backed event stream
//!
//! Messages live in `stream_messages`; each consumer group keeps its last
//! committed offset per partition in `consumer_offsets`. Subscribers poll
//! for rows past the offset they have already fetched.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;

use super::{EventStream, Offset, StreamError, StreamMessage, Subscription};

/// Settings shared by every subscription of a stream
#[derive(Debug, Clone)]
pub struct PgStreamConfig {
    pub topic: String,
    pub consumer_group: String,
    pub poll_interval: Duration,
    pub batch_size: i64,
}

impl PgStreamConfig {
    pub fn new(topic: impl Into<String>, consumer_group: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            consumer_group: consumer_group.into(),
            poll_interval: Duration::from_millis(500),
            batch_size: 100,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[derive(Debug, Clone)]
pub struct PgEventStream {
    pool: PgPool,
    config: Arc<PgStreamConfig>,
}

impl PgEventStream {
    pub fn new(pool: PgPool, config: PgStreamConfig) -> Self {
        Self {
            pool,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &PgStreamConfig {
        &self.config
    }

    /// Append a message to a partition of this topic
    pub async fn publish(&self, partition: i32, payload: &str) -> Result<Offset, StreamError> {
        let offset: Offset = sqlx::query_scalar(
            r#"
            INSERT INTO stream_messages (topic, partition_id, payload)
            VALUES ($1, $2, $3)
            RETURNING stream_offset
            "#,
        )
        .bind(&self.config.topic)
        .bind(partition)
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;

        Ok(offset)
    }
}

/// Last committed offset for a group, 0 when nothing is committed yet
async fn load_committed(
    pool: &PgPool,
    config: &PgStreamConfig,
    partition: i32,
) -> Result<Offset, StreamError> {
    let committed: Option<Offset> = sqlx::query_scalar(
        r#"
        SELECT committed_offset FROM consumer_offsets
        WHERE consumer_group = $1 AND topic = $2 AND partition_id = $3
        "#,
    )
    .bind(&config.consumer_group)
    .bind(&config.topic)
    .bind(partition)
    .fetch_optional(pool)
    .await?;

    Ok(committed.unwrap_or(0))
}

#[async_trait]
impl EventStream for PgEventStream {
    async fn subscribe(&self, partition: i32) -> Result<Box<dyn Subscription>, StreamError> {
        let committed = load_committed(&self.pool, &self.config, partition).await?;

        tracing::info!(
            topic = %self.config.topic,
            consumer_group = %self.config.consumer_group,
            partition,
            committed_offset = committed,
            "Subscribed to stream partition"
        );

        Ok(Box::new(PgSubscription {
            pool: self.pool.clone(),
            config: Arc::clone(&self.config),
            partition,
            fetched_through: committed,
            buffer: VecDeque::new(),
            closed: false,
        }))
    }
}

struct PgSubscription {
    pool: PgPool,
    config: Arc<PgStreamConfig>,
    partition: i32,
    /// Highest offset already pulled into `buffer`
    fetched_through: Offset,
    buffer: VecDeque<StreamMessage>,
    closed: bool,
}

impl PgSubscription {
    async fn fetch_batch(&mut self) -> Result<(), StreamError> {
        let rows: Vec<(Offset, String)> = sqlx::query_as(
            r#"
            SELECT stream_offset, payload FROM stream_messages
            WHERE topic = $1 AND partition_id = $2 AND stream_offset > $3
            ORDER BY stream_offset ASC
            LIMIT $4
            "#,
        )
        .bind(&self.config.topic)
        .bind(self.partition)
        .bind(self.fetched_through)
        .bind(self.config.batch_size)
        .fetch_all(&self.pool)
        .await?;

        for (offset, payload) in rows {
            self.fetched_through = offset;
            self.buffer.push_back(StreamMessage {
                partition: self.partition,
                offset,
                payload,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Subscription for PgSubscription {
    async fn receive(&mut self) -> Result<Option<StreamMessage>, StreamError> {
        loop {
            if self.closed {
                return Err(StreamError::Closed);
            }
            if let Some(message) = self.buffer.pop_front() {
                return Ok(Some(message));
            }

            self.fetch_batch().await?;
            if self.buffer.is_empty() {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }
    }

    async fn commit(&mut self, offset: Offset) -> Result<(), StreamError> {
        sqlx::query(
            r#"
            INSERT INTO consumer_offsets (consumer_group, topic, partition_id, committed_offset, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (consumer_group, topic, partition_id) DO UPDATE
            SET committed_offset = GREATEST(consumer_offsets.committed_offset, EXCLUDED.committed_offset),
                updated_at = NOW()
            "#,
        )
        .bind(&self.config.consumer_group)
        .bind(&self.config.topic)
        .bind(self.partition)
        .bind(offset)
        .execute(&self.pool)
        .await?;

        tracing::debug!(partition = self.partition, offset, "Committed offset");
        Ok(())
    }

    async fn seek_to_committed(&mut self) -> Result<(), StreamError> {
        self.buffer.clear();
        self.fetched_through = load_committed(&self.pool, &self.config, self.partition).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        self.closed = true;
        self.buffer.clear();
        tracing::info!(
            topic = %self.config.topic,
            partition = self.partition,
            "Stream subscription closed"
        );
        Ok(())
    }
}
