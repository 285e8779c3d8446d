//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::provisioning::RetryPolicy;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Emit JSON log lines instead of human-readable ones
    pub json_logs: bool,

    /// Topic carrying user-created events
    pub event_topic: String,

    /// Consumer group whose offsets this service commits
    pub consumer_group: String,

    /// Partitions consumed, numbered `0..consumer_partitions`
    pub consumer_partitions: i32,

    /// How often an idle consumer polls for new messages
    pub stream_poll_interval: Duration,

    /// Backoff for transient provisioning failures
    pub provisioning_retry: RetryPolicy,

    /// Pause before a failed message is redelivered
    pub provisioning_redelivery_delay: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = parse_or("DATABASE_MAX_CONNECTIONS", 10)?;

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = parse_or("PORT", 3000)?;

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let json_logs = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => true,
            Ok("text") | Err(_) => false,
            Ok(_) => return Err(ConfigError::InvalidValue("LOG_FORMAT")),
        };

        let event_topic = env::var("EVENT_TOPIC").unwrap_or_else(|_| "user-created".to_string());

        let consumer_group =
            env::var("CONSUMER_GROUP").unwrap_or_else(|_| "banking-group".to_string());

        let consumer_partitions: i32 = parse_or("CONSUMER_PARTITIONS", 1)?;
        if consumer_partitions < 1 {
            return Err(ConfigError::InvalidValue("CONSUMER_PARTITIONS"));
        }

        let stream_poll_interval = millis_or("STREAM_POLL_INTERVAL_MS", 500)?;

        let provisioning_retry = RetryPolicy::exponential(
            parse_or("PROVISIONING_MAX_RETRIES", 5)?,
            millis_or("PROVISIONING_BASE_BACKOFF_MS", 200)?,
            millis_or("PROVISIONING_MAX_BACKOFF_MS", 10_000)?,
        );

        let provisioning_redelivery_delay = millis_or("PROVISIONING_REDELIVERY_DELAY_MS", 5_000)?;

        Ok(Self {
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            json_logs,
            event_topic,
            consumer_group,
            consumer_partitions,
            stream_poll_interval,
            provisioning_retry,
            provisioning_redelivery_delay,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Partition ids this instance consumes
    pub fn partitions(&self) -> std::ops::Range<i32> {
        0..self.consumer_partitions
    }
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(key)),
        Err(_) => Ok(default),
    }
}

fn millis_or(key: &'static str, default: u64) -> Result<Duration, ConfigError> {
    parse_or(key, default).map(Duration::from_millis)
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
