//! Process configuration, loaded from environment variables.
//!
//! | Variable                    | Default                         |
//! |-----------------------------|---------------------------------|
//! | `BIND_ADDR`                 | `0.0.0.0:8080`                  |
//! | `USE_PERSISTENT_STORES`     | `false`                         |
//! | `DATABASE_URL`              | required when persistent        |
//! | `REDIS_URL`                 | `redis://localhost:6379`        |
//! | `ORDER_STREAM_KEY`          | `orderflow:order-created`       |
//! | `ORDER_DLQ_KEY`             | `orderflow:order-created:dlq`   |
//! | `CONSUMER_GROUP`            | `orderflow.order-store`         |
//! | `CONSUMER_NAME`             | `consumer-<uuid v7>`            |
//! | `CONSUMER_MAX_REDELIVERIES` | `0`                             |
//! | `CONSUMER_PENDING_IDLE_MS`  | `60000`                         |

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::consumer::RetryPolicy;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
pub const DEFAULT_STREAM_KEY: &str = "orderflow:order-created";
pub const DEFAULT_DLQ_KEY: &str = "orderflow:order-created:dlq";
pub const DEFAULT_CONSUMER_GROUP: &str = "orderflow.order-store";
pub const DEFAULT_PENDING_IDLE_MS: u64 = 60_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be set when USE_PERSISTENT_STORES=true")]
    Missing { name: &'static str },

    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Broker settings for the order-created subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub redis_url: String,
    pub stream_key: String,
    pub dlq_key: String,
    pub group: String,
    pub consumer_name: String,
    pub retry_policy: RetryPolicy,
    /// Unacknowledged entries older than this are reclaimed by any group member.
    pub pending_idle: Duration,
}

/// Where orders are kept and where events come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    /// In-process store and channel (dev/test).
    InMemory,
    /// Postgres store fed from Redis Streams.
    Persistent { database_url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub storage: StorageConfig,
    pub consumer: ConsumerConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = parse_var(
            "BIND_ADDR",
            get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
        )?;

        let use_persistent: bool = match get("USE_PERSISTENT_STORES") {
            Some(v) => parse_var("USE_PERSISTENT_STORES", v.to_lowercase())?,
            None => false,
        };

        let storage = if use_persistent {
            let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing { name: "DATABASE_URL" })?;
            StorageConfig::Persistent { database_url }
        } else {
            StorageConfig::InMemory
        };

        let max_redeliveries: u32 = match get("CONSUMER_MAX_REDELIVERIES") {
            Some(v) => parse_var("CONSUMER_MAX_REDELIVERIES", v)?,
            None => 0,
        };

        let pending_idle_ms: u64 = match get("CONSUMER_PENDING_IDLE_MS") {
            Some(v) => parse_var("CONSUMER_PENDING_IDLE_MS", v)?,
            None => DEFAULT_PENDING_IDLE_MS,
        };
        if pending_idle_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "CONSUMER_PENDING_IDLE_MS",
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let consumer = ConsumerConfig {
            redis_url: get("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            stream_key: get("ORDER_STREAM_KEY").unwrap_or_else(|| DEFAULT_STREAM_KEY.to_string()),
            dlq_key: get("ORDER_DLQ_KEY").unwrap_or_else(|| DEFAULT_DLQ_KEY.to_string()),
            group: get("CONSUMER_GROUP").unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string()),
            consumer_name: get("CONSUMER_NAME")
                .unwrap_or_else(|| format!("consumer-{}", uuid::Uuid::now_v7())),
            retry_policy: RetryPolicy::bounded(max_redeliveries),
            pending_idle: Duration::from_millis(pending_idle_ms),
        };

        Ok(Self {
            bind_addr,
            storage,
            consumer,
        })
    }
}

fn parse_var<T>(name: &'static str, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
        value,
    })
}
