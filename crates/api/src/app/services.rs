//! Infrastructure wiring for the API process.
//!
//! In-memory mode (default) pairs an [`InMemoryOrderStore`] with an
//! [`InMemoryChannel`]; persistent mode pairs Postgres with Redis Streams.
//! Either way one [`ConsumerWorker`] feeds the store and the query facade reads it.

use std::sync::Arc;

#[cfg(feature = "redis")]
use anyhow::Context;
use tracing::info;

use orderflow_events::{InMemoryChannel, MessageChannel};
use orderflow_infra::config::{Config, ConsumerConfig, StorageConfig};
use orderflow_infra::consumer::{ConsumerWorker, OrderCreatedConsumer, WorkerHandle};
use orderflow_infra::query::OrderQueryService;
use orderflow_infra::store::{InMemoryOrderStore, OrderStore};

#[cfg(feature = "redis")]
use orderflow_infra::{channel::RedisStreamsChannel, store::PostgresOrderStore};
#[cfg(feature = "redis")]
use sqlx::postgres::PgPoolOptions;

pub type DynOrderStore = Arc<dyn OrderStore>;
pub type DynChannel = Arc<dyn MessageChannel>;

const CONSUMER_WORKER: &str = "orders.order-created";

/// Shared state handed to the HTTP handlers.
pub struct AppServices {
    queries: OrderQueryService<DynOrderStore>,
    channel: DynChannel,
}

impl AppServices {
    pub fn new(store: DynOrderStore, channel: DynChannel) -> Self {
        Self {
            queries: OrderQueryService::new(store),
            channel,
        }
    }

    pub fn queries(&self) -> &OrderQueryService<DynOrderStore> {
        &self.queries
    }

    /// Channel the consumer reads from; producers and tests publish here.
    pub fn channel(&self) -> &DynChannel {
        &self.channel
    }
}

/// Services plus the background consumer feeding them.
pub struct Runtime {
    pub services: Arc<AppServices>,
    pub consumer: WorkerHandle,
}

pub async fn build_services(config: &Config) -> anyhow::Result<Runtime> {
    if let StorageConfig::Persistent { database_url } = &config.storage {
        #[cfg(feature = "redis")]
        {
            return build_persistent_services(&config.consumer, database_url).await;
        }
        #[cfg(not(feature = "redis"))]
        {
            let _ = database_url;
            tracing::warn!(
                "USE_PERSISTENT_STORES=true but redis feature not enabled, falling back to in-memory"
            );
        }
    }

    Ok(build_in_memory_services(&config.consumer))
}

fn start(store: DynOrderStore, channel: DynChannel, consumer: &ConsumerConfig) -> Runtime {
    let worker = ConsumerWorker::spawn(
        CONSUMER_WORKER,
        OrderCreatedConsumer::new(store.clone(), channel.clone()).with_retry_policy(consumer.retry_policy),
    );

    Runtime {
        services: Arc::new(AppServices::new(store, channel)),
        consumer: worker,
    }
}

fn build_in_memory_services(consumer: &ConsumerConfig) -> Runtime {
    info!("using in-memory order store and channel");
    let store: DynOrderStore = Arc::new(InMemoryOrderStore::new());
    let channel: DynChannel = Arc::new(InMemoryChannel::new());
    start(store, channel, consumer)
}

#[cfg(feature = "redis")]
async fn build_persistent_services(consumer: &ConsumerConfig, database_url: &str) -> anyhow::Result<Runtime> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")?;

    let store = PostgresOrderStore::new(pool);
    store
        .ensure_schema()
        .await
        .context("failed to prepare orders schema")?;

    let channel = RedisStreamsChannel::connect(
        &consumer.redis_url,
        &consumer.stream_key,
        &consumer.dlq_key,
        &consumer.group,
        &consumer.consumer_name,
    )
    .await
    .context("failed to connect to Redis Streams")?
    .with_pending_idle(consumer.pending_idle);

    info!(
        stream_key = %consumer.stream_key,
        group = %consumer.group,
        consumer = %consumer.consumer_name,
        "using Postgres order store fed from Redis Streams"
    );

    Ok(start(Arc::new(store), Arc::new(channel), consumer))
}
