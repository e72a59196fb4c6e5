//! Order-created event consumer (ingestion side).
//!
//! Per delivery the consumer walks one of two paths:
//!
//! ```text
//! Received → Deserialized → Persisted → Acknowledged
//! Received → DeserializationFailed | PersistFailed → Rejected
//! ```
//!
//! There are no in-process retries. Whether a rejected message comes back is
//! decided by the [`RetryPolicy`] (requeue or not) and then by the channel.

pub mod worker;

use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, instrument, warn};

use orderflow_core::{DomainError, OrderId};
use orderflow_events::{ChannelError, Delivery, MessageChannel};
use orderflow_orders::{Order, OrderCreatedEvent};

use crate::store::{OrderStore, StoreError};

pub use worker::{ConsumerWorker, WorkerHandle};

#[derive(Debug, Error)]
pub enum ConsumeError {
    #[error("failed to deserialize order created event: {0}")]
    Deserialize(String),

    #[error("order created event rejected: {0}")]
    Validation(DomainError),

    #[error("failed to persist order {order_id}: {source}")]
    Persist {
        order_id: OrderId,
        #[source]
        source: StoreError,
    },
}

impl ConsumeError {
    /// Permanent failures can never succeed on redelivery.
    pub fn is_permanent(&self) -> bool {
        match self {
            ConsumeError::Deserialize(_) | ConsumeError::Validation(_) => true,
            ConsumeError::Persist { .. } => false,
        }
    }
}

/// What happened to a single delivery.
#[derive(Debug)]
pub enum ConsumeOutcome {
    /// Persisted and acknowledged.
    Acknowledged(OrderId),
    /// Rejected with requeue; the channel will deliver it again.
    Requeued(ConsumeError),
    /// Rejected without requeue; the channel will not deliver it again.
    Rejected(ConsumeError),
}

/// Requeue policy for non-permanent failures.
///
/// The default (`max_redeliveries = 0`) rejects every failed message without
/// requeue, including persistence failures that might have been transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    pub max_redeliveries: u32,
}

impl RetryPolicy {
    pub fn reject_without_requeue() -> Self {
        Self::default()
    }

    pub fn bounded(max_redeliveries: u32) -> Self {
        Self { max_redeliveries }
    }

    pub fn should_requeue(&self, err: &ConsumeError, attempt: u32) -> bool {
        !err.is_permanent() && attempt < self.max_redeliveries
    }
}

/// Stateless processor: channel → order store.
#[derive(Debug)]
pub struct OrderCreatedConsumer<S, C> {
    store: S,
    channel: C,
    policy: RetryPolicy,
    poll_interval: Duration,
}

impl<S, C> OrderCreatedConsumer<S, C>
where
    S: OrderStore,
    C: MessageChannel,
{
    pub fn new(store: S, channel: C) -> Self {
        Self {
            store,
            channel,
            policy: RetryPolicy::default(),
            poll_interval: Duration::from_millis(250),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// How long a single receive waits before the loop re-checks for shutdown.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Decode a raw payload into a validated order (total computed here, once).
    pub fn decode(payload: &[u8]) -> Result<Order, ConsumeError> {
        let event: OrderCreatedEvent = serde_json::from_slice(payload)
            .map_err(|e| ConsumeError::Deserialize(e.to_string()))?;
        Order::from_event(&event).map_err(ConsumeError::Validation)
    }

    /// Decode and persist, without settling the delivery.
    pub async fn handle(&self, delivery: &Delivery) -> Result<OrderId, ConsumeError> {
        let order = Self::decode(delivery.payload())?;
        let order_id = order.order_id();

        self.store
            .put(order)
            .await
            .map_err(|source| ConsumeError::Persist { order_id, source })?;

        Ok(order_id)
    }

    /// Process one delivery end to end and settle it on the channel.
    ///
    /// A settlement failure is returned as `Err`; the delivery then stays
    /// unsettled and the channel decides about redelivery (safe, since `put`
    /// is an idempotent upsert).
    #[instrument(
        skip(self, delivery),
        fields(
            event_type = OrderCreatedEvent::EVENT_TYPE,
            delivery_tag = delivery.tag(),
            attempt = delivery.attempt()
        )
    )]
    pub async fn process(&self, delivery: &Delivery) -> Result<ConsumeOutcome, ChannelError> {
        match self.handle(delivery).await {
            Ok(order_id) => {
                self.channel.ack(delivery).await?;
                info!(order_id = %order_id, "order persisted and acknowledged");
                Ok(ConsumeOutcome::Acknowledged(order_id))
            }
            Err(err) if self.policy.should_requeue(&err, delivery.attempt()) => {
                self.channel.reject(delivery, true).await?;
                warn!(
                    error = %err,
                    max_redeliveries = self.policy.max_redeliveries,
                    "order created event failed; requeued for redelivery"
                );
                Ok(ConsumeOutcome::Requeued(err))
            }
            Err(err) => {
                self.channel.reject(delivery, false).await?;
                error!(
                    error = %err,
                    permanent = err.is_permanent(),
                    "order created event rejected without requeue"
                );
                Ok(ConsumeOutcome::Rejected(err))
            }
        }
    }

    /// Receive and process at most one delivery.
    ///
    /// `Ok(None)` means the channel was idle for one poll interval.
    pub async fn poll_once(&self) -> Result<Option<ConsumeOutcome>, ChannelError> {
        match self.channel.recv_timeout(self.poll_interval).await? {
            Some(delivery) => self.process(&delivery).await.map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use orderflow_core::CustomerId;
    use orderflow_events::InMemoryChannel;

    use crate::store::{InMemoryOrderStore, Page, PageRequest};

    const VALID: &str = r#"{
        "orderCode": 1001,
        "customerCode": 1,
        "items": [
            { "product": "pen", "quantity": 2, "price": "10.00" },
            { "product": "ink", "quantity": 1, "price": "5.50" }
        ]
    }"#;

    /// Store whose writes fail `failures` times before delegating.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryOrderStore,
        failures: AtomicU32,
    }

    impl FlakyStore {
        fn failing(times: u32) -> Self {
            Self {
                inner: InMemoryOrderStore::new(),
                failures: AtomicU32::new(times),
            }
        }
    }

    #[async_trait]
    impl OrderStore for FlakyStore {
        async fn put(&self, order: Order) -> Result<(), StoreError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("connection refused".to_string()));
            }
            self.inner.put(order).await
        }

        async fn get_by_id(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
            self.inner.get_by_id(order_id).await
        }

        async fn list_by_customer(
            &self,
            customer_id: CustomerId,
            page: PageRequest,
        ) -> Result<Page<Order>, StoreError> {
            self.inner.list_by_customer(customer_id, page).await
        }

        async fn sum_value_by_customer(&self, customer_id: CustomerId) -> Result<Decimal, StoreError> {
            self.inner.sum_value_by_customer(customer_id).await
        }
    }

    fn consumer<S: OrderStore>(store: S) -> OrderCreatedConsumer<S, Arc<InMemoryChannel>> {
        OrderCreatedConsumer::new(store, Arc::new(InMemoryChannel::new()))
            .with_poll_interval(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn valid_event_is_persisted_then_acknowledged() {
        let store = Arc::new(InMemoryOrderStore::new());
        let c = consumer(store.clone());
        c.channel().publish(VALID.as_bytes().to_vec()).await.unwrap();

        let outcome = c.poll_once().await.unwrap().unwrap();
        assert!(matches!(outcome, ConsumeOutcome::Acknowledged(id) if id == OrderId::new(1001)));

        let stored = store.get_by_id(OrderId::new(1001)).await.unwrap().unwrap();
        assert_eq!(stored.total_value(), dec!(25.50));
        assert_eq!(stored.customer_id(), CustomerId::new(1));
        assert_eq!(c.channel().acked().len(), 1);
        assert_eq!(c.channel().in_flight(), 0);
    }

    #[tokio::test]
    async fn redelivered_event_does_not_duplicate_order() {
        let store = Arc::new(InMemoryOrderStore::new());
        let c = consumer(store.clone());
        c.channel().publish(VALID.as_bytes().to_vec()).await.unwrap();
        c.channel().publish(VALID.as_bytes().to_vec()).await.unwrap();

        c.poll_once().await.unwrap();
        c.poll_once().await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(
            store.sum_value_by_customer(CustomerId::new(1)).await.unwrap(),
            dec!(25.50)
        );
        assert_eq!(c.channel().acked().len(), 2);
    }

    #[tokio::test]
    async fn malformed_payload_is_rejected_without_requeue() {
        let store = Arc::new(InMemoryOrderStore::new());
        let c = consumer(store.clone()).with_retry_policy(RetryPolicy::bounded(5));
        c.channel().publish(b"{not json".to_vec()).await.unwrap();

        let outcome = c.poll_once().await.unwrap().unwrap();
        assert!(matches!(outcome, ConsumeOutcome::Rejected(ConsumeError::Deserialize(_))));

        assert!(c.channel().acked().is_empty());
        assert_eq!(c.channel().dead_lettered().len(), 1);
        assert_eq!(c.channel().pending(), 0);
        assert!(store.is_empty());
        // Nothing comes back.
        assert!(c.poll_once().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_item_is_a_permanent_failure() {
        let c = consumer(Arc::new(InMemoryOrderStore::new())).with_retry_policy(RetryPolicy::bounded(5));
        let payload = r#"{"orderCode":1,"customerCode":1,"items":[{"product":"pen","quantity":0,"price":"1"}]}"#;
        c.channel().publish(payload.as_bytes().to_vec()).await.unwrap();

        let outcome = c.poll_once().await.unwrap().unwrap();
        assert!(matches!(outcome, ConsumeOutcome::Rejected(ConsumeError::Validation(_))));
    }

    #[tokio::test]
    async fn persist_failure_is_dropped_under_default_policy() {
        let store = Arc::new(FlakyStore::failing(1));
        let c = consumer(store.clone());
        c.channel().publish(VALID.as_bytes().to_vec()).await.unwrap();

        let outcome = c.poll_once().await.unwrap().unwrap();
        assert!(matches!(outcome, ConsumeOutcome::Rejected(ConsumeError::Persist { .. })));
        assert_eq!(c.channel().dead_lettered().len(), 1);
        assert!(c.poll_once().await.unwrap().is_none());
        assert!(store.get_by_id(OrderId::new(1001)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bounded_policy_requeues_until_limit_then_rejects() {
        let store = Arc::new(FlakyStore::failing(10));
        let c = consumer(store).with_retry_policy(RetryPolicy::bounded(2));
        c.channel().publish(VALID.as_bytes().to_vec()).await.unwrap();

        let first = c.poll_once().await.unwrap().unwrap();
        let second = c.poll_once().await.unwrap().unwrap();
        let third = c.poll_once().await.unwrap().unwrap();

        assert!(matches!(first, ConsumeOutcome::Requeued(_)));
        assert!(matches!(second, ConsumeOutcome::Requeued(_)));
        assert!(matches!(third, ConsumeOutcome::Rejected(ConsumeError::Persist { .. })));
        assert!(c.poll_once().await.unwrap().is_none());
        assert_eq!(c.channel().dead_lettered()[0].attempt(), 2);
    }

    #[tokio::test]
    async fn bounded_policy_recovers_from_transient_failure() {
        let store = Arc::new(FlakyStore::failing(1));
        let c = consumer(store.clone()).with_retry_policy(RetryPolicy::bounded(3));
        c.channel().publish(VALID.as_bytes().to_vec()).await.unwrap();

        assert!(matches!(c.poll_once().await.unwrap().unwrap(), ConsumeOutcome::Requeued(_)));
        assert!(matches!(
            c.poll_once().await.unwrap().unwrap(),
            ConsumeOutcome::Acknowledged(_)
        ));
        assert!(store.get_by_id(OrderId::new(1001)).await.unwrap().is_some());
    }

    #[test]
    fn decode_computes_total_once() {
        let order =
            OrderCreatedConsumer::<InMemoryOrderStore, InMemoryChannel>::decode(VALID.as_bytes()).unwrap();
        assert_eq!(order.total_value(), dec!(25.50));
    }

    #[test]
    fn default_policy_never_requeues() {
        let err = ConsumeError::Persist {
            order_id: OrderId::new(1),
            source: StoreError::Unavailable("down".to_string()),
        };
        assert!(!RetryPolicy::default().should_requeue(&err, 0));
        assert!(RetryPolicy::bounded(1).should_requeue(&err, 0));
        assert!(!RetryPolicy::bounded(1).should_requeue(&err, 1));
    }
}
