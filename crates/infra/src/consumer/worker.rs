use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use orderflow_events::{ChannelError, MessageChannel};

use super::OrderCreatedConsumer;
use crate::store::OrderStore;

/// Handle to control and join a background consumer task.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// A receive already in progress runs to completion and whatever it
    /// returned is processed and settled first.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

/// Explicit subscription loop for the order-created channel.
///
/// - Receives one delivery at a time
/// - Hands it to [`OrderCreatedConsumer::process`], which acks or rejects it
/// - Stops on shutdown or when the channel reports `Closed`
/// - Channel errors are logged and retried after one poll interval; they never
///   end the loop
#[derive(Debug)]
pub struct ConsumerWorker;

impl ConsumerWorker {
    /// Spawn the loop on the current tokio runtime.
    pub fn spawn<S, C>(name: &'static str, consumer: OrderCreatedConsumer<S, C>) -> WorkerHandle
    where
        S: OrderStore + 'static,
        C: MessageChannel + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(worker_loop(name, consumer, shutdown_rx));

        WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

async fn worker_loop<S, C>(
    name: &'static str,
    consumer: OrderCreatedConsumer<S, C>,
    shutdown_rx: watch::Receiver<bool>,
) where
    S: OrderStore,
    C: MessageChannel,
{
    info!(worker = name, "order consumer started");

    loop {
        // Shutdown is only observed between receives. A receive that has
        // started always completes (bounded by the poll interval), so a broker
        // never hands out a delivery that nobody settles.
        if shutdown_requested(&shutdown_rx) {
            break;
        }

        let received = consumer.channel().recv_timeout(consumer.poll_interval()).await;

        let result = match received {
            Ok(Some(delivery)) => consumer.process(&delivery).await.map(|_| ()),
            Ok(None) => Ok(()),
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {}
            Err(ChannelError::Closed) => {
                info!(worker = name, "channel closed");
                break;
            }
            Err(err) => {
                warn!(worker = name, error = %err, "order consumer channel operation failed");
                tokio::time::sleep(consumer.poll_interval()).await;
            }
        }
    }

    info!(worker = name, "order consumer stopped");
}

/// A dropped handle counts as a shutdown request.
fn shutdown_requested(shutdown_rx: &watch::Receiver<bool>) -> bool {
    match shutdown_rx.has_changed() {
        Ok(_) => *shutdown_rx.borrow(),
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use orderflow_core::{CustomerId, OrderId};
    use orderflow_events::InMemoryChannel;
    use rust_decimal_macros::dec;

    use crate::store::InMemoryOrderStore;

    fn event(order_id: i64) -> Vec<u8> {
        format!(
            r#"{{"orderCode":{order_id},"customerCode":5,"items":[{{"product":"pen","quantity":1,"price":"2.00"}}]}}"#
        )
        .into_bytes()
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    fn spawn(store: Arc<InMemoryOrderStore>, channel: Arc<InMemoryChannel>) -> WorkerHandle {
        let consumer =
            OrderCreatedConsumer::new(store, channel).with_poll_interval(Duration::from_millis(20));
        ConsumerWorker::spawn("test.order-consumer", consumer)
    }

    #[tokio::test]
    async fn loop_acks_good_messages_and_rejects_bad_ones() {
        let store = Arc::new(InMemoryOrderStore::new());
        let channel = Arc::new(InMemoryChannel::new());
        let handle = spawn(store.clone(), channel.clone());

        channel.publish(event(1)).await.unwrap();
        channel.publish(b"garbage".to_vec()).await.unwrap();
        channel.publish(event(2)).await.unwrap();

        eventually(|| channel.acked().len() == 2 && channel.dead_lettered().len() == 1).await;
        handle.shutdown().await;

        assert_eq!(store.len(), 2);
        assert_eq!(
            store.sum_value_by_customer(CustomerId::new(5)).await.unwrap(),
            dec!(4.00)
        );
        assert!(store.get_by_id(OrderId::new(2)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn loop_stops_when_channel_closes() {
        let channel = Arc::new(InMemoryChannel::new());
        let handle = spawn(Arc::new(InMemoryOrderStore::new()), channel.clone());

        channel.close();
        eventually(|| handle.is_finished()).await;
    }

    /// Channel whose receive completes only after `delay`, like a blocking broker read.
    struct SlowChannel {
        inner: InMemoryChannel,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl MessageChannel for SlowChannel {
        async fn publish(&self, payload: Vec<u8>) -> Result<(), ChannelError> {
            self.inner.publish(payload).await
        }

        async fn recv_timeout(&self, timeout: Duration) -> Result<Option<orderflow_events::Delivery>, ChannelError> {
            tokio::time::sleep(self.delay).await;
            self.inner.recv_timeout(timeout).await
        }

        async fn ack(&self, delivery: &orderflow_events::Delivery) -> Result<(), ChannelError> {
            self.inner.ack(delivery).await
        }

        async fn reject(&self, delivery: &orderflow_events::Delivery, requeue: bool) -> Result<(), ChannelError> {
            self.inner.reject(delivery, requeue).await
        }
    }

    #[tokio::test]
    async fn shutdown_during_receive_still_settles_the_delivery() {
        let store = Arc::new(InMemoryOrderStore::new());
        let channel = Arc::new(SlowChannel {
            inner: InMemoryChannel::new(),
            delay: Duration::from_millis(150),
        });
        channel.publish(event(7)).await.unwrap();

        let consumer =
            OrderCreatedConsumer::new(store.clone(), channel.clone()).with_poll_interval(Duration::from_millis(20));
        let handle = ConsumerWorker::spawn("test.order-consumer", consumer);

        // Let the worker enter its receive, then ask it to stop mid-read.
        tokio::time::sleep(Duration::from_millis(30)).await;
        tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
            .await
            .unwrap();

        assert_eq!(channel.inner.acked().len(), 1);
        assert_eq!(channel.inner.in_flight(), 0);
        assert!(store.get_by_id(OrderId::new(7)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dropping_the_handle_stops_the_loop() {
        let channel = Arc::new(InMemoryChannel::new());
        let consumer = OrderCreatedConsumer::new(Arc::new(InMemoryOrderStore::new()), channel.clone())
            .with_poll_interval(Duration::from_millis(20));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(worker_loop("test.order-consumer", consumer, shutdown_rx));

        drop(shutdown_tx);
        tokio::time::timeout(Duration::from_secs(1), join)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_stops_idle_loop() {
        let handle = spawn(
            Arc::new(InMemoryOrderStore::new()),
            Arc::new(InMemoryChannel::new()),
        );
        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .unwrap();
    }
}
