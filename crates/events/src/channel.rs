//! Message channel abstraction with manual acknowledgment (mechanics only).
//!
//! A channel hands out one [`Delivery`] at a time. The consumer must settle every
//! delivery it receives, either with [`MessageChannel::ack`] (processed, remove it)
//! or with [`MessageChannel::reject`] (not processed). Until a delivery is settled
//! the broker is free to redeliver it, which gives **at-least-once** semantics:
//!
//! - Deliveries may be seen more than once; consumers must be idempotent
//! - `reject(requeue = true)` asks the broker to deliver the message again later
//! - `reject(requeue = false)` drops the message from the live queue; adapters that
//!   support it park the payload in a dead-letter destination for operators
//!
//! ## Usage Pattern
//!
//! ```ignore
//! loop {
//!     match channel.recv_timeout(Duration::from_millis(250)).await {
//!         Ok(Some(delivery)) => match process(delivery.payload()) {
//!             Ok(()) => channel.ack(&delivery).await?,
//!             Err(_) => channel.reject(&delivery, false).await?,
//!         },
//!         Ok(None) => continue,                   // idle; check for shutdown
//!         Err(ChannelError::Closed) => break,     // channel gone
//!         Err(e) => tracing::warn!("recv failed: {e}"),
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// A single message handed to a consumer, awaiting settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    tag: String,
    payload: Vec<u8>,
    attempt: u32,
}

impl Delivery {
    pub fn new(tag: impl Into<String>, payload: Vec<u8>, attempt: u32) -> Self {
        Self {
            tag: tag.into(),
            payload,
            attempt,
        }
    }

    /// Broker-assigned identifier used to settle this delivery.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// How many times this message was requeued before this delivery (0 on first delivery).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel connection error: {0}")]
    Connection(String),

    #[error("channel command error: {0}")]
    Command(String),

    #[error("unknown delivery tag: {0}")]
    UnknownDelivery(String),

    #[error("channel closed")]
    Closed,
}

/// Transport-agnostic inbound channel with manual acknowledgment.
///
/// The trait requires `Send + Sync` so one channel handle can be shared by the
/// consumer loop and by producers/tests publishing into it.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Append a message to the channel.
    async fn publish(&self, payload: Vec<u8>) -> Result<(), ChannelError>;

    /// Wait up to `timeout` for the next delivery.
    ///
    /// `Ok(None)` means nothing arrived in time; `Err(ChannelError::Closed)` means
    /// nothing ever will.
    async fn recv_timeout(&self, timeout: Duration) -> Result<Option<Delivery>, ChannelError>;

    /// Mark a delivery as processed; the broker will not redeliver it.
    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError>;

    /// Mark a delivery as not processed.
    async fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<(), ChannelError>;
}

#[async_trait]
impl<C> MessageChannel for Arc<C>
where
    C: MessageChannel + ?Sized,
{
    async fn publish(&self, payload: Vec<u8>) -> Result<(), ChannelError> {
        (**self).publish(payload).await
    }

    async fn recv_timeout(&self, timeout: Duration) -> Result<Option<Delivery>, ChannelError> {
        (**self).recv_timeout(timeout).await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        (**self).ack(delivery).await
    }

    async fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<(), ChannelError> {
        (**self).reject(delivery, requeue).await
    }
}
