//! In-memory message channel for tests/dev.
//!
//! Nothing here survives a restart. Settled messages are only kept as a short,
//! bounded history for inspection; long-running processes see counters.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::warn;

use crate::channel::{ChannelError, Delivery, MessageChannel};

#[derive(Debug, Default)]
struct State {
    queue: VecDeque<Delivery>,
    in_flight: HashMap<String, Delivery>,
    acked: VecDeque<String>,
    dead_lettered: VecDeque<Delivery>,
    acked_count: u64,
    dead_lettered_count: u64,
    next_tag: u64,
    closed: bool,
}

impl State {
    fn next_tag(&mut self) -> String {
        self.next_tag += 1;
        format!("mem-{}", self.next_tag)
    }
}

/// Append to a bounded history, evicting the oldest entry when full.
fn push_bounded<T>(history: &mut VecDeque<T>, item: T, limit: usize) {
    if limit == 0 {
        return;
    }
    if history.len() == limit {
        history.pop_front();
    }
    history.push_back(item);
}

/// Settled messages remembered per list by default.
pub const DEFAULT_HISTORY_LIMIT: usize = 1024;

/// In-memory queue with broker-like settlement semantics.
///
/// - No IO
/// - FIFO delivery, one consumer at a time
/// - Unsettled deliveries stay "in flight" until acked or rejected
/// - `reject(requeue = true)` appends the message again with `attempt + 1`
/// - `reject(requeue = false)` parks the message in an inspectable dead-letter list
/// - Ack and dead-letter histories keep the last `history_limit` entries
#[derive(Debug)]
pub struct InMemoryChannel {
    state: Mutex<State>,
    notify: Notify,
    history_limit: usize,
}

impl Default for InMemoryChannel {
    fn default() -> Self {
        Self {
            state: Mutex::default(),
            notify: Notify::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history_limit(mut self, history_limit: usize) -> Self {
        self.history_limit = history_limit;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, ChannelError> {
        self.state
            .lock()
            .map_err(|_| ChannelError::Connection("in-memory channel lock poisoned".to_string()))
    }

    /// Stop accepting messages; receivers see `Closed` once the queue drains.
    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
        }
        self.notify.notify_waiters();
    }

    /// Messages waiting to be delivered.
    pub fn pending(&self) -> usize {
        self.state.lock().map(|s| s.queue.len()).unwrap_or(0)
    }

    /// Deliveries handed out but not yet settled.
    pub fn in_flight(&self) -> usize {
        self.state.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    /// Tags of the most recently acknowledged deliveries, oldest first.
    pub fn acked(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.acked.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Most recent deliveries rejected without requeue, oldest first.
    pub fn dead_lettered(&self) -> Vec<Delivery> {
        self.state
            .lock()
            .map(|s| s.dead_lettered.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Acknowledgements since creation, including those evicted from `acked()`.
    pub fn acked_count(&self) -> u64 {
        self.state.lock().map(|s| s.acked_count).unwrap_or(0)
    }

    /// Dead-lettered messages since creation.
    pub fn dead_lettered_count(&self) -> u64 {
        self.state.lock().map(|s| s.dead_lettered_count).unwrap_or(0)
    }

    fn settle(&self, delivery: &Delivery) -> Result<(MutexGuard<'_, State>, Delivery), ChannelError> {
        let mut state = self.lock()?;
        let settled = state
            .in_flight
            .remove(delivery.tag())
            .ok_or_else(|| ChannelError::UnknownDelivery(delivery.tag().to_string()))?;
        Ok((state, settled))
    }
}

#[async_trait]
impl MessageChannel for InMemoryChannel {
    async fn publish(&self, payload: Vec<u8>) -> Result<(), ChannelError> {
        {
            let mut state = self.lock()?;
            if state.closed {
                return Err(ChannelError::Closed);
            }
            let tag = state.next_tag();
            state.queue.push_back(Delivery::new(tag, payload, 0));
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn recv_timeout(&self, timeout: Duration) -> Result<Option<Delivery>, ChannelError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register interest before checking the queue so a concurrent
            // `close()` (notify_waiters) cannot slip between check and wait.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock()?;
                if let Some(delivery) = state.queue.pop_front() {
                    state
                        .in_flight
                        .insert(delivery.tag().to_string(), delivery.clone());
                    return Ok(Some(delivery));
                }
                if state.closed {
                    return Err(ChannelError::Closed);
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        let (mut state, settled) = self.settle(delivery)?;
        state.acked_count += 1;
        push_bounded(&mut state.acked, settled.tag().to_string(), self.history_limit);
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<(), ChannelError> {
        {
            let (mut state, settled) = self.settle(delivery)?;
            if !requeue || state.closed {
                if requeue {
                    warn!(tag = settled.tag(), "channel closed; dropping requeued message");
                }
                state.dead_lettered_count += 1;
                push_bounded(&mut state.dead_lettered, settled, self.history_limit);
                return Ok(());
            }

            let tag = state.next_tag();
            let attempt = settled.attempt() + 1;
            state
                .queue
                .push_back(Delivery::new(tag, settled.into_payload(), attempt));
        }
        self.notify.notify_one();
        Ok(())
    }
}
