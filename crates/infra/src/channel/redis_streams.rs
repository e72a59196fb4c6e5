//! Redis Streams-backed message channel (durable, at-least-once delivery).
//!
//! - **Durable delivery**: entries stay in the consumer group's pending list until `XACK`
//! - **Consumer groups**: several consumer instances share one group and split the stream
//! - **Crash recovery**: on start a consumer first re-reads its own pending entries
//!   (`XREADGROUP ... 0`) before asking for new ones (`>`)
//! - **Idle reclaim**: entries left pending longer than `pending_idle` by *any* group
//!   member (a crashed instance with another name, a failed `XACK`) are taken over with
//!   `XPENDING ... IDLE` + `XCLAIM` and delivered again (needs Redis 6.2+)
//! - **Dead-letter stream**: rejected-without-requeue payloads are copied to `dlq_key`
//!
//! ## Entry Layout
//!
//! Stream entries carry two fields: `payload` (the raw event bytes) and `attempt`
//! (requeue counter, absent on first publish). Requeueing appends a fresh entry with
//! `attempt + 1` and acknowledges the old one in the same `MULTI` block.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamClaimReply, StreamId, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use orderflow_events::{ChannelError, Delivery, MessageChannel};

const PAYLOAD_FIELD: &str = "payload";
const ATTEMPT_FIELD: &str = "attempt";

/// Default idle time after which a pending entry is taken over by another consumer.
pub const DEFAULT_PENDING_IDLE: Duration = Duration::from_secs(60);

/// When the next `XPENDING` scan for idle entries is due.
///
/// After a successful claim the next scan is immediate so a backlog drains;
/// after an empty scan it waits half the idle threshold.
#[derive(Debug, Clone, Copy)]
struct ReclaimSchedule {
    next_scan: Instant,
    pending_idle: Duration,
}

impl ReclaimSchedule {
    fn new(pending_idle: Duration, now: Instant) -> Self {
        Self {
            next_scan: now,
            pending_idle,
        }
    }

    fn is_due(&self, now: Instant) -> bool {
        now >= self.next_scan
    }

    fn record_scan(&mut self, now: Instant, claimed: bool) {
        self.next_scan = if claimed { now } else { now + self.pending_idle / 2 };
    }
}

/// An entry without a payload still has to be settled; an empty body fails
/// decoding and gets dead-lettered by the consumer.
fn delivery_from_entry(entry: StreamId) -> Delivery {
    let payload: Vec<u8> = entry.get(PAYLOAD_FIELD).unwrap_or_default();
    let attempt: u32 = entry.get(ATTEMPT_FIELD).unwrap_or(0);
    Delivery::new(entry.id, payload, attempt)
}

#[derive(Clone)]
pub struct RedisStreamsChannel {
    conn: ConnectionManager,
    stream_key: String,
    dlq_key: String,
    group_name: String,
    consumer_name: String,
    pending_idle: Duration,
    pending_drained: Arc<AtomicBool>,
    reclaim: Arc<Mutex<ReclaimSchedule>>,
}

impl std::fmt::Debug for RedisStreamsChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreamsChannel")
            .field("stream_key", &self.stream_key)
            .field("dlq_key", &self.dlq_key)
            .field("group_name", &self.group_name)
            .field("consumer_name", &self.consumer_name)
            .field("pending_idle", &self.pending_idle)
            .finish()
    }
}

fn map_redis_error(operation: &str, err: redis::RedisError) -> ChannelError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
        ChannelError::Connection(format!("{operation} failed: {err}"))
    } else {
        ChannelError::Command(format!("{operation} failed: {err}"))
    }
}

impl RedisStreamsChannel {
    /// Connect and make sure the consumer group exists.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `stream_key` - stream carrying order-created events
    /// * `dlq_key` - dead-letter stream for rejected messages
    /// * `group_name` - consumer group shared by all instances
    /// * `consumer_name` - unique name of this instance within the group
    pub async fn connect(
        redis_url: impl AsRef<str>,
        stream_key: impl Into<String>,
        dlq_key: impl Into<String>,
        group_name: impl Into<String>,
        consumer_name: impl Into<String>,
    ) -> Result<Self, ChannelError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| ChannelError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| map_redis_error("connect", e))?;

        let channel = Self {
            conn,
            stream_key: stream_key.into(),
            dlq_key: dlq_key.into(),
            group_name: group_name.into(),
            consumer_name: consumer_name.into(),
            pending_idle: DEFAULT_PENDING_IDLE,
            pending_drained: Arc::new(AtomicBool::new(false)),
            reclaim: Arc::new(Mutex::new(ReclaimSchedule::new(DEFAULT_PENDING_IDLE, Instant::now()))),
        };
        channel.ensure_consumer_group().await?;
        Ok(channel)
    }

    /// How long an entry may sit unacknowledged before any consumer may reclaim it.
    pub fn with_pending_idle(mut self, pending_idle: Duration) -> Self {
        self.pending_idle = pending_idle;
        self.reclaim = Arc::new(Mutex::new(ReclaimSchedule::new(pending_idle, Instant::now())));
        self
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Ensure the consumer group exists (idempotent).
    ///
    /// `MKSTREAM` creates the stream if needed; starting at `0` means a fresh
    /// group sees every entry already in the stream.
    pub async fn ensure_consumer_group(&self) -> Result<(), ChannelError> {
        let mut conn = self.conn.clone();
        let res: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(&self.group_name)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match res {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(map_redis_error("XGROUP CREATE", e)),
        }
    }

    async fn read_group(&self, start_id: &str, block: Option<Duration>) -> Result<Option<Delivery>, ChannelError> {
        let mut conn = self.conn.clone();
        let mut opts = StreamReadOptions::default()
            .group(&self.group_name, &self.consumer_name)
            .count(1);
        if let Some(block) = block {
            opts = opts.block(block.as_millis().clamp(1, usize::MAX as u128) as usize);
        }

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.stream_key], &[start_id], &opts)
            .await
            .map_err(|e| map_redis_error("XREADGROUP", e))?;

        let entry = reply
            .and_then(|r| r.keys.into_iter().next())
            .and_then(|k| k.ids.into_iter().next());

        Ok(entry.map(delivery_from_entry))
    }

    fn reclaim_due(&self) -> bool {
        self.reclaim
            .lock()
            .map(|schedule| schedule.is_due(Instant::now()))
            .unwrap_or(true)
    }

    fn record_reclaim_scan(&self, claimed: bool) {
        if let Ok(mut schedule) = self.reclaim.lock() {
            schedule.record_scan(Instant::now(), claimed);
        }
    }

    /// Take over the oldest entry that has been pending longer than `pending_idle`.
    async fn reclaim_idle(&self) -> Result<Option<Delivery>, ChannelError> {
        let mut conn = self.conn.clone();
        let idle_ms = u64::try_from(self.pending_idle.as_millis()).unwrap_or(u64::MAX);

        // (id, owner, idle ms, delivery count)
        let pending: Vec<(String, String, u64, u64)> = redis::cmd("XPENDING")
            .arg(&self.stream_key)
            .arg(&self.group_name)
            .arg("IDLE")
            .arg(idle_ms)
            .arg("-")
            .arg("+")
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("XPENDING", e))?;

        let Some((id, owner, idle, deliveries)) = pending.into_iter().next() else {
            return Ok(None);
        };

        // XCLAIM re-checks the idle time, so an entry another consumer just
        // touched is left alone.
        let claimed: StreamClaimReply = conn
            .xclaim(&self.stream_key, &self.group_name, &self.consumer_name, idle_ms, &[&id])
            .await
            .map_err(|e| map_redis_error("XCLAIM", e))?;

        let delivery = claimed.ids.into_iter().next().map(delivery_from_entry);
        if delivery.is_some() {
            warn!(
                delivery_tag = %id,
                previous_owner = %owner,
                idle_ms = idle,
                deliveries,
                "reclaimed idle pending entry"
            );
        }
        Ok(delivery)
    }
}

#[async_trait]
impl MessageChannel for RedisStreamsChannel {
    #[instrument(skip(self, payload), fields(stream_key = %self.stream_key), err)]
    async fn publish(&self, payload: Vec<u8>) -> Result<(), ChannelError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("XADD")
            .arg(&self.stream_key)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("XADD", e))?;
        Ok(())
    }

    async fn recv_timeout(&self, timeout: Duration) -> Result<Option<Delivery>, ChannelError> {
        // Entries delivered to this consumer name before a restart come first.
        if !self.pending_drained.load(Ordering::Acquire) {
            match self.read_group("0", None).await? {
                Some(delivery) => {
                    debug!(delivery_tag = delivery.tag(), "redelivering pending entry");
                    return Ok(Some(delivery));
                }
                None => self.pending_drained.store(true, Ordering::Release),
            }
        }

        if self.reclaim_due() {
            let reclaimed = self.reclaim_idle().await;
            self.record_reclaim_scan(matches!(reclaimed, Ok(Some(_))));
            if let Some(delivery) = reclaimed? {
                return Ok(Some(delivery));
            }
        }

        self.read_group(">", Some(timeout)).await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xack(&self.stream_key, &self.group_name, &[delivery.tag()])
            .await
            .map_err(|e| map_redis_error("XACK", e))?;
        Ok(())
    }

    #[instrument(skip(self, delivery), fields(delivery_tag = delivery.tag()), err)]
    async fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<(), ChannelError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();

        if requeue {
            pipe.cmd("XADD")
                .arg(&self.stream_key)
                .arg("*")
                .arg(PAYLOAD_FIELD)
                .arg(delivery.payload())
                .arg(ATTEMPT_FIELD)
                .arg(delivery.attempt() + 1)
                .ignore();
        } else {
            pipe.cmd("XADD")
                .arg(&self.dlq_key)
                .arg("*")
                .arg("original_message_id")
                .arg(delivery.tag())
                .arg(ATTEMPT_FIELD)
                .arg(delivery.attempt())
                .arg("failed_at")
                .arg(chrono::Utc::now().to_rfc3339())
                .arg(PAYLOAD_FIELD)
                .arg(delivery.payload())
                .ignore();
        }

        pipe.cmd("XACK")
            .arg(&self.stream_key)
            .arg(&self.group_name)
            .arg(delivery.tag())
            .ignore();

        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("reject", e))?;

        if !requeue {
            warn!(
                delivery_tag = delivery.tag(),
                dlq_key = %self.dlq_key,
                "message sent to dead-letter stream"
            );
        }
        Ok(())
    }
}
