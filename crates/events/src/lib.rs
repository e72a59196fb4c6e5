//! Inbound message channel abstraction (mechanics only).

pub mod channel;
pub mod in_memory_channel;

pub use channel::{ChannelError, Delivery, MessageChannel};
pub use in_memory_channel::InMemoryChannel;
