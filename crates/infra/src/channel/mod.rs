//! Infrastructure message channel implementations.
//!
//! The channel abstraction lives in `orderflow-events` as pure mechanics.
//! This module provides infrastructure-backed implementations (e.g. Redis).

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsChannel;
