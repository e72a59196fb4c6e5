//! Infrastructure layer: order storage, event consumption, read composition, config.

pub mod aggregator;
pub mod channel;
pub mod config;
pub mod consumer;
pub mod query;
pub mod store;
