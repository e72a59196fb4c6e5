//! Orders domain module.
//!
//! This crate contains the order record and the inbound "order created" event,
//! implemented purely as deterministic domain logic (no IO, no HTTP, no storage).

pub mod event;
pub mod order;

pub use event::{OrderCreatedEvent, OrderItemEvent};
pub use order::{Order, OrderItem};
