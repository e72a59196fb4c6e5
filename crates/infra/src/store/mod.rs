//! Order store boundary.
//!
//! Defines the persistence contract for order records without making storage
//! assumptions. Implementations must make a single `put` atomic to readers: a
//! concurrent reader sees either the previous record or the new one, never a mix.

pub mod in_memory;
pub mod page;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use orderflow_core::{CustomerId, OrderId};
use orderflow_orders::Order;

pub use in_memory::InMemoryOrderStore;
pub use page::{Page, PageRequest};
pub use postgres::PostgresOrderStore;

/// Order store operation error.
///
/// `CustomerNotFound` is a domain outcome (the scan matched nothing); the other
/// variants are infrastructure failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("customer not found: {0}")]
    CustomerNotFound(CustomerId),

    #[error("order store unavailable: {0}")]
    Unavailable(String),

    #[error("order store backend error: {0}")]
    Backend(String),

    #[error("stored order could not be decoded: {0}")]
    Corrupt(String),

    #[error("order total for customer {0} exceeds the decimal range")]
    SumOverflow(CustomerId),
}

/// Durable keyed collection of orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Upsert by `order_id`. Writing the same id again replaces the record.
    async fn put(&self, order: Order) -> Result<(), StoreError>;

    async fn get_by_id(&self, order_id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Orders of `customer_id` in ascending `order_id` order, sliced to `page`.
    ///
    /// Fails with `CustomerNotFound` when the customer has no orders at all.
    async fn list_by_customer(
        &self,
        customer_id: CustomerId,
        page: PageRequest,
    ) -> Result<Page<Order>, StoreError>;

    /// Sum of `total_value` across every order of `customer_id`, computed by the store.
    ///
    /// Fails with `CustomerNotFound` when the customer has no orders at all.
    async fn sum_value_by_customer(&self, customer_id: CustomerId) -> Result<Decimal, StoreError>;
}

#[async_trait]
impl<S> OrderStore for Arc<S>
where
    S: OrderStore + ?Sized,
{
    async fn put(&self, order: Order) -> Result<(), StoreError> {
        (**self).put(order).await
    }

    async fn get_by_id(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        (**self).get_by_id(order_id).await
    }

    async fn list_by_customer(
        &self,
        customer_id: CustomerId,
        page: PageRequest,
    ) -> Result<Page<Order>, StoreError> {
        (**self).list_by_customer(customer_id, page).await
    }

    async fn sum_value_by_customer(&self, customer_id: CustomerId) -> Result<Decimal, StoreError> {
        (**self).sum_value_by_customer(customer_id).await
    }
}
