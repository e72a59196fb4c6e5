//! Read-side entry point used by the HTTP layer.
//!
//! Maps caller input into aggregator/store calls and shapes the results into
//! response DTOs. Beyond default substitution and presence checks there is no
//! business logic here.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use orderflow_core::{CustomerId, OrderId};
use orderflow_orders::{Order, OrderItem};

use crate::aggregator::OrderAggregator;
use crate::store::{OrderStore, PageRequest, StoreError};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("customer not found: {0}")]
    CustomerNotFound(CustomerId),

    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for QueryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::CustomerNotFound(customer_id) => QueryError::CustomerNotFound(customer_id),
            other => QueryError::Store(other),
        }
    }
}

/// `{ orderId, customerId, totalValue }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub total_value: Decimal,
}

impl From<&Order> for OrderSummary {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.order_id(),
            customer_id: order.customer_id(),
            total_value: order.total_value(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItemDetail {
    pub product: String,
    pub quantity: u32,
    pub price: Decimal,
}

impl From<&OrderItem> for OrderItemDetail {
    fn from(item: &OrderItem) -> Self {
        Self {
            product: item.product.clone(),
            quantity: item.quantity,
            price: item.price,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetail {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub total_value: Decimal,
    pub items: Vec<OrderItemDetail>,
}

impl From<&Order> for OrderDetail {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.order_id(),
            customer_id: order.customer_id(),
            total_value: order.total_value(),
            items: order.items().iter().map(OrderItemDetail::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrdersSummary {
    pub total_on_orders: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationInfo {
    pub page: u32,
    pub page_size: u32,
    pub total_elements: u64,
    pub total_pages: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOrdersResponse {
    pub summary: OrdersSummary,
    pub data: Vec<OrderSummary>,
    pub pagination: PaginationInfo,
}

/// Query facade over the order store.
#[derive(Debug, Clone)]
pub struct OrderQueryService<S> {
    aggregator: OrderAggregator<S>,
}

impl<S> OrderQueryService<S>
where
    S: OrderStore,
{
    pub fn new(store: S) -> Self {
        Self {
            aggregator: OrderAggregator::new(store),
        }
    }

    /// List a customer's orders with the grand total over all of them.
    ///
    /// `page` defaults to 0 and `page_size` to 10.
    #[instrument(skip(self), err)]
    pub async fn list_orders(
        &self,
        customer_id: Option<CustomerId>,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> Result<ListOrdersResponse, QueryError> {
        let customer_id = customer_id
            .ok_or_else(|| QueryError::InvalidArgument("customerId cannot be null".to_string()))?;

        let request = PageRequest::new(
            page.unwrap_or(PageRequest::DEFAULT_PAGE),
            page_size.unwrap_or(PageRequest::DEFAULT_PAGE_SIZE),
        )
        .map_err(|e| QueryError::InvalidArgument(e.to_string()))?;

        let result = self.aggregator.customer_orders(customer_id, request).await?;
        let page = result.page.map(|order| OrderSummary::from(&order));
        let total_pages = page.total_pages();

        Ok(ListOrdersResponse {
            summary: OrdersSummary {
                total_on_orders: result.total_on_orders,
            },
            pagination: PaginationInfo {
                page: request.page(),
                page_size: request.page_size(),
                total_elements: page.total_elements,
                total_pages,
            },
            data: page.items,
        })
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub async fn get_order(&self, order_id: OrderId) -> Result<OrderDetail, QueryError> {
        self.aggregator
            .store()
            .get_by_id(order_id)
            .await?
            .map(|order| OrderDetail::from(&order))
            .ok_or(QueryError::OrderNotFound(order_id))
    }
}
