//! Per-customer read composition over the order store.

use rust_decimal::Decimal;
use tracing::instrument;

use orderflow_core::CustomerId;
use orderflow_orders::Order;

use crate::store::{OrderStore, Page, PageRequest, StoreError};

/// A page of a customer's orders together with the grand total over all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerOrders {
    pub page: Page<Order>,
    /// Sum over **every** order of the customer, independent of the page.
    pub total_on_orders: Decimal,
}

/// Combines the listing and the pushed-down sum into one call.
#[derive(Debug, Clone)]
pub struct OrderAggregator<S> {
    store: S,
}

impl<S> OrderAggregator<S>
where
    S: OrderStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    #[instrument(skip(self), fields(customer_id = %customer_id), err)]
    pub async fn customer_orders(
        &self,
        customer_id: CustomerId,
        page: PageRequest,
    ) -> Result<CustomerOrders, StoreError> {
        let (page, total_on_orders) = tokio::try_join!(
            self.store.list_by_customer(customer_id, page),
            self.store.sum_value_by_customer(customer_id),
        )?;

        Ok(CustomerOrders {
            page,
            total_on_orders,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use orderflow_core::OrderId;
    use orderflow_orders::{OrderCreatedEvent, OrderItemEvent};
    use rust_decimal_macros::dec;

    use crate::store::InMemoryOrderStore;

    async fn seeded(customer: i64, count: i64) -> Arc<InMemoryOrderStore> {
        let store = Arc::new(InMemoryOrderStore::new());
        for id in 1..=count {
            let order = Order::from_event(&OrderCreatedEvent {
                order_code: OrderId::new(id),
                customer_code: CustomerId::new(customer),
                items: vec![OrderItemEvent {
                    product: format!("sku-{id}"),
                    quantity: id,
                    price: dec!(1.50),
                }],
            })
            .unwrap();
            store.put(order).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn total_is_independent_of_paging() {
        let store = seeded(1, 20).await;
        let agg = OrderAggregator::new(store);
        // 1.50 * (1 + 2 + ... + 20) = 1.50 * 210
        let expected = dec!(315.00);

        for (page, size) in [(0, 10), (1, 10), (0, 3), (6, 3), (9, 50)] {
            let res = agg
                .customer_orders(CustomerId::new(1), PageRequest::new(page, size).unwrap())
                .await
                .unwrap();
            assert_eq!(res.total_on_orders, expected, "page={page} size={size}");
            assert_eq!(res.page.total_elements, 20);
        }
    }

    #[tokio::test]
    async fn first_page_holds_first_ten_orders() {
        let agg = OrderAggregator::new(seeded(4, 20).await);
        let res = agg
            .customer_orders(CustomerId::new(4), PageRequest::default())
            .await
            .unwrap();

        assert_eq!(res.page.items.len(), 10);
        assert_eq!(res.page.total_pages(), 2);
        assert_eq!(res.page.items[0].order_id(), OrderId::new(1));
        assert_eq!(res.page.items[9].order_id(), OrderId::new(10));
    }

    #[tokio::test]
    async fn unknown_customer_is_not_found() {
        let agg = OrderAggregator::new(seeded(1, 2).await);
        let res = agg
            .customer_orders(CustomerId::new(999), PageRequest::default())
            .await;
        assert!(matches!(res, Err(StoreError::CustomerNotFound(_))));
    }
}
