use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use rust_decimal::Decimal;

use orderflow_core::{CustomerId, Entity, OrderId};
use orderflow_orders::Order;

use super::{OrderStore, Page, PageRequest, StoreError};

/// In-memory order store.
///
/// Intended for tests/dev. Keyed by `OrderId` in a `BTreeMap`, so per-customer
/// listings come out in ascending id order without a separate sort.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<BTreeMap<OrderId, Order>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orders.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn put(&self, order: Order) -> Result<(), StoreError> {
        let mut orders = self.orders.write().map_err(|_| poisoned())?;
        orders.insert(order.id(), order);
        Ok(())
    }

    async fn get_by_id(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let orders = self.orders.read().map_err(|_| poisoned())?;
        Ok(orders.get(&order_id).cloned())
    }

    async fn list_by_customer(
        &self,
        customer_id: CustomerId,
        page: PageRequest,
    ) -> Result<Page<Order>, StoreError> {
        let orders = self.orders.read().map_err(|_| poisoned())?;

        let matching = || orders.values().filter(|o| o.customer_id() == customer_id);

        let total = matching().count() as u64;
        if total == 0 {
            return Err(StoreError::CustomerNotFound(customer_id));
        }

        let skip = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        let items = matching()
            .skip(skip)
            .take(page.page_size() as usize)
            .cloned()
            .collect();

        Ok(Page::new(items, page, total))
    }

    async fn sum_value_by_customer(&self, customer_id: CustomerId) -> Result<Decimal, StoreError> {
        let orders = self.orders.read().map_err(|_| poisoned())?;

        let (count, sum) = orders
            .values()
            .filter(|o| o.customer_id() == customer_id)
            .try_fold((0u64, Decimal::ZERO), |(count, sum), o| {
                sum.checked_add(o.total_value())
                    .map(|sum| (count + 1, sum))
                    .ok_or(StoreError::SumOverflow(customer_id))
            })?;

        if count == 0 {
            return Err(StoreError::CustomerNotFound(customer_id));
        }
        Ok(sum)
    }
}
