use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use orderflow_core::{CustomerId, DomainError, DomainResult, Entity, OrderId};

use crate::event::{OrderCreatedEvent, OrderItemEvent};

/// Order line: product, quantity, unit price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product: String,
    pub quantity: u32,
    /// Unit price (exact decimal, never a float).
    pub price: Decimal,
}

impl OrderItem {
    /// Build a validated line from its event form.
    pub fn from_event(item: &OrderItemEvent) -> DomainResult<Self> {
        if item.product.trim().is_empty() {
            return Err(DomainError::validation("product must not be empty"));
        }

        if item.quantity < 1 {
            return Err(DomainError::validation(format!(
                "quantity must be at least 1 (product {}, got {})",
                item.product, item.quantity
            )));
        }
        let quantity = u32::try_from(item.quantity).map_err(|_| {
            DomainError::validation(format!(
                "quantity out of range (product {}, got {})",
                item.product, item.quantity
            ))
        })?;

        if item.price < Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "price must not be negative (product {}, got {})",
                item.product, item.price
            )));
        }

        Ok(Self {
            product: item.product.clone(),
            quantity,
            price: item.price,
        })
    }

    /// `price * quantity`, or `None` on decimal overflow.
    pub fn line_total(&self) -> Option<Decimal> {
        self.price.checked_mul(Decimal::from(self.quantity))
    }
}

/// Durable order record.
///
/// Immutable once built: the only ways to obtain one are [`Order::from_event`]
/// (ingestion) and [`Order::restore`] (reading back from storage).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    order_id: OrderId,
    customer_id: CustomerId,
    total_value: Decimal,
    items: Vec<OrderItem>,
}

impl Order {
    /// Build an order from an inbound event, computing `total_value` once.
    ///
    /// An empty item list yields a zero total.
    pub fn from_event(event: &OrderCreatedEvent) -> DomainResult<Self> {
        let items = event
            .items
            .iter()
            .map(OrderItem::from_event)
            .collect::<DomainResult<Vec<_>>>()?;

        let total_value = total_of(&items)?;

        Ok(Self {
            order_id: event.order_code,
            customer_id: event.customer_code,
            total_value,
            items,
        })
    }

    /// Rehydrate a persisted order.
    ///
    /// The stored total is trusted as written at ingestion time; it is not recomputed.
    pub fn restore(
        order_id: OrderId,
        customer_id: CustomerId,
        total_value: Decimal,
        items: Vec<OrderItem>,
    ) -> Self {
        Self {
            order_id,
            customer_id,
            total_value,
            items,
        }
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn total_value(&self) -> Decimal {
        self.total_value
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }
}

impl Entity for Order {
    type Id = OrderId;

    fn id(&self) -> Self::Id {
        self.order_id
    }
}

fn total_of(items: &[OrderItem]) -> DomainResult<Decimal> {
    items.iter().try_fold(Decimal::ZERO, |acc, item| {
        item.line_total()
            .and_then(|line| acc.checked_add(line))
            .ok_or_else(|| DomainError::validation("order total overflows decimal range"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn item(product: &str, quantity: i64, price: Decimal) -> OrderItemEvent {
        OrderItemEvent {
            product: product.to_string(),
            quantity,
            price,
        }
    }

    fn event(items: Vec<OrderItemEvent>) -> OrderCreatedEvent {
        OrderCreatedEvent {
            order_code: OrderId::new(1),
            customer_code: CustomerId::new(10),
            items,
        }
    }

    #[test]
    fn total_value_is_sum_of_price_times_quantity() {
        let order = Order::from_event(&event(vec![
            item("pen", 2, dec!(10.00)),
            item("ink", 1, dec!(5.50)),
        ]))
        .unwrap();

        assert_eq!(order.total_value(), dec!(25.50));
        assert_eq!(order.order_id(), OrderId::new(1));
        assert_eq!(order.customer_id(), CustomerId::new(10));
        assert_eq!(order.items().len(), 2);
        assert_eq!(order.items()[0].quantity, 2);
    }

    #[test]
    fn empty_items_yield_zero_total() {
        let order = Order::from_event(&event(vec![])).unwrap();
        assert_eq!(order.total_value(), Decimal::ZERO);
        assert!(order.items().is_empty());
    }

    #[test]
    fn decimal_arithmetic_is_exact() {
        // 0.1 * 3 is not representable as a float sum; it must be exactly 0.3 here.
        let order = Order::from_event(&event(vec![item("chalk", 3, dec!(0.1))])).unwrap();
        assert_eq!(order.total_value(), dec!(0.3));
    }

    #[test]
    fn rejects_blank_product() {
        let err = Order::from_event(&event(vec![item("  ", 1, dec!(1))])).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn rejects_zero_and_negative_quantity() {
        assert!(Order::from_event(&event(vec![item("pen", 0, dec!(1))])).is_err());
        assert!(Order::from_event(&event(vec![item("pen", -3, dec!(1))])).is_err());
    }

    #[test]
    fn rejects_negative_price_but_allows_free_items() {
        assert!(Order::from_event(&event(vec![item("pen", 1, dec!(-0.01))])).is_err());

        let free = Order::from_event(&event(vec![item("sample", 4, dec!(0))])).unwrap();
        assert_eq!(free.total_value(), Decimal::ZERO);
    }

    #[test]
    fn restore_keeps_stored_total() {
        let items = vec![OrderItem {
            product: "pen".to_string(),
            quantity: 2,
            price: dec!(1.25),
        }];
        let order = Order::restore(OrderId::new(5), CustomerId::new(6), dec!(2.50), items);
        assert_eq!(order.id(), OrderId::new(5));
        assert_eq!(order.total_value(), dec!(2.50));
    }

    proptest! {
        #[test]
        fn total_matches_integer_cent_arithmetic(
            lines in proptest::collection::vec((1i64..1_000, 0i64..1_000_000), 0..20)
        ) {
            let items: Vec<_> = lines
                .iter()
                .enumerate()
                .map(|(i, (qty, cents))| item(&format!("p{i}"), *qty, Decimal::new(*cents, 2)))
                .collect();

            let order = Order::from_event(&event(items)).unwrap();

            let expected_cents: i64 = lines.iter().map(|(qty, cents)| qty * cents).sum();
            prop_assert_eq!(order.total_value(), Decimal::new(expected_cents, 2));
        }
    }
}
