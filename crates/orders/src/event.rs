//! Inbound integration event published by the upstream order producer.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use orderflow_core::{CustomerId, OrderId};

/// Event: an order was created upstream and must be persisted here.
///
/// Field names follow the producer's JSON (`orderCode`, `customerCode`, `items`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedEvent {
    pub order_code: OrderId,
    pub customer_code: CustomerId,
    pub items: Vec<OrderItemEvent>,
}

/// One line of an [`OrderCreatedEvent`].
///
/// `quantity` is kept signed so that a negative value arrives as a validation
/// failure instead of a decode failure with a less useful message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItemEvent {
    pub product: String,
    pub quantity: i64,
    /// Unit price. Accepted as a decimal string or a JSON number.
    pub price: Decimal,
}

impl OrderCreatedEvent {
    pub const EVENT_TYPE: &'static str = "orders.order.created";
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn decodes_producer_payload_with_string_prices() {
        let json = r#"{
            "orderCode": 1001,
            "customerCode": 1,
            "items": [
                { "product": "pencil", "quantity": 100, "price": "1.10" },
                { "product": "notebook", "quantity": 10, "price": 1.00 }
            ]
        }"#;

        let ev: OrderCreatedEvent = serde_json::from_str(json).unwrap();
        assert_eq!(ev.order_code, OrderId::new(1001));
        assert_eq!(ev.customer_code, CustomerId::new(1));
        assert_eq!(ev.items.len(), 2);
        assert_eq!(ev.items[0].price, dec!(1.10));
        assert_eq!(ev.items[1].price, dec!(1.00));
    }

    #[test]
    fn missing_order_code_is_a_decode_error() {
        let json = r#"{ "customerCode": 1, "items": [] }"#;
        assert!(serde_json::from_str::<OrderCreatedEvent>(json).is_err());
    }

    #[test]
    fn non_decimal_price_is_a_decode_error() {
        let json = r#"{
            "orderCode": 1, "customerCode": 1,
            "items": [ { "product": "pen", "quantity": 1, "price": "cheap" } ]
        }"#;
        assert!(serde_json::from_str::<OrderCreatedEvent>(json).is_err());
    }
}
