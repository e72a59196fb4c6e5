use axum::{routing::get, Router};

pub mod orders;
pub mod system;

/// Router for the order query endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/customers/:customer_id/orders", get(orders::list_customer_orders))
        .route("/orders/:order_id", get(orders::get_order))
}
