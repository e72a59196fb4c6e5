use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use orderflow_infra::query::QueryError;
use orderflow_infra::store::StoreError;

pub fn query_error_to_response(err: QueryError) -> axum::response::Response {
    match err {
        QueryError::InvalidArgument(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_argument", msg),
        QueryError::CustomerNotFound(customer_id) => json_error(
            StatusCode::NOT_FOUND,
            "customer_not_found",
            format!("customer {customer_id} has no orders"),
        ),
        QueryError::OrderNotFound(order_id) => json_error(
            StatusCode::NOT_FOUND,
            "order_not_found",
            format!("order {order_id} not found"),
        ),
        QueryError::Store(StoreError::Unavailable(msg)) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", msg)
        }
        QueryError::Store(e @ StoreError::SumOverflow(_)) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "sum_overflow", e.to_string())
        }
        QueryError::Store(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string()),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn invalid_argument(message: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_argument", message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderflow_core::{CustomerId, OrderId};

    #[test]
    fn maps_query_errors_to_status_codes() {
        let cases = [
            (QueryError::InvalidArgument("x".into()), StatusCode::BAD_REQUEST),
            (QueryError::CustomerNotFound(CustomerId::new(1)), StatusCode::NOT_FOUND),
            (QueryError::OrderNotFound(OrderId::new(1)), StatusCode::NOT_FOUND),
            (
                QueryError::Store(StoreError::Unavailable("down".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                QueryError::Store(StoreError::SumOverflow(CustomerId::new(1))),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                QueryError::Store(StoreError::Corrupt("bad row".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(query_error_to_response(err).status(), status);
        }
    }
}
