use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use orderflow_core::{CustomerId, OrderId};

use crate::app::errors;
use crate::app::services::AppServices;

/// Raw query string; numbers are parsed by hand so bad input gets the JSON error shape.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOrdersParams {
    pub page: Option<String>,
    pub page_size: Option<String>,
}

fn parse_u32(name: &str, raw: Option<String>) -> Result<Option<u32>, axum::response::Response> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => v
            .parse::<u32>()
            .map(Some)
            .map_err(|_| errors::invalid_argument(format!("{name} must be a non-negative integer, got {v:?}"))),
    }
}

pub async fn list_customer_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Path(customer_id): Path<String>,
    Query(params): Query<ListOrdersParams>,
) -> axum::response::Response {
    let customer_id = match customer_id.parse::<CustomerId>() {
        Ok(id) => id,
        Err(e) => return errors::invalid_argument(e.to_string()),
    };
    let page = match parse_u32("page", params.page) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let page_size = match parse_u32("pageSize", params.page_size) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .queries()
        .list_orders(Some(customer_id), page, page_size)
        .await
    {
        Ok(res) => (StatusCode::OK, Json(res)).into_response(),
        Err(e) => errors::query_error_to_response(e),
    }
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(order_id): Path<String>,
) -> axum::response::Response {
    let order_id = match order_id.parse::<OrderId>() {
        Ok(id) => id,
        Err(e) => return errors::invalid_argument(e.to_string()),
    };

    match services.queries().get_order(order_id).await {
        Ok(detail) => (StatusCode::OK, Json(detail)).into_response(),
        Err(e) => errors::query_error_to_response(e),
    }
}
