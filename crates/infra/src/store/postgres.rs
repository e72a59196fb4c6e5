//! Postgres-backed order store implementation.
//!
//! ## Schema
//!
//! One row per order in `orders`, keyed by `order_id`. Money columns are
//! `NUMERIC` and item prices are kept as decimal strings inside the `items`
//! JSONB document, so no value ever passes through a float.
//!
//! ## Error Mapping
//!
//! | SQLx Error | StoreError | Scenario |
//! |------------|------------|----------|
//! | `PoolClosed` / `PoolTimedOut` / `Io` / `Tls` | `Unavailable` | Database unreachable |
//! | `ColumnDecode` / `Decode` / `ColumnNotFound` | `Corrupt` | Row does not map back to an order |
//! | `ColumnDecode` on the `SUM` column | `SumOverflow` | Customer total exceeds the `Decimal` range |
//! | `Database` and anything else | `Backend` | Statement rejected by Postgres |

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use orderflow_core::{CustomerId, OrderId};
use orderflow_orders::{Order, OrderItem};

use super::{OrderStore, Page, PageRequest, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    order_id    BIGINT PRIMARY KEY,
    customer_id BIGINT NOT NULL,
    total_value NUMERIC NOT NULL CHECK (total_value >= 0),
    items       JSONB NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS orders_customer_id_idx ON orders (customer_id, order_id);
"#;

/// Postgres-backed order store.
///
/// ## Thread Safety
///
/// Uses the SQLx connection pool, which is `Send + Sync`; the store can be
/// shared across the consumer task and HTTP handlers.
///
/// ## Atomicity
///
/// `put` is a single `INSERT ... ON CONFLICT DO UPDATE` statement, so readers
/// observe either the old row or the new one.
#[derive(Debug, Clone)]
pub struct PostgresOrderStore {
    pool: Arc<PgPool>,
}

impl PostgresOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the `orders` table and its customer index if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    #[instrument(skip(self, order), fields(order_id = %order.order_id()), err)]
    async fn put(&self, order: Order) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO orders (order_id, customer_id, total_value, items)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (order_id)
            DO UPDATE SET
                customer_id = EXCLUDED.customer_id,
                total_value = EXCLUDED.total_value,
                items = EXCLUDED.items,
                updated_at = NOW()
            "#,
        )
        .bind(order.order_id().get())
        .bind(order.customer_id().get())
        .bind(order.total_value())
        .bind(Json(order.items()))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("put", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn get_by_id(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT order_id, customer_id, total_value, items
            FROM orders
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_by_id", e))?;

        row.map(|r| decode_row(&r)).transpose()
    }

    #[instrument(skip(self), fields(customer_id = %customer_id, page = page.page(), page_size = page.page_size()), err)]
    async fn list_by_customer(
        &self,
        customer_id: CustomerId,
        page: PageRequest,
    ) -> Result<Page<Order>, StoreError> {
        let count_row = sqlx::query("SELECT COUNT(*) AS total FROM orders WHERE customer_id = $1")
            .bind(customer_id.get())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_by_customer", e))?;

        let total: i64 = count_row
            .try_get("total")
            .map_err(|e| StoreError::Corrupt(format!("failed to read count: {e}")))?;
        if total == 0 {
            return Err(StoreError::CustomerNotFound(customer_id));
        }

        let offset = i64::try_from(page.offset()).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r#"
            SELECT order_id, customer_id, total_value, items
            FROM orders
            WHERE customer_id = $1
            ORDER BY order_id ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(customer_id.get())
        .bind(i64::from(page.page_size()))
        .bind(offset)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_by_customer", e))?;

        let items = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(items, page, total as u64))
    }

    #[instrument(skip(self), fields(customer_id = %customer_id), err)]
    async fn sum_value_by_customer(&self, customer_id: CustomerId) -> Result<Decimal, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS matched, COALESCE(SUM(total_value), 0) AS total
            FROM orders
            WHERE customer_id = $1
            "#,
        )
        .bind(customer_id.get())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("sum_value_by_customer", e))?;

        let matched: i64 = row
            .try_get("matched")
            .map_err(|e| StoreError::Corrupt(format!("failed to read count: {e}")))?;
        if matched == 0 {
            return Err(StoreError::CustomerNotFound(customer_id));
        }

        sum_from_column(customer_id, row.try_get("total"))
    }
}

// SQLx row types

#[derive(Debug)]
struct OrderRow {
    order_id: i64,
    customer_id: i64,
    total_value: Decimal,
    items: Json<Vec<OrderItem>>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for OrderRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(OrderRow {
            order_id: row.try_get("order_id")?,
            customer_id: row.try_get("customer_id")?,
            total_value: row.try_get("total_value")?,
            items: row.try_get("items")?,
        })
    }
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        Order::restore(
            OrderId::new(row.order_id),
            CustomerId::new(row.customer_id),
            row.total_value,
            row.items.0,
        )
    }
}

fn decode_row(row: &sqlx::postgres::PgRow) -> Result<Order, StoreError> {
    OrderRow::from_row(row)
        .map(Order::from)
        .map_err(|e| StoreError::Corrupt(format!("failed to deserialize order row: {e}")))
}

/// `SUM` over `NUMERIC` can exceed what `Decimal` holds; that surfaces as a
/// column decode failure on the sum column.
fn sum_from_column(customer_id: CustomerId, res: Result<Decimal, sqlx::Error>) -> Result<Decimal, StoreError> {
    res.map_err(|e| match e {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => StoreError::SumOverflow(customer_id),
        other => map_sqlx_error("sum_value_by_customer", other),
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool timed out in {operation}"))
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("io error in {operation}: {e}")),
        sqlx::Error::Tls(e) => StoreError::Unavailable(format!("tls error in {operation}: {e}")),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Corrupt(format!("decode error in {operation}: {err}"))
        }
        sqlx::Error::Database(db_err) => {
            StoreError::Backend(format!("database error in {operation}: {}", db_err.message()))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}
