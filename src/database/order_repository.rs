use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::fmt;
use std::str::FromStr;

use crate::database::error::{DatabaseError, DbResult};
use crate::database::repository::OrderStore;

/// Lifecycle of an order
///
/// ```text
/// pending --(payment callback)--> paid --(farmer)--> delivered
///    \--(farmer or buyer)--> cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn valid_transitions(&self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Pending => &[OrderStatus::Paid, OrderStatus::Cancelled],
            OrderStatus::Paid => &[OrderStatus::Delivered],
            OrderStatus::Delivered | OrderStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

impl TryFrom<String> for OrderStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Order {
    pub order_id: i32,
    pub buyer_id: i32,
    pub farmer_id: i32,
    pub produce_id: i32,
    pub quantity_ordered: i32,
    /// Unit price times quantity, captured at creation and never recomputed
    pub total_price: Decimal,
    #[sqlx(try_from = "String")]
    pub status: OrderStatus,
    pub delivery_address: Option<String>,
    pub location_confirmed: bool,
    pub mpesa_receipt: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn is_participant(&self, user_id: i32) -> bool {
        self.buyer_id == user_id || self.farmer_id == user_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Produce {
    pub produce_id: i32,
    pub farmer_id: i32,
    pub name: String,
    pub price: Decimal,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub buyer_id: i32,
    pub farmer_id: i32,
    pub produce_id: i32,
    pub quantity_ordered: i32,
    pub total_price: Decimal,
}

pub(crate) const ORDER_COLUMNS: &str = "order_id, buyer_id, farmer_id, produce_id, quantity_ordered, total_price, status, delivery_address, location_confirmed, mpesa_receipt, created_at";

/// Postgres-backed order storage
#[derive(Clone)]
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for OrderRepository {
    async fn find_produce(&self, produce_id: i32) -> DbResult<Option<Produce>> {
        sqlx::query_as::<_, Produce>(
            "SELECT produce_id, farmer_id, name, price FROM produce WHERE produce_id = $1",
        )
        .bind(produce_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn create_order(&self, order: NewOrder) -> DbResult<Order> {
        sqlx::query_as::<_, Order>(&format!(
            "INSERT INTO orders (buyer_id, farmer_id, produce_id, quantity_ordered, total_price, status)
             VALUES ($1, $2, $3, $4, $5, 'pending')
             RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(order.buyer_id)
        .bind(order.farmer_id)
        .bind(order.produce_id)
        .bind(order.quantity_ordered)
        .bind(order.total_price)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_order(&self, order_id: i32) -> DbResult<Option<Order>> {
        sqlx::query_as::<_, Order>(&format!(
            "SELECT {} FROM orders WHERE order_id = $1",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn transition_status(
        &self,
        order_id: i32,
        from: OrderStatus,
        to: OrderStatus,
    ) -> DbResult<Option<Order>> {
        sqlx::query_as::<_, Order>(&format!(
            "UPDATE orders SET status = $3
             WHERE order_id = $1 AND status = $2
             RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn confirm_location(
        &self,
        order_id: i32,
        buyer_id: i32,
        address: &str,
    ) -> DbResult<Option<Order>> {
        sqlx::query_as::<_, Order>(&format!(
            "UPDATE orders SET delivery_address = $3, location_confirmed = TRUE
             WHERE order_id = $1 AND buyer_id = $2 AND status = 'pending'
             RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .bind(buyer_id)
        .bind(address)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn delete_order(&self, order_id: i32, expected: OrderStatus) -> DbResult<bool> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let locked: Option<i32> = sqlx::query_scalar(
            "SELECT order_id FROM orders WHERE order_id = $1 AND status = $2 FOR UPDATE",
        )
        .bind(order_id)
        .bind(expected.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if locked.is_none() {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM refund_requests WHERE order_id = $1")
            .bind(order_id)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        sqlx::query("DELETE FROM orders WHERE order_id = $1")
            .bind(order_id)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(true)
    }
}
