use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

use crate::database::error::{DatabaseError, DbResult};
use crate::database::repository::RefundStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundStatus {
    Pending,
    Approved,
    Rejected,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Pending => "pending",
            RefundStatus::Approved => "approved",
            RefundStatus::Rejected => "rejected",
        }
    }

    /// Whether an administrator may move a pending request to this status
    pub fn is_resolution(&self) -> bool {
        matches!(self, RefundStatus::Approved | RefundStatus::Rejected)
    }
}

impl FromStr for RefundStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(RefundStatus::Pending),
            "approved" => Ok(RefundStatus::Approved),
            "rejected" => Ok(RefundStatus::Rejected),
            other => Err(format!("unknown refund status: {}", other)),
        }
    }
}

impl TryFrom<String> for RefundStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct RefundRequest {
    pub request_id: i32,
    pub order_id: i32,
    pub buyer_id: i32,
    pub reason: String,
    #[sqlx(try_from = "String")]
    pub status: RefundStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// A buyer's own request with the order it disputes
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct BuyerRefundRequest {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub request: RefundRequest,
    pub total_price: Decimal,
    pub produce_name: String,
}

/// Admin view of a pending request
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct PendingRefundRequest {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub request: RefundRequest,
    pub total_price: Decimal,
    pub mpesa_receipt: Option<String>,
    pub produce_name: String,
    pub buyer_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefundFiling {
    Created(RefundRequest),
    /// The buyer has no paid or delivered order with this id
    NoEligibleOrder,
    AlreadyRequested,
}

const REFUND_COLUMNS: &str =
    "request_id, order_id, buyer_id, reason, status, created_at, processed_at";

/// Postgres-backed refund request storage
#[derive(Clone)]
pub struct RefundRepository {
    pool: PgPool,
}

impl RefundRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefundStore for RefundRepository {
    async fn file_refund(
        &self,
        order_id: i32,
        buyer_id: i32,
        reason: &str,
    ) -> DbResult<RefundFiling> {
        let eligible: Option<i32> = sqlx::query_scalar(
            "SELECT order_id FROM orders
             WHERE order_id = $1 AND buyer_id = $2 AND status IN ('paid', 'delivered')",
        )
        .bind(order_id)
        .bind(buyer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if eligible.is_none() {
            return Ok(RefundFiling::NoEligibleOrder);
        }

        // refund_requests.order_id is unique; a concurrent duplicate loses here
        let inserted = sqlx::query_as::<_, RefundRequest>(&format!(
            "INSERT INTO refund_requests (order_id, buyer_id, reason, status)
             VALUES ($1, $2, $3, 'pending')
             RETURNING {}",
            REFUND_COLUMNS
        ))
        .bind(order_id)
        .bind(buyer_id)
        .bind(reason)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx);

        match inserted {
            Ok(request) => Ok(RefundFiling::Created(request)),
            Err(e) if e.is_unique_violation() => Ok(RefundFiling::AlreadyRequested),
            Err(e) => Err(e),
        }
    }

    async fn refunds_for_buyer(&self, buyer_id: i32) -> DbResult<Vec<BuyerRefundRequest>> {
        sqlx::query_as::<_, BuyerRefundRequest>(
            "SELECT r.request_id, r.order_id, r.buyer_id, r.reason, r.status, r.created_at,
                    r.processed_at, o.total_price, p.name AS produce_name
             FROM refund_requests r
             JOIN orders o ON r.order_id = o.order_id
             JOIN produce p ON o.produce_id = p.produce_id
             WHERE r.buyer_id = $1
             ORDER BY r.created_at DESC, r.request_id DESC",
        )
        .bind(buyer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn pending_refunds(&self) -> DbResult<Vec<PendingRefundRequest>> {
        sqlx::query_as::<_, PendingRefundRequest>(
            "SELECT r.request_id, r.order_id, r.buyer_id, r.reason, r.status, r.created_at,
                    r.processed_at, o.total_price, o.mpesa_receipt, p.name AS produce_name,
                    u.username AS buyer_name
             FROM refund_requests r
             JOIN orders o ON r.order_id = o.order_id
             JOIN produce p ON o.produce_id = p.produce_id
             JOIN users u ON r.buyer_id = u.user_id
             WHERE r.status = 'pending'
             ORDER BY r.created_at ASC, r.request_id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn resolve_refund(
        &self,
        request_id: i32,
        outcome: RefundStatus,
    ) -> DbResult<Option<RefundRequest>> {
        sqlx::query_as::<_, RefundRequest>(&format!(
            "UPDATE refund_requests SET status = $1, processed_at = NOW()
             WHERE request_id = $2 AND status = 'pending'
             RETURNING {}",
            REFUND_COLUMNS
        ))
        .bind(outcome.as_str())
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
