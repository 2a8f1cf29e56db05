use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::fmt;

use crate::database::error::{DatabaseError, DatabaseErrorKind, DbResult};
use crate::database::repository::PayoutStore;
use crate::services::ledger::{withdrawable_balance, FeePolicy, LedgerTotals};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Pending,
    Completed,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for PayoutStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(PayoutStatus::Pending),
            "completed" => Ok(PayoutStatus::Completed),
            other => Err(format!("unknown payout status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Payout {
    pub payout_id: i32,
    pub farmer_id: i32,
    pub amount: Decimal,
    #[sqlx(try_from = "String")]
    pub status: PayoutStatus,
    pub requested_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Admin view of a pending payout
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct PendingPayout {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub payout: Payout,
    pub farmer_name: String,
    pub phone_number: Option<String>,
}

/// Outcome of a payout request
#[derive(Debug, Clone, PartialEq)]
pub enum PayoutDecision {
    Accepted(Payout),
    Insufficient { available: Decimal },
}

const PAYOUT_COLUMNS: &str = "payout_id, farmer_id, amount, status, requested_at, completed_at";

const LEDGER_TOTALS_SQL: &str = "SELECT
    (SELECT COALESCE(SUM(total_price), 0) FROM orders
        WHERE farmer_id = $1 AND status = 'delivered') AS delivered_revenue,
    (SELECT COALESCE(SUM(amount), 0) FROM payouts
        WHERE farmer_id = $1 AND status = 'completed') AS completed_payouts,
    (SELECT COALESCE(SUM(amount), 0) FROM payouts
        WHERE farmer_id = $1 AND status = 'pending') AS pending_payouts";

/// Postgres-backed payout storage
#[derive(Clone)]
pub struct PayoutRepository {
    pool: PgPool,
}

impl PayoutRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PayoutStore for PayoutRepository {
    async fn ledger_totals(&self, farmer_id: i32) -> DbResult<LedgerTotals> {
        sqlx::query_as::<_, LedgerTotals>(LEDGER_TOTALS_SQL)
            .bind(farmer_id)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn request_payout(
        &self,
        farmer_id: i32,
        amount: Decimal,
        phone_number: &str,
        fees: &FeePolicy,
    ) -> DbResult<PayoutDecision> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        // Serialises concurrent requests for the same farmer
        let farmer: Option<i32> =
            sqlx::query_scalar("SELECT user_id FROM users WHERE user_id = $1 FOR UPDATE")
                .bind(farmer_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(DatabaseError::from_sqlx)?;

        if farmer.is_none() {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Err(DatabaseError::new(DatabaseErrorKind::NotFound {
                entity: "Farmer".to_string(),
                id: farmer_id.to_string(),
            }));
        }

        sqlx::query("UPDATE users SET phone_number = $1 WHERE user_id = $2")
            .bind(phone_number)
            .bind(farmer_id)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let totals = sqlx::query_as::<_, LedgerTotals>(LEDGER_TOTALS_SQL)
            .bind(farmer_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let available = withdrawable_balance(&totals, fees);
        if amount > available {
            // The phone update stands even when the request is refused
            tx.commit().await.map_err(DatabaseError::from_sqlx)?;
            return Ok(PayoutDecision::Insufficient { available });
        }

        let payout = sqlx::query_as::<_, Payout>(&format!(
            "INSERT INTO payouts (farmer_id, amount, status) VALUES ($1, $2, 'pending') RETURNING {}",
            PAYOUT_COLUMNS
        ))
        .bind(farmer_id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(PayoutDecision::Accepted(payout))
    }

    async fn payout_history(&self, farmer_id: i32) -> DbResult<Vec<Payout>> {
        sqlx::query_as::<_, Payout>(&format!(
            "SELECT {} FROM payouts WHERE farmer_id = $1 ORDER BY requested_at DESC, payout_id DESC",
            PAYOUT_COLUMNS
        ))
        .bind(farmer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn pending_payouts(&self) -> DbResult<Vec<PendingPayout>> {
        sqlx::query_as::<_, PendingPayout>(
            "SELECT p.payout_id, p.farmer_id, p.amount, p.status, p.requested_at, p.completed_at,
                    u.username AS farmer_name, u.phone_number
             FROM payouts p
             JOIN users u ON p.farmer_id = u.user_id
             WHERE p.status = 'pending'
             ORDER BY p.requested_at ASC, p.payout_id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn complete_payout(&self, payout_id: i32) -> DbResult<Option<Payout>> {
        sqlx::query_as::<_, Payout>(&format!(
            "UPDATE payouts SET status = 'completed', completed_at = NOW()
             WHERE payout_id = $1 AND status = 'pending'
             RETURNING {}",
            PAYOUT_COLUMNS
        ))
        .bind(payout_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
