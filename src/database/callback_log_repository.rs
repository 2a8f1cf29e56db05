//! Audit trail of every payment callback received from the gateway

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgExecutor, PgPool};

use crate::database::error::{DatabaseError, DbResult};
use crate::database::order_repository::Order;
use crate::database::repository::CallbackLog;

/// How a callback was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackOutcome {
    /// Envelope did not match the expected shape
    Malformed,
    /// Gateway reported a failed or cancelled payment
    PaymentFailed,
    Settled,
    /// Repeat delivery for an order that is already paid
    Duplicate,
    /// Order cancelled, delivered or deleted before the callback arrived
    Ignored,
    /// No order could be identified for the checkout id
    Unresolved,
    /// Processing failed on our side
    Error,
}

impl CallbackOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackOutcome::Malformed => "malformed",
            CallbackOutcome::PaymentFailed => "payment_failed",
            CallbackOutcome::Settled => "settled",
            CallbackOutcome::Duplicate => "duplicate",
            CallbackOutcome::Ignored => "ignored",
            CallbackOutcome::Unresolved => "unresolved",
            CallbackOutcome::Error => "error",
        }
    }

    /// Outcomes an operator has to look at
    pub fn needs_attention(&self) -> bool {
        matches!(self, CallbackOutcome::Unresolved | CallbackOutcome::Error)
    }
}

impl TryFrom<String> for CallbackOutcome {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        match value.as_str() {
            "malformed" => Ok(CallbackOutcome::Malformed),
            "payment_failed" => Ok(CallbackOutcome::PaymentFailed),
            "settled" => Ok(CallbackOutcome::Settled),
            "duplicate" => Ok(CallbackOutcome::Duplicate),
            "ignored" => Ok(CallbackOutcome::Ignored),
            "unresolved" => Ok(CallbackOutcome::Unresolved),
            "error" => Ok(CallbackOutcome::Error),
            other => Err(format!("unknown callback outcome: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct CallbackRecord {
    pub callback_id: i64,
    pub checkout_request_id: Option<String>,
    pub result_code: Option<i64>,
    #[sqlx(try_from = "String")]
    pub outcome: CallbackOutcome,
    pub order_id: Option<i32>,
    pub receipt: Option<String>,
    pub detail: Option<String>,
    pub payload: JsonValue,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCallbackRecord {
    pub checkout_request_id: Option<String>,
    pub result_code: Option<i64>,
    pub outcome: CallbackOutcome,
    pub order_id: Option<i32>,
    pub receipt: Option<String>,
    pub detail: Option<String>,
    pub payload: JsonValue,
}

impl NewCallbackRecord {
    /// Audit row for a callback that moved an order to paid
    pub fn settled(checkout_request_id: &str, order: &Order, payload: JsonValue) -> Self {
        Self {
            checkout_request_id: Some(checkout_request_id.to_string()),
            result_code: Some(0),
            outcome: CallbackOutcome::Settled,
            order_id: Some(order.order_id),
            receipt: order.mpesa_receipt.clone(),
            detail: None,
            payload,
        }
    }
}

const CALLBACK_COLUMNS: &str = "callback_id, checkout_request_id, result_code, outcome, order_id, receipt, detail, payload, received_at";

/// Append one audit row. Also used inside the settlement transaction so a
/// `settled` row commits together with the order update.
pub(crate) async fn insert_callback<'e, E>(
    executor: E,
    record: NewCallbackRecord,
) -> DbResult<CallbackRecord>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, CallbackRecord>(&format!(
        "INSERT INTO payment_callbacks
            (checkout_request_id, result_code, outcome, order_id, receipt, detail, payload)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING {}",
        CALLBACK_COLUMNS
    ))
    .bind(record.checkout_request_id)
    .bind(record.result_code)
    .bind(record.outcome.as_str())
    .bind(record.order_id)
    .bind(record.receipt)
    .bind(record.detail)
    .bind(record.payload)
    .fetch_one(executor)
    .await
    .map_err(DatabaseError::from_sqlx)
}

/// Postgres-backed callback audit log
#[derive(Clone)]
pub struct CallbackLogRepository {
    pool: PgPool,
}

impl CallbackLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CallbackLog for CallbackLogRepository {
    async fn record_callback(&self, record: NewCallbackRecord) -> DbResult<CallbackRecord> {
        insert_callback(&self.pool, record).await
    }

    async fn was_settled(&self, checkout_request_id: &str) -> DbResult<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS (
                SELECT 1 FROM payment_callbacks
                WHERE checkout_request_id = $1 AND outcome = 'settled'
             )",
        )
        .bind(checkout_request_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn unresolved(&self, limit: i64) -> DbResult<Vec<CallbackRecord>> {
        sqlx::query_as::<_, CallbackRecord>(&format!(
            "SELECT {} FROM payment_callbacks
             WHERE outcome IN ('unresolved', 'error')
             ORDER BY received_at DESC, callback_id DESC
             LIMIT $1",
            CALLBACK_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
