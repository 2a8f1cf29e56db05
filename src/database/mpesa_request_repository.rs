//! Checkout id to order correlation for STK push payments

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};

use crate::database::callback_log_repository::{insert_callback, NewCallbackRecord};
use crate::database::error::{DatabaseError, DatabaseErrorKind, DbResult};
use crate::database::order_repository::{Order, OrderStatus, ORDER_COLUMNS};
use crate::database::repository::CorrelationStore;
use crate::payments::types::AccountReference;

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct PaymentCorrelation {
    pub checkout_request_id: String,
    pub account_reference: String,
    pub created_at: DateTime<Utc>,
}

/// What a successful payment callback did to the order it refers to
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// Order moved from pending to paid
    Paid(Order),
    /// Order was already paid. No change.
    AlreadyPaid { order_id: i32 },
    /// Order is delivered or cancelled. No change.
    NotPending { order_id: i32, status: OrderStatus },
    /// Order was deleted after the payment was initiated
    OrderMissing { order_id: i32 },
    /// Stored account reference carries no order id
    MalformedReference { account_reference: String },
    /// No correlation for this checkout id
    CorrelationNotFound,
}

/// Postgres-backed correlation storage
#[derive(Clone)]
pub struct MpesaRequestRepository {
    pool: PgPool,
}

impl MpesaRequestRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CorrelationStore for MpesaRequestRepository {
    async fn record(
        &self,
        checkout_request_id: &str,
        reference: &AccountReference,
    ) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO mpesa_requests (checkout_request_id, account_reference) VALUES ($1, $2)",
        )
        .bind(checkout_request_id)
        .bind(reference.as_str())
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn resolve(&self, checkout_request_id: &str) -> DbResult<Option<PaymentCorrelation>> {
        sqlx::query_as::<_, PaymentCorrelation>(
            "SELECT checkout_request_id, account_reference, created_at
             FROM mpesa_requests WHERE checkout_request_id = $1",
        )
        .bind(checkout_request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn settle(
        &self,
        checkout_request_id: &str,
        receipt: Option<&str>,
        payload: &JsonValue,
    ) -> DbResult<Settlement> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let correlation = sqlx::query_as::<_, PaymentCorrelation>(
            "SELECT checkout_request_id, account_reference, created_at
             FROM mpesa_requests WHERE checkout_request_id = $1
             FOR UPDATE",
        )
        .bind(checkout_request_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let Some(correlation) = correlation else {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Ok(Settlement::CorrelationNotFound);
        };

        let settlement = match AccountReference::parse_order_id(&correlation.account_reference) {
            None => Settlement::MalformedReference {
                account_reference: correlation.account_reference.clone(),
            },
            Some(order_id) => {
                let paid = sqlx::query_as::<_, Order>(&format!(
                    "UPDATE orders SET status = 'paid', mpesa_receipt = $2
                     WHERE order_id = $1 AND status = 'pending'
                     RETURNING {}",
                    ORDER_COLUMNS
                ))
                .bind(order_id)
                .bind(receipt)
                .fetch_optional(&mut *tx)
                .await
                .map_err(DatabaseError::from_sqlx)?;

                match paid {
                    Some(order) => Settlement::Paid(order),
                    None => {
                        let current: Option<String> =
                            sqlx::query_scalar("SELECT status FROM orders WHERE order_id = $1")
                                .bind(order_id)
                                .fetch_optional(&mut *tx)
                                .await
                                .map_err(DatabaseError::from_sqlx)?;
                        match current.map(OrderStatus::try_from) {
                            None => Settlement::OrderMissing { order_id },
                            Some(Ok(OrderStatus::Paid)) => Settlement::AlreadyPaid { order_id },
                            Some(Ok(status)) => Settlement::NotPending { order_id, status },
                            Some(Err(message)) => {
                                tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
                                return Err(DatabaseError::new(DatabaseErrorKind::DecodeError {
                                    message,
                                }));
                            }
                        }
                    }
                }
            }
        };

        sqlx::query("DELETE FROM mpesa_requests WHERE checkout_request_id = $1")
            .bind(checkout_request_id)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        if let Settlement::Paid(order) = &settlement {
            insert_callback(
                &mut *tx,
                NewCallbackRecord::settled(checkout_request_id, order, payload.clone()),
            )
            .await?;
        }

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(settlement)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM mpesa_requests WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected())
    }
}
