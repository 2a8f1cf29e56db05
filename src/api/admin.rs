//! Back-office endpoints: payout completion, refund processing and
//! payment callback reconciliation

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::auth::{Caller, Role};
use crate::database::repository::CallbackLog;
use crate::error::AppError;
use crate::services::payment_callback::PaymentCallbackHandler;
use crate::services::payout::PayoutService;
use crate::services::refund::RefundService;

const UNRESOLVED_CALLBACK_LIMIT: i64 = 100;

#[derive(Clone)]
pub struct AdminState {
    pub payouts: Arc<PayoutService>,
    pub refunds: Arc<RefundService>,
    pub callbacks: Arc<PaymentCallbackHandler>,
    pub callback_log: Arc<dyn CallbackLog>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessRefundBody {
    pub status: String,
}

/// `GET /api/admin/payouts`
pub async fn pending_payouts(
    State(state): State<AdminState>,
    caller: Caller,
) -> Result<impl IntoResponse, AppError> {
    caller.require(Role::Admin)?;
    let payouts = state
        .payouts
        .pending_payouts()
        .await
        .map_err(|e| caller.tag(e))?;
    Ok(Json(payouts))
}

/// `PUT /api/admin/payouts/{id}/complete`
pub async fn complete_payout(
    State(state): State<AdminState>,
    caller: Caller,
    Path(payout_id): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    caller.require(Role::Admin)?;
    let payout = state
        .payouts
        .complete_payout(payout_id)
        .await
        .map_err(|e| caller.tag(e))?;
    Ok(Json(payout))
}

/// `GET /api/admin/refunds`
pub async fn pending_refunds(
    State(state): State<AdminState>,
    caller: Caller,
) -> Result<impl IntoResponse, AppError> {
    caller.require(Role::Admin)?;
    let refunds = state
        .refunds
        .pending_refunds()
        .await
        .map_err(|e| caller.tag(e))?;
    Ok(Json(refunds))
}

/// `PUT /api/admin/refunds/{id}`
pub async fn process_refund(
    State(state): State<AdminState>,
    caller: Caller,
    Path(request_id): Path<i32>,
    Json(body): Json<ProcessRefundBody>,
) -> Result<impl IntoResponse, AppError> {
    caller.require(Role::Admin)?;
    let request = state
        .refunds
        .process_refund(request_id, &body.status)
        .await
        .map_err(|e| caller.tag(e))?;
    Ok(Json(request))
}

/// `GET /api/admin/payments/unresolved`
///
/// Successful payments that could not be tied to an order, plus callbacks
/// that failed on our side. Newest first.
pub async fn unresolved_callbacks(
    State(state): State<AdminState>,
    caller: Caller,
) -> Result<impl IntoResponse, AppError> {
    caller.require(Role::Admin)?;
    let records = state
        .callback_log
        .unresolved(UNRESOLVED_CALLBACK_LIMIT)
        .await
        .map_err(|e| caller.tag(e.into()))?;
    Ok(Json(records))
}

/// `GET /api/admin/payments/callback-stats`
pub async fn callback_stats(
    State(state): State<AdminState>,
    caller: Caller,
) -> Result<impl IntoResponse, AppError> {
    caller.require(Role::Admin)?;
    Ok(Json(state.callbacks.stats()))
}
