//! Farmer earnings dashboard and withdrawal requests

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::sync::Arc;

use crate::api::auth::{Caller, Role};
use crate::error::{AppError, ValidationError};
use crate::services::payout::PayoutService;

#[derive(Clone)]
pub struct PayoutState {
    pub service: Arc<PayoutService>,
}

#[derive(Debug, Deserialize)]
pub struct PayoutRequestBody {
    /// Number or numeric string
    pub amount: JsonValue,
    pub phone: String,
}

/// Accept `1500`, `1500.5` or `"1500.50"`. Anything else is a 400.
pub fn parse_amount(value: &JsonValue) -> Result<Decimal, AppError> {
    let invalid = |reason: &str| {
        AppError::validation(ValidationError::InvalidAmount {
            amount: value.to_string(),
            reason: reason.to_string(),
        })
    };

    let text = match value {
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => s.trim().to_string(),
        JsonValue::Null => {
            return Err(AppError::validation(ValidationError::MissingField {
                field: "amount".to_string(),
            }))
        }
        _ => return Err(invalid("amount must be a number")),
    };

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| invalid("amount must be a number"))
}

/// `GET /api/payouts/summary`
pub async fn earnings_summary(
    State(state): State<PayoutState>,
    caller: Caller,
) -> Result<impl IntoResponse, AppError> {
    caller.require(Role::Farmer)?;
    let summary = state
        .service
        .earnings_summary(caller.user_id)
        .await
        .map_err(|e| caller.tag(e))?;
    Ok(Json(summary))
}

/// `POST /api/payouts/request`
pub async fn request_payout(
    State(state): State<PayoutState>,
    caller: Caller,
    Json(body): Json<PayoutRequestBody>,
) -> Result<impl IntoResponse, AppError> {
    caller.require(Role::Farmer)?;
    let amount = parse_amount(&body.amount).map_err(|e| caller.tag(e))?;
    let payout = state
        .service
        .request_payout(caller.user_id, amount, &body.phone)
        .await
        .map_err(|e| caller.tag(e))?;
    Ok((StatusCode::CREATED, Json(payout)))
}

/// `GET /api/payouts/history`
pub async fn payout_history(
    State(state): State<PayoutState>,
    caller: Caller,
) -> Result<impl IntoResponse, AppError> {
    caller.require(Role::Farmer)?;
    let history = state
        .service
        .payout_history(caller.user_id)
        .await
        .map_err(|e| caller.tag(e))?;
    Ok(Json(history))
}
