use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::auth::{Caller, Role};
use crate::error::AppError;
use crate::services::refund::RefundService;

#[derive(Clone)]
pub struct RefundState {
    pub service: Arc<RefundService>,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequestBody {
    pub order_id: i32,
    pub reason: String,
}

/// `POST /api/refunds/request`
pub async fn request_refund(
    State(state): State<RefundState>,
    caller: Caller,
    Json(body): Json<RefundRequestBody>,
) -> Result<impl IntoResponse, AppError> {
    caller.require(Role::Buyer)?;
    let request = state
        .service
        .request_refund(body.order_id, caller.user_id, &body.reason)
        .await
        .map_err(|e| caller.tag(e))?;
    Ok((StatusCode::CREATED, Json(request)))
}

/// `GET /api/refunds/myrequests`
pub async fn my_requests(
    State(state): State<RefundState>,
    caller: Caller,
) -> Result<impl IntoResponse, AppError> {
    caller.require(Role::Buyer)?;
    let requests = state
        .service
        .my_requests(caller.user_id)
        .await
        .map_err(|e| caller.tag(e))?;
    Ok(Json(requests))
}
