//! Order endpoints for buyers and farmers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::auth::{Caller, Role};
use crate::database::order_repository::OrderStatus;
use crate::error::{AppError, ValidationError};
use crate::services::order_lifecycle::{OrderLifecycle, StatusChange};

#[derive(Clone)]
pub struct OrderState {
    pub lifecycle: Arc<OrderLifecycle>,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderBody {
    pub produce_id: i32,
    pub quantity_ordered: i32,
}

#[derive(Debug, Deserialize)]
pub struct LocationBody {
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// `POST /api/orders`
pub async fn create_order(
    State(state): State<OrderState>,
    caller: Caller,
    Json(body): Json<CreateOrderBody>,
) -> Result<impl IntoResponse, AppError> {
    caller.require(Role::Buyer)?;
    let order = state
        .lifecycle
        .create_order(caller.user_id, body.produce_id, body.quantity_ordered)
        .await
        .map_err(|e| caller.tag(e))?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// `GET /api/orders/{id}`, for the order's buyer or farmer
pub async fn get_order(
    State(state): State<OrderState>,
    caller: Caller,
    Path(order_id): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    caller.require_any(&[Role::Buyer, Role::Farmer])?;
    let order = state
        .lifecycle
        .get_order(order_id, caller.user_id)
        .await
        .map_err(|e| caller.tag(e))?;
    Ok(Json(order))
}

/// `PUT /api/orders/{id}/location`
pub async fn confirm_location(
    State(state): State<OrderState>,
    caller: Caller,
    Path(order_id): Path<i32>,
    Json(body): Json<LocationBody>,
) -> Result<impl IntoResponse, AppError> {
    caller.require(Role::Buyer)?;
    let order = state
        .lifecycle
        .confirm_location(order_id, caller.user_id, &body.address)
        .await
        .map_err(|e| caller.tag(e))?;
    Ok(Json(order))
}

/// `PUT /api/orders/{id}/status`
pub async fn update_status(
    State(state): State<OrderState>,
    caller: Caller,
    Path(order_id): Path<i32>,
    Json(body): Json<StatusBody>,
) -> Result<impl IntoResponse, AppError> {
    caller.require(Role::Farmer)?;
    let to = body.status.trim().parse::<OrderStatus>().map_err(|_| {
        caller.tag(AppError::validation(ValidationError::InvalidStatus {
            status: body.status.clone(),
        }))
    })?;

    let change = state
        .lifecycle
        .set_status(order_id, caller.user_id, to)
        .await
        .map_err(|e| caller.tag(e))?;

    Ok(match change {
        StatusChange::Updated(order) => Json(order).into_response(),
        StatusChange::Removed { .. } => Json(MessageResponse {
            message: "Order successfully cancelled and deleted.",
        })
        .into_response(),
    })
}

/// `DELETE /api/orders/{id}`, buyer withdraws a pending order
pub async fn cancel_order(
    State(state): State<OrderState>,
    caller: Caller,
    Path(order_id): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    caller.require(Role::Buyer)?;
    state
        .lifecycle
        .cancel_order(order_id, caller.user_id)
        .await
        .map_err(|e| caller.tag(e))?;
    Ok(Json(MessageResponse {
        message: "Order cancelled and deleted.",
    }))
}
