//! M-Pesa payment endpoints: STK push initiation and the gateway callback

use axum::{body::Bytes, extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::auth::{Caller, Role};
use crate::error::AppError;
use crate::payments::types::CallbackAck;
use crate::services::payment_callback::PaymentCallbackHandler;
use crate::services::payment_initiation::PaymentInitiationService;

#[derive(Clone)]
pub struct InitiationState {
    pub service: Arc<PaymentInitiationService>,
}

#[derive(Clone)]
pub struct CallbackState {
    pub handler: Arc<PaymentCallbackHandler>,
}

#[derive(Debug, Deserialize)]
pub struct StkPushBody {
    pub order_id: i32,
    pub phone: String,
}

/// `POST /api/payments/stkpush`
///
/// Relays the gateway's acceptance body to the buyer unchanged.
pub async fn stk_push(
    State(state): State<InitiationState>,
    caller: Caller,
    Json(body): Json<StkPushBody>,
) -> Result<impl IntoResponse, AppError> {
    caller.require(Role::Buyer)?;
    let raw = state
        .service
        .initiate(body.order_id, caller.user_id, &body.phone)
        .await
        .map_err(|e| caller.tag(e))?;
    Ok((StatusCode::OK, Json(raw)))
}

/// `POST /api/payments/callback`
///
/// Unauthenticated and always 200. The raw body is handed over so that
/// unparseable deliveries are still recorded.
pub async fn mpesa_callback(
    State(state): State<CallbackState>,
    body: Bytes,
) -> Json<CallbackAck> {
    Json(state.handler.handle(&body).await)
}
