//! Daraja client against a local stand-in for the Safaricom API

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use farmconnect_backend::error::AppError;
use farmconnect_backend::payments::error::PaymentError;
use farmconnect_backend::payments::provider::PaymentGateway;
use farmconnect_backend::payments::providers::mpesa::{MpesaConfig, MpesaProvider};
use farmconnect_backend::payments::types::{AccountReference, PhoneNumber, StkPushRequest};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
struct Daraja {
    token_calls: Arc<AtomicUsize>,
    pushes: Arc<Mutex<Vec<(Option<String>, Value)>>>,
    stk_delay: Option<Duration>,
    stk_status: Option<StatusCode>,
}

async fn token(State(daraja): State<Daraja>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    let expected = format!("Basic {}", STANDARD.encode("key:secret"));
    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some(expected.as_str()) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "errorMessage": "Invalid credentials" })));
    }
    let n = daraja.token_calls.fetch_add(1, Ordering::SeqCst) + 1;
    (
        StatusCode::OK,
        Json(json!({ "access_token": format!("token-{}", n), "expires_in": "3599" })),
    )
}

async fn stk_push(
    State(daraja): State<Daraja>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if let Some(delay) = daraja.stk_delay {
        tokio::time::sleep(delay).await;
    }
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    daraja.pushes.lock().unwrap().push((auth, body));

    if let Some(status) = daraja.stk_status {
        return (status, Json(json!({ "errorMessage": "System is busy" })));
    }
    (
        StatusCode::OK,
        Json(json!({
            "MerchantRequestID": "29115-34620561-1",
            "CheckoutRequestID": "ws_CO_191220191020363925",
            "ResponseCode": "0",
            "ResponseDescription": "Success. Request accepted for processing",
            "CustomerMessage": "Success. Request accepted for processing"
        })),
    )
}

async fn spawn_daraja(daraja: Daraja) -> String {
    let app = Router::new()
        .route("/oauth/v1/generate", get(token))
        .route("/mpesa/stkpush/v1/processrequest", post(stk_push))
        .with_state(daraja);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn config(base_url: String, timeout_secs: u64) -> MpesaConfig {
    MpesaConfig {
        consumer_key: "key".to_string(),
        consumer_secret: "secret".to_string(),
        shortcode: "174379".to_string(),
        passkey: "passkey".to_string(),
        callback_url: "https://farmconnect.example/api/payments/callback".to_string(),
        base_url,
        timeout_secs,
        transaction_type: "CustomerPayBillOnline".to_string(),
        account_prefix: "FarmConnect".to_string(),
    }
}

fn push_request(order_id: i32) -> StkPushRequest {
    StkPushRequest {
        amount: 500,
        phone: PhoneNumber::normalize("0712345678").unwrap(),
        account_reference: AccountReference::new("FarmConnect", order_id),
        callback_url: "https://farmconnect.example/api/payments/callback".to_string(),
        description: "Payment for produce".to_string(),
    }
}

#[tokio::test]
async fn stk_push_sends_daraja_payload_and_reuses_token() {
    let daraja = Daraja::default();
    let base_url = spawn_daraja(daraja.clone()).await;
    let provider = MpesaProvider::new(config(base_url, 5)).unwrap();

    let first = provider.initiate_payment(push_request(7)).await.unwrap();
    let second = provider.initiate_payment(push_request(8)).await.unwrap();

    assert!(first.is_accepted());
    assert_eq!(
        first.checkout_request_id.as_deref(),
        Some("ws_CO_191220191020363925")
    );
    assert_eq!(second.raw["ResponseCode"], "0");
    assert_eq!(daraja.token_calls.load(Ordering::SeqCst), 1);

    let pushes = daraja.pushes.lock().unwrap();
    assert_eq!(pushes.len(), 2);
    let (auth, body) = &pushes[0];
    assert_eq!(auth.as_deref(), Some("Bearer token-1"));
    assert_eq!(body["BusinessShortCode"], "174379");
    assert_eq!(body["Amount"], 500);
    assert_eq!(body["PartyA"], "254712345678");
    assert_eq!(body["PhoneNumber"], "254712345678");
    assert_eq!(body["AccountReference"], "FarmConnect-7");
    assert_eq!(body["TransactionType"], "CustomerPayBillOnline");

    let timestamp = body["Timestamp"].as_str().unwrap();
    assert_eq!(timestamp.len(), 14);
    let password = STANDARD
        .decode(body["Password"].as_str().unwrap())
        .unwrap();
    assert_eq!(
        String::from_utf8(password).unwrap(),
        format!("174379passkey{}", timestamp)
    );
}

#[tokio::test]
async fn bad_credentials_fail_without_pushing() {
    let daraja = Daraja::default();
    let base_url = spawn_daraja(daraja.clone()).await;
    let mut bad = config(base_url, 5);
    bad.consumer_secret = "wrong".to_string();
    let provider = MpesaProvider::new(bad).unwrap();

    let err = provider.initiate_payment(push_request(1)).await.unwrap_err();

    assert!(matches!(err, PaymentError::ProviderError { retryable: false, .. }));
    assert!(daraja.pushes.lock().unwrap().is_empty());
    assert_eq!(AppError::from(err).status_code(), 502);
}

#[tokio::test]
async fn gateway_server_errors_are_retryable() {
    let daraja = Daraja {
        stk_status: Some(StatusCode::SERVICE_UNAVAILABLE),
        ..Default::default()
    };
    let base_url = spawn_daraja(daraja).await;
    let provider = MpesaProvider::new(config(base_url, 5)).unwrap();

    let err = provider.initiate_payment(push_request(1)).await.unwrap_err();

    assert!(err.is_retryable());
    let app_err = AppError::from(err);
    assert_eq!(app_err.status_code(), 502);
    assert_eq!(app_err.user_message(), "Payment initiation failed");
}

#[tokio::test]
async fn slow_gateway_times_out() {
    let daraja = Daraja {
        stk_delay: Some(Duration::from_secs(3)),
        ..Default::default()
    };
    let base_url = spawn_daraja(daraja).await;
    let provider = MpesaProvider::new(config(base_url, 1)).unwrap();

    let err = provider.initiate_payment(push_request(1)).await.unwrap_err();

    assert!(matches!(err, PaymentError::Timeout { .. }), "got {:?}", err);
    assert_eq!(AppError::from(err).status_code(), 504);
}
