//! Safaricom Daraja STK push client

use crate::logging::mask_phone_number;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{StkPushRequest, StkPushResponse};
use crate::payments::utils::{GatewayAuth, PaymentHttpClient};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Method;
use serde_json::{json, Value as JsonValue};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

const SANDBOX_BASE_URL: &str = "https://sandbox.safaricom.co.ke";
const TOKEN_PATH: &str = "/oauth/v1/generate?grant_type=client_credentials";
const STK_PUSH_PATH: &str = "/mpesa/stkpush/v1/processrequest";
/// Refresh the cached token this long before the gateway expires it
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
/// Daraja timestamps are East Africa Time
const EAT_OFFSET_HOURS: i64 = 3;

#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    pub callback_url: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub transaction_type: String,
    pub account_prefix: String,
}

impl MpesaConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let required = |name: &str| -> PaymentResult<String> {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| PaymentError::ValidationError {
                    message: format!("{} is required", name),
                    field: Some(name.to_string()),
                })
        };

        let timeout_secs = match std::env::var("MPESA_TIMEOUT_SECS") {
            Ok(raw) => raw.trim().parse::<u64>().ok().filter(|secs| *secs > 0).ok_or_else(|| {
                PaymentError::ValidationError {
                    message: "MPESA_TIMEOUT_SECS must be a positive integer".to_string(),
                    field: Some("MPESA_TIMEOUT_SECS".to_string()),
                }
            })?,
            Err(_) => 30,
        };

        Ok(Self {
            consumer_key: required("MPESA_CONSUMER_KEY")?,
            consumer_secret: required("MPESA_CONSUMER_SECRET")?,
            shortcode: required("MPESA_SHORTCODE")?,
            passkey: required("MPESA_PASSKEY")?,
            callback_url: required("MPESA_CALLBACK_URL")?,
            base_url: std::env::var("MPESA_BASE_URL")
                .unwrap_or_else(|_| SANDBOX_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            timeout_secs,
            transaction_type: std::env::var("MPESA_TRANSACTION_TYPE")
                .unwrap_or_else(|_| "CustomerPayBillOnline".to_string()),
            account_prefix: std::env::var("MPESA_ACCOUNT_PREFIX")
                .unwrap_or_else(|_| "FarmConnect".to_string()),
        })
    }
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

pub struct MpesaProvider {
    config: MpesaConfig,
    http: PaymentHttpClient,
    token: RwLock<Option<CachedToken>>,
}

impl MpesaProvider {
    pub fn new(config: MpesaConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new("mpesa", Duration::from_secs(config.timeout_secs))?;
        Ok(Self {
            config,
            http,
            token: RwLock::new(None),
        })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(MpesaConfig::from_env()?)
    }

    pub fn config(&self) -> &MpesaConfig {
        &self.config
    }

    /// OAuth token, served from cache until shortly before it expires
    async fn access_token(&self) -> PaymentResult<String> {
        if let Some(cached) = self.token.read().await.as_ref() {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.value.clone());
            }
        }

        let mut slot = self.token.write().await;
        // Another task may have refreshed while we waited for the lock
        if let Some(cached) = slot.as_ref() {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.value.clone());
            }
        }

        let url = format!("{}{}", self.config.base_url, TOKEN_PATH);
        let body = self
            .http
            .request_json(
                Method::GET,
                &url,
                GatewayAuth::Basic {
                    username: &self.config.consumer_key,
                    password: &self.config.consumer_secret,
                },
                None,
                "oauth token",
            )
            .await?;

        let value = body
            .get("access_token")
            .and_then(JsonValue::as_str)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| PaymentError::ProviderError {
                provider: "mpesa".to_string(),
                message: "token response carried no access_token".to_string(),
                provider_code: None,
                retryable: false,
            })?
            .to_string();

        let lifetime = Duration::from_secs(parse_expires_in(body.get("expires_in")));
        *slot = Some(CachedToken {
            value: value.clone(),
            refresh_at: Instant::now() + lifetime.saturating_sub(TOKEN_REFRESH_MARGIN),
        });
        debug!(expires_in_secs = lifetime.as_secs(), "fetched M-Pesa access token");

        Ok(value)
    }
}

/// Daraja sends `expires_in` as a string. Missing or unreadable values count as expired.
fn parse_expires_in(value: Option<&JsonValue>) -> u64 {
    match value {
        Some(JsonValue::String(s)) => s.trim().parse().unwrap_or(0),
        Some(JsonValue::Number(n)) => n.as_u64().unwrap_or(0),
        _ => 0,
    }
}

/// `yyyyMMddHHmmss` in East Africa Time
pub fn stk_timestamp(now: DateTime<Utc>) -> String {
    (now.naive_utc() + ChronoDuration::hours(EAT_OFFSET_HOURS))
        .format("%Y%m%d%H%M%S")
        .to_string()
}

pub fn stk_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    STANDARD.encode(format!("{}{}{}", shortcode, passkey, timestamp))
}

#[async_trait]
impl PaymentGateway for MpesaProvider {
    async fn initiate_payment(&self, request: StkPushRequest) -> PaymentResult<StkPushResponse> {
        let token = self.access_token().await?;

        let timestamp = stk_timestamp(Utc::now());
        let payload = json!({
            "BusinessShortCode": self.config.shortcode,
            "Password": stk_password(&self.config.shortcode, &self.config.passkey, &timestamp),
            "Timestamp": timestamp,
            "TransactionType": self.config.transaction_type,
            "Amount": request.amount,
            "PartyA": request.phone.as_str(),
            "PartyB": self.config.shortcode,
            "PhoneNumber": request.phone.as_str(),
            "CallBackURL": request.callback_url,
            "AccountReference": request.account_reference.as_str(),
            "TransactionDesc": request.description,
        });

        info!(
            account_reference = %request.account_reference,
            amount = request.amount,
            phone = %mask_phone_number(request.phone.as_str()),
            "submitting STK push"
        );

        let url = format!("{}{}", self.config.base_url, STK_PUSH_PATH);
        let raw = self
            .http
            .request_json(
                Method::POST,
                &url,
                GatewayAuth::Bearer(&token),
                Some(&payload),
                "stk push",
            )
            .await?;

        Ok(StkPushResponse::from_raw(raw))
    }

    fn name(&self) -> &'static str {
        "mpesa"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamp_is_east_africa_time() {
        let now = Utc.with_ymd_and_hms(2024, 12, 31, 22, 30, 5).unwrap();
        assert_eq!(stk_timestamp(now), "20250101013005");
    }

    #[test]
    fn password_is_base64_of_shortcode_passkey_timestamp() {
        let password = stk_password("174379", "passkey", "20240101120000");
        let decoded = STANDARD.decode(password).unwrap();
        assert_eq!(decoded, b"174379passkey20240101120000");
    }

    #[test]
    fn expires_in_accepts_strings_and_numbers() {
        assert_eq!(parse_expires_in(Some(&json!("3599"))), 3599);
        assert_eq!(parse_expires_in(Some(&json!(3599))), 3599);
        assert_eq!(parse_expires_in(Some(&json!("soon"))), 0);
        assert_eq!(parse_expires_in(None), 0);
    }
}
