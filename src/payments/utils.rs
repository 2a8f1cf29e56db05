use crate::payments::error::{PaymentError, PaymentResult};
use reqwest::{Client, Method};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

/// Credentials attached to an outbound gateway call
#[derive(Debug, Clone, Copy)]
pub enum GatewayAuth<'a> {
    Basic { username: &'a str, password: &'a str },
    Bearer(&'a str),
}

/// JSON client for payment gateway calls.
///
/// Every call is bounded by the configured timeout and is attempted exactly
/// once. A payment prompt that reached the gateway must not be repeated
/// blindly, so retrying is left to the caller.
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    timeout: Duration,
    provider: &'static str,
}

impl PaymentHttpClient {
    pub fn new(provider: &'static str, timeout: Duration) -> PaymentResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self {
            client,
            timeout,
            provider,
        })
    }

    /// Send one request and decode the JSON body of a 2xx response.
    /// `operation` names the call in errors and logs.
    pub async fn request_json(
        &self,
        method: Method,
        url: &str,
        auth: GatewayAuth<'_>,
        body: Option<&JsonValue>,
        operation: &str,
    ) -> PaymentResult<JsonValue> {
        let mut request = self.client.request(method, url).timeout(self.timeout);
        request = match auth {
            GatewayAuth::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
            GatewayAuth::Bearer(token) => request.bearer_auth(token),
        };
        if let Some(payload) = body {
            request = request.json(payload);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.transport_error(e, operation))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.transport_error(e, operation))?;

        if status.as_u16() == 429 {
            return Err(PaymentError::RateLimitError {
                message: format!("{} rate limited by {}", operation, self.provider),
            });
        }

        if !status.is_success() {
            warn!(
                provider = self.provider,
                operation = operation,
                status = %status,
                "gateway returned an error status"
            );
            return Err(PaymentError::ProviderError {
                provider: self.provider.to_string(),
                message: format!("{}: HTTP {}: {}", operation, status, text),
                provider_code: Some(status.as_u16().to_string()),
                retryable: status.is_server_error(),
            });
        }

        serde_json::from_str::<JsonValue>(&text).map_err(|e| PaymentError::ProviderError {
            provider: self.provider.to_string(),
            message: format!("{}: invalid JSON response: {}", operation, e),
            provider_code: None,
            retryable: false,
        })
    }

    fn transport_error(&self, err: reqwest::Error, operation: &str) -> PaymentError {
        if err.is_timeout() {
            PaymentError::Timeout {
                operation: operation.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            PaymentError::NetworkError {
                message: format!("{} request failed: {}", operation, err),
            }
        }
    }
}
