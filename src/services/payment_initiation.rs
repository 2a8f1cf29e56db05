//! STK push initiation for a buyer's pending order

use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::database::order_repository::OrderStatus;
use crate::database::repository::{CorrelationStore, OrderStore};
use crate::error::{AppError, AppErrorKind, AppResult, DomainError, ValidationError};
use crate::logging::mask_phone_number;
use crate::payments::provider::PaymentGateway;
use crate::payments::providers::mpesa::MpesaConfig;
use crate::payments::types::{AccountReference, PhoneNumber, StkPushRequest};
use crate::services::ledger::to_whole_units;

const TRANSACTION_DESCRIPTION: &str = "Payment for produce";

/// Values placed on every payment prompt
#[derive(Debug, Clone)]
pub struct InitiationSettings {
    pub account_prefix: String,
    pub callback_url: String,
    pub description: String,
}

impl InitiationSettings {
    pub fn from_mpesa(config: &MpesaConfig) -> Self {
        Self {
            account_prefix: config.account_prefix.clone(),
            callback_url: config.callback_url.clone(),
            description: TRANSACTION_DESCRIPTION.to_string(),
        }
    }
}

pub struct PaymentInitiationService {
    orders: Arc<dyn OrderStore>,
    correlations: Arc<dyn CorrelationStore>,
    gateway: Arc<dyn PaymentGateway>,
    settings: InitiationSettings,
}

impl PaymentInitiationService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        correlations: Arc<dyn CorrelationStore>,
        gateway: Arc<dyn PaymentGateway>,
        settings: InitiationSettings,
    ) -> Self {
        Self {
            orders,
            correlations,
            gateway,
            settings,
        }
    }

    /// Prompt the buyer's phone to pay for their order.
    ///
    /// Returns the gateway's response body unchanged. When it carries a
    /// checkout id, the id is recorded so the later callback can be tied
    /// back to the order.
    pub async fn initiate(
        &self,
        order_id: i32,
        buyer_id: i32,
        phone_number: &str,
    ) -> AppResult<JsonValue> {
        let phone = PhoneNumber::normalize(phone_number).map_err(AppError::validation)?;

        // Ownership and existence failures look the same to the caller
        let order = self
            .orders
            .find_order(order_id)
            .await?
            .filter(|order| order.buyer_id == buyer_id)
            .ok_or_else(|| AppError::order_not_found(order_id))?;

        if order.status != OrderStatus::Pending {
            return Err(AppError::new(AppErrorKind::Domain(
                DomainError::InvalidStatusTransition {
                    from: order.status.to_string(),
                    to: OrderStatus::Paid.to_string(),
                },
            )));
        }

        let amount = to_whole_units(order.total_price)
            .filter(|amount| *amount > 0)
            .ok_or_else(|| {
                AppError::validation(ValidationError::InvalidAmount {
                    amount: order.total_price.to_string(),
                    reason: "order total rounds to less than one shilling".to_string(),
                })
            })?;

        let account_reference = AccountReference::new(&self.settings.account_prefix, order_id);
        let request = StkPushRequest {
            amount,
            phone: phone.clone(),
            account_reference: account_reference.clone(),
            callback_url: self.settings.callback_url.clone(),
            description: self.settings.description.clone(),
        };

        let response = self.gateway.initiate_payment(request).await.map_err(|e| {
            error!(
                order_id = order_id,
                gateway = self.gateway.name(),
                error = %e,
                retryable = e.is_retryable(),
                "payment initiation failed"
            );
            AppError::from(e)
        })?;

        match response.checkout_request_id.as_deref() {
            Some(checkout_request_id) => {
                self.correlations
                    .record(checkout_request_id, &account_reference)
                    .await
                    .map_err(|e| {
                        error!(
                            order_id = order_id,
                            checkout_request_id = checkout_request_id,
                            error = %e,
                            "failed to record payment correlation"
                        );
                        AppError::from(e)
                    })?;
                info!(
                    order_id = order_id,
                    checkout_request_id = checkout_request_id,
                    amount = amount,
                    phone = %mask_phone_number(phone.as_str()),
                    "STK push accepted"
                );
            }
            None => {
                warn!(
                    order_id = order_id,
                    response_code = ?response.response_code,
                    description = ?response.response_description,
                    "gateway response carried no checkout id"
                );
            }
        }

        Ok(response.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryStore;
    use crate::error::ErrorCode;
    use crate::payments::error::{PaymentError, PaymentResult};
    use crate::payments::types::StkPushResponse;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::str::FromStr;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingGateway {
        requests: Mutex<Vec<StkPushRequest>>,
        fail_with: Option<PaymentError>,
    }

    #[async_trait]
    impl PaymentGateway for RecordingGateway {
        async fn initiate_payment(
            &self,
            request: StkPushRequest,
        ) -> PaymentResult<StkPushResponse> {
            let checkout = format!("ws_CO_{}", request.account_reference);
            self.requests.lock().unwrap().push(request);
            if let Some(err) = &self.fail_with {
                return Err(err.clone());
            }
            Ok(StkPushResponse::from_raw(json!({
                "CheckoutRequestID": checkout,
                "ResponseCode": "0",
                "ResponseDescription": "Success. Request accepted for processing"
            })))
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn settings() -> InitiationSettings {
        InitiationSettings {
            account_prefix: "FarmConnect".to_string(),
            callback_url: "https://farmconnect.example/api/payments/callback".to_string(),
            description: TRANSACTION_DESCRIPTION.to_string(),
        }
    }

    fn service(
        store: &Arc<MemoryStore>,
        gateway: Arc<RecordingGateway>,
    ) -> PaymentInitiationService {
        PaymentInitiationService::new(store.clone(), store.clone(), gateway, settings())
    }

    #[tokio::test]
    async fn rounds_amount_and_records_correlation() {
        let store = Arc::new(MemoryStore::new());
        let farmer = store.add_user("farmer");
        let buyer = store.add_user("buyer");
        let produce = store.add_produce(farmer, "Honey", Decimal::from_str("249.75").unwrap());
        let order = store.add_order(&produce, buyer, 2, OrderStatus::Pending);
        let gateway = Arc::new(RecordingGateway::default());

        let raw = service(&store, gateway.clone())
            .initiate(order.order_id, buyer, "0712345678")
            .await
            .unwrap();

        let expected_reference = format!("FarmConnect-{}", order.order_id);
        assert_eq!(raw["ResponseCode"], "0");
        let requests = gateway.requests.lock().unwrap();
        assert_eq!(requests[0].amount, 500);
        assert_eq!(requests[0].phone.as_str(), "254712345678");
        assert_eq!(requests[0].account_reference.as_str(), expected_reference);

        let correlation = store
            .resolve(&format!("ws_CO_{}", expected_reference))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(correlation.account_reference, expected_reference);
    }

    #[tokio::test]
    async fn other_buyers_orders_are_not_found() {
        let store = Arc::new(MemoryStore::new());
        let farmer = store.add_user("farmer");
        let buyer = store.add_user("buyer");
        let intruder = store.add_user("intruder");
        let produce = store.add_produce(farmer, "Honey", Decimal::from(500));
        let order = store.add_order(&produce, buyer, 1, OrderStatus::Pending);
        let gateway = Arc::new(RecordingGateway::default());

        let err = service(&store, gateway.clone())
            .initiate(order.order_id, intruder, "0712345678")
            .await
            .unwrap_err();

        assert_eq!(err.error_code(), ErrorCode::OrderNotFound);
        assert!(gateway.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn gateway_failure_is_generic_and_records_nothing() {
        let store = Arc::new(MemoryStore::new());
        let farmer = store.add_user("farmer");
        let buyer = store.add_user("buyer");
        let produce = store.add_produce(farmer, "Honey", Decimal::from(500));
        let order = store.add_order(&produce, buyer, 1, OrderStatus::Pending);
        let gateway = Arc::new(RecordingGateway {
            fail_with: Some(PaymentError::ProviderError {
                provider: "mpesa".to_string(),
                message: "HTTP 401: invalid credentials".to_string(),
                provider_code: Some("401".to_string()),
                retryable: false,
            }),
            ..Default::default()
        });

        let err = service(&store, gateway)
            .initiate(order.order_id, buyer, "0712345678")
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), 502);
        assert_eq!(err.user_message(), "Payment initiation failed");
        assert_eq!(store.correlation_count(), 0);
    }

    #[tokio::test]
    async fn bad_phone_is_rejected_before_calling_gateway() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(RecordingGateway::default());
        let err = service(&store, gateway.clone())
            .initiate(1, 1, "12345")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::InvalidPhoneNumber);
        assert!(gateway.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn paid_orders_are_not_charged_again() {
        let store = Arc::new(MemoryStore::new());
        let farmer = store.add_user("farmer");
        let buyer = store.add_user("buyer");
        let produce = store.add_produce(farmer, "Honey", Decimal::from(500));
        let order = store.add_order(&produce, buyer, 1, OrderStatus::Paid);
        let gateway = Arc::new(RecordingGateway::default());

        let err = service(&store, gateway.clone())
            .initiate(order.order_id, buyer, "0712345678")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 409);
        assert!(gateway.requests.lock().unwrap().is_empty());
    }
}
