use crate::payments::error::PaymentResult;
use crate::payments::types::{StkPushRequest, StkPushResponse};
use async_trait::async_trait;

/// Mobile-money gateway able to prompt a payer's phone for payment
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate_payment(&self, request: StkPushRequest) -> PaymentResult<StkPushResponse>;

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::{AccountReference, PhoneNumber};
    use serde_json::json;

    struct EchoGateway;

    #[async_trait]
    impl PaymentGateway for EchoGateway {
        async fn initiate_payment(
            &self,
            request: StkPushRequest,
        ) -> PaymentResult<StkPushResponse> {
            Ok(StkPushResponse::from_raw(json!({
                "CheckoutRequestID": format!("ws_CO_{}", request.account_reference),
                "ResponseCode": "0",
            })))
        }

        fn name(&self) -> &'static str {
            "echo"
        }
    }

    #[tokio::test]
    async fn trait_can_be_implemented_by_mock_gateway() {
        let gateway: Box<dyn PaymentGateway> = Box::new(EchoGateway);
        let response = gateway
            .initiate_payment(StkPushRequest {
                amount: 500,
                phone: PhoneNumber::normalize("0712345678").unwrap(),
                account_reference: AccountReference::new("FarmConnect", 9),
                callback_url: "https://example.com/callback".to_string(),
                description: "Payment for produce".to_string(),
            })
            .await
            .expect("payment initiation should succeed");

        assert_eq!(
            response.checkout_request_id.as_deref(),
            Some("ws_CO_FarmConnect-9")
        );
        assert_eq!(gateway.name(), "echo");
    }
}
