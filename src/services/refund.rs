use std::sync::Arc;
use tracing::info;

use crate::database::refund_repository::{
    BuyerRefundRequest, PendingRefundRequest, RefundFiling, RefundRequest, RefundStatus,
};
use crate::database::repository::RefundStore;
use crate::error::{AppError, AppErrorKind, AppResult, DomainError, ValidationError};

pub struct RefundService {
    store: Arc<dyn RefundStore>,
}

impl RefundService {
    pub fn new(store: Arc<dyn RefundStore>) -> Self {
        Self { store }
    }

    /// One request per paid or delivered order, filed by its buyer
    pub async fn request_refund(
        &self,
        order_id: i32,
        buyer_id: i32,
        reason: &str,
    ) -> AppResult<RefundRequest> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::validation(ValidationError::MissingField {
                field: "reason".to_string(),
            }));
        }

        match self.store.file_refund(order_id, buyer_id, reason).await? {
            RefundFiling::Created(request) => {
                info!(
                    request_id = request.request_id,
                    order_id = order_id,
                    buyer_id = buyer_id,
                    "refund requested"
                );
                Ok(request)
            }
            RefundFiling::NoEligibleOrder => Err(AppError::new(AppErrorKind::Domain(
                DomainError::NoRefundableOrder {
                    order_id: order_id.to_string(),
                },
            ))),
            RefundFiling::AlreadyRequested => Err(AppError::new(AppErrorKind::Domain(
                DomainError::DuplicateRefundRequest {
                    order_id: order_id.to_string(),
                },
            ))),
        }
    }

    pub async fn my_requests(&self, buyer_id: i32) -> AppResult<Vec<BuyerRefundRequest>> {
        Ok(self.store.refunds_for_buyer(buyer_id).await?)
    }

    pub async fn pending_refunds(&self) -> AppResult<Vec<PendingRefundRequest>> {
        Ok(self.store.pending_refunds().await?)
    }

    /// Approve or reject a pending request. `status` is the raw admin input.
    pub async fn process_refund(&self, request_id: i32, status: &str) -> AppResult<RefundRequest> {
        let outcome = status
            .trim()
            .parse::<RefundStatus>()
            .ok()
            .filter(RefundStatus::is_resolution)
            .ok_or_else(|| {
                AppError::validation(ValidationError::InvalidStatus {
                    status: status.to_string(),
                })
            })?;

        let request = self
            .store
            .resolve_refund(request_id, outcome)
            .await?
            .ok_or_else(|| {
                AppError::new(AppErrorKind::Domain(DomainError::RefundNotFound {
                    request_id: request_id.to_string(),
                }))
            })?;

        info!(
            request_id = request_id,
            order_id = request.order_id,
            status = outcome.as_str(),
            "refund request processed"
        );
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryStore;
    use crate::database::order_repository::OrderStatus;
    use crate::error::ErrorCode;
    use rust_decimal::Decimal;

    fn setup() -> (Arc<MemoryStore>, RefundService, i32) {
        let store = Arc::new(MemoryStore::new());
        let service = RefundService::new(store.clone());
        let buyer = store.add_user("njeri");
        (store, service, buyer)
    }

    #[tokio::test]
    async fn only_paid_or_delivered_orders_are_refundable() {
        let (store, service, buyer) = setup();
        let farmer = store.add_user("mwangi");
        let produce = store.add_produce(farmer, "Beans", Decimal::from(120));
        let pending = store.add_order(&produce, buyer, 1, OrderStatus::Pending);
        let delivered = store.add_order(&produce, buyer, 1, OrderStatus::Delivered);

        let err = service
            .request_refund(pending.order_id, buyer, "never arrived")
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "A valid, paid-for order was not found.");

        let request = service
            .request_refund(delivered.order_id, buyer, "spoiled")
            .await
            .unwrap();
        assert_eq!(request.status, RefundStatus::Pending);

        let mine = service.my_requests(buyer).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].produce_name, "Beans");
    }

    #[tokio::test]
    async fn second_request_for_an_order_conflicts() {
        let (store, service, buyer) = setup();
        let farmer = store.add_user("mwangi");
        let produce = store.add_produce(farmer, "Beans", Decimal::from(120));
        let paid = store.add_order(&produce, buyer, 1, OrderStatus::Paid);

        service.request_refund(paid.order_id, buyer, "late").await.unwrap();
        let err = service
            .request_refund(paid.order_id, buyer, "still late")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::DuplicateRefundRequest);
        assert_eq!(err.status_code(), 409);
    }

    #[tokio::test]
    async fn processing_accepts_only_final_statuses() {
        let (store, service, buyer) = setup();
        let farmer = store.add_user("mwangi");
        let produce = store.add_produce(farmer, "Beans", Decimal::from(120));
        let paid = store.add_order(&produce, buyer, 1, OrderStatus::Paid);
        let request = service.request_refund(paid.order_id, buyer, "late").await.unwrap();

        let err = service
            .process_refund(request.request_id, "pending")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);

        let approved = service
            .process_refund(request.request_id, "approved")
            .await
            .unwrap();
        assert_eq!(approved.status, RefundStatus::Approved);
        assert!(approved.processed_at.is_some());

        let err = service
            .process_refund(request.request_id, "rejected")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::RefundNotFound);
    }
}
