//! Order lifecycle: creation, delivery details and status changes.
//!
//! `pending -> paid` is never driven from here. Only the payment callback
//! settles an order, through the correlation store.

use std::sync::Arc;
use tracing::info;

use crate::database::order_repository::{NewOrder, Order, OrderStatus};
use crate::database::repository::OrderStore;
use crate::error::{AppError, AppErrorKind, AppResult, DomainError, ValidationError};
use rust_decimal::Decimal;

/// Result of a farmer-driven status change
#[derive(Debug, Clone, PartialEq)]
pub enum StatusChange {
    Updated(Order),
    /// Cancelled orders are removed together with their refund requests
    Removed { order_id: i32 },
}

pub struct OrderLifecycle {
    store: Arc<dyn OrderStore>,
}

impl OrderLifecycle {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    pub async fn create_order(
        &self,
        buyer_id: i32,
        produce_id: i32,
        quantity: i32,
    ) -> AppResult<Order> {
        if quantity <= 0 {
            return Err(AppError::validation(ValidationError::OutOfRange {
                field: "quantity".to_string(),
                min: Some("1".to_string()),
                max: None,
            }));
        }

        let produce = self.store.find_produce(produce_id).await?.ok_or_else(|| {
            AppError::new(AppErrorKind::Domain(DomainError::ProduceNotFound {
                produce_id: produce_id.to_string(),
            }))
        })?;

        let order = self
            .store
            .create_order(NewOrder {
                buyer_id,
                farmer_id: produce.farmer_id,
                produce_id,
                quantity_ordered: quantity,
                total_price: produce.price * Decimal::from(quantity),
            })
            .await?;

        info!(
            order_id = order.order_id,
            buyer_id = buyer_id,
            farmer_id = order.farmer_id,
            total_price = %order.total_price,
            "order created"
        );
        Ok(order)
    }

    /// Order visible to its buyer or farmer. Anyone else gets the same
    /// not-found error as for a missing order.
    pub async fn get_order(&self, order_id: i32, caller_id: i32) -> AppResult<Order> {
        self.store
            .find_order(order_id)
            .await?
            .filter(|order| order.is_participant(caller_id))
            .ok_or_else(|| AppError::order_not_found(order_id))
    }

    pub async fn order_for_buyer(&self, order_id: i32, buyer_id: i32) -> AppResult<Order> {
        self.store
            .find_order(order_id)
            .await?
            .filter(|order| order.buyer_id == buyer_id)
            .ok_or_else(|| AppError::order_not_found(order_id))
    }

    async fn order_for_farmer(&self, order_id: i32, farmer_id: i32) -> AppResult<Order> {
        self.store
            .find_order(order_id)
            .await?
            .filter(|order| order.farmer_id == farmer_id)
            .ok_or_else(|| AppError::order_not_found(order_id))
    }

    pub async fn confirm_location(
        &self,
        order_id: i32,
        buyer_id: i32,
        address: &str,
    ) -> AppResult<Order> {
        let address = address.trim();
        if address.is_empty() {
            return Err(AppError::validation(ValidationError::MissingField {
                field: "address".to_string(),
            }));
        }

        self.store
            .confirm_location(order_id, buyer_id, address)
            .await?
            .ok_or_else(|| AppError::order_not_found(order_id))
    }

    /// Farmer-driven transition: `paid -> delivered` or `pending -> cancelled`
    pub async fn set_status(
        &self,
        order_id: i32,
        farmer_id: i32,
        to: OrderStatus,
    ) -> AppResult<StatusChange> {
        let order = self.order_for_farmer(order_id, farmer_id).await?;

        if to == OrderStatus::Paid || !order.status.can_transition_to(to) {
            return Err(invalid_transition(order.status, to));
        }

        if to == OrderStatus::Cancelled {
            if !self.store.delete_order(order_id, order.status).await? {
                return Err(self.conflict_from_current(order_id, to).await);
            }
            info!(order_id = order_id, farmer_id = farmer_id, "order cancelled by farmer");
            return Ok(StatusChange::Removed { order_id });
        }

        match self.store.transition_status(order_id, order.status, to).await? {
            Some(updated) => {
                info!(
                    order_id = order_id,
                    from = %order.status,
                    to = %to,
                    "order status changed"
                );
                Ok(StatusChange::Updated(updated))
            }
            None => Err(self.conflict_from_current(order_id, to).await),
        }
    }

    /// Buyer withdraws a pending order
    pub async fn cancel_order(&self, order_id: i32, buyer_id: i32) -> AppResult<()> {
        let order = self.order_for_buyer(order_id, buyer_id).await?;
        if order.status != OrderStatus::Pending {
            return Err(invalid_transition(order.status, OrderStatus::Cancelled));
        }

        if !self.store.delete_order(order_id, OrderStatus::Pending).await? {
            return Err(self
                .conflict_from_current(order_id, OrderStatus::Cancelled)
                .await);
        }

        info!(order_id = order_id, buyer_id = buyer_id, "order cancelled by buyer");
        Ok(())
    }

    /// The order changed between our read and the conditional write
    async fn conflict_from_current(&self, order_id: i32, to: OrderStatus) -> AppError {
        match self.store.find_order(order_id).await {
            Ok(Some(current)) => invalid_transition(current.status, to),
            Ok(None) => AppError::order_not_found(order_id),
            Err(e) => e.into(),
        }
    }
}

fn invalid_transition(from: OrderStatus, to: OrderStatus) -> AppError {
    AppError::new(AppErrorKind::Domain(DomainError::InvalidStatusTransition {
        from: from.to_string(),
        to: to.to_string(),
    }))
}
