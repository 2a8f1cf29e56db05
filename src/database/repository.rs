//! Storage seams for the payment and settlement core.
//!
//! Each trait has a Postgres implementation in its `*_repository` module and
//! an in-process one in [`crate::database::memory::MemoryStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use crate::database::callback_log_repository::{CallbackRecord, NewCallbackRecord};
use crate::database::error::DbResult;
use crate::database::mpesa_request_repository::{PaymentCorrelation, Settlement};
use crate::database::order_repository::{NewOrder, Order, OrderStatus, Produce};
use crate::database::payout_repository::{Payout, PayoutDecision, PendingPayout};
use crate::database::refund_repository::{
    BuyerRefundRequest, PendingRefundRequest, RefundFiling, RefundRequest, RefundStatus,
};
use crate::payments::types::AccountReference;
use crate::services::ledger::{FeePolicy, LedgerTotals};

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_produce(&self, produce_id: i32) -> DbResult<Option<Produce>>;

    async fn create_order(&self, order: NewOrder) -> DbResult<Order>;

    async fn find_order(&self, order_id: i32) -> DbResult<Option<Order>>;

    /// Compare-and-set on the order status. Returns `None` when the order is
    /// missing or its current status is not `from`.
    async fn transition_status(
        &self,
        order_id: i32,
        from: OrderStatus,
        to: OrderStatus,
    ) -> DbResult<Option<Order>>;

    /// Set the delivery address of a pending order owned by `buyer_id`
    async fn confirm_location(
        &self,
        order_id: i32,
        buyer_id: i32,
        address: &str,
    ) -> DbResult<Option<Order>>;

    /// Delete an order still in `expected` status, together with its refund
    /// requests. Returns whether a row was removed.
    async fn delete_order(&self, order_id: i32, expected: OrderStatus) -> DbResult<bool>;
}

#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Insert a checkout id to account reference mapping. A repeated
    /// checkout id is a unique violation.
    async fn record(&self, checkout_request_id: &str, reference: &AccountReference)
        -> DbResult<()>;

    async fn resolve(&self, checkout_request_id: &str) -> DbResult<Option<PaymentCorrelation>>;

    /// Atomically resolve and consume the correlation, then move the order
    /// from `pending` to `paid` with the receipt. Orders in any other status
    /// are left untouched. A `settled` audit row carrying `payload` is
    /// written in the same unit of work when the order is paid.
    async fn settle(
        &self,
        checkout_request_id: &str,
        receipt: Option<&str>,
        payload: &JsonValue,
    ) -> DbResult<Settlement>;

    /// Remove correlations created before `cutoff`. Returns the number removed.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> DbResult<u64>;
}

#[async_trait]
pub trait PayoutStore: Send + Sync {
    async fn ledger_totals(&self, farmer_id: i32) -> DbResult<LedgerTotals>;

    /// Save the contact phone, then check `amount` against the withdrawable
    /// balance and insert a pending payout, all under one per-farmer lock.
    async fn request_payout(
        &self,
        farmer_id: i32,
        amount: Decimal,
        phone_number: &str,
        fees: &FeePolicy,
    ) -> DbResult<PayoutDecision>;

    /// Newest first
    async fn payout_history(&self, farmer_id: i32) -> DbResult<Vec<Payout>>;

    /// Oldest first, with the farmer's name and phone
    async fn pending_payouts(&self) -> DbResult<Vec<PendingPayout>>;

    /// `pending -> completed`. `None` when no pending payout has this id.
    async fn complete_payout(&self, payout_id: i32) -> DbResult<Option<Payout>>;
}

#[async_trait]
pub trait RefundStore: Send + Sync {
    async fn file_refund(&self, order_id: i32, buyer_id: i32, reason: &str)
        -> DbResult<RefundFiling>;

    /// Newest first
    async fn refunds_for_buyer(&self, buyer_id: i32) -> DbResult<Vec<BuyerRefundRequest>>;

    /// Oldest first
    async fn pending_refunds(&self) -> DbResult<Vec<PendingRefundRequest>>;

    /// `pending -> approved | rejected`. `None` when no pending request has this id.
    async fn resolve_refund(
        &self,
        request_id: i32,
        outcome: RefundStatus,
    ) -> DbResult<Option<RefundRequest>>;
}

#[async_trait]
pub trait CallbackLog: Send + Sync {
    async fn record_callback(&self, record: NewCallbackRecord) -> DbResult<CallbackRecord>;

    /// Whether a callback for this checkout id was already settled
    async fn was_settled(&self, checkout_request_id: &str) -> DbResult<bool>;

    /// Callbacks that could not be tied to an order, newest first
    async fn unresolved(&self, limit: i64) -> DbResult<Vec<CallbackRecord>>;
}
