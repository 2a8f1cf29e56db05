//! In-process implementation of every store trait.
//!
//! Backs the integration tests and local `SKIP_EXTERNALS=true` runs. It is
//! not a production store: nothing survives a restart, users and produce only
//! exist once seeded through [`MemoryStore::add_user`] and
//! [`MemoryStore::add_produce`], and the callback audit log keeps the newest
//! [`CALLBACK_LOG_CAPACITY`] entries.
//!
//! A single mutex guards all tables, so every trait method is atomic in the
//! same way the Postgres transactions are.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::database::callback_log_repository::{
    CallbackOutcome, CallbackRecord, NewCallbackRecord,
};
use crate::database::error::{DatabaseError, DatabaseErrorKind, DbResult};
use crate::database::mpesa_request_repository::{PaymentCorrelation, Settlement};
use crate::database::order_repository::{NewOrder, Order, OrderStatus, Produce};
use crate::database::payout_repository::{Payout, PayoutDecision, PayoutStatus, PendingPayout};
use crate::database::refund_repository::{
    BuyerRefundRequest, PendingRefundRequest, RefundFiling, RefundRequest, RefundStatus,
};
use crate::database::repository::{
    CallbackLog, CorrelationStore, OrderStore, PayoutStore, RefundStore,
};
use crate::payments::types::AccountReference;
use crate::services::ledger::{withdrawable_balance, FeePolicy, LedgerTotals};

/// Oldest audit entries are dropped past this many
pub const CALLBACK_LOG_CAPACITY: usize = 10_000;

#[derive(Debug, Clone)]
struct UserRow {
    username: String,
    phone_number: Option<String>,
}

#[derive(Default)]
struct Tables {
    users: BTreeMap<i32, UserRow>,
    produce: BTreeMap<i32, Produce>,
    orders: BTreeMap<i32, Order>,
    payouts: BTreeMap<i32, Payout>,
    correlations: HashMap<String, PaymentCorrelation>,
    refunds: BTreeMap<i32, RefundRequest>,
    callbacks: VecDeque<CallbackRecord>,
    last_id: i32,
}

impl Tables {
    fn next_id(&mut self) -> i32 {
        self.last_id += 1;
        self.last_id
    }

    fn push_callback(&mut self, record: NewCallbackRecord) -> CallbackRecord {
        let stored = CallbackRecord {
            callback_id: i64::from(self.next_id()),
            checkout_request_id: record.checkout_request_id,
            result_code: record.result_code,
            outcome: record.outcome,
            order_id: record.order_id,
            receipt: record.receipt,
            detail: record.detail,
            payload: record.payload,
            received_at: Utc::now(),
        };
        if self.callbacks.len() >= CALLBACK_LOG_CAPACITY {
            self.callbacks.pop_front();
        }
        self.callbacks.push_back(stored.clone());
        stored
    }

    fn ledger_totals(&self, farmer_id: i32) -> LedgerTotals {
        let delivered_revenue = self
            .orders
            .values()
            .filter(|o| o.farmer_id == farmer_id && o.status == OrderStatus::Delivered)
            .map(|o| o.total_price)
            .sum();
        let payouts_in = |status: PayoutStatus| -> Decimal {
            self.payouts
                .values()
                .filter(|p| p.farmer_id == farmer_id && p.status == status)
                .map(|p| p.amount)
                .sum()
        };
        LedgerTotals {
            delivered_revenue,
            completed_payouts: payouts_in(PayoutStatus::Completed),
            pending_payouts: payouts_in(PayoutStatus::Pending),
        }
    }

    fn username(&self, user_id: i32) -> String {
        self.users
            .get(&user_id)
            .map(|u| u.username.clone())
            .unwrap_or_default()
    }

    fn produce_name(&self, produce_id: i32) -> String {
        self.produce
            .get(&produce_id)
            .map(|p| p.name.clone())
            .unwrap_or_default()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_user(&self, username: &str) -> i32 {
        let mut t = self.lock();
        let user_id = t.next_id();
        t.users.insert(
            user_id,
            UserRow {
                username: username.to_string(),
                phone_number: None,
            },
        );
        user_id
    }

    pub fn add_produce(&self, farmer_id: i32, name: &str, price: Decimal) -> Produce {
        let mut t = self.lock();
        let produce = Produce {
            produce_id: t.next_id(),
            farmer_id,
            name: name.to_string(),
            price,
        };
        t.produce.insert(produce.produce_id, produce.clone());
        produce
    }

    /// Insert an order in an arbitrary status
    pub fn add_order(&self, produce: &Produce, buyer_id: i32, quantity: i32, status: OrderStatus) -> Order {
        let mut t = self.lock();
        let order = Order {
            order_id: t.next_id(),
            buyer_id,
            farmer_id: produce.farmer_id,
            produce_id: produce.produce_id,
            quantity_ordered: quantity,
            total_price: produce.price * Decimal::from(quantity),
            status,
            delivery_address: None,
            location_confirmed: false,
            mpesa_receipt: None,
            created_at: Utc::now(),
        };
        t.orders.insert(order.order_id, order.clone());
        order
    }

    /// Insert a payout in an arbitrary status, bypassing the balance check
    pub fn add_payout(&self, farmer_id: i32, amount: Decimal, status: PayoutStatus) -> Payout {
        let mut t = self.lock();
        let now = Utc::now();
        let payout = Payout {
            payout_id: t.next_id(),
            farmer_id,
            amount,
            status,
            requested_at: now,
            completed_at: (status == PayoutStatus::Completed).then_some(now),
        };
        t.payouts.insert(payout.payout_id, payout.clone());
        payout
    }

    pub fn add_correlation_at(
        &self,
        checkout_request_id: &str,
        account_reference: &str,
        created_at: DateTime<Utc>,
    ) {
        self.lock().correlations.insert(
            checkout_request_id.to_string(),
            PaymentCorrelation {
                checkout_request_id: checkout_request_id.to_string(),
                account_reference: account_reference.to_string(),
                created_at,
            },
        );
    }

    pub fn order(&self, order_id: i32) -> Option<Order> {
        self.lock().orders.get(&order_id).cloned()
    }

    pub fn phone_number(&self, user_id: i32) -> Option<String> {
        self.lock()
            .users
            .get(&user_id)
            .and_then(|u| u.phone_number.clone())
    }

    pub fn correlation_count(&self) -> usize {
        self.lock().correlations.len()
    }

    pub fn refund_count(&self) -> usize {
        self.lock().refunds.len()
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn find_produce(&self, produce_id: i32) -> DbResult<Option<Produce>> {
        Ok(self.lock().produce.get(&produce_id).cloned())
    }

    async fn create_order(&self, order: NewOrder) -> DbResult<Order> {
        let mut t = self.lock();
        if !t.produce.contains_key(&order.produce_id) {
            return Err(DatabaseError::new(DatabaseErrorKind::ForeignKeyViolation {
                constraint: "orders_produce_id_fkey".to_string(),
            }));
        }
        let created = Order {
            order_id: t.next_id(),
            buyer_id: order.buyer_id,
            farmer_id: order.farmer_id,
            produce_id: order.produce_id,
            quantity_ordered: order.quantity_ordered,
            total_price: order.total_price,
            status: OrderStatus::Pending,
            delivery_address: None,
            location_confirmed: false,
            mpesa_receipt: None,
            created_at: Utc::now(),
        };
        t.orders.insert(created.order_id, created.clone());
        Ok(created)
    }

    async fn find_order(&self, order_id: i32) -> DbResult<Option<Order>> {
        Ok(self.lock().orders.get(&order_id).cloned())
    }

    async fn transition_status(
        &self,
        order_id: i32,
        from: OrderStatus,
        to: OrderStatus,
    ) -> DbResult<Option<Order>> {
        let mut t = self.lock();
        Ok(t.orders
            .get_mut(&order_id)
            .filter(|o| o.status == from)
            .map(|o| {
                o.status = to;
                o.clone()
            }))
    }

    async fn confirm_location(
        &self,
        order_id: i32,
        buyer_id: i32,
        address: &str,
    ) -> DbResult<Option<Order>> {
        let mut t = self.lock();
        Ok(t.orders
            .get_mut(&order_id)
            .filter(|o| o.buyer_id == buyer_id && o.status == OrderStatus::Pending)
            .map(|o| {
                o.delivery_address = Some(address.to_string());
                o.location_confirmed = true;
                o.clone()
            }))
    }

    async fn delete_order(&self, order_id: i32, expected: OrderStatus) -> DbResult<bool> {
        let mut t = self.lock();
        let matches = t
            .orders
            .get(&order_id)
            .is_some_and(|o| o.status == expected);
        if !matches {
            return Ok(false);
        }
        t.refunds.retain(|_, r| r.order_id != order_id);
        t.orders.remove(&order_id);
        Ok(true)
    }
}

#[async_trait]
impl CorrelationStore for MemoryStore {
    async fn record(
        &self,
        checkout_request_id: &str,
        reference: &AccountReference,
    ) -> DbResult<()> {
        let mut t = self.lock();
        if t.correlations.contains_key(checkout_request_id) {
            return Err(DatabaseError::new(
                DatabaseErrorKind::UniqueConstraintViolation {
                    constraint: "mpesa_requests_pkey".to_string(),
                },
            ));
        }
        t.correlations.insert(
            checkout_request_id.to_string(),
            PaymentCorrelation {
                checkout_request_id: checkout_request_id.to_string(),
                account_reference: reference.as_str().to_string(),
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn resolve(&self, checkout_request_id: &str) -> DbResult<Option<PaymentCorrelation>> {
        Ok(self.lock().correlations.get(checkout_request_id).cloned())
    }

    async fn settle(
        &self,
        checkout_request_id: &str,
        receipt: Option<&str>,
        payload: &JsonValue,
    ) -> DbResult<Settlement> {
        let mut t = self.lock();
        let Some(correlation) = t.correlations.remove(checkout_request_id) else {
            return Ok(Settlement::CorrelationNotFound);
        };

        let Some(order_id) = AccountReference::parse_order_id(&correlation.account_reference)
        else {
            return Ok(Settlement::MalformedReference {
                account_reference: correlation.account_reference,
            });
        };

        let settlement = match t.orders.get_mut(&order_id) {
            None => Settlement::OrderMissing { order_id },
            Some(order) => match order.status {
                OrderStatus::Pending => {
                    order.status = OrderStatus::Paid;
                    order.mpesa_receipt = receipt.map(str::to_string);
                    Settlement::Paid(order.clone())
                }
                OrderStatus::Paid => Settlement::AlreadyPaid { order_id },
                status => Settlement::NotPending { order_id, status },
            },
        };

        if let Settlement::Paid(order) = &settlement {
            let record = NewCallbackRecord::settled(checkout_request_id, order, payload.clone());
            t.push_callback(record);
        }
        Ok(settlement)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let mut t = self.lock();
        let before = t.correlations.len();
        t.correlations.retain(|_, c| c.created_at >= cutoff);
        Ok((before - t.correlations.len()) as u64)
    }
}

#[async_trait]
impl PayoutStore for MemoryStore {
    async fn ledger_totals(&self, farmer_id: i32) -> DbResult<LedgerTotals> {
        Ok(self.lock().ledger_totals(farmer_id))
    }

    async fn request_payout(
        &self,
        farmer_id: i32,
        amount: Decimal,
        phone_number: &str,
        fees: &FeePolicy,
    ) -> DbResult<PayoutDecision> {
        let mut t = self.lock();
        let Some(user) = t.users.get_mut(&farmer_id) else {
            return Err(DatabaseError::new(DatabaseErrorKind::NotFound {
                entity: "Farmer".to_string(),
                id: farmer_id.to_string(),
            }));
        };
        user.phone_number = Some(phone_number.to_string());

        let available = withdrawable_balance(&t.ledger_totals(farmer_id), fees);
        if amount > available {
            return Ok(PayoutDecision::Insufficient { available });
        }

        let payout = Payout {
            payout_id: t.next_id(),
            farmer_id,
            amount,
            status: PayoutStatus::Pending,
            requested_at: Utc::now(),
            completed_at: None,
        };
        t.payouts.insert(payout.payout_id, payout.clone());
        Ok(PayoutDecision::Accepted(payout))
    }

    async fn payout_history(&self, farmer_id: i32) -> DbResult<Vec<Payout>> {
        let t = self.lock();
        let mut history: Vec<Payout> = t
            .payouts
            .values()
            .filter(|p| p.farmer_id == farmer_id)
            .cloned()
            .collect();
        history.sort_by(|a, b| {
            b.requested_at
                .cmp(&a.requested_at)
                .then(b.payout_id.cmp(&a.payout_id))
        });
        Ok(history)
    }

    async fn pending_payouts(&self) -> DbResult<Vec<PendingPayout>> {
        let t = self.lock();
        let mut pending: Vec<PendingPayout> = t
            .payouts
            .values()
            .filter(|p| p.status == PayoutStatus::Pending)
            .map(|p| PendingPayout {
                payout: p.clone(),
                farmer_name: t.username(p.farmer_id),
                phone_number: t.users.get(&p.farmer_id).and_then(|u| u.phone_number.clone()),
            })
            .collect();
        pending.sort_by(|a, b| {
            a.payout
                .requested_at
                .cmp(&b.payout.requested_at)
                .then(a.payout.payout_id.cmp(&b.payout.payout_id))
        });
        Ok(pending)
    }

    async fn complete_payout(&self, payout_id: i32) -> DbResult<Option<Payout>> {
        let mut t = self.lock();
        Ok(t.payouts
            .get_mut(&payout_id)
            .filter(|p| p.status == PayoutStatus::Pending)
            .map(|p| {
                p.status = PayoutStatus::Completed;
                p.completed_at = Some(Utc::now());
                p.clone()
            }))
    }
}

#[async_trait]
impl RefundStore for MemoryStore {
    async fn file_refund(
        &self,
        order_id: i32,
        buyer_id: i32,
        reason: &str,
    ) -> DbResult<RefundFiling> {
        let mut t = self.lock();
        let eligible = t.orders.get(&order_id).is_some_and(|o| {
            o.buyer_id == buyer_id
                && matches!(o.status, OrderStatus::Paid | OrderStatus::Delivered)
        });
        if !eligible {
            return Ok(RefundFiling::NoEligibleOrder);
        }
        if t.refunds.values().any(|r| r.order_id == order_id) {
            return Ok(RefundFiling::AlreadyRequested);
        }

        let request = RefundRequest {
            request_id: t.next_id(),
            order_id,
            buyer_id,
            reason: reason.to_string(),
            status: RefundStatus::Pending,
            created_at: Utc::now(),
            processed_at: None,
        };
        t.refunds.insert(request.request_id, request.clone());
        Ok(RefundFiling::Created(request))
    }

    async fn refunds_for_buyer(&self, buyer_id: i32) -> DbResult<Vec<BuyerRefundRequest>> {
        let t = self.lock();
        let mut mine: Vec<BuyerRefundRequest> = t
            .refunds
            .values()
            .filter(|r| r.buyer_id == buyer_id)
            .filter_map(|r| {
                let order = t.orders.get(&r.order_id)?;
                Some(BuyerRefundRequest {
                    request: r.clone(),
                    total_price: order.total_price,
                    produce_name: t.produce_name(order.produce_id),
                })
            })
            .collect();
        mine.sort_by(|a, b| {
            b.request
                .created_at
                .cmp(&a.request.created_at)
                .then(b.request.request_id.cmp(&a.request.request_id))
        });
        Ok(mine)
    }

    async fn pending_refunds(&self) -> DbResult<Vec<PendingRefundRequest>> {
        let t = self.lock();
        let mut pending: Vec<PendingRefundRequest> = t
            .refunds
            .values()
            .filter(|r| r.status == RefundStatus::Pending)
            .filter_map(|r| {
                let order = t.orders.get(&r.order_id)?;
                Some(PendingRefundRequest {
                    request: r.clone(),
                    total_price: order.total_price,
                    mpesa_receipt: order.mpesa_receipt.clone(),
                    produce_name: t.produce_name(order.produce_id),
                    buyer_name: t.username(r.buyer_id),
                })
            })
            .collect();
        pending.sort_by(|a, b| {
            a.request
                .created_at
                .cmp(&b.request.created_at)
                .then(a.request.request_id.cmp(&b.request.request_id))
        });
        Ok(pending)
    }

    async fn resolve_refund(
        &self,
        request_id: i32,
        outcome: RefundStatus,
    ) -> DbResult<Option<RefundRequest>> {
        let mut t = self.lock();
        Ok(t.refunds
            .get_mut(&request_id)
            .filter(|r| r.status == RefundStatus::Pending)
            .map(|r| {
                r.status = outcome;
                r.processed_at = Some(Utc::now());
                r.clone()
            }))
    }
}

#[async_trait]
impl CallbackLog for MemoryStore {
    async fn record_callback(&self, record: NewCallbackRecord) -> DbResult<CallbackRecord> {
        Ok(self.lock().push_callback(record))
    }

    async fn was_settled(&self, checkout_request_id: &str) -> DbResult<bool> {
        Ok(self.lock().callbacks.iter().any(|c| {
            c.outcome == CallbackOutcome::Settled
                && c.checkout_request_id.as_deref() == Some(checkout_request_id)
        }))
    }

    async fn unresolved(&self, limit: i64) -> DbResult<Vec<CallbackRecord>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .lock()
            .callbacks
            .iter()
            .rev()
            .filter(|c| c.outcome.needs_attention())
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    #[tokio::test]
    async fn settle_is_conditional_on_pending() {
        let store = MemoryStore::new();
        let farmer = store.add_user("farmer");
        let buyer = store.add_user("buyer");
        let produce = store.add_produce(farmer, "Sukuma wiki", dec("50"));
        let order = store.add_order(&produce, buyer, 2, OrderStatus::Cancelled);
        let reference = AccountReference::new("FarmConnect", order.order_id);

        store.record("ws_CO_1", &reference).await.unwrap();
        let outcome = store
            .settle("ws_CO_1", Some("RCPT"), &JsonValue::Null)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Settlement::NotPending {
                order_id: order.order_id,
                status: OrderStatus::Cancelled
            }
        );
        assert_eq!(store.order(order.order_id).unwrap().status, OrderStatus::Cancelled);
        assert_eq!(store.correlation_count(), 0);
    }

    #[tokio::test]
    async fn settling_writes_the_settled_entry_with_the_order() {
        let store = MemoryStore::new();
        let farmer = store.add_user("farmer");
        let buyer = store.add_user("buyer");
        let produce = store.add_produce(farmer, "Sukuma wiki", dec("50"));
        let order = store.add_order(&produce, buyer, 2, OrderStatus::Pending);
        let reference = AccountReference::new("FarmConnect", order.order_id);
        store.record("ws_CO_7", &reference).await.unwrap();

        assert!(!store.was_settled("ws_CO_7").await.unwrap());
        let outcome = store
            .settle("ws_CO_7", Some("QGT7XYZ12"), &serde_json::json!({"Body": {}}))
            .await
            .unwrap();

        assert!(matches!(outcome, Settlement::Paid(_)));
        // Visible to a redelivery as soon as settlement returns
        assert!(store.was_settled("ws_CO_7").await.unwrap());
        let entry = store.lock().callbacks.back().cloned().unwrap();
        assert_eq!(entry.outcome, CallbackOutcome::Settled);
        assert_eq!(entry.order_id, Some(order.order_id));
        assert_eq!(entry.receipt.as_deref(), Some("QGT7XYZ12"));
    }

    #[tokio::test]
    async fn callback_log_keeps_only_the_newest_entries() {
        let store = MemoryStore::new();
        for n in 0..CALLBACK_LOG_CAPACITY + 5 {
            store
                .record_callback(NewCallbackRecord {
                    checkout_request_id: Some(format!("ws_CO_{}", n)),
                    result_code: None,
                    outcome: CallbackOutcome::Unresolved,
                    order_id: None,
                    receipt: None,
                    detail: None,
                    payload: JsonValue::Null,
                })
                .await
                .unwrap();
        }

        let t = store.lock();
        assert_eq!(t.callbacks.len(), CALLBACK_LOG_CAPACITY);
        assert_eq!(
            t.callbacks.front().and_then(|c| c.checkout_request_id.as_deref()),
            Some("ws_CO_5")
        );
    }

    #[tokio::test]
    async fn duplicate_checkout_id_is_rejected() {
        let store = MemoryStore::new();
        let reference = AccountReference::new("FarmConnect", 1);
        store.record("ws_CO_1", &reference).await.unwrap();
        let err = store.record("ws_CO_1", &reference).await.unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn purge_keeps_recent_correlations() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.add_correlation_at("old", "FarmConnect-1", now - chrono::Duration::days(2));
        store.add_correlation_at("new", "FarmConnect-2", now);

        let removed = store
            .purge_older_than(now - chrono::Duration::days(1))
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert!(store.resolve("new").await.unwrap().is_some());
        assert!(store.resolve("old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_an_order_drops_its_refund_requests() {
        let store = MemoryStore::new();
        let farmer = store.add_user("farmer");
        let buyer = store.add_user("buyer");
        let produce = store.add_produce(farmer, "Maize", dec("30"));
        let order = store.add_order(&produce, buyer, 1, OrderStatus::Paid);
        store.file_refund(order.order_id, buyer, "rotten").await.unwrap();
        assert_eq!(store.refund_count(), 1);

        // Wrong expected status leaves everything in place
        assert!(!store.delete_order(order.order_id, OrderStatus::Pending).await.unwrap());
        assert!(store.delete_order(order.order_id, OrderStatus::Paid).await.unwrap());

        assert!(store.order(order.order_id).is_none());
        assert_eq!(store.refund_count(), 0);
    }
}
