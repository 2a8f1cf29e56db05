//! Gateway callback processing.
//!
//! The gateway retries any callback that does not get a 200 with a
//! `{ResultCode, ResultDesc}` body, so [`PaymentCallbackHandler::handle`]
//! never fails. Whatever happened is logged, counted and appended to the
//! callback audit log instead.

use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::database::callback_log_repository::{CallbackOutcome, NewCallbackRecord};
use crate::database::mpesa_request_repository::Settlement;
use crate::database::repository::{CallbackLog, CorrelationStore};
use crate::payments::types::{CallbackAck, CallbackEnvelope, StkCallback};

/// Log field value external alerting keys on
const ALERT_UNRESOLVED: &str = "mpesa_callback_unresolved";
const ALERT_FAILED: &str = "mpesa_callback_failed";

/// Running counts of callback outcomes since startup
#[derive(Debug, Default)]
pub struct CallbackStats {
    received: AtomicU64,
    malformed: AtomicU64,
    payment_failed: AtomicU64,
    settled: AtomicU64,
    duplicates: AtomicU64,
    ignored: AtomicU64,
    unresolved: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CallbackStatsSnapshot {
    pub received: u64,
    pub malformed: u64,
    pub payment_failed: u64,
    pub settled: u64,
    pub duplicates: u64,
    pub ignored: u64,
    pub unresolved: u64,
    pub errors: u64,
}

impl CallbackStats {
    fn count(&self, outcome: CallbackOutcome) {
        self.received.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            CallbackOutcome::Malformed => &self.malformed,
            CallbackOutcome::PaymentFailed => &self.payment_failed,
            CallbackOutcome::Settled => &self.settled,
            CallbackOutcome::Duplicate => &self.duplicates,
            CallbackOutcome::Ignored => &self.ignored,
            CallbackOutcome::Unresolved => &self.unresolved,
            CallbackOutcome::Error => &self.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CallbackStatsSnapshot {
        CallbackStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            payment_failed: self.payment_failed.load(Ordering::Relaxed),
            settled: self.settled.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            unresolved: self.unresolved.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// What processing decided, before it is logged and recorded
struct Disposition {
    outcome: CallbackOutcome,
    order_id: Option<i32>,
    detail: Option<String>,
}

impl Disposition {
    fn new(outcome: CallbackOutcome) -> Self {
        Self {
            outcome,
            order_id: None,
            detail: None,
        }
    }

    fn order(mut self, order_id: i32) -> Self {
        self.order_id = Some(order_id);
        self
    }

    fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

pub struct PaymentCallbackHandler {
    correlations: Arc<dyn CorrelationStore>,
    callback_log: Arc<dyn CallbackLog>,
    stats: Arc<CallbackStats>,
}

impl PaymentCallbackHandler {
    pub fn new(
        correlations: Arc<dyn CorrelationStore>,
        callback_log: Arc<dyn CallbackLog>,
        stats: Arc<CallbackStats>,
    ) -> Self {
        Self {
            correlations,
            callback_log,
            stats,
        }
    }

    pub fn stats(&self) -> CallbackStatsSnapshot {
        self.stats.snapshot()
    }

    /// Process one raw callback body and produce the acknowledgement
    pub async fn handle(&self, body: &[u8]) -> CallbackAck {
        let payload = match serde_json::from_slice::<JsonValue>(body) {
            Ok(value) => value,
            Err(e) => {
                let raw = json!({ "raw": String::from_utf8_lossy(body) });
                return self.reject_malformed(raw, format!("invalid JSON: {}", e)).await;
            }
        };

        let callback = match serde_json::from_value::<CallbackEnvelope>(payload.clone()) {
            Ok(envelope) => envelope.body.stk_callback,
            Err(e) => {
                return self
                    .reject_malformed(payload, format!("unexpected envelope: {}", e))
                    .await;
            }
        };

        let disposition = if callback.is_success() {
            self.settle(&callback, &payload).await
        } else {
            info!(
                checkout_request_id = %callback.checkout_request_id,
                result_code = callback.result_code,
                result_desc = ?callback.result_desc,
                "payment not completed"
            );
            let mut failed = Disposition::new(CallbackOutcome::PaymentFailed);
            failed.detail = callback.result_desc.clone();
            failed
        };

        self.record(
            Some(callback.checkout_request_id.clone()),
            Some(callback.result_code),
            callback.receipt(),
            disposition,
            payload,
        )
        .await;

        CallbackAck::accepted()
    }

    async fn reject_malformed(&self, payload: JsonValue, reason: String) -> CallbackAck {
        warn!(reason = %reason, "ignoring malformed payment callback");
        let disposition = Disposition::new(CallbackOutcome::Malformed).detail(reason);
        self.record(None, None, None, disposition, payload).await;
        CallbackAck::malformed()
    }

    async fn settle(&self, callback: &StkCallback, payload: &JsonValue) -> Disposition {
        let checkout_request_id = callback.checkout_request_id.as_str();
        let receipt = callback.receipt();
        if receipt.is_none() {
            warn!(
                checkout_request_id = checkout_request_id,
                "successful callback carried no receipt number"
            );
        }

        let settlement = match self
            .correlations
            .settle(checkout_request_id, receipt.as_deref(), payload)
            .await
        {
            Ok(settlement) => settlement,
            Err(e) => {
                error!(
                    alert = ALERT_FAILED,
                    checkout_request_id = checkout_request_id,
                    error = %e,
                    "failed to settle payment callback"
                );
                return Disposition::new(CallbackOutcome::Error).detail(e.to_string());
            }
        };

        match settlement {
            Settlement::Paid(order) => {
                info!(
                    checkout_request_id = checkout_request_id,
                    order_id = order.order_id,
                    receipt = ?order.mpesa_receipt,
                    "order paid"
                );
                Disposition::new(CallbackOutcome::Settled).order(order.order_id)
            }
            Settlement::AlreadyPaid { order_id } => {
                info!(
                    checkout_request_id = checkout_request_id,
                    order_id = order_id,
                    "order already paid, duplicate callback ignored"
                );
                Disposition::new(CallbackOutcome::Duplicate).order(order_id)
            }
            Settlement::NotPending { order_id, status } => {
                warn!(
                    checkout_request_id = checkout_request_id,
                    order_id = order_id,
                    status = %status,
                    "payment received for an order that is no longer pending"
                );
                Disposition::new(CallbackOutcome::Ignored)
                    .order(order_id)
                    .detail(format!("order is {}", status))
            }
            Settlement::OrderMissing { order_id } => {
                warn!(
                    checkout_request_id = checkout_request_id,
                    order_id = order_id,
                    "payment received for an order that no longer exists"
                );
                Disposition::new(CallbackOutcome::Ignored)
                    .order(order_id)
                    .detail("order deleted")
            }
            Settlement::MalformedReference { account_reference } => {
                error!(
                    alert = ALERT_UNRESOLVED,
                    checkout_request_id = checkout_request_id,
                    account_reference = %account_reference,
                    "account reference carries no order id"
                );
                Disposition::new(CallbackOutcome::Unresolved)
                    .detail(format!("bad account reference {}", account_reference))
            }
            Settlement::CorrelationNotFound => self.unmatched(checkout_request_id).await,
        }
    }

    /// No correlation left. Either an earlier delivery already settled it,
    /// or this payment can no longer be tied to an order.
    async fn unmatched(&self, checkout_request_id: &str) -> Disposition {
        match self.callback_log.was_settled(checkout_request_id).await {
            Ok(true) => {
                info!(
                    checkout_request_id = checkout_request_id,
                    "callback already settled, duplicate delivery ignored"
                );
                Disposition::new(CallbackOutcome::Duplicate)
            }
            Ok(false) => {
                error!(
                    alert = ALERT_UNRESOLVED,
                    checkout_request_id = checkout_request_id,
                    "no payment correlation for checkout id"
                );
                Disposition::new(CallbackOutcome::Unresolved).detail("correlation not found")
            }
            Err(e) => {
                error!(
                    alert = ALERT_UNRESOLVED,
                    checkout_request_id = checkout_request_id,
                    error = %e,
                    "no payment correlation for checkout id, settlement history unavailable"
                );
                Disposition::new(CallbackOutcome::Unresolved).detail(e.to_string())
            }
        }
    }

    async fn record(
        &self,
        checkout_request_id: Option<String>,
        result_code: Option<i64>,
        receipt: Option<String>,
        disposition: Disposition,
        payload: JsonValue,
    ) {
        self.stats.count(disposition.outcome);
        // Settlement already wrote its own audit row
        if disposition.outcome == CallbackOutcome::Settled {
            return;
        }

        let record = NewCallbackRecord {
            checkout_request_id,
            result_code,
            outcome: disposition.outcome,
            order_id: disposition.order_id,
            receipt,
            detail: disposition.detail,
            payload,
        };

        if let Err(e) = self.callback_log.record_callback(record).await {
            error!(
                alert = ALERT_FAILED,
                outcome = disposition.outcome.as_str(),
                error = %e,
                "failed to write callback audit record"
            );
        }
    }
}
