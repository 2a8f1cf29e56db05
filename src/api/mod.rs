//! HTTP surface of the payment and settlement core

pub mod admin;
pub mod auth;
pub mod orders;
pub mod payments;
pub mod payouts;
pub mod refunds;

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::info;

use crate::database::repository::CallbackLog;
use crate::database::Stores;
use crate::health::{self, HealthChecker};
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::payments::provider::PaymentGateway;
use crate::services::ledger::FeePolicy;
use crate::services::order_lifecycle::OrderLifecycle;
use crate::services::payment_callback::{CallbackStats, PaymentCallbackHandler};
use crate::services::payment_initiation::{InitiationSettings, PaymentInitiationService};
use crate::services::payout::PayoutService;
use crate::services::refund::RefundService;

/// Services shared by every route
#[derive(Clone)]
pub struct AppServices {
    /// Absent when no payment gateway is configured
    pub initiation: Option<Arc<PaymentInitiationService>>,
    pub callbacks: Arc<PaymentCallbackHandler>,
    pub payouts: Arc<PayoutService>,
    pub orders: Arc<OrderLifecycle>,
    pub refunds: Arc<RefundService>,
    pub callback_log: Arc<dyn CallbackLog>,
    pub health: HealthChecker,
}

impl AppServices {
    pub fn new(
        stores: &Stores,
        fees: FeePolicy,
        gateway: Option<(Arc<dyn PaymentGateway>, InitiationSettings)>,
        health: HealthChecker,
    ) -> Self {
        let initiation = gateway.map(|(gateway, settings)| {
            Arc::new(PaymentInitiationService::new(
                stores.orders.clone(),
                stores.correlations.clone(),
                gateway,
                settings,
            ))
        });

        Self {
            initiation,
            callbacks: Arc::new(PaymentCallbackHandler::new(
                stores.correlations.clone(),
                stores.callback_log.clone(),
                Arc::new(CallbackStats::default()),
            )),
            payouts: Arc::new(PayoutService::new(stores.payouts.clone(), fees)),
            orders: Arc::new(OrderLifecycle::new(stores.orders.clone())),
            refunds: Arc::new(RefundService::new(stores.refunds.clone())),
            callback_log: stores.callback_log.clone(),
            health,
        }
    }
}

/// Assemble every route with request-id and request-logging layers
pub fn build_router(services: AppServices) -> Router {
    let stk_routes = match services.initiation.clone() {
        Some(service) => Router::new()
            .route("/api/payments/stkpush", post(payments::stk_push))
            .with_state(payments::InitiationState { service }),
        None => {
            info!("⏭️  Skipping STK push route (no payment gateway configured)");
            Router::new()
        }
    };

    let callback_routes = Router::new()
        .route("/api/payments/callback", post(payments::mpesa_callback))
        .with_state(payments::CallbackState {
            handler: services.callbacks.clone(),
        });

    let payout_routes = Router::new()
        .route("/api/payouts/summary", get(payouts::earnings_summary))
        .route("/api/payouts/request", post(payouts::request_payout))
        .route("/api/payouts/history", get(payouts::payout_history))
        .with_state(payouts::PayoutState {
            service: services.payouts.clone(),
        });

    let order_routes = Router::new()
        .route("/api/orders", post(orders::create_order))
        .route(
            "/api/orders/{id}",
            get(orders::get_order).delete(orders::cancel_order),
        )
        .route("/api/orders/{id}/location", put(orders::confirm_location))
        .route("/api/orders/{id}/status", put(orders::update_status))
        .with_state(orders::OrderState {
            lifecycle: services.orders.clone(),
        });

    let refund_routes = Router::new()
        .route("/api/refunds/request", post(refunds::request_refund))
        .route("/api/refunds/myrequests", get(refunds::my_requests))
        .with_state(refunds::RefundState {
            service: services.refunds.clone(),
        });

    let admin_routes = Router::new()
        .route("/api/admin/payouts", get(admin::pending_payouts))
        .route(
            "/api/admin/payouts/{id}/complete",
            put(admin::complete_payout),
        )
        .route("/api/admin/refunds", get(admin::pending_refunds))
        .route("/api/admin/refunds/{id}", put(admin::process_refund))
        .route(
            "/api/admin/payments/unresolved",
            get(admin::unresolved_callbacks),
        )
        .route(
            "/api/admin/payments/callback-stats",
            get(admin::callback_stats),
        )
        .with_state(admin::AdminState {
            payouts: services.payouts.clone(),
            refunds: services.refunds.clone(),
            callbacks: services.callbacks.clone(),
            callback_log: services.callback_log.clone(),
        });

    let health_routes = Router::new()
        .route("/health", get(health::health))
        .with_state(services.health.clone());

    Router::new()
        .merge(stk_routes)
        .merge(callback_routes)
        .merge(payout_routes)
        .merge(order_routes)
        .merge(refund_routes)
        .merge(admin_routes)
        .merge(health_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}
