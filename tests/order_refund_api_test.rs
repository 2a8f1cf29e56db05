//! Order lifecycle and refund request endpoints

use axum::{body::Body, Router};
use farmconnect_backend::api::{build_router, AppServices};
use farmconnect_backend::database::memory::MemoryStore;
use farmconnect_backend::database::order_repository::OrderStatus;
use farmconnect_backend::database::Stores;
use farmconnect_backend::health::HealthChecker;
use farmconnect_backend::services::ledger::FeePolicy;
use http::{Request, StatusCode};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use tower::util::ServiceExt;

struct Fixture {
    router: Router,
    store: Arc<MemoryStore>,
    farmer: i32,
    buyer: i32,
    admin: i32,
    produce_id: i32,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let farmer = store.add_user("akinyi");
    let buyer = store.add_user("kiprop");
    let admin = store.add_user("ops");
    let produce = store.add_produce(farmer, "Sukuma wiki", Decimal::from_str("45.50").unwrap());
    let services = AppServices::new(
        &Stores::in_memory(store.clone()),
        FeePolicy::default(),
        None,
        HealthChecker::new(None),
    );
    Fixture {
        router: build_router(services),
        store,
        farmer,
        buyer,
        admin,
        produce_id: produce.produce_id,
    }
}

fn request(method: &str, uri: &str, user_id: i32, role: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-user-id", user_id.to_string())
        .header("x-user-role", role);
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

impl Fixture {
    async fn place_order(&self, quantity: i32) -> Value {
        let (status, order) = send(
            &self.router,
            request(
                "POST",
                "/api/orders",
                self.buyer,
                "buyer",
                Some(json!({ "produce_id": self.produce_id, "quantity_ordered": quantity })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        order
    }

    async fn set_status(&self, order_id: i64, status: &str) -> (StatusCode, Value) {
        send(
            &self.router,
            request(
                "PUT",
                &format!("/api/orders/{}/status", order_id),
                self.farmer,
                "farmer",
                Some(json!({ "status": status })),
            ),
        )
        .await
    }
}

#[tokio::test]
async fn order_captures_total_price_at_creation() {
    let fx = fixture();
    let order = fx.place_order(4).await;

    assert_eq!(order["status"], "pending");
    assert_eq!(order["farmer_id"], fx.farmer);
    assert_eq!(order["location_confirmed"], false);
    assert_eq!(
        Decimal::from_str(order["total_price"].as_str().unwrap()).unwrap(),
        Decimal::from(182)
    );

    let (status, seen_by_farmer) = send(
        &fx.router,
        request(
            "GET",
            &format!("/api/orders/{}", order["order_id"]),
            fx.farmer,
            "farmer",
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(seen_by_farmer["order_id"], order["order_id"]);
}

#[tokio::test]
async fn strangers_see_not_found() {
    let fx = fixture();
    let order = fx.place_order(1).await;
    let stranger = fx.store.add_user("nobody");

    let (status, body) = send(
        &fx.router,
        request(
            "GET",
            &format!("/api/orders/{}", order["order_id"]),
            stranger,
            "buyer",
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "ORDER_NOT_FOUND");
}

#[tokio::test]
async fn invalid_quantity_and_unknown_produce_are_rejected() {
    let fx = fixture();

    let (status, body) = send(
        &fx.router,
        request(
            "POST",
            "/api/orders",
            fx.buyer,
            "buyer",
            Some(json!({ "produce_id": fx.produce_id, "quantity_ordered": 0 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");

    let (status, body) = send(
        &fx.router,
        request(
            "POST",
            "/api/orders",
            fx.buyer,
            "buyer",
            Some(json!({ "produce_id": 9999, "quantity_ordered": 1 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "PRODUCE_NOT_FOUND");
}

#[tokio::test]
async fn buyer_confirms_delivery_location() {
    let fx = fixture();
    let order = fx.place_order(1).await;
    let uri = format!("/api/orders/{}/location", order["order_id"]);

    let (status, updated) = send(
        &fx.router,
        request("PUT", &uri, fx.buyer, "buyer", Some(json!({ "address": "  Stall 12, Wakulima Market " }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["delivery_address"], "Stall 12, Wakulima Market");
    assert_eq!(updated["location_confirmed"], true);

    let (status, _) = send(
        &fx.router,
        request("PUT", &uri, fx.buyer, "buyer", Some(json!({ "address": "   " }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn farmer_cannot_mark_orders_paid_or_skip_payment() {
    let fx = fixture();
    let order = fx.place_order(1).await;
    let order_id = order["order_id"].as_i64().unwrap();

    let (status, body) = fx.set_status(order_id, "paid").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "INVALID_STATUS_TRANSITION");

    let (status, _) = fx.set_status(order_id, "delivered").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = fx.set_status(order_id, "shipped").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn farmer_delivers_paid_order_and_cancels_pending_one() {
    let fx = fixture();
    let produce = fx.store.add_produce(fx.farmer, "Eggs", Decimal::from(15));
    let paid = fx.store.add_order(&produce, fx.buyer, 30, OrderStatus::Paid);

    let (status, delivered) = fx.set_status(paid.order_id as i64, "delivered").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(delivered["status"], "delivered");

    let pending = fx.place_order(2).await;
    let pending_id = pending["order_id"].as_i64().unwrap();
    let (status, body) = fx.set_status(pending_id, "cancelled").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Order successfully cancelled and deleted.");
    assert!(fx.store.order(pending_id as i32).is_none());
}

#[tokio::test]
async fn buyer_cannot_cancel_paid_order() {
    let fx = fixture();
    let produce = fx.store.add_produce(fx.farmer, "Honey", Decimal::from(700));
    let paid = fx.store.add_order(&produce, fx.buyer, 1, OrderStatus::Paid);

    let (status, _) = send(
        &fx.router,
        request("DELETE", &format!("/api/orders/{}", paid.order_id), fx.buyer, "buyer", None),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(fx.store.order(paid.order_id).unwrap().status, OrderStatus::Paid);
}

#[tokio::test]
async fn refund_flow_from_request_to_approval() {
    let fx = fixture();
    let produce = fx.store.add_produce(fx.farmer, "Milk", Decimal::from(60));
    let paid = fx.store.add_order(&produce, fx.buyer, 2, OrderStatus::Paid);
    let pending = fx.place_order(1).await;

    let (status, body) = send(
        &fx.router,
        request(
            "POST",
            "/api/refunds/request",
            fx.buyer,
            "buyer",
            Some(json!({ "order_id": pending["order_id"], "reason": "changed my mind" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "A valid, paid-for order was not found.");

    let file = || {
        request(
            "POST",
            "/api/refunds/request",
            fx.buyer,
            "buyer",
            Some(json!({ "order_id": paid.order_id, "reason": "milk was sour" })),
        )
    };
    let (status, filed) = send(&fx.router, file()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(filed["status"], "pending");

    let (status, body) = send(&fx.router, file()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "DUPLICATE_REFUND_REQUEST");

    let (status, mine) = send(
        &fx.router,
        request("GET", "/api/refunds/myrequests", fx.buyer, "buyer", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine[0]["produce_name"], "Milk");

    let (status, queue) = send(
        &fx.router,
        request("GET", "/api/admin/refunds", fx.admin, "admin", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(queue.as_array().unwrap().len(), 1);
    assert_eq!(queue[0]["buyer_name"], "kiprop");

    let process_uri = format!("/api/admin/refunds/{}", filed["request_id"]);
    let (status, _) = send(
        &fx.router,
        request("PUT", &process_uri, fx.admin, "admin", Some(json!({ "status": "refunded" }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, approved) = send(
        &fx.router,
        request("PUT", &process_uri, fx.admin, "admin", Some(json!({ "status": "approved" }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["status"], "approved");

    let (_, queue) = send(
        &fx.router,
        request("GET", "/api/admin/refunds", fx.admin, "admin", None),
    )
    .await;
    assert!(queue.as_array().unwrap().is_empty());
}
