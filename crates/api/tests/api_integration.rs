//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use api::AppState;
use api::config::Config;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use domain::GatewayOperation;
use event_store::InMemoryEventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    app: axum::Router,
    state: Arc<AppState<InMemoryEventStore>>,
}

impl TestApp {
    fn new() -> Self {
        let state = api::create_state(InMemoryEventStore::new(), &Config::default());
        let app = api::create_app(state.clone(), get_metrics_handle());
        Self { app, state }
    }

    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(serde_json::to_string(&json).unwrap())
            }
            None => Body::empty(),
        };

        let response = self
            .app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn stock(&self, variant_id: &str, count: u32) {
        let (status, _) = self
            .send(
                "PUT",
                &format!("/stock_locations/default/stock_items/{variant_id}"),
                Some(json!({ "count_on_hand": count })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    async fn create_order(&self) -> String {
        let (status, order) = self.send("POST", "/orders", None).await;
        assert_eq!(status, StatusCode::CREATED);
        order["id"].as_str().unwrap().to_string()
    }

    async fn add_shirt(&self, order_id: &str, quantity: u32) -> Value {
        let (status, order) = self
            .send(
                "POST",
                &format!("/orders/{order_id}/line_items"),
                Some(shirt(quantity)),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{order}");
        order
    }

    /// Drives an order with one shirt to `confirm` and returns its
    /// order and payment ids.
    async fn confirmed_order(&self) -> (String, String) {
        self.stock("V-SHIRT", 5).await;
        let order_id = self.create_order().await;
        self.add_shirt(&order_id, 1).await;

        let (status, _) = self
            .send(
                "PUT",
                &format!("/orders/{order_id}/address"),
                Some(address()),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, created) = self
            .send("POST", &format!("/orders/{order_id}/shipments"), None)
            .await;
        assert_eq!(status, StatusCode::CREATED, "{created}");
        let shipment_id = created["shipment_id"].as_str().unwrap();

        let (status, _) = self
            .send(
                "PUT",
                &format!("/orders/{order_id}/shipments/{shipment_id}/rate"),
                Some(json!({ "method_id": "ground" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        for _ in 0..3 {
            let (status, body) = self
                .send("POST", &format!("/orders/{order_id}/advance"), None)
                .await;
            assert_eq!(status, StatusCode::OK, "{body}");
        }

        let (status, payment) = self
            .send(
                "POST",
                &format!("/orders/{order_id}/payments"),
                Some(json!({ "source": card() })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{payment}");
        let payment_id = payment["id"].as_str().unwrap().to_string();

        let (status, order) = self
            .send("POST", &format!("/orders/{order_id}/advance"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(order["state"], "confirm");

        (order_id, payment_id)
    }
}

fn shirt(quantity: u32) -> Value {
    json!({
        "variant_id": "V-SHIRT",
        "sku": "SHIRT-001",
        "name": "Shirt",
        "price_cents": 2000,
        "quantity": quantity
    })
}

fn address() -> Value {
    json!({
        "firstname": "Ada",
        "lastname": "Lovelace",
        "address1": "12 St James's Square",
        "city": "London",
        "zipcode": "SW1Y 4JH",
        "country": "GB"
    })
}

fn card() -> Value {
    json!({
        "type": "credit_card",
        "number": "4111 1111 1111 1111",
        "verification_value": "123",
        "month": 4,
        "year": 2030,
        "name": "Ada Lovelace"
    })
}

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new();

    let (status, json) = app.send("GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_create_and_get_order() {
    let app = TestApp::new();
    let order_id = app.create_order().await;

    let (status, order) = app.send("GET", &format!("/orders/{order_id}"), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["id"], order_id.as_str());
    assert_eq!(order["state"], "cart");
    assert_eq!(order["total_cents"], 0);
    assert!(order["number"].as_str().unwrap().starts_with('R'));
}

#[tokio::test]
async fn test_get_nonexistent_order() {
    let app = TestApp::new();
    let fake_id = uuid::Uuid::new_v4();

    let (status, _) = app.send("GET", &format!("/orders/{fake_id}"), None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_order_id_format() {
    let app = TestApp::new();

    let (status, _) = app.send("GET", "/orders/not-a-uuid", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_line_item_edits() {
    let app = TestApp::new();
    let order_id = app.create_order().await;

    let order = app.add_shirt(&order_id, 2).await;
    assert_eq!(order["item_total_cents"], 4000);
    let line_item_id = order["line_items"][0]["id"].as_str().unwrap().to_string();

    let (status, order) = app
        .send(
            "PATCH",
            &format!("/orders/{order_id}/line_items/{line_item_id}"),
            Some(json!({ "quantity": 1 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["item_total_cents"], 2000);

    let (status, order) = app
        .send(
            "DELETE",
            &format!("/orders/{order_id}/line_items/{line_item_id}"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["line_items"].as_array().unwrap().len(), 0);
    assert_eq!(order["total_cents"], 0);
}

#[tokio::test]
async fn test_zero_quantity_is_rejected() {
    let app = TestApp::new();
    let order_id = app.create_order().await;

    let (status, body) = app
        .send(
            "POST",
            &format!("/orders/{order_id}/line_items"),
            Some(shirt(0)),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().is_some());
}

#[tokio::test]
async fn test_advance_from_empty_cart_conflicts() {
    let app = TestApp::new();
    let order_id = app.create_order().await;

    let (status, _) = app
        .send("POST", &format!("/orders/{order_id}/advance"), None)
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_shipment_without_stock_is_unprocessable() {
    let app = TestApp::new();
    let order_id = app.create_order().await;
    app.add_shirt(&order_id, 1).await;

    let (status, body) = app
        .send(
            "POST",
            &format!("/orders/{order_id}/shipments"),
            Some(json!({ "stock_location": "default" })),
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .contains("Insufficient stock")
    );
}

#[tokio::test]
async fn test_untracked_stock_ships_without_count() {
    let app = TestApp::new();
    let (status, item) = app
        .send(
            "PUT",
            "/stock_locations/default/stock_items/V-SHIRT",
            Some(json!({ "count_on_hand": 0, "track_inventory": false })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(item["track_inventory"], false);
    assert_eq!(item["backorderable"], false);

    let order_id = app.create_order().await;
    app.add_shirt(&order_id, 2).await;
    let (status, order) = app
        .send(
            "POST",
            &format!("/orders/{order_id}/shipments"),
            Some(json!({ "stock_location": "default" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{order}");

    let (_, item) = app
        .send("GET", "/stock_locations/default/stock_items/V-SHIRT", None)
        .await;
    assert_eq!(item["count_on_hand"], 0);
}

#[tokio::test]
async fn test_full_checkout() {
    let app = TestApp::new();
    let (order_id, payment_id) = app.confirmed_order().await;

    let (status, order) = app
        .send("POST", &format!("/orders/{order_id}/complete"), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{order}");
    assert_eq!(order["state"], "complete");
    assert_eq!(order["total_cents"], 2600);
    assert_eq!(order["shipments"][0]["state"], "ready");

    let (status, payment) = app
        .send("GET", &format!("/payments/{payment_id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payment["state"], "completed");
    assert_eq!(payment["captured_cents"], 2600);
    assert_eq!(payment["source"], "XXXX-XXXX-XXXX-1111");

    let (_, stock) = app
        .send("GET", "/stock_locations/default/stock_items/V-SHIRT", None)
        .await;
    assert_eq!(stock["count_on_hand"], 4);
}

#[tokio::test]
async fn test_declined_capture_reports_gateway_message() {
    let app = TestApp::new();
    let (order_id, _) = app.confirmed_order().await;
    app.state.gateway.decline(GatewayOperation::Capture).await;

    let (status, body) = app
        .send("POST", &format!("/orders/{order_id}/complete"), None)
        .await;

    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .contains("Bogus Gateway: Forced failure")
    );

    let (_, order) = app.send("GET", &format!("/orders/{order_id}"), None).await;
    assert_eq!(order["state"], "confirm");
}

#[tokio::test]
async fn test_over_credit_is_unprocessable() {
    let app = TestApp::new();
    let (order_id, payment_id) = app.confirmed_order().await;
    app.send("POST", &format!("/orders/{order_id}/complete"), None)
        .await;

    let (status, _) = app
        .send(
            "POST",
            &format!("/payments/{payment_id}/credit"),
            Some(json!({ "amount_cents": 10_000 })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(app.state.gateway.calls(GatewayOperation::Credit).await, 0);

    let (status, payment) = app
        .send(
            "POST",
            &format!("/payments/{payment_id}/credit"),
            Some(json!({ "amount_cents": 600 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payment["credited_cents"], 600);
    assert_eq!(payment["credit_allowed_cents"], 2000);
}

#[tokio::test]
async fn test_cancel_voids_authorized_payment() {
    let app = TestApp::new();
    let (order_id, payment_id) = app.confirmed_order().await;

    let (status, payment) = app
        .send("POST", &format!("/payments/{payment_id}/authorize"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payment["state"], "pending");

    let (status, order) = app
        .send("POST", &format!("/orders/{order_id}/cancel"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["state"], "canceled");

    let (_, payment) = app
        .send("GET", &format!("/payments/{payment_id}"), None)
        .await;
    assert_eq!(payment["state"], "void");

    let (_, stock) = app
        .send("GET", "/stock_locations/default/stock_items/V-SHIRT", None)
        .await;
    assert_eq!(stock["available"], 5);
}

#[tokio::test]
async fn test_invalid_card_month_is_rejected() {
    let app = TestApp::new();
    let order_id = app.create_order().await;
    app.add_shirt(&order_id, 1).await;

    let mut source = card();
    source["month"] = json!(13);
    let (status, body) = app
        .send(
            "POST",
            &format!("/orders/{order_id}/payments"),
            Some(json!({ "source": source })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("month"));
}

#[tokio::test]
async fn test_check_payment() {
    let app = TestApp::new();
    let order_id = app.create_order().await;
    app.add_shirt(&order_id, 1).await;

    let (status, payment) = app
        .send(
            "POST",
            &format!("/orders/{order_id}/payments"),
            Some(json!({
                "source": { "type": "check", "payer": "Grace Hopper" },
                "amount_cents": 2000
            })),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(payment["source_type"], "check");
    assert_eq!(payment["amount_cents"], 2000);
    assert_eq!(payment["state"], "checkout");
}

#[tokio::test]
async fn test_get_order_events() {
    let app = TestApp::new();
    let order_id = app.create_order().await;
    app.add_shirt(&order_id, 2).await;

    let (status, events) = app
        .send("GET", &format!("/orders/{order_id}/events"), None)
        .await;

    assert_eq!(status, StatusCode::OK);
    let events = events.as_array().unwrap();
    assert!(events.len() >= 2);
    assert_eq!(events[0]["event_type"], "OrderCreated");
    assert_eq!(events[0]["version"], 1);
    assert_eq!(events[1]["event_type"], "LineItemAdded");
    assert_eq!(events[1]["version"], 2);
    assert!(events[0]["event_id"].as_str().is_some());
    assert!(events[0]["payload"].is_object());
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = TestApp::new();

    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
