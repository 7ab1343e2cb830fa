//! Drives the HTTP surface end to end over in-memory adapters: place an order,
//! open a checkout session, deliver a signed processor webhook and watch the
//! order settle.

use std::sync::Arc;

use chrono::{Duration, Utc};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use uuid::Uuid;

use storefront::application::cart_service::CartService;
use storefront::application::coupon_service::CouponService;
use storefront::application::order_service::OrderService;
use storefront::application::payment_service::PaymentService;
use storefront::domain::order::OrderStatus;
use storefront::domain::requester::{Requester, Role};
use storefront::infrastructure::auth::JwtVerifier;
use storefront::infrastructure::memory::{
    InMemoryGateway, InMemoryStore, Notification, RecordingNotifier,
};
use storefront::infrastructure::stripe::signature_header;
use storefront::{build_server, AppState};

const WEBHOOK_SECRET: &str = "whsec_integration";
const JWT_SECRET: &str = "integration-jwt-secret";

struct TestApp {
    base_url: String,
    client: Client,
    store: Arc<InMemoryStore>,
    notifier: Arc<RecordingNotifier>,
    tokens: Arc<JwtVerifier>,
    customer: Requester,
    lamp: Uuid,
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .expect("bind failed")
        .local_addr()
        .expect("addr failed")
        .port()
}

async fn spawn_app() -> TestApp {
    let store = Arc::new(InMemoryStore::default());
    let gateway = Arc::new(InMemoryGateway::new(WEBHOOK_SECRET));
    let notifier = Arc::new(RecordingNotifier::default());
    let tokens = Arc::new(JwtVerifier::new(JWT_SECRET));
    let coupons = Arc::new(CouponService::new(store.clone()));

    let customer = Requester {
        id: Uuid::new_v4(),
        email: "buyer@example.com".into(),
        role: Role::Customer,
    };
    store.add_user(customer.id, &customer.email);
    let lamp = store.add_product("Lamp", "500.00".parse().unwrap(), 10);

    let state = AppState {
        orders: Arc::new(OrderService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            coupons.clone(),
            notifier.clone(),
        )),
        payments: Arc::new(PaymentService::new(
            store.clone(),
            store.clone(),
            gateway,
            store.clone(),
            coupons.clone(),
            notifier.clone(),
            "inr",
        )),
        carts: Arc::new(CartService::new(store.clone(), store.clone())),
        coupons,
        tokens: tokens.clone(),
        public_base_url: "http://shop.test".into(),
    };

    let port = free_port();
    let server = build_server(state, "127.0.0.1", port).expect("Failed to bind the server");
    tokio::spawn(server);

    TestApp {
        base_url: format!("http://127.0.0.1:{port}"),
        client: Client::new(),
        store,
        notifier,
        tokens,
        customer,
        lamp,
    }
}

impl TestApp {
    fn token_for(&self, requester: &Requester) -> String {
        self.tokens
            .issue(requester, Duration::days(JwtVerifier::DEFAULT_LIFETIME_DAYS))
            .unwrap()
    }

    fn customer_token(&self) -> String {
        self.token_for(&self.customer)
    }

    async fn post(&self, path: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut request = self.client.post(format!("{}{}", self.base_url, path)).json(&body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.expect("request failed");
        let status = response.status();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    async fn get(&self, path: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut request = self.client.get(format!("{}{}", self.base_url, path));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.expect("request failed");
        let status = response.status();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    async fn put(&self, path: &str, token: &str, body: Value) -> (StatusCode, Value) {
        let response = self
            .client
            .put(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .expect("request failed");
        let status = response.status();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    async fn delete(&self, path: &str, token: &str) -> (StatusCode, Value) {
        let response = self
            .client
            .delete(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .send()
            .await
            .expect("request failed");
        let status = response.status();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    async fn webhook(&self, payload: &[u8], secret: &str) -> (StatusCode, Value) {
        let header = signature_header(payload, secret, Utc::now().timestamp()).unwrap();
        let response = self
            .client
            .post(format!("{}/payments/webhook", self.base_url))
            .header("Stripe-Signature", header)
            .header("Content-Type", "application/json")
            .body(payload.to_vec())
            .send()
            .await
            .expect("request failed");
        let status = response.status();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    async fn place_order(&self, token: &str) -> String {
        let (status, body) = self
            .post(
                "/orders",
                Some(token),
                json!({
                    "items": [{"product_id": self.lamp, "quantity": 2}],
                    "total_amount": "1000.00"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_str().unwrap().to_string()
    }
}

fn completed_event(session_id: &str, order_id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": "evt_integration_1",
        "type": "checkout.session.completed",
        "data": {"object": {
            "id": session_id,
            "payment_intent": "pi_integration",
            "client_reference_id": order_id,
            "metadata": {"order_id": order_id}
        }}
    }))
    .unwrap()
}

#[tokio::test]
async fn order_is_confirmed_by_signed_webhook_exactly_once() {
    let app = spawn_app().await;
    let token = app.customer_token();

    let order_id = app.place_order(&token).await;

    let (status, session) = app
        .post(
            "/checkout/session",
            Some(&token),
            json!({"order_id": order_id, "amount": "1000.00"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{session}");
    let session_id = session["session_id"].as_str().unwrap().to_string();
    assert!(session["url"].as_str().unwrap().contains(&session_id));

    let payload = completed_event(&session_id, &order_id);
    let (status, body) = app.webhook(&payload, WEBHOOK_SECRET).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["result"], "applied");

    let (status, order) = app.get(&format!("/orders/{order_id}"), Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "confirmed");
    assert_eq!(order["payment_status"], "completed");
    assert_eq!(order["timeline"].as_array().unwrap().len(), 2);

    // processor retries the same delivery
    let (status, body) = app.webhook(&payload, WEBHOOK_SECRET).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "duplicate");
    let (_, replayed) = app.get(&format!("/orders/{order_id}"), Some(&token)).await;
    assert_eq!(replayed, order);

    let order_uuid = Uuid::parse_str(&order_id).unwrap();
    assert_eq!(
        app.notifier.sent(),
        vec![
            Notification::OrderConfirmation {
                email: app.customer.email.clone(),
                order_id: order_uuid,
            },
            Notification::StatusUpdate {
                email: app.customer.email.clone(),
                order_id: order_uuid,
                status: OrderStatus::Confirmed,
            },
        ]
    );

    let (status, session_status) = app
        .get(&format!("/checkout/status/{session_id}"), Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session_status["payment_status"], "completed");

    let (status, history) = app.get("/payments/history", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn forged_webhook_is_rejected_without_side_effects() {
    let app = spawn_app().await;
    let token = app.customer_token();
    let order_id = app.place_order(&token).await;

    let payload = completed_event("cs_forged", &order_id);
    let (status, body) = app.webhook(&payload, "whsec_attacker").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("signature"));

    // no signature header at all
    let unsigned = app
        .client
        .post(format!("{}/payments/webhook", app.base_url))
        .body(payload)
        .send()
        .await
        .expect("request failed");
    assert_eq!(unsigned.status(), StatusCode::BAD_REQUEST);

    let (_, order) = app.get(&format!("/orders/{order_id}"), Some(&token)).await;
    assert_eq!(order["payment_status"], "pending");
    assert!(app.store.transactions().is_empty());
}

#[tokio::test]
async fn auth_rules_are_enforced() {
    let app = spawn_app().await;

    let (status, _) = app.get("/orders", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.get("/orders", Some("not-a-jwt")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let token = app.customer_token();
    let order_id = app.place_order(&token).await;

    let stranger = Requester {
        id: Uuid::new_v4(),
        email: "stranger@example.com".into(),
        role: Role::Customer,
    };
    let (status, _) = app
        .get(&format!("/orders/{order_id}"), Some(&app.token_for(&stranger)))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.get("/admin/orders", Some(&token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = Requester {
        id: Uuid::new_v4(),
        email: "admin@example.com".into(),
        role: Role::Admin,
    };
    let (status, page) = app.get("/admin/orders?limit=500", Some(&app.token_for(&admin))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["limit"], 100);
    assert_eq!(page["total"], 1);

    // tracking is public
    let (status, tracked) = app.get(&format!("/track/{order_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tracked["status"], "pending");
}

#[tokio::test]
async fn guest_cart_merges_into_user_cart() {
    let app = spawn_app().await;

    let (status, _) = app
        .post("/cart", None, json!({"product_id": app.lamp, "quantity": 1}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    for quantity in [1, 2] {
        let (status, body) = app
            .post(
                "/cart",
                None,
                json!({"product_id": app.lamp, "quantity": quantity, "session_id": "guest-42"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }
    let (_, guest_cart) = app.get("/cart?session_id=guest-42", None).await;
    assert_eq!(guest_cart["item_count"], 1);
    assert_eq!(guest_cart["items"][0]["quantity"], 3);

    let token = app.customer_token();
    let (status, merged) = app
        .post("/cart/merge", Some(&token), json!({"session_id": "guest-42"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(merged["count"], 1);

    let (_, user_cart) = app.get("/cart", Some(&token)).await;
    assert_eq!(user_cart["items"][0]["quantity"], 3);
    let (_, guest_cart) = app.get("/cart?session_id=guest-42", None).await;
    assert_eq!(guest_cart["item_count"], 0);

    let (status, report) = app.post("/cart/validate", Some(&token), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["valid"], true);
}

#[tokio::test]
async fn guest_order_is_reached_and_paid_through_its_cart_session() {
    let app = spawn_app().await;

    let (status, _) = app
        .post(
            "/orders",
            None,
            json!({"items": [{"product_id": app.lamp, "quantity": 1}], "customer_email": "guest@example.com"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .post(
            "/orders",
            None,
            json!({
                "items": [{"product_id": app.lamp, "quantity": 1}],
                "customer_email": "guest@example.com",
                "session_id": "guest-cart-7"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let order_id = body["id"].as_str().unwrap().to_string();

    let (status, _) = app.get(&format!("/orders/{order_id}"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app
        .get(&format!("/orders/{order_id}?session_id=someone-else"), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, order) = app
        .get(&format!("/orders/{order_id}?session_id=guest-cart-7"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["user_id"], Value::Null);

    // a signed-in customer is not the guest
    let (status, _) = app
        .get(&format!("/orders/{order_id}"), Some(&app.customer_token()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .post(
            "/checkout/session",
            None,
            json!({"order_id": order_id, "amount": "500.00"}),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, session) = app
        .post(
            "/checkout/session",
            None,
            json!({"order_id": order_id, "amount": "500.00", "session_id": "guest-cart-7"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{session}");
    let session_id = session["session_id"].as_str().unwrap().to_string();

    let (status, body) = app
        .webhook(&completed_event(&session_id, &order_id), WEBHOOK_SECRET)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["result"], "applied");

    let (status, polled) = app
        .get(
            &format!("/checkout/status/{session_id}?cart_session=guest-cart-7"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(polled["status"], "confirmed");

    let (status, _) = app
        .post(
            &format!("/orders/{order_id}/cancel?session_id=guest-cart-7"),
            None,
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

fn admin() -> Requester {
    Requester {
        id: Uuid::new_v4(),
        email: "admin@example.com".into(),
        role: Role::Admin,
    }
}

fn money(value: &Value) -> f64 {
    value.as_str().and_then(|s| s.parse().ok()).unwrap_or(f64::NAN)
}

#[tokio::test]
async fn admin_reads_edits_and_retires_a_coupon() {
    let app = spawn_app().await;
    let admin_token = app.token_for(&admin());
    let customer_token = app.customer_token();

    let (status, created) = app
        .post(
            "/admin/coupons",
            Some(&admin_token),
            json!({
                "code": "spring",
                "discount_type": "percentage",
                "value": "10",
                "valid_until": (Utc::now() + Duration::days(30)).to_rfc3339()
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");

    let (status, _) = app.get("/admin/coupons/SPRING", Some(&customer_token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, fetched) = app.get("/admin/coupons/spring", Some(&admin_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["code"], "SPRING");
    assert_eq!(fetched["is_active"], true);

    let (status, _) = app
        .put("/admin/coupons/SPRING", &admin_token, json!({"value": "20"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, quote) = app
        .post(
            "/coupons/validate",
            None,
            json!({"code": "SPRING", "order_value": "1000"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{quote}");
    assert_eq!(money(&quote["discount_amount"]), 200.0);

    let (status, _) = app
        .put("/admin/coupons/SPRING", &admin_token, json!({"value": "250"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, retired) = app.delete("/admin/coupons/SPRING", &admin_token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(retired["is_active"], false);
    let (status, _) = app
        .post(
            "/coupons/validate",
            None,
            json!({"code": "SPRING", "order_value": "1000"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.delete("/admin/coupons/NOPE", &admin_token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_exports_orders_as_json_or_csv() {
    let app = spawn_app().await;
    let admin_token = app.token_for(&admin());
    let order_id = app.place_order(&app.customer_token()).await;

    let (status, _) = app
        .get("/admin/orders/export", Some(&app.customer_token()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, exported) = app.get("/admin/orders/export", Some(&admin_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(exported["format"], "json");
    assert_eq!(exported["count"], 1);
    assert_eq!(exported["orders"][0]["id"], order_id.as_str());

    let (_, future) = app
        .get("/admin/orders/export?start_date=2999-01-01", Some(&admin_token))
        .await;
    assert_eq!(future["count"], 0);
    let (status, _) = app
        .get("/admin/orders/export?format=xml", Some(&admin_token))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app
        .get("/admin/orders/export?end_date=yesterday", Some(&admin_token))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let response = app
        .client
        .get(format!("{}/admin/orders/export?format=csv", app.base_url))
        .bearer_auth(&admin_token)
        .send()
        .await
        .expect("request failed");
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert!(headers["content-type"].to_str().unwrap().starts_with("text/csv"));
    assert!(headers["content-disposition"]
        .to_str()
        .unwrap()
        .starts_with("attachment; filename=\"orders_"));
    let csv = response.text().await.unwrap();
    let mut lines = csv.lines();
    assert_eq!(
        lines.next(),
        Some("Order ID,Date,User,Total,Status,Payment Status")
    );
    let row = lines.next().unwrap();
    assert!(row.starts_with(&order_id));
    assert!(row.contains(&app.customer.id.to_string()));
    assert!(row.ends_with(",pending,pending"));
}

#[tokio::test]
async fn customers_look_up_their_own_payment_transactions() {
    let app = spawn_app().await;
    let token = app.customer_token();
    let order_id = app.place_order(&token).await;

    let (_, session) = app
        .post(
            "/checkout/session",
            Some(&token),
            json!({"order_id": order_id, "amount": "1000.00"}),
        )
        .await;
    let session_id = session["session_id"].as_str().unwrap();
    let (status, polled) = app
        .get(&format!("/checkout/status/{session_id}"), Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
    let transaction_id = polled["transaction_id"].as_str().unwrap().to_string();

    let (status, tx) = app
        .get(&format!("/payments/{transaction_id}"), Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tx["order_id"], order_id.as_str());
    assert_eq!(tx["status"], "initiated");

    let stranger = Requester {
        id: Uuid::new_v4(),
        email: "stranger@example.com".into(),
        role: Role::Customer,
    };
    let (status, _) = app
        .get(
            &format!("/payments/{transaction_id}"),
            Some(&app.token_for(&stranger)),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.get(&format!("/payments/{transaction_id}"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
