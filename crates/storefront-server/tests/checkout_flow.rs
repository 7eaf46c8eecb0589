//! End-to-end checkout, webhook and withdrawal flows over the router

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use tower::ServiceExt;

use storefront_payments::{
    GatewayFailure, GatewayRequest, LedgerStore, MemoryCatalog, MemoryLedgerStore,
    MemorySessionStore, NoopNotifier, PaymentGateway, PaymentResult, RecordStatus, SessionPolicy,
    current_balance,
};
use storefront_server::{AppState, Backends, app};

/// Gateway double answering payments with a fixed reference
struct ScriptedGateway {
    reference: Mutex<Option<String>>,
    payment_calls: AtomicUsize,
    withdrawal_calls: AtomicUsize,
}

impl ScriptedGateway {
    fn new(reference: Option<&str>) -> Self {
        Self {
            reference: Mutex::new(reference.map(str::to_string)),
            payment_calls: AtomicUsize::new(0),
            withdrawal_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn initiate_payment(&self, _request: &GatewayRequest) -> PaymentResult {
        self.payment_calls.fetch_add(1, Ordering::SeqCst);
        match self.reference.lock().unwrap().clone() {
            Some(reference) => PaymentResult::accepted(json!({
                "success": true,
                "transaction_id": reference,
                "status": "PENDING",
            })),
            None => PaymentResult::failed(
                GatewayFailure::Rejected,
                "Numero invalido",
                json!({ "message": "Numero invalido" }),
            ),
        }
    }

    async fn initiate_withdrawal(&self, _request: &GatewayRequest) -> PaymentResult {
        self.withdrawal_calls.fetch_add(1, Ordering::SeqCst);
        PaymentResult::accepted(json!({ "transaction_id": "wd-ref" }))
    }

    async fn transaction_status(&self, _reference: &str) -> PaymentResult {
        PaymentResult::failed(GatewayFailure::Timeout, "no answer", Value::Null)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct Harness {
    router: Router,
    ledger: Arc<MemoryLedgerStore>,
    gateway: Arc<ScriptedGateway>,
}

fn harness(reference: Option<&str>) -> Harness {
    let ledger = Arc::new(MemoryLedgerStore::new());
    let gateway = Arc::new(ScriptedGateway::new(reference));
    let state = AppState::new(
        Backends {
            ledger: ledger.clone(),
            sessions: Arc::new(MemorySessionStore::new()),
            catalog: Arc::new(MemoryCatalog::new()),
            gateway: gateway.clone(),
            notifier: Arc::new(NoopNotifier),
        },
        SessionPolicy::default(),
        Some("https://shop.test/webhooks/provider".into()),
    );
    Harness {
        router: app(state),
        ledger,
        gateway,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    send(router, Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn post_json(router: &Router, uri: &str, body: &Value) -> (StatusCode, Value) {
    let request = Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(router, request).await
}

/// Follow `/checkout/init/{id}` and return the session token
async fn open_checkout(router: &Router, product_id: &str) -> String {
    let request = Request::get(format!("/checkout/init/{product_id}"))
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert!(response.status().is_redirection());

    let location = response.headers()[header::LOCATION].to_str().unwrap();
    location.strip_prefix("/c/").unwrap().to_string()
}

async fn pay(router: &Router, token: &str) -> (StatusCode, Value) {
    post_json(
        router,
        "/checkout/process",
        &json!({
            "amount": "197.00",
            "phone": "841234567",
            "provider": "mpesa",
            "name": "Ana Sousa",
            "email": "ana@example.com",
            "productId": "101",
            "sessionToken": token,
        }),
    )
    .await
}

#[tokio::test]
async fn test_checkout_page_shows_mock_product() {
    let h = harness(Some("ref-1"));
    let token = open_checkout(&h.router, "101").await;

    let (status, body) = get(&h.router, &format!("/c/{token}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["product"]["name"], "Curso de Marketing Digital");
    assert_eq!(body["product"]["price"], "197.00");
    assert_eq!(body["token"], token.as_str());

    let (status, body) = get(&h.router, "/c/does-not-exist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn test_payment_then_settlement_and_redelivery() {
    let h = harness(Some("ref-1"));
    let token = open_checkout(&h.router, "101").await;

    // Payment submission creates a pending sale
    let (status, body) = pay(&h.router, &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let sale_id = body["saleId"].as_str().unwrap().to_string();
    assert_eq!(body["redirect"], format!("/thank-you/{sale_id}"));

    let sale = h.ledger.find_sale_by_reference("ref-1").await.unwrap().unwrap();
    assert_eq!(sale.id, sale_id);
    assert_eq!(sale.status(), RecordStatus::Pending);

    let (_, body) = get(&h.router, &format!("/thank-you/{sale_id}")).await;
    assert_eq!(body["status"], "pending");
    assert_eq!(body["content_link"], Value::Null);

    // Provider confirms
    let webhook = json!({ "reference": "ref-1", "status": "successful" });
    let (status, body) = post_json(&h.router, "/webhooks/provider", &webhook).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["outcome"], "transitioned");
    assert_eq!(current_balance(h.ledger.as_ref()).await.unwrap(), dec!(197.00));

    // Same notification again: accepted, nothing changes
    let (status, body) = post_json(&h.router, "/webhooks/provider", &webhook).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["outcome"], "duplicate");
    assert_eq!(current_balance(h.ledger.as_ref()).await.unwrap(), dec!(197.00));

    let (_, body) = get(&h.router, &format!("/thank-you/{sale_id}")).await;
    assert_eq!(body["status"], "settled");
    assert_eq!(body["content_link"], "https://mega.nz/file/mock-curso-mkt");

    // The session is spent
    let (status, _) = get(&h.router, &format!("/c/{token}")).await;
    assert_eq!(status, StatusCode::GONE);
}

#[tokio::test]
async fn test_spent_session_cannot_pay_again() {
    let h = harness(Some("ref-1"));
    let token = open_checkout(&h.router, "101").await;
    pay(&h.router, &token).await;

    // Pending sale holds the checkout
    let (status, body) = pay(&h.router, &token).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "CONFLICT");

    post_json(
        &h.router,
        "/webhooks/provider",
        &json!({ "reference": "ref-1", "status": "paid" }),
    )
    .await;

    let (status, body) = pay(&h.router, &token).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["code"], "SESSION_USED");

    assert_eq!(h.gateway.payment_calls.load(Ordering::SeqCst), 1);
    let sales = h.ledger.sales().await.unwrap();
    assert_eq!(sales.len(), 1);
    assert_eq!(sales[0].status(), RecordStatus::Settled);
}

#[tokio::test]
async fn test_unmatched_and_malformed_webhooks() {
    let h = harness(Some("ref-1"));

    let (status, body) = post_json(
        &h.router,
        "/webhooks/provider",
        &json!({ "external_id": "ref-unknown", "status": "paid" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "WEBHOOK_UNMATCHED");

    let (status, _) = post_json(&h.router, "/webhooks/provider", &json!({ "status": "paid" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::post("/webhooks/provider")
        .body(Body::from("not json"))
        .unwrap();
    let (status, body) = send(&h.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "WEBHOOK_MALFORMED");

    assert!(h.ledger.sales().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_nested_webhook_shape() {
    let h = harness(Some("ref-nested"));
    let token = open_checkout(&h.router, "101").await;
    pay(&h.router, &token).await;

    let (status, body) = post_json(
        &h.router,
        "/webhooks/provider",
        &json!({ "event": "transaction.updated", "data": { "reference": "ref-nested", "status": "COMPLETED" } }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "settled");
}

#[tokio::test]
async fn test_gateway_failure_is_reported_to_buyer() {
    let h = harness(None);
    let token = open_checkout(&h.router, "101").await;

    let (status, body) = pay(&h.router, &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Numero invalido");

    let sales = h.ledger.sales().await.unwrap();
    assert_eq!(sales.len(), 1);
    assert_eq!(sales[0].status(), RecordStatus::Failed);

    // Session still usable for another attempt
    let (status, _) = get(&h.router, &format!("/c/{token}")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_withdrawal_over_balance_never_reaches_gateway() {
    let h = harness(Some("ref-1"));
    let token = open_checkout(&h.router, "101").await;
    pay(&h.router, &token).await;
    post_json(
        &h.router,
        "/webhooks/provider",
        &json!({ "reference": "ref-1", "status": "paid" }),
    )
    .await;

    let (status, body) = post_json(
        &h.router,
        "/withdrawals/process",
        &json!({ "amount": 500, "phone": "841234567", "provider": "mpesa" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "INSUFFICIENT_BALANCE");
    assert_eq!(h.gateway.withdrawal_calls.load(Ordering::SeqCst), 0);

    let (status, body) = post_json(
        &h.router,
        "/withdrawals/process",
        &json!({ "amount": 100, "phone": "841234567", "provider": "mpesa" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["withdrawal"]["status"], "settled");
    assert_eq!(body["balance"], "97.00");

    let (_, body) = get(&h.router, "/dashboard").await;
    assert_eq!(body["total_revenue"], "197.00");
    assert_eq!(body["balance"], "97.00");
    assert_eq!(body["settled_sales"], 1);
}

#[tokio::test]
async fn test_unknown_provider_rejected() {
    let h = harness(Some("ref-1"));
    let (status, body) = post_json(
        &h.router,
        "/checkout/process",
        &json!({ "amount": 197, "phone": "841234567", "provider": "paypal", "productId": "101" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "UNSUPPORTED_CHANNEL");
    assert_eq!(h.gateway.payment_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_health_and_store() {
    let h = harness(Some("ref-1"));

    let (status, body) = get(&h.router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["gateway"], "scripted");

    let (_, body) = get(&h.router, "/store").await;
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|p| p["id"].as_str())
        .collect();
    assert!(ids.contains(&"101") && ids.contains(&"102") && ids.contains(&"103"));
}
