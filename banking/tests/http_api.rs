//! HTTP surface: status codes, error bodies and idempotency headers.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use banking::api::{AppState, build_router};
use common::Harness;
use serde_json::{Value, json};
use std::time::Duration;

const IDEMPOTENCY_KEY: HeaderName = HeaderName::from_static("idempotency-key");

fn server(h: &Harness) -> TestServer {
    let state = AppState::new(h.accounts.clone(), h.transactions.clone(), h.broadcaster.clone());
    TestServer::new(build_router(state)).unwrap()
}

async fn create_account(server: &TestServer, key: &'static str) -> Value {
    let response = server
        .post("/api/accounts")
        .add_header(IDEMPOTENCY_KEY, HeaderValue::from_static(key))
        .json(&json!({"customerId": "CUST1", "country": "EE", "currencies": ["EUR"]}))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json::<Value>()
}

#[tokio::test]
async fn create_and_read_an_account() {
    let h = Harness::start().await;
    let server = server(&h);

    let created = create_account(&server, "acc-1").await;
    assert_eq!(created["balances"][0]["currency"], "EUR");
    assert_eq!(created["balances"][0]["version"], 1);

    let id = created["accountId"].as_str().unwrap();
    let fetched = server.get(&format!("/api/accounts/{id}")).await;
    fetched.assert_status_ok();
    assert_eq!(fetched.json::<Value>(), created);

    h.stop().await;
}

#[tokio::test]
async fn transaction_lifecycle_over_http() {
    let h = Harness::start().await;
    let server = server(&h);
    let account = create_account(&server, "acc-1").await;
    let id = account["accountId"].as_str().unwrap();

    let credit = server
        .post("/api/transactions")
        .add_header(IDEMPOTENCY_KEY, HeaderValue::from_static("tx-1"))
        .json(&json!({
            "accountId": id,
            "amount": "100.00",
            "currency": "EUR",
            "direction": "IN",
            "description": "salary"
        }))
        .await;
    credit.assert_status(StatusCode::CREATED);
    let credit = credit.json::<Value>();
    assert_eq!(credit["status"], "COMPLETED");
    assert_eq!(credit["balance"]["version"], 2);

    let overdraft = server
        .post("/api/transactions")
        .add_header(IDEMPOTENCY_KEY, HeaderValue::from_static("tx-2"))
        .json(&json!({"accountId": id, "amount": "150.00", "currency": "EUR", "direction": "OUT"}))
        .await;
    overdraft.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body = overdraft.json::<Value>();
    assert_eq!(body["code"], "INSUFFICIENT_FUNDS");
    assert!(body["traceId"].is_string());

    let history = server.get(&format!("/api/accounts/{id}/transactions")).await;
    history.assert_status_ok();
    assert_eq!(history.json::<Vec<Value>>().len(), 1);

    h.stop().await;
}

#[tokio::test]
async fn same_key_same_body() {
    let h = Harness::start().await;
    let server = server(&h);

    let first = server
        .post("/api/accounts")
        .add_header(IDEMPOTENCY_KEY, HeaderValue::from_static("once"))
        .json(&json!({"customerId": "CUST1", "country": "EE", "currencies": ["EUR"]}))
        .await;
    let second = server
        .post("/api/accounts")
        .add_header(IDEMPOTENCY_KEY, HeaderValue::from_static("once"))
        .json(&json!({"customerId": "CUST1", "country": "EE", "currencies": ["EUR"]}))
        .await;

    first.assert_status(StatusCode::CREATED);
    second.assert_status(StatusCode::CREATED);
    assert_eq!(first.as_bytes(), second.as_bytes());
    assert_eq!(h.bus.publish_count(&h.routing.account_commands), 1);

    h.stop().await;
}

#[tokio::test]
async fn validation_errors_are_400_and_publish_nothing() {
    let h = Harness::start().await;
    let server = server(&h);

    let response = server
        .post("/api/accounts")
        .json(&json!({"customerId": "CUST1", "country": "EST", "currencies": ["EUR"]}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["code"], "VALIDATION_FAILED");

    let bad_key = server
        .post("/api/accounts")
        .add_header(IDEMPOTENCY_KEY, HeaderValue::from_static("has space"))
        .json(&json!({"customerId": "CUST1", "country": "EE", "currencies": ["EUR"]}))
        .await;
    bad_key.assert_status(StatusCode::BAD_REQUEST);

    assert_eq!(h.bus.publish_count(&h.routing.account_commands), 0);
    h.stop().await;
}

#[tokio::test]
async fn unknown_account_is_404() {
    let h = Harness::start().await;
    let server = server(&h);

    let response = server
        .get(&format!("/api/accounts/{}", uuid::Uuid::new_v4()))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["code"], "ACCOUNT_NOT_FOUND");

    h.stop().await;
}

#[tokio::test]
async fn silent_ledger_is_a_gateway_timeout() {
    let h = Harness::without_ledger(Duration::from_millis(100)).await;
    let server = server(&h);

    let response = server
        .post("/api/accounts")
        .json(&json!({"customerId": "CUST1", "country": "EE", "currencies": ["EUR"]}))
        .await;

    response.assert_status(StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(response.json::<Value>()["code"], "TIMEOUT");
    h.stop().await;
}

#[tokio::test]
async fn health_is_ok() {
    let h = Harness::start().await;
    server(&h).get("/health").await.assert_status_ok();
    h.stop().await;
}
