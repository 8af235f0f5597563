//! Quota-gated endpoint integration tests.

mod common;

use axum::http::StatusCode;
use common::TestHarness;
use mailpool_core::UserId;
use serde_json::json;

/// Buy, settle, and activate a basic key for the user; returns the key code.
async fn issue_active_key(harness: &TestHarness, user: UserId) -> String {
    let response = harness
        .server
        .post("/v1/orders")
        .add_header("authorization", harness.auth_header(user))
        .json(&json!({ "type": "basic" }))
        .await;
    let order: serde_json::Value = response.json();
    let order_no = order["order_no"].as_str().unwrap();

    let response = harness
        .server
        .post("/v1/payments/notify")
        .json(&json!({
            "order_no": order_no,
            "transaction_id": "txn",
            "payment_method": "alipay"
        }))
        .await;
    let key: serde_json::Value = response.json();
    let key_code = key["key_code"].as_str().unwrap().to_string();

    harness
        .server
        .post("/v1/keys/activate")
        .add_header("authorization", harness.auth_header(user))
        .json(&json!({ "key_code": key_code }))
        .await
        .assert_status_ok();

    key_code
}

#[tokio::test]
async fn verification_consumes_one_quota_unit_per_success() {
    let harness = TestHarness::new();
    let alice = UserId::new(1);
    let key_code = issue_active_key(&harness, alice).await;

    let response = harness
        .server
        .post("/v1/verify")
        .add_header("authorization", harness.auth_header(alice))
        .add_header("x-license-key", key_code.clone())
        .json(&json!({ "email": "ceo@widgets.example" }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["valid"], true);
    assert_eq!(body["label"], "business");
    assert_eq!(body["quota_remaining"], 99);

    // The key's meter moved exactly once.
    let response = harness
        .server
        .get(&format!("/v1/keys/check?key={key_code}"))
        .add_header("authorization", harness.auth_header(alice))
        .await;
    let check: serde_json::Value = response.json();
    assert_eq!(check["quota_remaining"], 99);
}

#[tokio::test]
async fn key_can_come_from_the_query_parameter() {
    let harness = TestHarness::new();
    let alice = UserId::new(1);
    let key_code = issue_active_key(&harness, alice).await;

    let response = harness
        .server
        .post(&format!("/v1/verify?key={key_code}"))
        .add_header("authorization", harness.auth_header(alice))
        .json(&json!({ "email": "alice@gmail.com" }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["label"], "free");
}

#[tokio::test]
async fn missing_or_foreign_keys_are_rejected() {
    let harness = TestHarness::new();
    let alice = UserId::new(1);
    let bob = UserId::new(2);
    let key_code = issue_active_key(&harness, alice).await;

    // No key at all.
    harness
        .server
        .post("/v1/verify")
        .add_header("authorization", harness.auth_header(alice))
        .json(&json!({ "email": "x@widgets.example" }))
        .await
        .assert_status_unauthorized();

    // Someone else's key.
    harness
        .server
        .post("/v1/verify")
        .add_header("authorization", harness.auth_header(bob))
        .add_header("x-license-key", key_code)
        .json(&json!({ "email": "x@widgets.example" }))
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unactivated_keys_cannot_pass_the_gate() {
    let harness = TestHarness::new();
    let alice = UserId::new(1);

    let response = harness
        .server
        .post("/v1/orders")
        .add_header("authorization", harness.auth_header(alice))
        .json(&json!({ "type": "basic" }))
        .await;
    let order: serde_json::Value = response.json();
    let response = harness
        .server
        .post("/v1/payments/notify")
        .json(&json!({
            "order_no": order["order_no"],
            "transaction_id": "txn",
            "payment_method": "alipay"
        }))
        .await;
    let key: serde_json::Value = response.json();

    harness
        .server
        .post("/v1/verify")
        .add_header("authorization", harness.auth_header(alice))
        .add_header("x-license-key", key["key_code"].as_str().unwrap().to_string())
        .json(&json!({ "email": "x@widgets.example" }))
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn invalid_addresses_still_cost_quota() {
    let harness = TestHarness::new();
    let alice = UserId::new(1);
    let key_code = issue_active_key(&harness, alice).await;

    let response = harness
        .server
        .post("/v1/verify")
        .add_header("authorization", harness.auth_header(alice))
        .add_header("x-license-key", key_code.clone())
        .json(&json!({ "email": "not-an-address" }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["valid"], false);
    assert!(body["label"].is_null());

    let response = harness
        .server
        .get(&format!("/v1/keys/check?key={key_code}"))
        .add_header("authorization", harness.auth_header(alice))
        .await;
    let check: serde_json::Value = response.json();
    assert_eq!(check["quota_remaining"], 99);
}
