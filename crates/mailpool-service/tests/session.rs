//! Login and rate-limiter integration tests.

mod common;

use axum::http::StatusCode;
use common::TestHarness;
use serde_json::json;

// ============================================================================
// Token issuance
// ============================================================================

#[tokio::test]
async fn login_issues_a_working_token() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/auth/token")
        .json(&json!({
            "email": "alice@mail.test",
            "password": "correct-horse"
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["user_id"], 1);
    assert_eq!(body["email"], "alice@mail.test");
    let token = body["token"].as_str().unwrap().to_string();

    // The issued token authenticates a protected route.
    harness
        .server
        .get("/v1/keys")
        .add_header("authorization", format!("Bearer {token}"))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn wrong_password_is_unauthorized_and_reports_remaining_attempts() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/auth/token")
        .json(&json!({
            "email": "alice@mail.test",
            "password": "wrong"
        }))
        .await;
    response.assert_status_unauthorized();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["details"]["remaining_attempts"], 4);
}

#[tokio::test]
async fn unknown_email_is_unauthorized() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/v1/auth/token")
        .json(&json!({
            "email": "nobody@mail.test",
            "password": "correct-horse"
        }))
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn protected_routes_reject_missing_and_garbage_tokens() {
    let harness = TestHarness::new();

    harness.server.get("/v1/keys").await.assert_status_unauthorized();
    harness
        .server
        .get("/v1/keys")
        .add_header("authorization", "Bearer not-a-jwt")
        .await
        .assert_status_unauthorized();
}

// ============================================================================
// Rate limiting
// ============================================================================

#[tokio::test]
async fn five_failures_block_the_client_ip() {
    let harness = TestHarness::new();

    for _ in 0..5 {
        harness
            .server
            .post("/v1/auth/token")
            .add_header("x-forwarded-for", "9.9.9.9")
            .json(&json!({
                "email": "alice@mail.test",
                "password": "wrong"
            }))
            .await
            .assert_status_unauthorized();
    }

    // Blocked now, even with the right password.
    let response = harness
        .server
        .post("/v1/auth/token")
        .add_header("x-forwarded-for", "9.9.9.9")
        .json(&json!({
            "email": "alice@mail.test",
            "password": "correct-horse"
        }))
        .await;
    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    let body: serde_json::Value = response.json();
    assert!(body["error"]["details"]["retry_after_seconds"].as_u64().unwrap() > 0);

    // A different client is unaffected.
    harness
        .server
        .post("/v1/auth/token")
        .add_header("x-forwarded-for", "8.8.8.8")
        .json(&json!({
            "email": "alice@mail.test",
            "password": "correct-horse"
        }))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn blocked_clients_get_429_before_the_body_is_parsed() {
    let harness = TestHarness::new();

    for _ in 0..5 {
        harness
            .server
            .post("/v1/auth/token")
            .add_header("x-forwarded-for", "6.6.6.6")
            .json(&json!({
                "email": "alice@mail.test",
                "password": "wrong"
            }))
            .await
            .assert_status_unauthorized();
    }

    // A malformed body from a blocked client never reaches the extractor;
    // the limiter answers from the headers alone.
    harness
        .server
        .post("/v1/auth/token")
        .add_header("x-forwarded-for", "6.6.6.6")
        .text("{not json")
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);

    // An unblocked client with the same malformed body still gets the
    // extractor's rejection, so the gate is not swallowing everything.
    let response = harness
        .server
        .post("/v1/auth/token")
        .add_header("x-forwarded-for", "5.5.5.5")
        .text("{not json")
        .await;
    assert!(response.status_code().is_client_error());
    assert_ne!(response.status_code(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn success_resets_the_failure_count() {
    let harness = TestHarness::new();

    for round in 0..2 {
        for _ in 0..4 {
            harness
                .server
                .post("/v1/auth/token")
                .add_header("x-forwarded-for", "7.7.7.7")
                .json(&json!({
                    "email": "alice@mail.test",
                    "password": "wrong"
                }))
                .await
                .assert_status_unauthorized();
        }
        let response = harness
            .server
            .post("/v1/auth/token")
            .add_header("x-forwarded-for", "7.7.7.7")
            .json(&json!({
                "email": "alice@mail.test",
                "password": "correct-horse"
            }))
            .await;
        assert!(
            response.status_code().is_success(),
            "round {round}: login after 4 failures should still succeed"
        );
    }
}
