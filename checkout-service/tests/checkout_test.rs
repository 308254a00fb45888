mod common;

use common::{json_body, TestApp, FORM_URL, SECRET_KEY};
use serde_json::json;
use service_core::utils::signature::sign_fields;

#[tokio::test]
async fn initiate_returns_signed_gateway_form() {
    let app = TestApp::spawn();

    let response = app
        .post_json(
            "/payments/initiate",
            json!({
                "full_name": "A",
                "email": "a@b.com",
                "phone": "1",
                "address": "x",
                "plan": "pro",
                "amount": 100
            }),
        )
        .await;

    assert_eq!(response.status(), 200);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["url"], FORM_URL);

    let params = &body["params"];
    assert_eq!(params["total_amount"], "100");
    assert_eq!(params["tax_amount"], "0");
    assert_eq!(params["product_code"], "EPAYTEST");
    assert_eq!(
        params["signed_field_names"],
        "total_amount,transaction_uuid,product_code"
    );
    assert_eq!(
        params["success_url"],
        "http://localhost:3003/payments/esewa/success"
    );

    let transaction_uuid = params["transaction_uuid"].as_str().unwrap();
    assert!(transaction_uuid.starts_with("FIT_"));

    let expected = sign_fields(
        &[
            ("total_amount", "100"),
            ("transaction_uuid", transaction_uuid),
            ("product_code", "EPAYTEST"),
        ],
        SECRET_KEY.as_bytes(),
    )
    .unwrap();
    assert_eq!(params["signature"], expected);
}

#[tokio::test]
async fn initiated_transaction_is_pending() {
    let app = TestApp::spawn();
    let id = app.initiate(json!("250.50")).await;

    let response = app.get(&format!("/payments/{}", id)).await;

    assert_eq!(response.status(), 200);
    let body = json_body(response).await;
    assert_eq!(body["transaction_uuid"], id.as_str());
    assert_eq!(body["status"], "PENDING");
    assert_eq!(body["total_amount"], "250.5");
    assert!(body["resolved_at"].is_null());
}

#[tokio::test]
async fn invalid_request_lists_every_failing_field() {
    let app = TestApp::spawn();

    let response = app
        .post_json(
            "/payments/initiate",
            json!({ "full_name": "  ", "email": "not-an-email", "amount": 0 }),
        )
        .await;

    assert_eq!(response.status(), 422);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Validation failed");
    for field in ["full_name", "email", "phone", "address", "plan", "amount"] {
        assert!(
            body["errors"][field].is_array(),
            "expected an error for {}",
            field
        );
    }
    assert!(app.store.is_empty());
}

#[tokio::test]
async fn negative_charge_is_rejected() {
    let app = TestApp::spawn();

    let response = app
        .post_json(
            "/payments/initiate",
            json!({
                "full_name": "A",
                "email": "a@b.com",
                "phone": "1",
                "address": "x",
                "plan": "pro",
                "amount": 100,
                "tax_amount": -5
            }),
        )
        .await;

    assert_eq!(response.status(), 422);
    let body = json_body(response).await;
    assert!(body["errors"]["tax_amount"].is_array());
}

#[tokio::test]
async fn total_beyond_decimal_range_is_rejected() {
    let app = TestApp::spawn();

    let response = app
        .post_json(
            "/payments/initiate",
            json!({
                "full_name": "A",
                "email": "a@b.com",
                "phone": "1",
                "address": "x",
                "plan": "pro",
                "amount": "79228162514264337593543950335",
                "tax_amount": "1"
            }),
        )
        .await;

    assert_eq!(response.status(), 422);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert!(body["errors"]["amount"].is_array());
    assert!(app.store.is_empty());
}

#[tokio::test]
async fn malformed_body_is_a_validation_error() {
    let app = TestApp::spawn();

    let response = app
        .send(
            axum::http::Request::builder()
                .method("POST")
                .uri("/payments/initiate")
                .header("content-type", "application/json")
                .body(axum::body::Body::from("{oops"))
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), 422);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert!(body["errors"]["body"].is_array());
}

#[tokio::test]
async fn unknown_transaction_is_not_found() {
    let app = TestApp::spawn();

    let response = app.get("/payments/FIT_0_missing").await;

    assert_eq!(response.status(), 404);
}
