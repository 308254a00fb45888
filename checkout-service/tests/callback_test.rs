mod common;

use base64::{engine::general_purpose, Engine as _};
use common::{json_body, location, TestApp, FAILURE_URL, SECRET_KEY, SUCCESS_URL};
use serde_json::json;
use service_core::utils::signature::sign_fields;

async fn status_of(app: &TestApp, id: &str) -> String {
    let body = json_body(app.get(&format!("/payments/{}", id)).await).await;
    body["status"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn success_callback_completes_payment() {
    let app = TestApp::spawn();
    let id = app.initiate(json!(100)).await;

    let response = app
        .get(&format!(
            "/payments/esewa/success?transaction_uuid={}&total_amount=100&refId=R1",
            id
        ))
        .await;

    assert_eq!(response.status(), 303);
    assert_eq!(
        location(&response),
        format!(
            "{}?status=success&transaction_uuid={}&amount=100&refId=R1",
            SUCCESS_URL, id
        )
    );

    let body = json_body(app.get(&format!("/payments/{}", id)).await).await;
    assert_eq!(body["status"], "SUCCEEDED");
    assert_eq!(body["gateway_reference"], "R1");
}

#[tokio::test]
async fn repeated_success_callback_is_idempotent() {
    let app = TestApp::spawn();
    let id = app.initiate(json!(100)).await;
    let form = format!("oid={}&amt=100&refId=R1", id);

    let first = app.post_form("/payments/esewa/success", &form).await;
    let second = app.post_form("/payments/esewa/success", &form).await;

    assert_eq!(location(&first), location(&second));
    assert!(location(&second).starts_with(SUCCESS_URL));
    assert_eq!(status_of(&app, &id).await, "SUCCEEDED");
}

#[tokio::test]
async fn mismatched_amount_fails_payment() {
    let app = TestApp::spawn();
    let id = app.initiate(json!(100)).await;

    let response = app
        .get(&format!(
            "/payments/esewa/success?transaction_uuid={}&total_amount=1",
            id
        ))
        .await;

    assert_eq!(response.status(), 303);
    assert_eq!(
        location(&response),
        format!("{}?reason=amount_mismatch&transaction_uuid={}", FAILURE_URL, id)
    );
    assert_eq!(status_of(&app, &id).await, "FAILED");
}

#[tokio::test]
async fn empty_success_callback_still_redirects() {
    let app = TestApp::spawn();
    let id = app.initiate(json!(100)).await;

    let response = app.get("/payments/esewa/success").await;

    assert_eq!(response.status(), 303);
    assert!(location(&response).starts_with(&format!("{}?status=success&message=", SUCCESS_URL)));
    assert_eq!(status_of(&app, &id).await, "PENDING");
}

#[tokio::test]
async fn failure_callback_fails_pending_payment() {
    let app = TestApp::spawn();
    let id = app.initiate(json!(100)).await;

    let response = app
        .get(&format!("/payments/esewa/failure?transaction_uuid={}", id))
        .await;

    assert_eq!(response.status(), 303);
    assert_eq!(
        location(&response),
        format!("{}?reason=payment_failed&transaction_uuid={}", FAILURE_URL, id)
    );
    assert_eq!(status_of(&app, &id).await, "FAILED");
}

#[tokio::test]
async fn failure_after_success_keeps_payment_succeeded() {
    let app = TestApp::spawn();
    let id = app.initiate(json!(100)).await;

    app.get(&format!(
        "/payments/esewa/success?transaction_uuid={}&total_amount=100",
        id
    ))
    .await;
    let response = app
        .post_form("/payments/esewa/failure", &format!("pid={}", id))
        .await;

    assert!(location(&response).starts_with(FAILURE_URL));
    assert_eq!(status_of(&app, &id).await, "SUCCEEDED");
}

#[tokio::test]
async fn signed_envelope_completes_payment() {
    let app = TestApp::spawn();
    let id = app.initiate(json!(100)).await;

    let fields = [
        ("transaction_code", "000AWEO"),
        ("status", "COMPLETE"),
        ("total_amount", "100.0"),
        ("transaction_uuid", id.as_str()),
        ("product_code", "EPAYTEST"),
    ];
    let signature = sign_fields(&fields, SECRET_KEY.as_bytes()).unwrap();
    let mut envelope = serde_json::Map::new();
    for (k, v) in fields {
        envelope.insert(k.to_string(), json!(v));
    }
    envelope.insert(
        "signed_field_names".to_string(),
        json!("transaction_code,status,total_amount,transaction_uuid,product_code"),
    );
    envelope.insert("signature".to_string(), json!(signature));
    let data = general_purpose::STANDARD.encode(serde_json::Value::Object(envelope).to_string());

    let response = app
        .get(&format!(
            "/payments/esewa/success?{}",
            serde_urlencoded::to_string([("data", data.as_str())]).unwrap()
        ))
        .await;

    assert_eq!(response.status(), 303);
    assert_eq!(
        location(&response),
        format!(
            "{}?status=success&transaction_uuid={}&amount=100&refId=000AWEO",
            SUCCESS_URL, id
        )
    );
    assert_eq!(status_of(&app, &id).await, "SUCCEEDED");
}
