mod common;

use axum::body::Body;
use axum::http::Request;
use common::{json_body, TestApp, OPS_API_KEY};
use serde_json::json;

fn anomalies_request(key: Option<&str>, query: &str) -> Request<Body> {
    let mut builder = Request::builder().uri(format!("/ops/anomalies{}", query));
    if let Some(key) = key {
        builder = builder.header("X-Internal-Api-Key", key);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn anomalies_require_api_key() {
    let app = TestApp::spawn();

    let missing = app.send(anomalies_request(None, "")).await;
    let wrong = app.send(anomalies_request(Some("nope"), "")).await;

    assert_eq!(missing.status(), 401);
    assert_eq!(wrong.status(), 401);
}

#[tokio::test]
async fn unreconciled_callbacks_are_listed_newest_first() {
    let app = TestApp::spawn();
    let id = app.initiate(json!(100)).await;

    app.get("/payments/esewa/success").await;
    app.get(&format!(
        "/payments/esewa/success?transaction_uuid={}&total_amount=7",
        id
    ))
    .await;

    let response = app.send(anomalies_request(Some(OPS_API_KEY), "")).await;
    assert_eq!(response.status(), 200);

    let body = json_body(response).await;
    let anomalies = body.as_array().unwrap();
    assert_eq!(anomalies.len(), 2);
    assert_eq!(anomalies[0]["kind"], "amount_mismatch");
    assert_eq!(anomalies[0]["transaction_uuid"], id.as_str());
    assert_eq!(anomalies[0]["reported_amount"], "7");
    assert_eq!(anomalies[0]["expected_amount"], "100");
    assert_eq!(anomalies[1]["kind"], "missing_fields");
}

#[tokio::test]
async fn anomaly_limit_is_applied() {
    let app = TestApp::spawn();
    for _ in 0..3 {
        app.get("/payments/esewa/success").await;
    }

    let response = app
        .send(anomalies_request(Some(OPS_API_KEY), "?limit=2"))
        .await;

    let body = json_body(response).await;
    assert_eq!(body.as_array().unwrap().len(), 2);
}
