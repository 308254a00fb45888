#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request, Response},
    Router,
};
use checkout_service::config::{
    ClientConfig, Config, DatabaseConfig, GatewayConfig, OpsConfig, StoreBackend,
};
use checkout_service::services::InMemoryTransactionStore;
use checkout_service::{build_router, AppState};
use http_body_util::BodyExt;
use secrecy::Secret;
use service_core::config::Config as CoreConfig;
use std::sync::Arc;
use tower::ServiceExt;

pub const SECRET_KEY: &str = "8gBm/:&EnhH.1/q";
pub const OPS_API_KEY: &str = "test-ops-key";
pub const FORM_URL: &str = "https://rc-epay.esewa.com.np/api/epay/main/v2/form";
pub const SUCCESS_URL: &str = "http://localhost:5173/payment/success";
pub const FAILURE_URL: &str = "http://localhost:5173/payment/failure";

pub fn test_config() -> Config {
    Config {
        common: CoreConfig {
            port: 0,
            ..CoreConfig::default()
        },
        database: DatabaseConfig {
            backend: StoreBackend::Memory,
            url: Secret::new("mongodb://localhost:27017".to_string()),
            db_name: "checkout_test".to_string(),
        },
        gateway: GatewayConfig {
            form_url: FORM_URL.to_string(),
            product_code: "EPAYTEST".to_string(),
            secret_key: Secret::new(SECRET_KEY.to_string()),
            merchant_prefix: "FIT".to_string(),
            callback_base_url: "http://localhost:3003".to_string(),
        },
        client: ClientConfig {
            success_url: SUCCESS_URL.to_string(),
            failure_url: FAILURE_URL.to_string(),
        },
        ops: OpsConfig {
            api_key: Secret::new(OPS_API_KEY.to_string()),
        },
        otlp_endpoint: None,
        service_name: "checkout-service-test".to_string(),
    }
}

/// Router over an in-memory store, driven without a socket.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemoryTransactionStore>,
}

impl TestApp {
    pub fn spawn() -> Self {
        let store = Arc::new(InMemoryTransactionStore::new());
        let state = AppState::new(test_config(), store.clone());

        Self {
            router: build_router(state),
            store,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Router failed to respond")
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> Response<Body> {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn post_form(&self, uri: &str, body: &str) -> Response<Body> {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    /// Initiate a checkout and return the generated transaction id.
    pub async fn initiate(&self, amount: serde_json::Value) -> String {
        let response = self
            .post_json(
                "/payments/initiate",
                serde_json::json!({
                    "full_name": "Asha Rai",
                    "email": "asha@example.com",
                    "phone": "9800000000",
                    "address": "Kathmandu",
                    "plan": "annual",
                    "amount": amount
                }),
            )
            .await;
        assert_eq!(response.status(), 200);

        let body = json_body(response).await;
        body["params"]["transaction_uuid"]
            .as_str()
            .expect("transaction_uuid missing")
            .to_string()
    }
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("Body is not JSON")
}

pub fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .expect("Missing Location header")
        .to_str()
        .unwrap()
        .to_string()
}
