use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use service_core::utils::signature::SignatureError;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::dtos::CheckoutErrorResponse;
use crate::services::store::StoreError;

/// Failures of the checkout initiation endpoint.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("Validation failed: {0:?}")]
    Validation(BTreeMap<String, Vec<String>>),

    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),
}

impl IntoResponse for CheckoutError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            CheckoutError::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                CheckoutErrorResponse {
                    success: false,
                    message: "Validation failed".to_string(),
                    errors: Some(errors),
                },
            ),
            CheckoutError::Signature(err) => {
                tracing::error!(error = %err, "Failed to sign payment request");
                (StatusCode::INTERNAL_SERVER_ERROR, internal_error_body())
            }
            CheckoutError::Persistence(err) => {
                tracing::error!(error = %err, "Failed to persist payment transaction");
                (StatusCode::INTERNAL_SERVER_ERROR, internal_error_body())
            }
        };

        (status, Json(body)).into_response()
    }
}

fn internal_error_body() -> CheckoutErrorResponse {
    CheckoutErrorResponse {
        success: false,
        message: "Unable to initiate payment. Please try again later.".to_string(),
        errors: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use serde_json::Value;

    async fn body_of(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_persistence_failure_is_generic_500() {
        let err = CheckoutError::from(StoreError::Database(anyhow::anyhow!(
            "connection refused to mongodb://10.0.0.5"
        )));
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_of(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(
            body["message"],
            "Unable to initiate payment. Please try again later."
        );
        assert!(body.get("errors").is_none());
        assert!(!body.to_string().contains("10.0.0.5"));
    }

    #[tokio::test]
    async fn test_validation_failure_lists_fields() {
        let errors = BTreeMap::from([("email".to_string(), vec!["Invalid email".to_string()])]);
        let response = CheckoutError::Validation(errors).into_response();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_of(response).await;
        assert_eq!(body["message"], "Validation failed");
        assert_eq!(body["errors"]["email"][0], "Invalid email");
    }
}
