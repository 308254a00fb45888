//! Operator authentication for the `/ops` endpoints.
//!
//! Callers present the shared internal key in `X-Internal-Api-Key`. The key is
//! compared in constant time.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use secrecy::ExposeSecret;
use service_core::error::AppError;
use subtle::ConstantTimeEq;

use crate::startup::AppState;

pub const INTERNAL_API_KEY_HEADER: &str = "X-Internal-Api-Key";

/// Marker extractor: present only when the request carried a valid key.
#[derive(Debug, Clone, Copy)]
pub struct OpsAuth;

#[async_trait]
impl FromRequestParts<AppState> for OpsAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let provided = parts
            .headers
            .get(INTERNAL_API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Missing {} header", INTERNAL_API_KEY_HEADER))
            })?;

        let expected = state.config.ops.api_key.expose_secret();
        if expected.is_empty() || !bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
            tracing::warn!("Rejected operator request with invalid API key");
            return Err(AppError::Unauthorized(anyhow::anyhow!("Invalid API key")));
        }

        Ok(OpsAuth)
    }
}
