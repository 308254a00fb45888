use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};

use crate::dtos::{CheckoutRequest, CheckoutResponse};
use crate::error::CheckoutError;
use crate::startup::AppState;

/// Create a PENDING transaction and return the signed gateway form.
pub async fn initiate_checkout(
    State(state): State<AppState>,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<Json<CheckoutResponse>, CheckoutError> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::debug!(error = %rejection, "Unreadable checkout body");
        CheckoutError::Validation(
            [("body".to_string(), vec![rejection.body_text()])]
                .into_iter()
                .collect(),
        )
    })?;

    let response = state.initiation.initiate(request).await?;
    Ok(Json(response))
}
