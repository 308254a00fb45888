use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;

use crate::dtos::TransactionResponse;
use crate::startup::AppState;

/// Current state of a transaction, for the storefront's status page.
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Json<TransactionResponse>, AppError> {
    let transaction = state
        .store
        .find_by_id(&transaction_id)
        .await
        .map_err(|e| AppError::DatabaseError(e.into()))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Transaction not found")))?;

    Ok(Json(TransactionResponse::from(transaction)))
}
