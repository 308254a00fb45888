use axum::{
    extract::{Query, State},
    Json,
};
use service_core::error::AppError;

use crate::dtos::{AnomalyResponse, ListAnomaliesQuery};
use crate::middleware::OpsAuth;
use crate::startup::AppState;

const DEFAULT_ANOMALY_LIMIT: i64 = 50;
const MAX_ANOMALY_LIMIT: i64 = 500;

/// Most recent reconciliation anomalies, newest first.
pub async fn list_anomalies(
    _auth: OpsAuth,
    State(state): State<AppState>,
    Query(query): Query<ListAnomaliesQuery>,
) -> Result<Json<Vec<AnomalyResponse>>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_ANOMALY_LIMIT)
        .clamp(1, MAX_ANOMALY_LIMIT);

    let anomalies = state
        .store
        .list_anomalies(limit)
        .await
        .map_err(|e| AppError::DatabaseError(e.into()))?;

    Ok(Json(anomalies.into_iter().map(AnomalyResponse::from).collect()))
}
