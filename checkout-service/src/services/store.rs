//! Transaction store seam.
//!
//! The initiation service creates transactions, the reconciler transitions
//! them. `try_transition` is the only way `status` changes and must be an
//! atomic compare-and-set on the current status.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{PaymentTransaction, ReconciliationAnomaly, ReviewReason, TransactionStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Transaction already exists: {0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert a new transaction. Fails with `Duplicate` if the id is taken.
    async fn create(&self, transaction: &PaymentTransaction) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<PaymentTransaction>, StoreError>;

    /// Move `id` from `from` to `to`, storing the gateway reference if given.
    ///
    /// Returns `true` only if this call changed the stored status.
    async fn try_transition(
        &self,
        id: &str,
        from: TransactionStatus,
        to: TransactionStatus,
        gateway_reference: Option<&str>,
    ) -> Result<bool, StoreError>;

    async fn flag_for_review(&self, id: &str, reason: ReviewReason) -> Result<(), StoreError>;

    async fn record_anomaly(&self, anomaly: &ReconciliationAnomaly) -> Result<(), StoreError>;

    /// Most recent anomalies first.
    async fn list_anomalies(&self, limit: i64) -> Result<Vec<ReconciliationAnomaly>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Store whose backend is down: every call fails.
#[cfg(test)]
pub(crate) struct UnavailableStore;

#[cfg(test)]
#[async_trait]
impl TransactionStore for UnavailableStore {
    async fn create(&self, _transaction: &PaymentTransaction) -> Result<(), StoreError> {
        Err(unavailable())
    }

    async fn find_by_id(&self, _id: &str) -> Result<Option<PaymentTransaction>, StoreError> {
        Err(unavailable())
    }

    async fn try_transition(
        &self,
        _id: &str,
        _from: TransactionStatus,
        _to: TransactionStatus,
        _gateway_reference: Option<&str>,
    ) -> Result<bool, StoreError> {
        Err(unavailable())
    }

    async fn flag_for_review(&self, _id: &str, _reason: ReviewReason) -> Result<(), StoreError> {
        Err(unavailable())
    }

    async fn record_anomaly(&self, _anomaly: &ReconciliationAnomaly) -> Result<(), StoreError> {
        Err(unavailable())
    }

    async fn list_anomalies(&self, _limit: i64) -> Result<Vec<ReconciliationAnomaly>, StoreError> {
        Err(unavailable())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Err(unavailable())
    }
}

#[cfg(test)]
fn unavailable() -> StoreError {
    StoreError::Database(anyhow::anyhow!("connection refused"))
}
