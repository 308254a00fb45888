use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};

use crate::models::{PaymentTransaction, ReconciliationAnomaly, ReviewReason, TransactionStatus};
use crate::services::store::{StoreError, TransactionStore};

/// In-process store for tests and local demos.
///
/// Each status transition holds the entry's shard lock for the whole
/// compare-and-set, which gives the same guarantee as the conditional update
/// in MongoDB.
#[derive(Clone, Default)]
pub struct InMemoryTransactionStore {
    transactions: Arc<DashMap<String, PaymentTransaction>>,
    anomalies: Arc<Mutex<Vec<ReconciliationAnomaly>>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    fn lock_anomalies(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, Vec<ReconciliationAnomaly>>, StoreError> {
        self.anomalies
            .lock()
            .map_err(|_| StoreError::Database(anyhow::anyhow!("anomaly log lock poisoned")))
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn create(&self, transaction: &PaymentTransaction) -> Result<(), StoreError> {
        match self.transactions.entry(transaction.transaction_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(transaction.transaction_id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(transaction.clone());
                Ok(())
            }
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<PaymentTransaction>, StoreError> {
        Ok(self.transactions.get(id).map(|entry| entry.value().clone()))
    }

    async fn try_transition(
        &self,
        id: &str,
        from: TransactionStatus,
        to: TransactionStatus,
        gateway_reference: Option<&str>,
    ) -> Result<bool, StoreError> {
        let Some(mut entry) = self.transactions.get_mut(id) else {
            return Ok(false);
        };

        if entry.status != from {
            return Ok(false);
        }

        entry.status = to;
        entry.resolved_at = Some(Utc::now());
        if let Some(reference) = gateway_reference {
            entry.gateway_reference = Some(reference.to_string());
        }
        Ok(true)
    }

    async fn flag_for_review(&self, id: &str, reason: ReviewReason) -> Result<(), StoreError> {
        if let Some(mut entry) = self.transactions.get_mut(id) {
            entry.review_reason = Some(reason);
        }
        Ok(())
    }

    async fn record_anomaly(&self, anomaly: &ReconciliationAnomaly) -> Result<(), StoreError> {
        self.lock_anomalies()?.push(anomaly.clone());
        Ok(())
    }

    async fn list_anomalies(&self, limit: i64) -> Result<Vec<ReconciliationAnomaly>, StoreError> {
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        let anomalies = self.lock_anomalies()?;
        Ok(anomalies.iter().rev().take(limit).cloned().collect())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
