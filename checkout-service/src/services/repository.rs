use crate::models::{PaymentTransaction, ReconciliationAnomaly, ReviewReason, TransactionStatus};
use crate::services::store::{StoreError, TransactionStore};
use anyhow::Result;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{FindOptions, IndexOptions};
use mongodb::{
    bson::{doc, to_bson, DateTime},
    Collection, Database, IndexModel,
};

const DUPLICATE_KEY: i32 = 11000;

/// MongoDB-backed transaction store.
#[derive(Clone)]
pub struct MongoTransactionStore {
    db: Database,
    transaction_collection: Collection<PaymentTransaction>,
    anomaly_collection: Collection<ReconciliationAnomaly>,
}

impl MongoTransactionStore {
    pub fn new(db: &Database) -> Self {
        Self {
            db: db.clone(),
            transaction_collection: db.collection("payment_transactions"),
            anomaly_collection: db.collection("reconciliation_anomalies"),
        }
    }

    /// Initialize database indexes.
    ///
    /// Uniqueness of the transaction id comes from `_id` itself.
    pub async fn init_indexes(&self) -> Result<()> {
        let status_index = IndexModel::builder()
            .keys(doc! { "status": 1, "created_at": -1 })
            .options(
                IndexOptions::builder()
                    .name("status_created_idx".to_string())
                    .build(),
            )
            .build();

        let order_index = IndexModel::builder()
            .keys(doc! { "order_reference": 1 })
            .options(
                IndexOptions::builder()
                    .name("order_reference_idx".to_string())
                    .sparse(true)
                    .build(),
            )
            .build();

        self.transaction_collection
            .create_indexes([status_index, order_index], None)
            .await?;

        let anomaly_index = IndexModel::builder()
            .keys(doc! { "created_at": -1 })
            .options(
                IndexOptions::builder()
                    .name("anomaly_created_idx".to_string())
                    .build(),
            )
            .build();

        self.anomaly_collection
            .create_index(anomaly_index, None)
            .await?;

        tracing::info!("Checkout service indexes initialized");
        Ok(())
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY
    )
}

fn db_error(err: impl Into<anyhow::Error>) -> StoreError {
    StoreError::Database(err.into())
}

#[async_trait]
impl TransactionStore for MongoTransactionStore {
    async fn create(&self, transaction: &PaymentTransaction) -> Result<(), StoreError> {
        match self.transaction_collection.insert_one(transaction, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => {
                Err(StoreError::Duplicate(transaction.transaction_id.clone()))
            }
            Err(e) => Err(db_error(e)),
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<PaymentTransaction>, StoreError> {
        let filter = doc! { "_id": id };
        self.transaction_collection
            .find_one(filter, None)
            .await
            .map_err(db_error)
    }

    async fn try_transition(
        &self,
        id: &str,
        from: TransactionStatus,
        to: TransactionStatus,
        gateway_reference: Option<&str>,
    ) -> Result<bool, StoreError> {
        // The status predicate makes this a compare-and-set: concurrent
        // callbacks for one id can only ever see one modified document.
        let filter = doc! {
            "_id": id,
            "status": to_bson(&from).map_err(db_error)?,
        };

        let mut set = doc! {
            "status": to_bson(&to).map_err(db_error)?,
            "resolved_at": DateTime::now(),
        };
        if let Some(reference) = gateway_reference {
            set.insert("gateway_reference", reference);
        }

        let result = self
            .transaction_collection
            .update_one(filter, doc! { "$set": set }, None)
            .await
            .map_err(db_error)?;

        Ok(result.modified_count == 1)
    }

    async fn flag_for_review(&self, id: &str, reason: ReviewReason) -> Result<(), StoreError> {
        let filter = doc! { "_id": id };
        let update = doc! {
            "$set": { "review_reason": to_bson(&reason).map_err(db_error)? }
        };
        self.transaction_collection
            .update_one(filter, update, None)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn record_anomaly(&self, anomaly: &ReconciliationAnomaly) -> Result<(), StoreError> {
        self.anomaly_collection
            .insert_one(anomaly, None)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn list_anomalies(&self, limit: i64) -> Result<Vec<ReconciliationAnomaly>, StoreError> {
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .limit(limit)
            .build();

        let cursor = self
            .anomaly_collection
            .find(doc! {}, Some(options))
            .await
            .map_err(db_error)?;

        cursor.try_collect().await.map_err(db_error)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.db
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}
