//! Maps gateway success/failure callbacks onto stored transactions.
//!
//! Every callback ends in a redirect to the storefront. Callbacks that cannot
//! be matched against a stored transaction still redirect, but leave a
//! `ReconciliationAnomaly` behind for operator review.

use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::ClientConfig;
use crate::models::{
    AnomalyKind, PaymentTransaction, ReconciliationAnomaly, ReviewReason, TransactionStatus,
};
use crate::services::callback::CallbackPayload;
use crate::services::gateway::{format_amount, EnvelopeCheck, EsewaGateway, STATUS_COMPLETE};
use crate::services::metrics;
use crate::services::store::{StoreError, TransactionStore};

const PENDING_CONFIRMATION_MESSAGE: &str =
    "Payment received. Your order will be confirmed shortly.";

const REASON_PAYMENT_FAILED: &str = "payment_failed";
const REASON_AMOUNT_MISMATCH: &str = "amount_mismatch";
const REASON_VERIFICATION_FAILED: &str = "verification_failed";

const CALLBACK_SUCCESS: &str = "success";
const CALLBACK_FAILURE: &str = "failure";

/// How a callback was resolved against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Succeeded,
    AlreadySucceeded,
    Failed,
    AlreadyFailed,
    AmountMismatch,
    InvalidSignature,
    FailureAfterSuccess,
    /// Redirected without touching the store.
    Unreconciled(AnomalyKind),
}

impl Resolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::Succeeded => "succeeded",
            Resolution::AlreadySucceeded => "already_succeeded",
            Resolution::Failed => "failed",
            Resolution::AlreadyFailed => "already_failed",
            Resolution::AmountMismatch => "amount_mismatch",
            Resolution::InvalidSignature => "invalid_signature",
            Resolution::FailureAfterSuccess => "failure_after_success",
            Resolution::Unreconciled(_) => "unreconciled",
        }
    }

    /// Whether the outcome was decided by a stored transaction.
    pub fn is_verified(self) -> bool {
        !matches!(
            self,
            Resolution::Unreconciled(_) | Resolution::InvalidSignature
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallbackOutcome {
    pub redirect_url: String,
    pub resolution: Resolution,
}

#[derive(Clone)]
pub struct CallbackReconciler {
    store: Arc<dyn TransactionStore>,
    gateway: EsewaGateway,
    client: ClientConfig,
}

impl CallbackReconciler {
    pub fn new(store: Arc<dyn TransactionStore>, gateway: EsewaGateway, client: ClientConfig) -> Self {
        Self {
            store,
            gateway,
            client,
        }
    }

    /// Handle the gateway's success callback.
    pub async fn on_success(&self, payload: &CallbackPayload) -> CallbackOutcome {
        match self.authenticate(payload).await {
            Ok(trusted) => {
                let outcome = self.reconcile_success(&trusted).await;
                self.finish(CALLBACK_SUCCESS, &trusted, outcome)
            }
            Err(rejected) => self.finish(CALLBACK_SUCCESS, payload, rejected),
        }
    }

    /// Handle the gateway's failure callback. Always redirects to the failure page.
    pub async fn on_failure(&self, payload: &CallbackPayload) -> CallbackOutcome {
        let outcome = self.reconcile_failure(payload).await;
        self.finish(CALLBACK_FAILURE, payload, outcome)
    }

    fn finish(
        &self,
        callback: &'static str,
        payload: &CallbackPayload,
        outcome: CallbackOutcome,
    ) -> CallbackOutcome {
        let reconciliation = if outcome.resolution.is_verified() {
            "verified"
        } else {
            "best_effort"
        };

        tracing::info!(
            callback,
            transaction_id = ?payload.transaction_id(),
            reported_amount = ?payload.amount(),
            gateway_reference = ?payload.gateway_reference(),
            resolution = outcome.resolution.as_str(),
            reconciliation,
            "Payment callback handled"
        );
        metrics::record_callback(callback, outcome.resolution.as_str());
        outcome
    }

    /// Check the signed envelope, if any.
    ///
    /// A verified envelope becomes the only source of the fields it signs; raw
    /// parameters that disagree with it reject the callback.
    async fn authenticate(&self, payload: &CallbackPayload) -> Result<CallbackPayload, CallbackOutcome> {
        let Some(envelope) = payload.envelope() else {
            return Ok(payload.clone());
        };

        match self.gateway.verify_envelope(envelope) {
            EnvelopeCheck::Verified => {
                let conflicts = payload.conflicting_fields();
                let trusted = payload.clone().trusting_envelope();
                if conflicts.is_empty() {
                    return Ok(trusted);
                }

                self.record(anomaly(
                    AnomalyKind::InvalidSignature,
                    &trusted,
                    format!(
                        "Unsigned parameters conflict with the signed envelope: {}",
                        conflicts.join(", ")
                    ),
                ))
                .await;
                Err(self.verification_failed(trusted.transaction_id()))
            }
            EnvelopeCheck::Unsigned => {
                tracing::warn!(
                    transaction_id = ?payload.transaction_id(),
                    "Response envelope carried no signature"
                );
                Ok(payload.clone())
            }
            EnvelopeCheck::Invalid => {
                self.record(anomaly(
                    AnomalyKind::InvalidSignature,
                    payload,
                    "Response envelope signature did not verify",
                ))
                .await;
                Err(self.verification_failed(payload.transaction_id()))
            }
        }
    }

    fn verification_failed(&self, transaction_id: Option<&str>) -> CallbackOutcome {
        CallbackOutcome {
            redirect_url: self.failure_redirect(REASON_VERIFICATION_FAILED, transaction_id),
            resolution: Resolution::InvalidSignature,
        }
    }

    async fn reconcile_success(&self, payload: &CallbackPayload) -> CallbackOutcome {
        if let Some(status) = payload.status() {
            if !status.eq_ignore_ascii_case(STATUS_COMPLETE) {
                tracing::warn!(
                    transaction_id = ?payload.transaction_id(),
                    status,
                    "Success callback reported a non-complete status"
                );
                return self.reconcile_failure(payload).await;
            }
        }

        let (Some(id), Some(raw_amount)) = (payload.transaction_id(), payload.amount()) else {
            return self
                .unreconciled(
                    anomaly(
                        AnomalyKind::MissingFields,
                        payload,
                        "Success callback without transaction id or amount",
                    ),
                )
                .await;
        };

        let Ok(reported) = Decimal::from_str(raw_amount) else {
            return self
                .unreconciled(
                    anomaly(
                        AnomalyKind::InvalidAmount,
                        payload,
                        format!("Reported amount is not numeric: {}", raw_amount),
                    ),
                )
                .await;
        };

        let transaction = match self.store.find_by_id(id).await {
            Ok(Some(transaction)) => transaction,
            Ok(None) => {
                return self
                    .unreconciled(
                        anomaly(
                            AnomalyKind::UnknownTransaction,
                            payload,
                            "Success callback for an unknown transaction",
                        ),
                    )
                    .await;
            }
            Err(e) => return self.store_unavailable(payload, e, CALLBACK_SUCCESS).await,
        };

        match transaction.status {
            TransactionStatus::Succeeded => CallbackOutcome {
                redirect_url: self.success_redirect(&transaction, transaction.gateway_reference.as_deref()),
                resolution: Resolution::AlreadySucceeded,
            },
            TransactionStatus::Failed => CallbackOutcome {
                redirect_url: self.failure_redirect(REASON_PAYMENT_FAILED, Some(id)),
                resolution: Resolution::AlreadyFailed,
            },
            TransactionStatus::Pending if reported == transaction.total_amount => {
                self.complete(payload, transaction).await
            }
            TransactionStatus::Pending => self.reject_mismatch(payload, transaction, raw_amount).await,
        }
    }

    async fn complete(
        &self,
        payload: &CallbackPayload,
        transaction: PaymentTransaction,
    ) -> CallbackOutcome {
        let reference = payload.gateway_reference();
        match self
            .store
            .try_transition(
                &transaction.transaction_id,
                TransactionStatus::Pending,
                TransactionStatus::Succeeded,
                reference,
            )
            .await
        {
            Ok(true) => CallbackOutcome {
                redirect_url: self.success_redirect(&transaction, reference),
                resolution: Resolution::Succeeded,
            },
            Ok(false) => self.follow_stored_state(payload, &transaction.transaction_id).await,
            Err(e) => self.store_unavailable(payload, e, CALLBACK_SUCCESS).await,
        }
    }

    async fn reject_mismatch(
        &self,
        payload: &CallbackPayload,
        transaction: PaymentTransaction,
        raw_amount: &str,
    ) -> CallbackOutcome {
        let id = transaction.transaction_id.as_str();
        let mut record = anomaly(
            AnomalyKind::AmountMismatch,
            payload,
            format!(
                "Reported amount {} does not match expected {}",
                raw_amount,
                format_amount(transaction.total_amount)
            ),
        );
        record.expected_amount = Some(transaction.total_amount);

        let transitioned = match self
            .store
            .try_transition(id, TransactionStatus::Pending, TransactionStatus::Failed, None)
            .await
        {
            Ok(transitioned) => transitioned,
            Err(e) => return self.store_unavailable(payload, e, CALLBACK_SUCCESS).await,
        };

        if !transitioned {
            return self.follow_stored_state(payload, id).await;
        }

        self.record(record).await;

        if let Err(e) = self.store.flag_for_review(id, ReviewReason::AmountMismatch).await {
            tracing::error!(transaction_id = %id, error = %e, "Failed to flag transaction for review");
        }

        CallbackOutcome {
            redirect_url: self.failure_redirect(REASON_AMOUNT_MISMATCH, Some(id)),
            resolution: Resolution::AmountMismatch,
        }
    }

    /// Another callback resolved the transaction first; redirect by what it decided.
    async fn follow_stored_state(&self, payload: &CallbackPayload, id: &str) -> CallbackOutcome {
        match self.store.find_by_id(id).await {
            Ok(Some(transaction)) => match transaction.status {
                TransactionStatus::Succeeded => CallbackOutcome {
                    redirect_url: self
                        .success_redirect(&transaction, transaction.gateway_reference.as_deref()),
                    resolution: Resolution::AlreadySucceeded,
                },
                TransactionStatus::Failed => CallbackOutcome {
                    redirect_url: self.failure_redirect(REASON_PAYMENT_FAILED, Some(id)),
                    resolution: Resolution::AlreadyFailed,
                },
                TransactionStatus::Pending => CallbackOutcome {
                    redirect_url: self.pending_confirmation_redirect(),
                    resolution: Resolution::Unreconciled(AnomalyKind::StoreUnavailable),
                },
            },
            Ok(None) => {
                self.unreconciled(
                    anomaly(
                        AnomalyKind::UnknownTransaction,
                        payload,
                        "Transaction disappeared during reconciliation",
                    ),
                )
                .await
            }
            Err(e) => self.store_unavailable(payload, e, CALLBACK_SUCCESS).await,
        }
    }

    async fn reconcile_failure(&self, payload: &CallbackPayload) -> CallbackOutcome {
        let id = payload.transaction_id();
        let failed = |resolution| CallbackOutcome {
            redirect_url: self.failure_redirect(REASON_PAYMENT_FAILED, id),
            resolution,
        };

        let Some(id) = id else {
            self.record(
                anomaly(
                    AnomalyKind::MissingFields,
                    payload,
                    "Failure callback without transaction id",
                ),
            )
            .await;
            return failed(Resolution::Unreconciled(AnomalyKind::MissingFields));
        };

        let status = match self.store.find_by_id(id).await {
            Ok(Some(transaction)) => transaction.status,
            Ok(None) => {
                self.record(
                    anomaly(
                        AnomalyKind::UnknownTransaction,
                        payload,
                        "Failure callback for an unknown transaction",
                    ),
                )
                .await;
                return failed(Resolution::Unreconciled(AnomalyKind::UnknownTransaction));
            }
            Err(e) => return self.store_unavailable(payload, e, CALLBACK_FAILURE).await,
        };

        let status = match status {
            TransactionStatus::Pending => {
                match self
                    .store
                    .try_transition(
                        id,
                        TransactionStatus::Pending,
                        TransactionStatus::Failed,
                        None,
                    )
                    .await
                {
                    Ok(true) => return failed(Resolution::Failed),
                    Ok(false) => match self.store.find_by_id(id).await {
                        Ok(Some(transaction)) => transaction.status,
                        Ok(None) => TransactionStatus::Failed,
                        Err(e) => return self.store_unavailable(payload, e, CALLBACK_FAILURE).await,
                    },
                    Err(e) => return self.store_unavailable(payload, e, CALLBACK_FAILURE).await,
                }
            }
            terminal => terminal,
        };

        if status == TransactionStatus::Succeeded {
            self.record(
                anomaly(
                    AnomalyKind::FailureAfterSuccess,
                    payload,
                    "Failure callback for a transaction that already succeeded",
                ),
            )
            .await;
            return failed(Resolution::FailureAfterSuccess);
        }

        failed(Resolution::AlreadyFailed)
    }

    async fn unreconciled(&self, record: ReconciliationAnomaly) -> CallbackOutcome {
        let kind = record.kind;
        self.record(record).await;
        CallbackOutcome {
            redirect_url: self.pending_confirmation_redirect(),
            resolution: Resolution::Unreconciled(kind),
        }
    }

    async fn store_unavailable(
        &self,
        payload: &CallbackPayload,
        error: StoreError,
        callback: &'static str,
    ) -> CallbackOutcome {
        tracing::error!(
            callback,
            transaction_id = ?payload.transaction_id(),
            error = %error,
            "Transaction store unavailable during reconciliation"
        );
        self.record(anomaly(AnomalyKind::StoreUnavailable, payload, error.to_string()))
            .await;

        let redirect_url = if callback == CALLBACK_FAILURE {
            self.failure_redirect(REASON_PAYMENT_FAILED, payload.transaction_id())
        } else {
            self.pending_confirmation_redirect()
        };
        CallbackOutcome {
            redirect_url,
            resolution: Resolution::Unreconciled(AnomalyKind::StoreUnavailable),
        }
    }

    async fn record(&self, record: ReconciliationAnomaly) {
        tracing::warn!(
            kind = record.kind.as_str(),
            transaction_id = ?record.transaction_id,
            reported_amount = ?record.reported_amount,
            detail = %record.detail,
            "Reconciliation anomaly"
        );
        metrics::record_anomaly(record.kind.as_str());

        if let Err(e) = self.store.record_anomaly(&record).await {
            tracing::error!(
                kind = record.kind.as_str(),
                error = %e,
                "Failed to persist reconciliation anomaly"
            );
        }
    }

    fn success_redirect(&self, transaction: &PaymentTransaction, reference: Option<&str>) -> String {
        let amount = format_amount(transaction.total_amount);
        let mut query = vec![
            ("status", "success"),
            ("transaction_uuid", transaction.transaction_id.as_str()),
            ("amount", amount.as_str()),
        ];
        if let Some(reference) = reference {
            query.push(("refId", reference));
        }
        with_query(&self.client.success_url, &query)
    }

    fn pending_confirmation_redirect(&self) -> String {
        with_query(
            &self.client.success_url,
            &[("status", "success"), ("message", PENDING_CONFIRMATION_MESSAGE)],
        )
    }

    fn failure_redirect(&self, reason: &str, transaction_id: Option<&str>) -> String {
        let mut query = vec![("reason", reason)];
        if let Some(id) = transaction_id {
            query.push(("transaction_uuid", id));
        }
        with_query(&self.client.failure_url, &query)
    }
}

fn anomaly(
    kind: AnomalyKind,
    payload: &CallbackPayload,
    detail: impl Into<String>,
) -> ReconciliationAnomaly {
    let mut record = ReconciliationAnomaly::new(kind, detail);
    record.transaction_id = payload.transaction_id().map(str::to_string);
    record.reported_amount = payload.amount().map(str::to_string);
    record.payload = payload.redacted();
    record
}

/// Append form-encoded `query` to `base`, respecting an existing query string.
fn with_query(base: &str, query: &[(&str, &str)]) -> String {
    let encoded = match serde_urlencoded::to_string(query) {
        Ok(encoded) => encoded,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode redirect query");
            return base.to_string();
        }
    };

    if encoded.is_empty() {
        return base.to_string();
    }
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}{}", base, separator, encoded)
}
