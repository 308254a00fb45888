use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// One checkout attempt, tracked from initiation to its single resolution.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PaymentTransaction {
    #[serde(rename = "_id")]
    pub transaction_id: String,
    pub order_reference: Option<String>,
    pub customer: CustomerDetails,
    pub amount: Decimal,
    pub tax_amount: Decimal,
    pub service_charge: Decimal,
    pub delivery_charge: Decimal,
    pub total_amount: Decimal,
    pub product_code: String,
    pub status: TransactionStatus,
    pub gateway_reference: Option<String>,
    pub review_reason: Option<ReviewReason>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "optional_bson_datetime")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PaymentTransaction {
    /// Sum of the charge components, `None` on decimal overflow.
    pub fn charges_total(&self) -> Option<Decimal> {
        sum_charges(
            self.amount,
            self.tax_amount,
            self.service_charge,
            self.delivery_charge,
        )
    }
}

/// Checked sum of an amount and its charges.
pub fn sum_charges(
    amount: Decimal,
    tax_amount: Decimal,
    service_charge: Decimal,
    delivery_charge: Decimal,
) -> Option<Decimal> {
    amount
        .checked_add(tax_amount)?
        .checked_add(service_charge)?
        .checked_add(delivery_charge)
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CustomerDetails {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub plan: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Succeeded,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Succeeded => "SUCCEEDED",
            TransactionStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewReason {
    AmountMismatch,
}

/// Why a callback could not be reconciled as a verified outcome.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyKind {
    MissingFields,
    UnknownTransaction,
    AmountMismatch,
    InvalidAmount,
    InvalidSignature,
    FailureAfterSuccess,
    StoreUnavailable,
}

impl AnomalyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyKind::MissingFields => "missing_fields",
            AnomalyKind::UnknownTransaction => "unknown_transaction",
            AnomalyKind::AmountMismatch => "amount_mismatch",
            AnomalyKind::InvalidAmount => "invalid_amount",
            AnomalyKind::InvalidSignature => "invalid_signature",
            AnomalyKind::FailureAfterSuccess => "failure_after_success",
            AnomalyKind::StoreUnavailable => "store_unavailable",
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator-review record for a callback that was not a clean reconciliation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ReconciliationAnomaly {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub kind: AnomalyKind,
    pub transaction_id: Option<String>,
    pub reported_amount: Option<String>,
    pub expected_amount: Option<Decimal>,
    pub detail: String,
    pub payload: BTreeMap<String, String>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl ReconciliationAnomaly {
    pub fn new(kind: AnomalyKind, detail: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            transaction_id: None,
            reported_amount: None,
            expected_amount: None,
            detail: detail.into(),
            payload: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }
}

mod optional_bson_datetime {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        value
            .map(bson::DateTime::from_chrono)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let value = Option::<bson::DateTime>::deserialize(deserializer)?;
        Ok(value.map(|dt| dt.to_chrono()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson;
    use std::str::FromStr;

    fn transaction() -> PaymentTransaction {
        PaymentTransaction {
            transaction_id: "FIT_1700000000000_abc".to_string(),
            order_reference: Some("order-42".to_string()),
            customer: CustomerDetails {
                full_name: "Asha Rai".to_string(),
                email: "asha@example.com".to_string(),
                phone: "9800000000".to_string(),
                address: "Kathmandu".to_string(),
                plan: "pro".to_string(),
            },
            amount: Decimal::from(100),
            tax_amount: Decimal::from_str("13").unwrap(),
            service_charge: Decimal::ZERO,
            delivery_charge: Decimal::from_str("2.50").unwrap(),
            total_amount: Decimal::from_str("115.50").unwrap(),
            product_code: "EPAYTEST".to_string(),
            status: TransactionStatus::Pending,
            gateway_reference: None,
            review_reason: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    #[test]
    fn test_sum_charges_reports_overflow() {
        assert_eq!(
            sum_charges(Decimal::MAX, Decimal::ONE, Decimal::ZERO, Decimal::ZERO),
            None
        );
        assert_eq!(
            sum_charges(Decimal::MAX, Decimal::ZERO, Decimal::ZERO, Decimal::ZERO),
            Some(Decimal::MAX)
        );
    }

    #[test]
    fn test_charges_total_matches_total_amount() {
        let tx = transaction();
        assert_eq!(tx.charges_total(), Some(tx.total_amount));
    }

    #[test]
    fn test_status_serializes_screaming_case() {
        let value = bson::to_bson(&TransactionStatus::Succeeded).unwrap();
        assert_eq!(value, bson::Bson::String("SUCCEEDED".to_string()));
        assert!(TransactionStatus::Failed.is_terminal());
        assert!(!TransactionStatus::Pending.is_terminal());
    }

    #[test]
    fn test_transaction_bson_round_trip_uses_id_key() {
        let tx = transaction();
        let document = bson::to_document(&tx).unwrap();
        assert_eq!(
            document.get_str("_id").unwrap(),
            "FIT_1700000000000_abc"
        );
        assert!(matches!(document.get("created_at"), Some(bson::Bson::DateTime(_))));

        let decoded: PaymentTransaction = bson::from_document(document).unwrap();
        assert_eq!(decoded.total_amount, tx.total_amount);
        assert_eq!(decoded.status, TransactionStatus::Pending);
        assert_eq!(decoded.resolved_at, None);
    }
}
