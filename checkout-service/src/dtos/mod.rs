use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use validator::{Validate, ValidationError};

use crate::models::{PaymentTransaction, ReconciliationAnomaly};

/// Checkout form submitted by the storefront.
///
/// Every field deserializes leniently so validation can report all failing
/// fields at once instead of stopping at the first malformed one.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct CheckoutRequest {
    #[serde(default)]
    #[validate(custom(function = "validate_not_blank", message = "Full name is required"))]
    pub full_name: String,

    #[serde(default)]
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[serde(default)]
    #[validate(custom(function = "validate_not_blank", message = "Phone is required"))]
    pub phone: String,

    #[serde(default)]
    #[validate(custom(function = "validate_not_blank", message = "Address is required"))]
    pub address: String,

    #[serde(default)]
    #[validate(custom(function = "validate_not_blank", message = "Plan is required"))]
    pub plan: String,

    #[serde(default)]
    #[validate(custom(
        function = "validate_positive_amount",
        message = "Amount must be a number greater than 0"
    ))]
    pub amount: Value,

    #[serde(default)]
    #[validate(custom(
        function = "validate_optional_charge",
        message = "Tax amount must be a non-negative number"
    ))]
    pub tax_amount: Value,

    #[serde(default)]
    #[validate(custom(
        function = "validate_optional_charge",
        message = "Service charge must be a non-negative number"
    ))]
    pub service_charge: Value,

    #[serde(default)]
    #[validate(custom(
        function = "validate_optional_charge",
        message = "Delivery charge must be a non-negative number"
    ))]
    pub delivery_charge: Value,

    #[serde(default)]
    pub order_reference: Option<String>,
}

/// Parse a JSON number or numeric string into a decimal amount.
pub fn parse_amount(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .ok()
            .or_else(|| n.as_f64().and_then(|f| Decimal::try_from(f).ok())),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// Optional charges default to zero when absent.
pub fn parse_charge(value: &Value) -> Option<Decimal> {
    match value {
        Value::Null => Some(Decimal::ZERO),
        other => parse_amount(other),
    }
}

fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("required"));
    }
    Ok(())
}

fn validate_positive_amount(value: &Value) -> Result<(), ValidationError> {
    match parse_amount(value) {
        Some(amount) if amount > Decimal::ZERO => Ok(()),
        _ => Err(ValidationError::new("positive_amount")),
    }
}

fn validate_optional_charge(value: &Value) -> Result<(), ValidationError> {
    match parse_charge(value) {
        Some(charge) if charge >= Decimal::ZERO => Ok(()),
        _ => Err(ValidationError::new("non_negative_amount")),
    }
}

/// Flatten validator output into `field -> [messages]`.
pub fn field_errors(errors: &validator::ValidationErrors) -> BTreeMap<String, Vec<String>> {
    errors
        .field_errors()
        .into_iter()
        .map(|(field, errs)| {
            let messages = errs
                .iter()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string())
                })
                .collect();
            (field.to_string(), messages)
        })
        .collect()
}

/// Form fields the browser must post to the gateway, in the gateway's names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayFormFields {
    pub amount: String,
    pub tax_amount: String,
    pub total_amount: String,
    pub transaction_uuid: String,
    pub product_code: String,
    pub product_service_charge: String,
    pub product_delivery_charge: String,
    pub success_url: String,
    pub failure_url: String,
    pub signed_field_names: String,
    pub signature: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub success: bool,
    pub url: String,
    pub params: GatewayFormFields,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckoutErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<BTreeMap<String, Vec<String>>>,
}

/// Transaction status as exposed to the storefront result page.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub transaction_uuid: String,
    pub order_reference: Option<String>,
    pub plan: String,
    pub amount: String,
    pub tax_amount: String,
    pub service_charge: String,
    pub delivery_charge: String,
    pub total_amount: String,
    pub status: String,
    pub gateway_reference: Option<String>,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

impl From<PaymentTransaction> for TransactionResponse {
    fn from(t: PaymentTransaction) -> Self {
        Self {
            transaction_uuid: t.transaction_id,
            order_reference: t.order_reference,
            plan: t.customer.plan,
            amount: t.amount.normalize().to_string(),
            tax_amount: t.tax_amount.normalize().to_string(),
            service_charge: t.service_charge.normalize().to_string(),
            delivery_charge: t.delivery_charge.normalize().to_string(),
            total_amount: t.total_amount.normalize().to_string(),
            status: t.status.to_string(),
            gateway_reference: t.gateway_reference,
            created_at: t.created_at.to_rfc3339(),
            resolved_at: t.resolved_at.map(|dt| dt.to_rfc3339()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListAnomaliesQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AnomalyResponse {
    pub id: String,
    pub kind: String,
    pub transaction_uuid: Option<String>,
    pub reported_amount: Option<String>,
    pub expected_amount: Option<String>,
    pub detail: String,
    pub payload: BTreeMap<String, String>,
    pub created_at: String,
}

impl From<ReconciliationAnomaly> for AnomalyResponse {
    fn from(a: ReconciliationAnomaly) -> Self {
        Self {
            id: a.id.to_string(),
            kind: a.kind.to_string(),
            transaction_uuid: a.transaction_id,
            reported_amount: a.reported_amount,
            expected_amount: a.expected_amount.map(|d| d.normalize().to_string()),
            detail: a.detail,
            payload: a.payload,
            created_at: a.created_at.to_rfc3339(),
        }
    }
}
