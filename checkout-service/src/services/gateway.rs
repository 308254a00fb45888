//! eSewa ePay v2 merchant integration.
//!
//! Builds the signed form the browser posts to the hosted payment page and
//! checks the signed `data` envelope the gateway sends back on success.

use base64::{engine::general_purpose, Engine as _};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde_json::Value;
use service_core::utils::signature::{self, SignatureError};
use std::collections::BTreeMap;

use crate::config::GatewayConfig;
use crate::dtos::GatewayFormFields;
use crate::models::PaymentTransaction;
use crate::utils::flatten_scalars;

/// Fields the gateway requires in the request signature, in order.
pub const REQUEST_SIGNED_FIELDS: [&str; 3] = ["total_amount", "transaction_uuid", "product_code"];

/// Envelope status that means the payment completed.
pub const STATUS_COMPLETE: &str = "COMPLETE";

/// Outcome of checking a gateway response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeCheck {
    /// No signature was supplied.
    Unsigned,
    Verified,
    Invalid,
}

/// Format an amount the way it is signed and posted: no trailing zeros.
pub fn format_amount(amount: Decimal) -> String {
    amount.normalize().to_string()
}

#[derive(Clone)]
pub struct EsewaGateway {
    config: GatewayConfig,
}

impl EsewaGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    pub fn form_url(&self) -> &str {
        &self.config.form_url
    }

    pub fn product_code(&self) -> &str {
        &self.config.product_code
    }

    pub fn merchant_prefix(&self) -> &str {
        &self.config.merchant_prefix
    }

    /// Sign `total_amount,transaction_uuid,product_code` for a request.
    ///
    /// Returns `(signed_field_names, signature)`.
    pub fn sign_request(
        &self,
        total_amount: &str,
        transaction_uuid: &str,
    ) -> Result<(String, String), SignatureError> {
        let fields = [
            (REQUEST_SIGNED_FIELDS[0], total_amount),
            (REQUEST_SIGNED_FIELDS[1], transaction_uuid),
            (REQUEST_SIGNED_FIELDS[2], self.config.product_code.as_str()),
        ];

        let signature =
            signature::sign_fields(&fields, self.config.secret_key.expose_secret().as_bytes())?;

        Ok((signature::signed_field_names(&fields), signature))
    }

    /// Full set of form fields for a freshly created transaction.
    pub fn form_fields(
        &self,
        transaction: &PaymentTransaction,
    ) -> Result<GatewayFormFields, SignatureError> {
        let total_amount = format_amount(transaction.total_amount);
        let (signed_field_names, signature) =
            self.sign_request(&total_amount, &transaction.transaction_id)?;

        Ok(GatewayFormFields {
            amount: format_amount(transaction.amount),
            tax_amount: format_amount(transaction.tax_amount),
            total_amount,
            transaction_uuid: transaction.transaction_id.clone(),
            product_code: transaction.product_code.clone(),
            product_service_charge: format_amount(transaction.service_charge),
            product_delivery_charge: format_amount(transaction.delivery_charge),
            success_url: self.config.success_callback_url(),
            failure_url: self.config.failure_callback_url(),
            signed_field_names,
            signature,
        })
    }

    /// Verify the signature carried inside a decoded response envelope.
    ///
    /// The message is rebuilt from the fields named in `signed_field_names`,
    /// in that order. A listed field that is missing fails verification.
    pub fn verify_envelope(&self, fields: &BTreeMap<String, String>) -> EnvelopeCheck {
        let (Some(names), Some(signature)) =
            (fields.get("signed_field_names"), fields.get("signature"))
        else {
            return EnvelopeCheck::Unsigned;
        };

        let mut signed = Vec::new();
        for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            match fields.get(name) {
                Some(value) => signed.push((name, value.as_str())),
                None => return EnvelopeCheck::Invalid,
            }
        }

        match signature::verify_fields(
            &signed,
            self.config.secret_key.expose_secret().as_bytes(),
            signature,
        ) {
            Ok(true) => EnvelopeCheck::Verified,
            Ok(false) => EnvelopeCheck::Invalid,
            Err(e) => {
                tracing::error!(error = %e, "Envelope signature verification error");
                EnvelopeCheck::Invalid
            }
        }
    }
}

/// Decode the base64 JSON `data` envelope into flat string fields.
///
/// Returns `None` if the value is not base64 or not a JSON object.
pub fn decode_envelope(data: &str) -> Option<BTreeMap<String, String>> {
    let bytes = general_purpose::STANDARD
        .decode(data.trim())
        .or_else(|_| general_purpose::URL_SAFE.decode(data.trim()))
        .ok()?;

    let Value::Object(object) = serde_json::from_slice::<Value>(&bytes).ok()? else {
        return None;
    };

    Some(flatten_scalars(object))
}
