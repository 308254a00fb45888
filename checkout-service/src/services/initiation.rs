//! Checkout initiation: validate, persist a PENDING transaction, sign.

use chrono::Utc;
use std::sync::Arc;
use validator::Validate;

use crate::dtos::{field_errors, parse_amount, parse_charge, CheckoutRequest, CheckoutResponse};
use crate::error::CheckoutError;
use crate::models::{sum_charges, CustomerDetails, PaymentTransaction, TransactionStatus};
use crate::services::gateway::{format_amount, EsewaGateway};
use crate::services::metrics;
use crate::services::store::{StoreError, TransactionStore};
use crate::services::transaction_id::generate_transaction_id;

/// Attempts at minting a fresh id before giving up on a duplicate key.
const MAX_ID_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct InitiationService {
    store: Arc<dyn TransactionStore>,
    gateway: EsewaGateway,
}

impl InitiationService {
    pub fn new(store: Arc<dyn TransactionStore>, gateway: EsewaGateway) -> Self {
        Self { store, gateway }
    }

    /// Validate a checkout request and return signed gateway form fields.
    ///
    /// The transaction is stored as PENDING before the instructions are
    /// returned, so a callback can always find it.
    pub async fn initiate(&self, request: CheckoutRequest) -> Result<CheckoutResponse, CheckoutError> {
        if let Err(errors) = request.validate() {
            metrics::record_initiation("invalid");
            return Err(CheckoutError::Validation(field_errors(&errors)));
        }

        let transaction = self.create_pending(request).await.inspect_err(|e| {
            let outcome = match e {
                CheckoutError::Validation(_) => "invalid",
                _ => "error",
            };
            metrics::record_initiation(outcome);
        })?;

        let params = self.gateway.form_fields(&transaction).inspect_err(|_| {
            metrics::record_initiation("error");
        })?;

        tracing::info!(
            transaction_id = %transaction.transaction_id,
            order_reference = ?transaction.order_reference,
            plan = %transaction.customer.plan,
            amount = %format_amount(transaction.amount),
            tax_amount = %format_amount(transaction.tax_amount),
            service_charge = %format_amount(transaction.service_charge),
            delivery_charge = %format_amount(transaction.delivery_charge),
            total_amount = %params.total_amount,
            product_code = %transaction.product_code,
            "Payment initiated"
        );
        metrics::record_initiation("created");

        Ok(CheckoutResponse {
            success: true,
            url: self.gateway.form_url().to_string(),
            params,
        })
    }

    async fn create_pending(
        &self,
        request: CheckoutRequest,
    ) -> Result<PaymentTransaction, CheckoutError> {
        // Validation has already accepted these values.
        let amounts = (
            parse_amount(&request.amount),
            parse_charge(&request.tax_amount),
            parse_charge(&request.service_charge),
            parse_charge(&request.delivery_charge),
        );
        let (Some(amount), Some(tax_amount), Some(service_charge), Some(delivery_charge)) = amounts
        else {
            return Err(amount_error("Amount could not be parsed"));
        };
        let Some(total_amount) = sum_charges(amount, tax_amount, service_charge, delivery_charge)
        else {
            return Err(amount_error("Total amount is too large"));
        };

        let mut transaction = PaymentTransaction {
            transaction_id: String::new(),
            order_reference: request
                .order_reference
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty()),
            customer: CustomerDetails {
                full_name: request.full_name.trim().to_string(),
                email: request.email.trim().to_string(),
                phone: request.phone.trim().to_string(),
                address: request.address.trim().to_string(),
                plan: request.plan.trim().to_string(),
            },
            amount,
            tax_amount,
            service_charge,
            delivery_charge,
            total_amount,
            product_code: self.gateway.product_code().to_string(),
            status: TransactionStatus::Pending,
            gateway_reference: None,
            review_reason: None,
            created_at: Utc::now(),
            resolved_at: None,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            transaction.transaction_id =
                generate_transaction_id(self.gateway.merchant_prefix(), transaction.created_at);

            match self.store.create(&transaction).await {
                Ok(()) => return Ok(transaction),
                Err(StoreError::Duplicate(id)) if attempt < MAX_ID_ATTEMPTS => {
                    tracing::warn!(transaction_id = %id, attempt, "Transaction id collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn amount_error(message: &str) -> CheckoutError {
    CheckoutError::Validation(
        [("amount".to_string(), vec![message.to_string()])]
            .into_iter()
            .collect(),
    )
}
