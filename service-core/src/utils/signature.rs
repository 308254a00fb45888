use base64::{Engine as _, engine::general_purpose};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),
}

/// Build the canonical message for an ordered field set.
///
/// Format: `name1=value1,name2=value2,...` in caller order.
pub fn canonical_message(fields: &[(&str, &str)]) -> String {
    fields
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(",")
}

/// Comma-joined field names, in the order they were signed.
pub fn signed_field_names(fields: &[(&str, &str)]) -> String {
    fields
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(",")
}

/// Generate a base64 HMAC-SHA256 signature over an ordered field set.
pub fn sign_fields(fields: &[(&str, &str)], secret: &[u8]) -> Result<String, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|e| SignatureError::InvalidKey(e.to_string()))?;

    mac.update(canonical_message(fields).as_bytes());
    let result = mac.finalize();

    Ok(general_purpose::STANDARD.encode(result.into_bytes()))
}

/// Verify a base64 signature over an ordered field set using constant-time comparison
pub fn verify_fields(
    fields: &[(&str, &str)],
    secret: &[u8],
    signature: &str,
) -> Result<bool, SignatureError> {
    let expected_signature = sign_fields(fields, secret)?;

    let expected_bytes = expected_signature.as_bytes();
    let signature_bytes = signature.as_bytes();

    if expected_bytes.len() != signature_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(signature_bytes).into())
}
