//! Gateway callback parameters and the alias table used to read them.
//!
//! Different gateway versions name the same value differently. Each logical
//! field has an ordered list of candidate names; the first non-empty match
//! wins.

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::services::gateway::decode_envelope;

pub const TRANSACTION_ID_ALIASES: &[&str] = &["transaction_uuid", "transaction_id", "pid", "oid"];
pub const AMOUNT_ALIASES: &[&str] = &["total_amount", "amt"];
pub const REFERENCE_ALIASES: &[&str] = &["refId", "reference_id", "transaction_code"];
pub const STATUS_ALIASES: &[&str] = &["status"];

/// Parameters that are never copied into anomaly records.
const REDACTED_KEYS: &[&str] = &["signature", "data"];

/// Logical fields that a signed envelope is authoritative for.
const SIGNED_LOGICAL_FIELDS: &[(&str, &[&str])] = &[
    ("transaction_uuid", TRANSACTION_ID_ALIASES),
    ("total_amount", AMOUNT_ALIASES),
    ("reference", REFERENCE_ALIASES),
    ("status", STATUS_ALIASES),
];

/// Raw callback parameters merged from the query string and body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallbackPayload {
    params: BTreeMap<String, String>,
    envelope: Option<BTreeMap<String, String>>,
    envelope_trusted: bool,
}

impl CallbackPayload {
    /// Build a payload, unpacking a base64 `data` envelope if present.
    ///
    /// Raw parameters take precedence over envelope fields with the same name.
    pub fn new(params: BTreeMap<String, String>) -> Self {
        let envelope = params.get("data").and_then(|data| {
            let decoded = decode_envelope(data);
            if decoded.is_none() {
                tracing::warn!("Callback carried an undecodable data envelope");
            }
            decoded
        });

        Self {
            params,
            envelope,
            envelope_trusted: false,
        }
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self::new(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// The decoded envelope, if the callback carried one.
    pub fn envelope(&self) -> Option<&BTreeMap<String, String>> {
        self.envelope.as_ref()
    }

    /// Resolve logical fields from the envelope only, ignoring raw values.
    ///
    /// Use once the envelope signature has verified.
    pub fn trusting_envelope(mut self) -> Self {
        self.envelope_trusted = self.envelope.is_some();
        self
    }

    /// First non-empty value among `aliases`.
    ///
    /// Raw parameters come before envelope fields, unless the envelope is
    /// trusted, in which case only envelope fields are read.
    pub fn resolve(&self, aliases: &[&str]) -> Option<&str> {
        let from_envelope = self
            .envelope
            .as_ref()
            .and_then(|envelope| first_match(envelope, aliases));

        if self.envelope_trusted {
            return from_envelope;
        }
        first_match(&self.params, aliases).or(from_envelope)
    }

    /// Logical fields whose raw value disagrees with the envelope's value.
    ///
    /// Amounts are compared as decimals, so `100` and `100.0` agree.
    pub fn conflicting_fields(&self) -> Vec<&'static str> {
        let Some(envelope) = self.envelope.as_ref() else {
            return Vec::new();
        };

        SIGNED_LOGICAL_FIELDS
            .iter()
            .filter(|(_, aliases)| {
                match (first_match(&self.params, aliases), first_match(envelope, aliases)) {
                    (Some(raw), Some(signed)) => !same_value(raw, signed),
                    _ => false,
                }
            })
            .map(|(name, _)| *name)
            .collect()
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.resolve(TRANSACTION_ID_ALIASES)
    }

    pub fn amount(&self) -> Option<&str> {
        self.resolve(AMOUNT_ALIASES)
    }

    pub fn gateway_reference(&self) -> Option<&str> {
        self.resolve(REFERENCE_ALIASES)
    }

    pub fn status(&self) -> Option<&str> {
        self.resolve(STATUS_ALIASES)
    }

    /// Parameters safe to persist for operator review.
    pub fn redacted(&self) -> BTreeMap<String, String> {
        let mut out: BTreeMap<String, String> = self
            .envelope
            .iter()
            .flatten()
            .chain(self.params.iter())
            .filter(|(k, _)| !REDACTED_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if self.params.contains_key("data") {
            out.insert("data".to_string(), "<envelope>".to_string());
        }
        out
    }
}

fn first_match<'a>(map: &'a BTreeMap<String, String>, aliases: &[&str]) -> Option<&'a str> {
    aliases.iter().find_map(|alias| {
        map.get(*alias)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    })
}

fn same_value(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match (Decimal::from_str(a), Decimal::from_str(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
