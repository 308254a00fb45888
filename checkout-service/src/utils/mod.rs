// Request helpers

use axum::{
    async_trait,
    body::to_bytes,
    extract::{FromRequest, Request},
    http::header::CONTENT_TYPE,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::convert::Infallible;

use crate::services::callback::CallbackPayload;

/// Callback bodies are small form posts; anything larger is ignored.
const MAX_CALLBACK_BODY_BYTES: usize = 64 * 1024;

/// Keep string, number and bool members of a JSON object as strings.
pub fn flatten_scalars(object: Map<String, Value>) -> BTreeMap<String, String> {
    object
        .into_iter()
        .filter_map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((key, value))
        })
        .collect()
}

/// Gateway callback parameters merged from the query string and body.
///
/// Accepts form-encoded or JSON bodies. Query parameters win over body
/// parameters of the same name. Never rejects: an unreadable body is logged
/// and treated as empty so the caller can still redirect the user.
#[derive(Debug, Clone)]
pub struct CallbackParams(pub CallbackPayload);

#[async_trait]
impl<S> FromRequest<S> for CallbackParams
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request(req: Request, _state: &S) -> Result<Self, Self::Rejection> {
        let mut params = parse_query(req.uri().query());
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        let body = match to_bytes(req.into_body(), MAX_CALLBACK_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read callback body");
                return Ok(CallbackParams(CallbackPayload::new(params)));
            }
        };

        if !body.is_empty() {
            for (key, value) in parse_body(&body, is_json) {
                params.entry(key).or_insert(value);
            }
        }

        Ok(CallbackParams(CallbackPayload::new(params)))
    }
}

fn parse_query(query: Option<&str>) -> BTreeMap<String, String> {
    let Some(query) = query else {
        return BTreeMap::new();
    };

    serde_urlencoded::from_str::<Vec<(String, String)>>(query)
        .map(|pairs| pairs.into_iter().collect())
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Malformed callback query string");
            BTreeMap::new()
        })
}

fn parse_body(body: &[u8], is_json: bool) -> BTreeMap<String, String> {
    if is_json {
        return match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(object)) => flatten_scalars(object),
            Ok(_) => {
                tracing::warn!("Callback JSON body is not an object");
                BTreeMap::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Malformed callback JSON body");
                BTreeMap::new()
            }
        };
    }

    serde_urlencoded::from_bytes::<Vec<(String, String)>>(body)
        .map(|pairs| pairs.into_iter().collect())
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Malformed callback form body");
            BTreeMap::new()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use serde_json::json;

    async fn extract(req: Request) -> CallbackPayload {
        CallbackParams::from_request(req, &()).await.unwrap().0
    }

    #[test]
    fn test_flatten_scalars_skips_nested_values() {
        let Value::Object(object) = json!({"a": "x", "b": 1.5, "c": true, "d": {"e": 1}, "f": null})
        else {
            unreachable!()
        };
        let flat = flatten_scalars(object);

        assert_eq!(flat.len(), 3);
        assert_eq!(flat["b"], "1.5");
        assert_eq!(flat["c"], "true");
    }

    #[tokio::test]
    async fn test_query_and_form_body_are_merged() {
        let req = Request::builder()
            .method("POST")
            .uri("/payments/esewa/success?oid=T1")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("oid=IGNORED&amt=100&refId=R1"))
            .unwrap();

        let payload = extract(req).await;
        assert_eq!(payload.transaction_id(), Some("T1"));
        assert_eq!(payload.amount(), Some("100"));
        assert_eq!(payload.gateway_reference(), Some("R1"));
    }

    #[tokio::test]
    async fn test_json_body_numbers_become_strings() {
        let req = Request::builder()
            .method("POST")
            .uri("/payments/esewa/success")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"transaction_uuid":"T1","total_amount":100}"#))
            .unwrap();

        let payload = extract(req).await;
        assert_eq!(payload.transaction_id(), Some("T1"));
        assert_eq!(payload.amount(), Some("100"));
    }

    #[tokio::test]
    async fn test_garbage_body_yields_empty_payload() {
        let req = Request::builder()
            .method("POST")
            .uri("/payments/esewa/failure")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        assert!(extract(req).await.is_empty());
    }
}
