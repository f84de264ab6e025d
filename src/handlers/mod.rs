// HTTP handlers, grouped by route family. Everything except `health` and
// `webhooks` runs behind the session middleware and receives the caller
// through the `AuthenticatedIdentity` extractor.

pub mod email;
pub mod health;
pub mod notifications;
pub mod records;
pub mod sync;
pub mod webhooks;

use axum::body::Bytes;
use serde_json::{Map, Value};

use crate::error::ApiError;

/// Parse a JSON request body. An empty body reads as `{}` so that a missing
/// payload surfaces as a field-level validation error rather than a parse
/// error.
pub(crate) fn json_body(body: &Bytes) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {}", e)))
}
