//! Payload field extraction for handlers.

use serde_json::Value;

use crate::envelope::Payload;
use crate::errors::OpError;

/// Extract a required string field.
pub fn require_str<'a>(payload: &'a Payload, key: &str) -> Result<&'a str, OpError> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| OpError::BadRequest(format!("{key} required")))
}

/// Extract an optional string field. `null` counts as absent.
pub fn optional_str<'a>(payload: &'a Payload, key: &str) -> Result<Option<&'a str>, OpError> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(OpError::BadRequest(format!("{key} must be a string"))),
    }
}

/// Extract an optional list of strings. `null` entries are skipped.
pub fn optional_str_list(payload: &Payload, key: &str) -> Result<Vec<String>, OpError> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .filter(|v| !v.is_null())
            .map(|v| {
                v.as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| OpError::BadRequest(format!("{key} must contain strings")))
            })
            .collect(),
        Some(_) => Err(OpError::BadRequest(format!("{key} must be an array"))),
    }
}
