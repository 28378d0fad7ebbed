//! Payload decoding helpers for handler `receive` actions.

use std::collections::HashMap;

use bytes::Bytes;
use serde::de::DeserializeOwned;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid json body: {0}")]
    Json(String),
    #[error("invalid form body: {0}")]
    Form(String),
    #[error("field '{0}' required")]
    MissingField(&'static str),
}

pub fn json<T: DeserializeOwned>(body: &Bytes) -> Result<T, DecodeError> {
    serde_json::from_slice(body).map_err(|e| DecodeError::Json(e.to_string()))
}

pub fn form_urlencoded(body: &Bytes) -> Result<HashMap<String, String>, DecodeError> {
    serde_urlencoded::from_bytes(body).map_err(|e| DecodeError::Form(e.to_string()))
}

pub fn require_field<'a>(form: &'a HashMap<String, String>, key: &'static str) -> Result<&'a str, DecodeError> {
    form.get(key)
        .map(|s| s.as_str())
        .filter(|s| !s.is_empty())
        .ok_or(DecodeError::MissingField(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_form_urlencoded_body() {
        let body = Bytes::from_static(b"from=%2B1555&text=hello");
        let form = form_urlencoded(&body).unwrap();
        assert_eq!(form.get("from").unwrap(), "+1555");
        assert_eq!(form.get("text").unwrap(), "hello");
    }

    #[test]
    fn missing_field_is_reported_by_name() {
        let form = HashMap::new();
        let err = require_field(&form, "from").unwrap_err();
        assert!(matches!(err, DecodeError::MissingField("from")));
    }
}
