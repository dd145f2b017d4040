//! Parsed/rendered shapes for batch sub-requests and sub-responses.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::ODataError;

#[derive(Debug, Clone)]
pub struct SubRequest {
    pub content_id: Option<String>,
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl SubRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json_body(&self) -> Result<Value, ODataError> {
        if self.body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&self.body).map_err(|e| ODataError::malformed(format!("invalid JSON body: {e}")))
    }
}

#[derive(Debug, Clone)]
pub struct SubResponse {
    pub content_id: Option<String>,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl SubResponse {
    pub fn json(content_id: Option<String>, status: u16, body: &Value) -> Self {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Self { content_id, status, headers, body: serde_json::to_vec(body).unwrap_or_default() }
    }

    pub fn empty(content_id: Option<String>, status: u16) -> Self {
        Self { content_id, status, headers: HashMap::new(), body: Vec::new() }
    }

    pub fn from_error(content_id: Option<String>, err: &ODataError) -> Self {
        Self::json(content_id, err.status_code(), &serde_json::to_value(err.to_error_body()).unwrap_or(Value::Null))
    }
}

/// One `--boundary` part of the outer `multipart/mixed` body: either a
/// single HTTP sub-request, or a nested `multipart/mixed; boundary=...`
/// changeset carrying several (changesets do not nest further).
pub enum BatchPart {
    Http(SubRequest),
    ChangeSet(Vec<SubRequest>),
}

impl BatchPart {
    pub fn sub_request_count(&self) -> usize {
        match self {
            BatchPart::Http(_) => 1,
            BatchPart::ChangeSet(subs) => subs.len(),
        }
    }
}
