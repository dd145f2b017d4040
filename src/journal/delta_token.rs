//! Opaque `$deltatoken` values, built the same way `$skiptoken` is (see
//! `plan::cursor`): a small versioned JSON payload, hand-rolled base64url.

use serde::{Deserialize, Serialize};

use crate::error::ODataError;
use crate::plan::cursor::base64_url;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeltaToken {
    pub version: u8,
    pub set_name: String,
    /// Journal sequence number the window starts after; the next delta
    /// response contains every event with a strictly greater sequence.
    pub since_sequence: i64,
}

impl DeltaToken {
    pub fn new(set_name: impl Into<String>, since_sequence: i64) -> Self {
        Self {
            version: 1,
            set_name: set_name.into(),
            since_sequence,
        }
    }

    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("DeltaToken always serializes");
        base64_url::encode(&json)
    }

    pub fn decode(token: &str) -> Result<Self, ODataError> {
        let bytes = base64_url::decode(token).map_err(|_| ODataError::malformed("malformed $deltatoken"))?;
        serde_json::from_slice(&bytes).map_err(|_| ODataError::malformed("malformed $deltatoken"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_encoding() {
        let token = DeltaToken::new("Products", 42);
        let encoded = token.encode();
        let decoded = DeltaToken::decode(&encoded).unwrap();
        assert_eq!(token, decoded);
    }

    #[test]
    fn rejects_garbage_token() {
        assert!(DeltaToken::decode("not-a-real-token!!").is_err());
    }
}
