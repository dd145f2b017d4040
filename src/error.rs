//! Error taxonomy for the OData request pipeline.
//!
//! `ODataError` is the single error type that crosses every component
//! boundary in this crate. Each variant knows its own HTTP status and
//! renders the `{"error": {...}}` body shape without any framework
//! dependency; the optional `axum` glue lives behind `into_response`.

use std::fmt;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorBody {
    pub error: ErrorPayload,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ErrorDetail>,
}

#[derive(Debug, thiserror::Error)]
pub enum ODataError {
    #[error("malformed request: {message}")]
    MalformedRequest {
        message: String,
        details: Vec<ErrorDetail>,
    },

    #[error("unauthenticated")]
    Unauthenticated { message: String },

    #[error("forbidden")]
    Forbidden { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("method not allowed")]
    MethodNotAllowed {
        message: String,
        allowed: Vec<&'static str>,
    },

    #[error("unacceptable OData version")]
    UnacceptableVersion { message: String },

    #[error("precondition required")]
    PreconditionRequired { message: String },

    #[error("precondition failed")]
    PreconditionFailed { message: String },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("payload too large")]
    PayloadTooLarge { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },

    #[error("request cancelled")]
    Cancelled { message: String },
}

impl ODataError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedRequest {
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn malformed_with_details(message: impl Into<String>, details: Vec<ErrorDetail>) -> Self {
        Self::MalformedRequest {
            message: message.into(),
            details,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    /// Machine-readable taxonomy tag, used as `error.code` in the response body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedRequest { .. } => "MalformedRequest",
            Self::Unauthenticated { .. } => "Unauthenticated",
            Self::Forbidden { .. } => "Forbidden",
            Self::NotFound { .. } => "NotFound",
            Self::MethodNotAllowed { .. } => "MethodNotAllowed",
            Self::UnacceptableVersion { .. } => "UnacceptableVersion",
            Self::PreconditionRequired { .. } => "PreconditionRequired",
            Self::PreconditionFailed { .. } => "PreconditionFailed",
            Self::Conflict { .. } => "Conflict",
            Self::PayloadTooLarge { .. } => "PayloadTooLarge",
            Self::Internal { .. } => "Internal",
            Self::Cancelled { .. } => "Cancelled",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::MalformedRequest { .. } => 400,
            Self::Unauthenticated { .. } => 401,
            Self::Forbidden { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::MethodNotAllowed { .. } => 405,
            Self::UnacceptableVersion { .. } => 406,
            Self::Conflict { .. } => 409,
            Self::PreconditionFailed { .. } => 412,
            Self::PayloadTooLarge { .. } => 413,
            Self::PreconditionRequired { .. } => 428,
            Self::Internal { .. } => 500,
            // Non-standard, but the conventional code for a request the
            // caller abandoned before a response was produced.
            Self::Cancelled { .. } => 499,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::MalformedRequest { message, .. }
            | Self::Unauthenticated { message }
            | Self::Forbidden { message }
            | Self::NotFound { message }
            | Self::MethodNotAllowed { message, .. }
            | Self::UnacceptableVersion { message }
            | Self::PreconditionRequired { message }
            | Self::PreconditionFailed { message }
            | Self::Conflict { message }
            | Self::PayloadTooLarge { message }
            | Self::Internal { message }
            | Self::Cancelled { message } => message.clone(),
        }
    }

    fn details(&self) -> Vec<ErrorDetail> {
        match self {
            Self::MalformedRequest { details, .. } => details.clone(),
            _ => Vec::new(),
        }
    }

    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody {
            error: ErrorPayload {
                code: self.code().to_string(),
                message: self.message(),
                details: self.details(),
            },
        }
    }

    pub fn allowed_methods(&self) -> Option<&[&'static str]> {
        match self {
            Self::MethodNotAllowed { allowed, .. } => Some(allowed),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error.code, self.error.message)
    }
}

impl axum::response::IntoResponse for ODataError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::{HeaderValue, StatusCode, header};

        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let allowed = self.allowed_methods().map(|m| m.join(", "));
        let body = self.to_error_body();
        let mut resp = axum::Json(body).into_response();
        *resp.status_mut() = status;
        if let Some(allowed) = allowed {
            if let Ok(value) = HeaderValue::from_str(&allowed) {
                resp.headers_mut().insert(header::ALLOW, value);
            }
        }
        resp
    }
}

pub type Result<T> = std::result::Result<T, ODataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_expected_json_shape() {
        let err = ODataError::malformed("created_at is an auto field and may not be set by the client");
        let body = err.to_error_body();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"]["code"], "MalformedRequest");
        assert!(
            json["error"]["message"]
                .as_str()
                .unwrap()
                .contains("created_at")
        );
    }

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(ODataError::not_found("x").status_code(), 404);
        assert_eq!(ODataError::conflict("x").status_code(), 409);
        assert_eq!(
            ODataError::PreconditionRequired { message: "x".into() }.status_code(),
            428
        );
        assert_eq!(ODataError::cancelled("x").status_code(), 499);
    }
}
