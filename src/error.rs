//! Gateway error taxonomy and client-visible error bodies.
//!
//! Each variant maps to one canonical error kind. The per-dialect response
//! shapes differ, so the HTTP layer picks the body format matching the
//! dialect the client spoke.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Unified gateway error.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Rate limited: {0}")]
    RateLimit(String),

    #[error("Upstream timeout: {0}")]
    Timeout(String),

    /// First streamed byte never arrived. Handled internally by the
    /// translation pipeline's retry loop; surfaced as `Timeout` once
    /// retries are exhausted.
    #[error("No data received within the first-token window")]
    FirstTokenTimeout,

    #[error("Upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Authentication(_) | Self::TokenRefresh(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::RateLimit(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Timeout(_) | Self::FirstTokenTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Canonical error kind, used as the OpenAI/Anthropic `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication_error",
            Self::Validation(_) => "invalid_request_error",
            Self::RateLimit(_) => "rate_limit_error",
            Self::Timeout(_) | Self::FirstTokenTimeout => "timeout_error",
            Self::Upstream { .. } => "api_error",
            Self::TokenRefresh(_) => "authentication_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether the upstream client may retry the request.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::RateLimit(_) | Self::Timeout(_) | Self::FirstTokenTimeout => true,
            Self::Upstream { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    // -- client-visible bodies ---------------------------------------------

    /// OpenAI error body: `{"error": {"message", "type", "code"}}`.
    pub fn to_openai_body(&self) -> serde_json::Value {
        json!({
            "error": {
                "message": self.to_string(),
                "type": self.kind(),
                "code": self.status_code().as_u16(),
            }
        })
    }

    /// Anthropic error body: `{"type": "error", "error": {"type", "message"}}`.
    pub fn to_anthropic_body(&self) -> serde_json::Value {
        json!({
            "type": "error",
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
            }
        })
    }

    /// Gemini error body: `{"error": {"code", "message", "status"}}`.
    pub fn to_gemini_body(&self) -> serde_json::Value {
        let code = self.status_code().as_u16();
        json!({
            "error": {
                "code": code,
                "message": self.to_string(),
                "status": gemini_status(code),
            }
        })
    }
}

/// Map an HTTP status to the Google RPC status string Gemini clients expect.
pub fn gemini_status(code: u16) -> &'static str {
    match code {
        400 => "INVALID_ARGUMENT",
        401 => "UNAUTHENTICATED",
        403 => "PERMISSION_DENIED",
        404 => "NOT_FOUND",
        429 => "RESOURCE_EXHAUSTED",
        500..=599 => "INTERNAL",
        _ => "UNKNOWN",
    }
}

/// Which dialect's error body format to use when responding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenAi,
    Anthropic,
    Gemini,
}

/// A gateway error paired with the dialect the client spoke.
#[derive(Debug)]
pub struct DialectError {
    pub error: GatewayError,
    pub dialect: Dialect,
}

impl GatewayError {
    pub fn for_dialect(self, dialect: Dialect) -> DialectError {
        DialectError { error: self, dialect }
    }
}

impl IntoResponse for DialectError {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        let body = match self.dialect {
            Dialect::OpenAi => self.error.to_openai_body(),
            Dialect::Anthropic => self.error.to_anthropic_body(),
            Dialect::Gemini => self.error.to_gemini_body(),
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("JSON error: {err}"))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Upstream {
                status: 502,
                message: err.to_string(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
