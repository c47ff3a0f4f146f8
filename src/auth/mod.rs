//! Client authentication and the credential subsystem.
//!
//! Two API-key shapes are accepted: `PROXY_API_KEY` alone selects the
//! gateway's own credentials, `PROXY_API_KEY:REFRESH_TOKEN` selects (or
//! creates) a per-tenant credential manager.

pub mod cache;
pub mod constants;
pub mod credentials;
pub mod manager;

use std::sync::Arc;

use axum::http::HeaderMap;

use crate::error::GatewayError;

/// Which credentials a request runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAuth {
    /// The globally configured credential manager.
    Global,
    /// A tenant-provided refresh token, resolved through the cache.
    Tenant { refresh_token: String },
}

/// Validate a client-presented key against the configured `PROXY_API_KEY`.
pub fn parse_api_key(provided: &str, expected: &str) -> Result<ClientAuth, GatewayError> {
    if expected.is_empty() {
        return Err(GatewayError::Authentication(
            "gateway has no PROXY_API_KEY configured".into(),
        ));
    }
    if provided == expected {
        return Ok(ClientAuth::Global);
    }
    if let Some((key, refresh_token)) = provided.split_once(':') {
        if key == expected && !refresh_token.is_empty() {
            return Ok(ClientAuth::Tenant {
                refresh_token: refresh_token.to_string(),
            });
        }
    }
    Err(GatewayError::Authentication("invalid API key".into()))
}

/// `Authorization: Bearer <key>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

/// `x-api-key: <key>` (Anthropic dialect).
pub fn api_key_header(headers: &HeaderMap) -> Option<String> {
    headers.get("x-api-key")?.to_str().ok().map(str::to_string)
}

/// Resolve the credential manager for an authenticated request.
pub async fn resolve_manager(
    state: &crate::AppState,
    auth: &ClientAuth,
) -> Result<Arc<manager::CredentialManager>, GatewayError> {
    match auth {
        ClientAuth::Global => state.global_manager.clone().ok_or_else(|| {
            GatewayError::TokenRefresh(
                "no gateway refresh token configured; pass PROXY_API_KEY:REFRESH_TOKEN".into(),
            )
        }),
        ClientAuth::Tenant { refresh_token } => {
            Ok(state.tenants.get_or_create(refresh_token).await)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_key_is_global() {
        assert_eq!(parse_api_key("k1", "k1").unwrap(), ClientAuth::Global);
    }

    #[test]
    fn test_key_with_refresh_token_is_tenant() {
        assert_eq!(
            parse_api_key("k1:my-refresh-token", "k1").unwrap(),
            ClientAuth::Tenant {
                refresh_token: "my-refresh-token".into()
            }
        );
    }

    #[test]
    fn test_refresh_token_may_contain_colons() {
        // Only the first colon separates key and token.
        assert_eq!(
            parse_api_key("k1:a:b:c", "k1").unwrap(),
            ClientAuth::Tenant {
                refresh_token: "a:b:c".into()
            }
        );
    }

    #[test]
    fn test_wrong_key_rejected() {
        assert!(parse_api_key("nope", "k1").is_err());
        assert!(parse_api_key("nope:rt", "k1").is_err());
        assert!(parse_api_key("k1:", "k1").is_err());
        assert!(parse_api_key("", "k1").is_err());
    }

    #[test]
    fn test_unconfigured_gateway_rejects_all() {
        assert!(parse_api_key("anything", "").is_err());
    }

    #[test]
    fn test_bearer_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer k1:rt".parse().unwrap(),
        );
        assert_eq!(bearer_token(&headers).as_deref(), Some("k1:rt"));

        let mut bad = HeaderMap::new();
        bad.insert(axum::http::header::AUTHORIZATION, "Basic xyz".parse().unwrap());
        assert_eq!(bearer_token(&bad), None);
    }

    #[test]
    fn test_api_key_header_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "k1".parse().unwrap());
        assert_eq!(api_key_header(&headers).as_deref(), Some("k1"));
        assert_eq!(api_key_header(&HeaderMap::new()), None);
    }
}
