//! Upstream HTTP client.
//!
//! One concern: deliver a signed `generateAssistantResponse` call and hand
//! back the streaming response. Retries absorb 403 (token refresh), 429 and
//! 5xx; other client errors return to the caller unretried.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::auth::constants;
use crate::auth::manager::CredentialManager;
use crate::config::Config;
use crate::error::GatewayError;
use crate::models::kiro::KiroPayload;

/// Connect timeout for upstream sockets.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct UpstreamClient {
    http: reqwest::Client,
    auth: Arc<CredentialManager>,
    cfg: Config,
    api_base: Option<String>,
}

impl UpstreamClient {
    pub fn new(auth: Arc<CredentialManager>, cfg: Config) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            auth,
            cfg,
            api_base: None,
        }
    }

    /// Point requests at a different host (tests).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = Some(base.into());
        self
    }

    async fn generate_url(&self) -> String {
        let host = match &self.api_base {
            Some(base) => base.clone(),
            None => self.auth.api_host().await,
        };
        constants::generate_url(&host, self.auth.profile_arn().await.as_deref())
    }

    /// Issue the streaming call. A send-phase timeout surfaces as
    /// `FirstTokenTimeout` so the translation pipeline can retry the whole
    /// attempt.
    pub async fn stream_request(
        &self,
        payload: &KiroPayload,
        model: &str,
    ) -> Result<reqwest::Response, GatewayError> {
        let url = self.generate_url().await;
        let send_timeout = self.cfg.scaled_first_token_timeout(model);
        let mut last_error = String::new();

        for attempt in 0..self.cfg.max_retries {
            let token = self.auth.get_access_token().await?;
            let headers = constants::streaming_headers(&token, self.auth.fingerprint());

            let send = self.http.post(&url).headers(headers).json(payload).send();
            let response = match tokio::time::timeout(send_timeout, send).await {
                Err(_) => return Err(GatewayError::FirstTokenTimeout),
                Ok(Err(e)) if e.is_timeout() => return Err(GatewayError::FirstTokenTimeout),
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok(resp)) => resp,
            };

            let status = response.status().as_u16();
            if response.status().is_success() {
                return Ok(response);
            }

            match status {
                403 => {
                    warn!("Upstream returned 403, forcing token refresh");
                    if let Err(e) = self.auth.force_refresh().await {
                        warn!(error = %e, "Forced refresh failed");
                    }
                    last_error = "HTTP 403".into();
                    // Immediate retry, no backoff.
                }
                429 | 500..=599 => {
                    let body = response.text().await.unwrap_or_default();
                    warn!(status, "Retriable upstream failure on stream");
                    last_error = format!("HTTP {status}: {body}");
                    self.backoff(attempt).await;
                }
                _ => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(GatewayError::Upstream {
                        status,
                        message: body,
                    });
                }
            }
        }

        Err(GatewayError::Timeout(format!(
            "upstream stream attempts exhausted: {last_error}"
        )))
    }

    /// Issue the call with a full-body timeout (non-streaming callers).
    pub async fn send_request(
        &self,
        payload: &KiroPayload,
        model: &str,
    ) -> Result<reqwest::Response, GatewayError> {
        let url = self.generate_url().await;
        let attempt_timeout = self.cfg.scaled_non_stream_timeout(model);
        let mut last_error = String::new();

        for attempt in 0..self.cfg.max_retries {
            let token = self.auth.get_access_token().await?;
            let headers = constants::api_headers(&token, self.auth.fingerprint());

            let result = self
                .http
                .post(&url)
                .timeout(attempt_timeout)
                .headers(headers)
                .json(payload)
                .send()
                .await;

            let response = match result {
                Ok(resp) => resp,
                Err(e) if e.is_timeout() => {
                    warn!(attempt, "Upstream request timed out");
                    last_error = "timeout".into();
                    self.backoff(attempt).await;
                    continue;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Upstream request failed");
                    last_error = e.to_string();
                    self.backoff(attempt).await;
                    continue;
                }
            };

            let status = response.status().as_u16();
            if response.status().is_success() {
                return Ok(response);
            }

            match status {
                403 => {
                    warn!("Upstream returned 403, forcing token refresh");
                    if let Err(e) = self.auth.force_refresh().await {
                        warn!(error = %e, "Forced refresh failed");
                    }
                    last_error = "HTTP 403".into();
                }
                429 | 500..=599 => {
                    let body = response.text().await.unwrap_or_default();
                    warn!(status, "Retriable upstream failure");
                    last_error = format!("HTTP {status}: {body}");
                    self.backoff(attempt).await;
                }
                _ => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(GatewayError::Upstream {
                        status,
                        message: body,
                    });
                }
            }
        }

        Err(GatewayError::Upstream {
            status: 502,
            message: format!(
                "upstream attempts exhausted after {}: {last_error}",
                self.cfg.max_retries
            ),
        })
    }

    async fn backoff(&self, attempt: u32) {
        let delay = self.cfg.base_retry_delay * 2u32.pow(attempt);
        debug!(attempt, delay_ms = delay.as_millis(), "Backing off before retry");
        tokio::time::sleep(delay).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credentials::Credentials;
    use crate::models::canonical::{CanonicalMessage, CanonicalRequest, Role};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use axum::routing::post;

    fn payload() -> KiroPayload {
        crate::convert::request::build_payload(
            &CanonicalRequest::for_test(
                "claude-sonnet-4-5",
                vec![CanonicalMessage::text(Role::User, "hi")],
            ),
            None,
        )
        .unwrap()
    }

    async fn serve(app: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    async fn refresh_endpoint(counter: Arc<AtomicUsize>) -> String {
        let app = axum::Router::new().route(
            "/refreshToken",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    axum::Json(serde_json::json!({"accessToken": "tok", "expiresIn": 3600}))
                }
            }),
        );
        format!("{}/refreshToken", serve(app).await)
    }

    fn test_config() -> Config {
        let mut cfg = Config::default();
        cfg.base_retry_delay = Duration::from_millis(5);
        cfg
    }

    fn client_for(base: String, refresh_url: String, cfg: Config) -> UpstreamClient {
        let manager = Arc::new(
            CredentialManager::new(Credentials::new("rt", "us-east-1"), &cfg)
                .with_refresh_url(refresh_url),
        );
        UpstreamClient::new(manager, cfg).with_api_base(base)
    }

    #[tokio::test]
    async fn test_success_passthrough() {
        let refresh_count = Arc::new(AtomicUsize::new(0));
        let refresh_url = refresh_endpoint(refresh_count.clone()).await;
        let app = axum::Router::new().route(
            "/generateAssistantResponse",
            post(|| async { r#"{"content":"hi"}"# }),
        );
        let base = serve(app).await;

        let client = client_for(base, refresh_url, test_config());
        let resp = client.stream_request(&payload(), "auto").await.unwrap();
        assert!(resp.status().is_success());
        // One refresh to mint the initial token.
        assert_eq!(refresh_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_403_forces_refresh_then_succeeds() {
        let refresh_count = Arc::new(AtomicUsize::new(0));
        let refresh_url = refresh_endpoint(refresh_count.clone()).await;

        let generate_count = Arc::new(AtomicUsize::new(0));
        let g = generate_count.clone();
        let app = axum::Router::new().route(
            "/generateAssistantResponse",
            post(move || {
                let g = g.clone();
                async move {
                    if g.fetch_add(1, Ordering::SeqCst) == 0 {
                        (axum::http::StatusCode::FORBIDDEN, "expired")
                    } else {
                        (axum::http::StatusCode::OK, r#"{"content":"ok"}"#)
                    }
                }
            }),
        );
        let base = serve(app).await;

        let client = client_for(base, refresh_url, test_config());
        let resp = client.stream_request(&payload(), "auto").await.unwrap();
        assert!(resp.status().is_success());
        assert_eq!(generate_count.load(Ordering::SeqCst), 2, "two upstream POSTs");
        // Initial mint + one forced refresh.
        assert_eq!(refresh_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_5xx_retried_with_backoff() {
        let refresh_url = refresh_endpoint(Arc::new(AtomicUsize::new(0))).await;
        let generate_count = Arc::new(AtomicUsize::new(0));
        let g = generate_count.clone();
        let app = axum::Router::new().route(
            "/generateAssistantResponse",
            post(move || {
                let g = g.clone();
                async move {
                    if g.fetch_add(1, Ordering::SeqCst) < 2 {
                        (axum::http::StatusCode::BAD_GATEWAY, "flaky")
                    } else {
                        (axum::http::StatusCode::OK, r#"{"content":"ok"}"#)
                    }
                }
            }),
        );
        let base = serve(app).await;

        let client = client_for(base, refresh_url, test_config());
        let resp = client.send_request(&payload(), "auto").await.unwrap();
        assert!(resp.status().is_success());
        assert_eq!(generate_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_4xx_not_retried() {
        let refresh_url = refresh_endpoint(Arc::new(AtomicUsize::new(0))).await;
        let generate_count = Arc::new(AtomicUsize::new(0));
        let g = generate_count.clone();
        let app = axum::Router::new().route(
            "/generateAssistantResponse",
            post(move || {
                let g = g.clone();
                async move {
                    g.fetch_add(1, Ordering::SeqCst);
                    (axum::http::StatusCode::NOT_FOUND, "no such model")
                }
            }),
        );
        let base = serve(app).await;

        let client = client_for(base, refresh_url, test_config());
        let err = client.stream_request(&payload(), "auto").await.unwrap_err();
        match err {
            GatewayError::Upstream { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "no such model");
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
        assert_eq!(generate_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_on_persistent_5xx() {
        let refresh_url = refresh_endpoint(Arc::new(AtomicUsize::new(0))).await;
        let app = axum::Router::new().route(
            "/generateAssistantResponse",
            post(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "down") }),
        );
        let base = serve(app).await;

        let client = client_for(base, refresh_url, test_config());
        let err = client.send_request(&payload(), "auto").await.unwrap_err();
        assert!(matches!(err, GatewayError::Upstream { status: 502, .. }));
    }
}
