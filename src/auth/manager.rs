//! Access-token lifecycle.
//!
//! One `CredentialManager` per refresh token. Refreshes are single-flight:
//! the write guard is held across the refresh request, a double-check under
//! the guard lets every waiter reuse the leader's result.

use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::auth::constants;
use crate::auth::credentials::{self, CredentialSource, Credentials};
use crate::config::{Config, EXPIRY_SAFETY_MARGIN};
use crate::error::GatewayError;

/// A forced refresh completed this recently satisfies a follower's force.
const FORCE_REUSE_WINDOW: Duration = Duration::from_secs(5);

/// Manages one tenant's token lifecycle.
pub struct CredentialManager {
    http: reqwest::Client,
    state: RwLock<ManagedState>,
    fingerprint: String,
    refresh_url: String,
    threshold: Duration,
    max_retries: u32,
    base_retry_delay: Duration,
    source: CredentialSource,
}

struct ManagedState {
    credentials: Credentials,
    refreshed_at: Option<Instant>,
}

/// Refresh endpoint response.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    #[serde(default)]
    profile_arn: Option<String>,
}

fn default_expires_in() -> i64 {
    3600
}

impl CredentialManager {
    /// Build a manager around explicit credentials.
    pub fn new(credentials: Credentials, cfg: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            refresh_url: constants::refresh_url(&credentials.region),
            state: RwLock::new(ManagedState {
                credentials,
                refreshed_at: None,
            }),
            fingerprint: constants::machine_fingerprint(),
            threshold: cfg.token_refresh_threshold,
            max_retries: cfg.max_retries,
            base_retry_delay: cfg.base_retry_delay,
            source: CredentialSource::Direct,
        }
    }

    /// Build the gateway's global manager from configuration, loading the
    /// credentials file when one is configured.
    pub async fn from_config(cfg: &Config) -> Result<Self, GatewayError> {
        let base = credentials::from_config(cfg);
        let http = reqwest::Client::new();

        let (creds, source) = match &cfg.creds_file {
            Some(location) => credentials::load(location, base, &http).await?,
            None => {
                if base.refresh_token.is_empty() {
                    return Err(GatewayError::TokenRefresh(
                        "no refresh token configured (REFRESH_TOKEN or KIRO_CREDS_FILE)".into(),
                    ));
                }
                (base, CredentialSource::Direct)
            }
        };

        let mut manager = Self::new(creds, cfg);
        manager.http = http;
        manager.source = source;
        // Region may have come from the credentials file.
        manager.refresh_url =
            constants::refresh_url(&manager.state.get_mut().credentials.region);
        Ok(manager)
    }

    /// Build a per-tenant manager for a client-provided refresh token.
    pub fn for_refresh_token(refresh_token: &str, cfg: &Config) -> Self {
        let mut creds = Credentials::new(refresh_token, cfg.region.clone());
        creds.profile_arn = cfg.profile_arn.clone();
        Self::new(creds, cfg)
    }

    /// Point refreshes at a different endpoint (tests).
    pub fn with_refresh_url(mut self, url: impl Into<String>) -> Self {
        self.refresh_url = url.into();
        self
    }

    // -- read-only accessors -------------------------------------------------

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub async fn region(&self) -> String {
        self.state.read().await.credentials.region.clone()
    }

    pub async fn profile_arn(&self) -> Option<String> {
        self.state.read().await.credentials.profile_arn.clone()
    }

    /// CodeWhisperer API host for this tenant's region.
    pub async fn api_host(&self) -> String {
        constants::api_host(&self.state.read().await.credentials.region)
    }

    /// Amazon Q host for this tenant's region.
    pub async fn q_host(&self) -> String {
        constants::q_host(&self.state.read().await.credentials.region)
    }

    // -- token lifecycle -----------------------------------------------------

    /// Get a valid access token, refreshing when missing or near expiry.
    pub async fn get_access_token(&self) -> Result<String, GatewayError> {
        {
            let state = self.state.read().await;
            if let Some(token) = state.credentials.valid_token(self.threshold) {
                return Ok(token);
            }
        }

        let mut state = self.state.write().await;
        // Another task may have refreshed while we waited for the guard.
        if let Some(token) = state.credentials.valid_token(self.threshold) {
            return Ok(token);
        }
        self.refresh_locked(&mut state).await
    }

    /// Refresh regardless of expiry (after an upstream 403). Obeys the
    /// single-flight guard; a refresh that completed while waiting counts.
    pub async fn force_refresh(&self) -> Result<String, GatewayError> {
        info!("Force refresh requested");
        let mut state = self.state.write().await;
        if state
            .refreshed_at
            .is_some_and(|t| t.elapsed() < FORCE_REUSE_WINDOW)
        {
            if let Some(token) = state.credentials.valid_token(Duration::ZERO) {
                debug!("Reusing token from a refresh that just completed");
                return Ok(token);
            }
        }
        self.refresh_locked(&mut state).await
    }

    async fn refresh_locked(&self, state: &mut ManagedState) -> Result<String, GatewayError> {
        if state.credentials.refresh_token.is_empty() {
            return Err(GatewayError::TokenRefresh(
                "no refresh token configured".into(),
            ));
        }

        let response = self.request_refresh(&state.credentials.refresh_token).await?;

        state.credentials.access_token = Some(response.access_token.clone());
        state.credentials.expires_at = Some(
            chrono::Utc::now()
                + chrono::Duration::seconds(response.expires_in)
                - chrono::Duration::from_std(EXPIRY_SAFETY_MARGIN).unwrap_or_default(),
        );
        if let Some(rt) = response.refresh_token.filter(|rt| !rt.is_empty()) {
            state.credentials.refresh_token = rt;
        }
        if let Some(arn) = response.profile_arn.filter(|arn| !arn.is_empty()) {
            state.credentials.profile_arn = Some(arn);
        }
        state.refreshed_at = Some(Instant::now());

        if let CredentialSource::File(path) = &self.source {
            if let Err(e) = credentials::persist(path, &state.credentials) {
                warn!(error = %e, "Failed to persist refreshed credentials");
            }
        }

        info!(
            expires_at = %state.credentials.expires_at.unwrap_or_default(),
            "Access token refreshed"
        );
        Ok(response.access_token)
    }

    /// POST the refresh token, with exponential backoff on 429/5xx and
    /// network errors. Other failures are fatal.
    async fn request_refresh(&self, refresh_token: &str) -> Result<RefreshResponse, GatewayError> {
        let payload = json!({ "refreshToken": refresh_token });
        let mut last_error = String::new();

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let delay = self.base_retry_delay * 2u32.pow(attempt - 1);
                debug!(attempt, delay_ms = delay.as_millis(), "Retrying token refresh");
                tokio::time::sleep(delay).await;
            }

            let result = self
                .http
                .post(&self.refresh_url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .header(
                    reqwest::header::USER_AGENT,
                    constants::refresh_user_agent(&self.fingerprint),
                )
                .json(&payload)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    let data: RefreshResponse = resp.json().await.map_err(|e| {
                        GatewayError::TokenRefresh(format!("invalid refresh response: {e}"))
                    })?;
                    if data.access_token.is_empty() {
                        return Err(GatewayError::TokenRefresh(
                            "refresh response missing accessToken".into(),
                        ));
                    }
                    return Ok(data);
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let body = resp.text().await.unwrap_or_default();
                    if matches!(status, 429 | 500 | 502 | 503 | 504) {
                        warn!(status, "Retriable refresh failure");
                        last_error = format!("HTTP {status}: {body}");
                        continue;
                    }
                    return Err(GatewayError::TokenRefresh(format!(
                        "refresh endpoint returned {status}: {body}"
                    )));
                }
                Err(e) => {
                    warn!(error = %e, "Refresh request failed");
                    last_error = e.to_string();
                }
            }
        }

        Err(GatewayError::TokenRefresh(format!(
            "refresh failed after {} attempts: {last_error}",
            self.max_retries
        )))
    }
}

impl std::fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialManager")
            .field("fingerprint", &self.fingerprint)
            .field("refresh_url", &self.refresh_url)
            .field("source", &self.source)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
