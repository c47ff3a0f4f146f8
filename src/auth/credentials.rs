//! Credential records and the credentials file.
//!
//! The file is JSON with camelCase keys (`refreshToken`, `accessToken`,
//! `expiresAt` as ISO-8601, `profileArn`, `region`). It can also live
//! behind an http(s) URL, in which case it is fetched once at startup and
//! never written back.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::DEFAULT_REGION;
use crate::error::GatewayError;

/// In-memory credential state for one tenant.
#[derive(Clone)]
pub struct Credentials {
    pub refresh_token: String,
    pub access_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub profile_arn: Option<String>,
    pub region: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("refresh_token", &redact(&self.refresh_token))
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .field("profile_arn", &self.profile_arn)
            .field("region", &self.region)
            .finish()
    }
}

/// Keep a short prefix so operators can tell tenants apart in logs.
fn redact(token: &str) -> String {
    if token.len() <= 8 {
        "[REDACTED]".to_string()
    } else {
        format!("{}…", &token[..8])
    }
}

impl Credentials {
    pub fn new(refresh_token: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            refresh_token: refresh_token.into(),
            access_token: None,
            expires_at: None,
            profile_arn: None,
            region: region.into(),
        }
    }

    /// The cached token, when it is still comfortably inside its lifetime.
    pub fn valid_token(&self, threshold: std::time::Duration) -> Option<String> {
        let token = self.access_token.as_ref()?;
        if token.is_empty() {
            return None;
        }
        let expires_at = self.expires_at?;
        let horizon = Utc::now() + chrono::Duration::from_std(threshold).unwrap_or_default();
        if expires_at > horizon {
            Some(token.clone())
        } else {
            None
        }
    }
}

/// The on-disk / remote wire shape of the credentials file.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredCredentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    /// ISO-8601.
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    profile_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<String>,
}

/// Where credentials were loaded from, deciding persist behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Constructed directly (env-provided refresh token). Not persisted.
    Direct,
    /// Local JSON file, persisted after every successful refresh.
    File(PathBuf),
    /// Remote URL, fetched once, never persisted.
    Url(String),
}

/// Load the credentials file from a path or URL, merging into `base`.
/// Fields missing from the file keep the constructor-provided values.
pub async fn load(
    location: &str,
    base: Credentials,
    http: &reqwest::Client,
) -> Result<(Credentials, CredentialSource), GatewayError> {
    if location.starts_with("http://") || location.starts_with("https://") {
        let body = http
            .get(location)
            .send()
            .await
            .map_err(|e| GatewayError::TokenRefresh(format!("credentials fetch failed: {e}")))?
            .error_for_status()
            .map_err(|e| GatewayError::TokenRefresh(format!("credentials fetch failed: {e}")))?
            .text()
            .await
            .map_err(|e| GatewayError::TokenRefresh(format!("credentials fetch failed: {e}")))?;
        let creds = merge(base, &body)?;
        info!(source = location, "Credentials loaded from URL");
        Ok((creds, CredentialSource::Url(location.to_string())))
    } else {
        let path = expand_tilde(location);
        let body = std::fs::read_to_string(&path).map_err(|e| {
            GatewayError::TokenRefresh(format!(
                "cannot read credentials file {}: {e}",
                path.display()
            ))
        })?;
        let creds = merge(base, &body)?;
        info!(source = %path.display(), "Credentials loaded from file");
        Ok((creds, CredentialSource::File(path)))
    }
}

fn merge(mut base: Credentials, body: &str) -> Result<Credentials, GatewayError> {
    let stored: StoredCredentials = serde_json::from_str(body)
        .map_err(|e| GatewayError::TokenRefresh(format!("invalid credentials file: {e}")))?;

    if let Some(v) = stored.refresh_token.filter(|v| !v.is_empty()) {
        base.refresh_token = v;
    }
    if let Some(v) = stored.access_token.filter(|v| !v.is_empty()) {
        base.access_token = Some(v);
    }
    if let Some(v) = stored.profile_arn.filter(|v| !v.is_empty()) {
        base.profile_arn = Some(v);
    }
    if let Some(v) = stored.region.filter(|v| !v.is_empty()) {
        base.region = v;
    }
    if let Some(v) = stored.expires_at {
        if let Ok(dt) = DateTime::parse_from_rfc3339(&v) {
            base.expires_at = Some(dt.with_timezone(&Utc));
        }
    }

    if base.refresh_token.is_empty() {
        return Err(GatewayError::TokenRefresh(
            "credentials file contains no refreshToken".into(),
        ));
    }
    Ok(base)
}

/// Persist credentials atomically: write a temp file, then rename over the
/// target so a crash mid-write never truncates it.
pub fn persist(path: &Path, creds: &Credentials) -> Result<(), GatewayError> {
    let stored = StoredCredentials {
        refresh_token: Some(creds.refresh_token.clone()),
        access_token: creds.access_token.clone(),
        expires_at: creds.expires_at.map(|dt| dt.to_rfc3339()),
        profile_arn: creds.profile_arn.clone(),
        region: Some(creds.region.clone()),
    };
    let body = serde_json::to_string_pretty(&stored)
        .map_err(|e| GatewayError::Internal(format!("credentials serialization: {e}")))?;

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, body)
        .map_err(|e| GatewayError::Internal(format!("credentials write: {e}")))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| GatewayError::Internal(format!("credentials rename: {e}")))?;
    Ok(())
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Build the base credentials from environment-provided settings.
pub fn from_config(cfg: &crate::config::Config) -> Credentials {
    let mut creds = Credentials::new(
        cfg.refresh_token.clone().unwrap_or_default(),
        if cfg.region.is_empty() {
            DEFAULT_REGION.to_string()
        } else {
            cfg.region.clone()
        },
    );
    creds.profile_arn = cfg.profile_arn.clone();
    creds
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
