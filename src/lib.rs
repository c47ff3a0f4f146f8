//! kiro-relay -- protocol-translating gateway in front of the Kiro
//! (Amazon Q / CodeWhisperer) API.
//!
//! Clients speak any of three chat-completion dialects (OpenAI, Anthropic,
//! Gemini); the gateway normalizes them into one canonical request, calls
//! the upstream once, and translates its event stream back into the
//! dialect the client spoke.

pub mod api;
pub mod auth;
pub mod config;
pub mod convert;
pub mod error;
pub mod models;
pub mod stream;
pub mod upstream;

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Instant;

use crate::auth::cache::CredentialCache;
use crate::auth::manager::CredentialManager;
use crate::config::Config;

/// Shared application state, owned by the gateway root and passed into
/// request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Credentials for simple (single-tenant) mode; absent when no refresh
    /// token is configured, in which case clients must bring their own.
    pub global_manager: Option<Arc<CredentialManager>>,
    /// Per-tenant credential managers, keyed by refresh token.
    pub tenants: Arc<CredentialCache>,
    pub started_at: Instant,
    pub requests_served: Arc<AtomicU64>,
}

impl AppState {
    /// Build the state, initializing the global credential manager when the
    /// environment provides credentials.
    pub async fn from_config(config: Config) -> Self {
        let global_manager = if config.refresh_token.is_some() || config.creds_file.is_some() {
            match CredentialManager::from_config(&config).await {
                Ok(manager) => Some(Arc::new(manager)),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Global credentials unavailable; only multi-tenant requests will work"
                    );
                    None
                }
            }
        } else {
            None
        };

        Self {
            tenants: Arc::new(CredentialCache::new(config.clone())),
            config: Arc::new(config),
            global_manager,
            started_at: Instant::now(),
            requests_served: Arc::new(AtomicU64::new(0)),
        }
    }
}
