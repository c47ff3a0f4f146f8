//! Gateway configuration.
//!
//! All settings come from the environment. Parse failures never abort
//! startup: the value falls back to its default and a warning is logged.

use std::time::Duration;

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Refresh the access token when it expires within this window.
pub const DEFAULT_TOKEN_REFRESH_THRESHOLD: Duration = Duration::from_secs(600);

/// Safety margin subtracted from the token's reported expiry.
pub const EXPIRY_SAFETY_MARGIN: Duration = Duration::from_secs(60);

/// Maximum number of retry attempts for upstream requests.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay between retry attempts (exponential backoff: delay * 2^attempt).
pub const DEFAULT_BASE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Timeout waiting for the first byte of a streaming response.
pub const DEFAULT_FIRST_TOKEN_TIMEOUT: Duration = Duration::from_secs(120);

/// Whole-attempt retries when the first token never arrives.
pub const DEFAULT_FIRST_TOKEN_MAX_RETRIES: u32 = 3;

/// Read timeout between chunks of an established stream.
pub const DEFAULT_STREAM_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Timeout for non-streaming requests.
pub const DEFAULT_NON_STREAM_TIMEOUT: Duration = Duration::from_secs(900);

/// Timeout multiplier applied to slow models.
pub const DEFAULT_SLOW_MODEL_TIMEOUT_MULTIPLIER: f64 = 3.0;

/// Tool descriptions longer than this overflow into the system prompt.
/// Zero disables the extraction.
pub const DEFAULT_TOOL_DESCRIPTION_MAX_LENGTH: usize = 10_000;

/// Model catalog cache TTL.
pub const DEFAULT_MODEL_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Context window assumed when deriving token counts from
/// `contextUsagePercentage`.
pub const DEFAULT_MAX_INPUT_TOKENS: u32 = 200_000;

/// How long an inbound connection may sit without payload bytes: a single
/// streamed completion can legitimately stall this long on slow models.
pub const SERVER_IDLE_TIMEOUT: Duration = Duration::from_secs(255);

/// Interval for SSE keep-alive comments. Kept far below
/// [`SERVER_IDLE_TIMEOUT`] so a stalled stream never looks idle to the
/// client or to intermediaries.
pub const SSE_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Model names containing any of these run on a multiplied timeout.
pub const SLOW_MODEL_MARKERS: &[&str] = &[
    "claude-opus-4-5",
    "claude-opus-4-5-20251101",
    "claude-3-opus",
    "claude-3-opus-20240229",
];

/// Runtime configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// API key clients must present (`PROXY_API_KEY`).
    pub proxy_api_key: String,
    /// Listen port (`PORT`).
    pub port: u16,
    /// Refresh token for simple (single-tenant) mode (`REFRESH_TOKEN`).
    pub refresh_token: Option<String>,
    /// AWS CodeWhisperer profile ARN (`PROFILE_ARN`).
    pub profile_arn: Option<String>,
    /// AWS region (`KIRO_REGION`).
    pub region: String,
    /// Credentials file path or http(s) URL (`KIRO_CREDS_FILE`).
    pub creds_file: Option<String>,
    pub token_refresh_threshold: Duration,
    pub max_retries: u32,
    pub base_retry_delay: Duration,
    pub first_token_timeout: Duration,
    pub first_token_max_retries: u32,
    pub stream_read_timeout: Duration,
    pub non_stream_timeout: Duration,
    pub slow_model_timeout_multiplier: f64,
    pub tool_description_max_length: usize,
    pub model_cache_ttl: Duration,
    pub default_max_input_tokens: u32,
    /// Recognized but not enforced. Zero disables.
    pub rate_limit_per_minute: u32,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        macro_rules! env_str {
            ($env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if !val.is_empty() {
                        $field = val;
                    }
                }
            };
        }
        macro_rules! env_opt_str {
            ($env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = if val.is_empty() { None } else { Some(val) };
                }
            };
        }
        macro_rules! env_parse {
            ($env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    match val.parse() {
                        Ok(parsed) => $field = parsed,
                        Err(_) => tracing::warn!(
                            env = $env,
                            value = %val,
                            "Unparseable value, using default"
                        ),
                    }
                }
            };
        }
        macro_rules! env_secs {
            ($env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    match val.parse::<u64>() {
                        Ok(secs) => $field = Duration::from_secs(secs),
                        Err(_) => tracing::warn!(
                            env = $env,
                            value = %val,
                            "Unparseable duration, using default"
                        ),
                    }
                }
            };
        }

        env_str!("PROXY_API_KEY", cfg.proxy_api_key);
        env_parse!("PORT", cfg.port);
        env_opt_str!("REFRESH_TOKEN", cfg.refresh_token);
        env_opt_str!("PROFILE_ARN", cfg.profile_arn);
        env_str!("KIRO_REGION", cfg.region);
        env_opt_str!("KIRO_CREDS_FILE", cfg.creds_file);
        env_secs!("TOKEN_REFRESH_THRESHOLD", cfg.token_refresh_threshold);
        env_parse!("MAX_RETRIES", cfg.max_retries);
        env_secs!("BASE_RETRY_DELAY", cfg.base_retry_delay);
        env_secs!("FIRST_TOKEN_TIMEOUT", cfg.first_token_timeout);
        env_parse!("FIRST_TOKEN_MAX_RETRIES", cfg.first_token_max_retries);
        env_secs!("STREAM_READ_TIMEOUT", cfg.stream_read_timeout);
        env_secs!("NON_STREAM_TIMEOUT", cfg.non_stream_timeout);
        env_parse!(
            "SLOW_MODEL_TIMEOUT_MULTIPLIER",
            cfg.slow_model_timeout_multiplier
        );
        env_parse!("TOOL_DESCRIPTION_MAX_LENGTH", cfg.tool_description_max_length);
        env_secs!("MODEL_CACHE_TTL", cfg.model_cache_ttl);
        env_parse!("DEFAULT_MAX_INPUT_TOKENS", cfg.default_max_input_tokens);
        env_parse!("RATE_LIMIT_PER_MINUTE", cfg.rate_limit_per_minute);
        env_str!("LOG_LEVEL", cfg.log_level);

        cfg
    }

    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    /// Whether the model name is on the slow list.
    pub fn is_slow_model(model: &str) -> bool {
        SLOW_MODEL_MARKERS.iter().any(|m| model.contains(m))
    }

    /// Timeout multiplier for the given model.
    pub fn timeout_multiplier(&self, model: &str) -> f64 {
        if Self::is_slow_model(model) {
            self.slow_model_timeout_multiplier
        } else {
            1.0
        }
    }

    /// First-token timeout scaled by the model's multiplier.
    pub fn scaled_first_token_timeout(&self, model: &str) -> Duration {
        self.first_token_timeout
            .mul_f64(self.timeout_multiplier(model))
    }

    /// Stream read timeout scaled by the model's multiplier.
    pub fn scaled_stream_read_timeout(&self, model: &str) -> Duration {
        self.stream_read_timeout
            .mul_f64(self.timeout_multiplier(model))
    }

    /// Non-streaming timeout scaled by the model's multiplier.
    pub fn scaled_non_stream_timeout(&self, model: &str) -> Duration {
        self.non_stream_timeout
            .mul_f64(self.timeout_multiplier(model))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy_api_key: String::new(),
            port: 8000,
            refresh_token: None,
            profile_arn: None,
            region: DEFAULT_REGION.to_string(),
            creds_file: None,
            token_refresh_threshold: DEFAULT_TOKEN_REFRESH_THRESHOLD,
            max_retries: DEFAULT_MAX_RETRIES,
            base_retry_delay: DEFAULT_BASE_RETRY_DELAY,
            first_token_timeout: DEFAULT_FIRST_TOKEN_TIMEOUT,
            first_token_max_retries: DEFAULT_FIRST_TOKEN_MAX_RETRIES,
            stream_read_timeout: DEFAULT_STREAM_READ_TIMEOUT,
            non_stream_timeout: DEFAULT_NON_STREAM_TIMEOUT,
            slow_model_timeout_multiplier: DEFAULT_SLOW_MODEL_TIMEOUT_MULTIPLIER,
            tool_description_max_length: DEFAULT_TOOL_DESCRIPTION_MAX_LENGTH,
            model_cache_ttl: DEFAULT_MODEL_CACHE_TTL,
            default_max_input_tokens: DEFAULT_MAX_INPUT_TOKENS,
            rate_limit_per_minute: 0,
            log_level: "info".to_string(),
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
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.region, "us-east-1");
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.first_token_timeout, Duration::from_secs(120));
        assert_eq!(cfg.non_stream_timeout, Duration::from_secs(900));
        assert_eq!(cfg.tool_description_max_length, 10_000);
        assert_eq!(cfg.default_max_input_tokens, 200_000);
        assert_eq!(cfg.rate_limit_per_minute, 0);
    }

    #[test]
    fn test_slow_model_detection() {
        assert!(Config::is_slow_model("claude-opus-4-5"));
        assert!(Config::is_slow_model("claude-opus-4-5-20251101"));
        assert!(Config::is_slow_model("claude-3-opus-20240229"));
        assert!(!Config::is_slow_model("claude-sonnet-4-5"));
        assert!(!Config::is_slow_model("auto"));
    }

    #[test]
    fn test_timeout_multiplier() {
        let cfg = Config::default();
        assert_eq!(cfg.timeout_multiplier("claude-opus-4-5"), 3.0);
        assert_eq!(cfg.timeout_multiplier("claude-sonnet-4-5"), 1.0);
        assert_eq!(
            cfg.scaled_first_token_timeout("claude-opus-4-5"),
            Duration::from_secs(360)
        );
        assert_eq!(
            cfg.scaled_first_token_timeout("claude-sonnet-4-5"),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn test_keep_alive_fits_idle_budget() {
        // Several keep-alive pings must fit into the stall budget, or a
        // stalled stream could still be reaped as idle.
        assert!(SSE_KEEP_ALIVE_INTERVAL * 4 < SERVER_IDLE_TIMEOUT);
    }

    #[test]
    fn test_env_overrides_apply() {
        // SAFETY: env-mutating tests run sequentially.
        unsafe {
            std::env::set_var("PORT", "9111");
            std::env::set_var("FIRST_TOKEN_TIMEOUT", "7");
            std::env::set_var("KIRO_REGION", "eu-west-1");
        }
        let cfg = Config::from_env();
        assert_eq!(cfg.port, 9111);
        assert_eq!(cfg.first_token_timeout, Duration::from_secs(7));
        assert_eq!(cfg.region, "eu-west-1");
        unsafe {
            std::env::remove_var("PORT");
            std::env::remove_var("FIRST_TOKEN_TIMEOUT");
            std::env::remove_var("KIRO_REGION");
        }
    }

    #[test]
    fn test_env_unparseable_falls_back() {
        unsafe { std::env::set_var("MAX_RETRIES", "lots") };
        let cfg = Config::from_env();
        assert_eq!(cfg.max_retries, DEFAULT_MAX_RETRIES);
        unsafe { std::env::remove_var("MAX_RETRIES") };
    }
}
