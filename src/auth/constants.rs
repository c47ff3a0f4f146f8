//! Region-derived URLs, machine fingerprint, and upstream header set.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Kiro Desktop Auth refresh URL template. `{region}` replaced at runtime.
pub const REFRESH_URL_TEMPLATE: &str = "https://prod.{region}.auth.desktop.kiro.dev/refreshToken";

/// CodeWhisperer API host template.
pub const API_HOST_TEMPLATE: &str = "https://codewhisperer.{region}.amazonaws.com";

/// Amazon Q host template.
pub const Q_HOST_TEMPLATE: &str = "https://q.{region}.amazonaws.com";

/// Kiro IDE version string used in User-Agent headers.
pub const KIRO_IDE_VERSION: &str = "KiroIDE-0.7.45";

/// AWS SDK version string used in User-Agent headers.
pub const AWS_SDK_VERSION: &str = "aws-sdk-js/1.0.27";

pub fn refresh_url(region: &str) -> String {
    REFRESH_URL_TEMPLATE.replace("{region}", region)
}

pub fn api_host(region: &str) -> String {
    API_HOST_TEMPLATE.replace("{region}", region)
}

pub fn q_host(region: &str) -> String {
    Q_HOST_TEMPLATE.replace("{region}", region)
}

/// The `generateAssistantResponse` URL for a host and optional profile ARN.
pub fn generate_url(host: &str, profile_arn: Option<&str>) -> String {
    match profile_arn {
        Some(arn) => format!(
            "{host}/generateAssistantResponse?profileArn={}",
            urlencoding::encode(arn)
        ),
        None => format!("{host}/generateAssistantResponse"),
    }
}

// ---------------------------------------------------------------------------
// Machine fingerprint
// ---------------------------------------------------------------------------

/// SHA-256 hex of `"{hostname}-{username}-kiro-gateway"`.
///
/// Used only as an opaque suffix in outbound User-Agent headers. Lookup
/// failures degrade to a deterministic constant input.
pub fn machine_fingerprint() -> String {
    let input = format!("{}-{}-kiro-gateway", hostname(), username());
    let hash = Sha256::digest(input.as_bytes());
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

fn hostname() -> String {
    if let Ok(name) = std::fs::read_to_string("/etc/hostname") {
        let name = name.trim().to_string();
        if !name.is_empty() {
            return name;
        }
    }
    if let Ok(output) = std::process::Command::new("hostname").output() {
        if output.status.success() {
            let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !name.is_empty() {
                return name;
            }
        }
    }
    "unknown".into()
}

fn username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".into())
}

// ---------------------------------------------------------------------------
// Header construction
// ---------------------------------------------------------------------------

/// Full User-Agent for API calls.
pub fn user_agent(fingerprint: &str) -> String {
    format!(
        "{AWS_SDK_VERSION} ua/2.1 os/linux lang/js md/nodejs#22.21.1 \
         api/codewhispererstreaming#1.0.27 m/E {KIRO_IDE_VERSION}-{fingerprint}"
    )
}

/// Short User-Agent for the token refresh endpoint.
pub fn refresh_user_agent(fingerprint: &str) -> String {
    format!("{KIRO_IDE_VERSION}-{fingerprint}")
}

/// Standard headers for upstream API requests.
pub fn api_headers(access_token: &str, fingerprint: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();

    headers.insert(
        reqwest::header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {access_token}"))
            .unwrap_or_else(|_| HeaderValue::from_static("Bearer invalid")),
    );
    headers.insert(
        reqwest::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(
        reqwest::header::USER_AGENT,
        HeaderValue::from_str(&user_agent(fingerprint))
            .unwrap_or_else(|_| HeaderValue::from_static("kiro-relay")),
    );
    headers.insert(
        HeaderName::from_static("x-amz-user-agent"),
        HeaderValue::from_str(&format!("{AWS_SDK_VERSION} {KIRO_IDE_VERSION}-{fingerprint}"))
            .unwrap_or_else(|_| HeaderValue::from_static("kiro-relay")),
    );
    headers.insert(
        HeaderName::from_static("amz-sdk-invocation-id"),
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("00000000-0000-0000-0000-000000000000")),
    );
    headers.insert(
        HeaderName::from_static("amz-sdk-request"),
        HeaderValue::from_static("attempt=1; max=3"),
    );

    headers
}

/// Streaming requests add `Connection: close` to avoid CLOSE_WAIT leaks.
pub fn streaming_headers(access_token: &str, fingerprint: &str) -> HeaderMap {
    let mut headers = api_headers(access_token, fingerprint);
    headers.insert(
        reqwest::header::CONNECTION,
        HeaderValue::from_static("close"),
    );
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_url_templates() {
        assert_eq!(
            refresh_url("us-east-1"),
            "https://prod.us-east-1.auth.desktop.kiro.dev/refreshToken"
        );
        assert_eq!(
            api_host("eu-west-1"),
            "https://codewhisperer.eu-west-1.amazonaws.com"
        );
        assert_eq!(q_host("us-east-1"), "https://q.us-east-1.amazonaws.com");
    }

    #[test]
    fn test_generate_url_encodes_arn() {
        let url = generate_url(
            "https://codewhisperer.us-east-1.amazonaws.com",
            Some("arn:aws:codewhisperer:us-east-1:1:profile/x"),
        );
        assert!(url.contains("/generateAssistantResponse?profileArn=arn%3Aaws"));
        assert!(!url[url.find('?').unwrap()..].contains('/') || url.contains("%2F"));
    }

    #[test]
    fn test_generate_url_without_arn() {
        let url = generate_url("https://codewhisperer.us-east-1.amazonaws.com", None);
        assert!(url.ends_with("/generateAssistantResponse"));
    }

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let a = machine_fingerprint();
        let b = machine_fingerprint();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_headers_present() {
        let headers = api_headers("tok", "fp");
        assert_eq!(headers["authorization"], "Bearer tok");
        assert_eq!(headers["content-type"], "application/json");
        assert!(headers.contains_key("amz-sdk-invocation-id"));
        assert!(headers.contains_key("amz-sdk-request"));
        assert!(
            headers["user-agent"]
                .to_str()
                .unwrap()
                .contains("KiroIDE-0.7.45-fp")
        );
    }

    #[test]
    fn test_streaming_headers_close_connection() {
        let headers = streaming_headers("tok", "fp");
        assert_eq!(headers["connection"], "close");
    }
}
