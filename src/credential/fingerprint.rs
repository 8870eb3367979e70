//! 机器指纹与上游请求头
//!
//! 指纹为 `{hostname}-kiro-gateway` 的 SHA-256 十六进制串，进程内只计算一次。

use once_cell::sync::Lazy;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use sha2::{Digest, Sha256};

static MACHINE_FINGERPRINT: Lazy<String> = Lazy::new(|| {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    fingerprint_for(&hostname)
});

/// 计算指定主机名的指纹
pub fn fingerprint_for(hostname: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{hostname}-kiro-gateway").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// 当前机器的指纹
pub fn machine_fingerprint() -> &'static str {
    &MACHINE_FINGERPRINT
}

/// 刷新请求的 User-Agent
pub fn refresh_user_agent(fingerprint: &str) -> String {
    format!("KiroGateway-{}", &fingerprint[..16.min(fingerprint.len())])
}

/// 会话请求头
pub fn kiro_headers(access_token: &str, fingerprint: &str) -> HeaderMap {
    let short = &fingerprint[..32.min(fingerprint.len())];
    let os = std::env::consts::OS;

    let pairs: [(HeaderName, String); 8] = [
        (AUTHORIZATION, format!("Bearer {access_token}")),
        (CONTENT_TYPE, "application/json".to_string()),
        (
            USER_AGENT,
            format!("aws-sdk-js/1.0.27 ua/2.1 os/{os} lang/rust KiroGateway-{short}"),
        ),
        (
            HeaderName::from_static("x-amz-user-agent"),
            format!("aws-sdk-js/1.0.27 KiroGateway-{short}"),
        ),
        (
            HeaderName::from_static("x-amzn-codewhisperer-optout"),
            "true".to_string(),
        ),
        (
            HeaderName::from_static("x-amzn-kiro-agent-mode"),
            "vibe".to_string(),
        ),
        (
            HeaderName::from_static("amz-sdk-invocation-id"),
            uuid::Uuid::new_v4().to_string(),
        ),
        (
            HeaderName::from_static("amz-sdk-request"),
            "attempt=1; max=3".to_string(),
        ),
    ];

    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                headers.insert(name, value);
            }
            Err(e) => tracing::warn!("[KIRO_BACKEND] 请求头 {} 无效: {}", name, e),
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let a = fingerprint_for("build-host");
        let b = fingerprint_for("build-host");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, fingerprint_for("other-host"));
        assert_eq!(machine_fingerprint().len(), 64);
    }

    #[test]
    fn test_kiro_headers() {
        let fp = fingerprint_for("h");
        let headers = kiro_headers("tok123", &fp);
        assert_eq!(headers[AUTHORIZATION], "Bearer tok123");
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(headers["x-amzn-kiro-agent-mode"], "vibe");
        assert_eq!(headers["x-amzn-codewhisperer-optout"], "true");
        assert_eq!(headers["amz-sdk-request"], "attempt=1; max=3");
        let ua = headers[USER_AGENT].to_str().unwrap();
        assert!(ua.starts_with("aws-sdk-js/1.0.27 ua/2.1 os/"));
        assert!(ua.ends_with(&format!("KiroGateway-{}", &fp[..32])));
        assert_eq!(
            headers["x-amz-user-agent"],
            format!("aws-sdk-js/1.0.27 KiroGateway-{}", &fp[..32]).as_str()
        );
        assert_eq!(refresh_user_agent(&fp), format!("KiroGateway-{}", &fp[..16]));
    }
}
