//! API Key 校验
//!
//! 支持两种形式：
//! - `{PROXY_API_KEY}`：使用默认租户凭证
//! - `{PROXY_API_KEY}:{REFRESH_TOKEN}`：使用该 refresh token 对应的租户凭证
//!
//! OpenAI 端点只读取 `Authorization: Bearer`；Anthropic 端点优先读取 `x-api-key`，
//! 无效时回退到 `Authorization`。

use crate::logger::mask_token;
use axum::http::{header, HeaderMap};
use subtle::ConstantTimeEq;

/// 校验通过后的调用方身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// 多租户模式下的 refresh token；None 表示默认租户
    pub tenant_refresh: Option<String>,
}

fn keys_match(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// 解析一个凭据值（已去掉 `Bearer ` 前缀）
pub fn parse_credential(value: &str, expected_key: &str) -> Option<Caller> {
    match value.split_once(':') {
        Some((proxy_key, refresh)) => {
            if !keys_match(proxy_key, expected_key) {
                tracing::warn!("[AUTH] 多租户格式的代理密钥无效: {}", mask_token(proxy_key));
                return None;
            }
            if refresh.is_empty() {
                return Some(Caller { tenant_refresh: None });
            }
            tracing::debug!("[AUTH] 多租户模式: {}", mask_token(refresh));
            Some(Caller {
                tenant_refresh: Some(refresh.to_string()),
            })
        }
        None => {
            if keys_match(value, expected_key) {
                Some(Caller { tenant_refresh: None })
            } else {
                tracing::warn!("[AUTH] API Key 无效");
                None
            }
        }
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// OpenAI 风格：`Authorization: Bearer ...`
pub fn verify_bearer(headers: &HeaderMap, expected_key: &str) -> Option<Caller> {
    let Some(value) = bearer(headers) else {
        tracing::warn!("[AUTH] 缺少或格式错误的 Authorization 头");
        return None;
    };
    parse_credential(value, expected_key)
}

/// Anthropic 风格：`x-api-key` 优先，其次 `Authorization: Bearer ...`
pub fn verify_anthropic(headers: &HeaderMap, expected_key: &str) -> Option<Caller> {
    let x_api_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());
    if let Some(caller) = x_api_key.and_then(|value| parse_credential(value, expected_key)) {
        return Some(caller);
    }
    if bearer(headers).is_some() {
        return verify_bearer(headers, expected_key);
    }
    None
}
