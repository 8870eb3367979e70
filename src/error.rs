//! 网关错误类型
//!
//! 每个错误知道自己的 HTTP 状态码，并能渲染为 OpenAI 或 Anthropic 风格的错误体。

use serde_json::{json, Value};
use thiserror::Error;

pub const AUTH_ERROR_MESSAGE: &str = "Invalid or missing API Key";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// API Key 缺失或不匹配
    #[error("Invalid or missing API Key")]
    Authentication,

    /// 启动配置不完整
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Token 刷新失败（不可重试的 4xx 或重试耗尽）
    #[error("Token refresh failed: {message}")]
    CredentialRefresh {
        status: Option<u16>,
        message: String,
    },

    /// 上游返回非成功状态且不再重试
    #[error("{}", summarize_upstream_error(.body))]
    UpstreamClient { status: u16, body: String },

    /// 429/5xx/网络错误重试耗尽
    #[error("Upstream request failed after {attempts} attempts: {message}")]
    UpstreamTransient { attempts: u32, message: String },

    /// 首 token 超时重试耗尽
    #[error("Model did not respond within {timeout_secs}s after {attempts} attempts. Please try again.")]
    FirstTokenTimeout { timeout_secs: f64, attempts: u32 },

    /// 合并后没有可发送的消息
    #[error("{0}")]
    PayloadConstruction(String),

    /// 请求体无法解析
    #[error("{0}")]
    InvalidRequest(String),

    /// 首 token 之后的流读取失败
    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    /// 获取对应的 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Authentication => 401,
            GatewayError::UpstreamClient { status, .. } => *status,
            GatewayError::PayloadConstruction(_) | GatewayError::InvalidRequest(_) => 400,
            GatewayError::Configuration(_)
            | GatewayError::CredentialRefresh { .. }
            | GatewayError::UpstreamTransient { .. }
            | GatewayError::FirstTokenTimeout { .. }
            | GatewayError::StreamInterrupted(_)
            | GatewayError::Internal(_) => 500,
        }
    }

    /// OpenAI 错误类型字符串
    pub fn openai_error_type(&self) -> &'static str {
        match self {
            GatewayError::Authentication => "authentication_error",
            GatewayError::UpstreamClient { .. } => "kiro_api_error",
            GatewayError::PayloadConstruction(_) | GatewayError::InvalidRequest(_) => {
                "invalid_request_error"
            }
            _ => "internal_error",
        }
    }

    /// Anthropic 错误类型字符串
    pub fn anthropic_error_type(&self) -> &'static str {
        match self {
            GatewayError::Authentication => "authentication_error",
            GatewayError::PayloadConstruction(_) | GatewayError::InvalidRequest(_) => {
                "invalid_request_error"
            }
            _ => "api_error",
        }
    }

    /// 转换为 OpenAI 错误体
    pub fn to_openai_json(&self) -> Value {
        match self {
            GatewayError::Authentication => json!({ "error": { "message": AUTH_ERROR_MESSAGE } }),
            GatewayError::UpstreamClient { status, .. } => json!({
                "error": {
                    "message": self.to_string(),
                    "type": self.openai_error_type(),
                    "code": status
                }
            }),
            _ => json!({
                "error": {
                    "message": self.to_string(),
                    "type": self.openai_error_type()
                }
            }),
        }
    }

    /// 转换为 Anthropic 错误体
    pub fn to_anthropic_json(&self) -> Value {
        json!({
            "type": "error",
            "error": {
                "type": self.anthropic_error_type(),
                "message": self.to_string()
            }
        })
    }
}

/// 提取上游错误消息
///
/// JSON 且带 `message` 时取 `message`，存在 `reason` 时追加 ` (reason: ...)`；否则返回原文。
pub fn summarize_upstream_error(body: &str) -> String {
    let Ok(parsed) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };
    let Some(message) = parsed
        .get("message")
        .and_then(|m| m.as_str())
        .filter(|m| !m.is_empty())
    else {
        return body.to_string();
    };
    match parsed.get("reason").filter(|r| !r.is_null()) {
        Some(Value::String(reason)) => format!("{message} (reason: {reason})"),
        Some(reason) => format!("{message} (reason: {reason})"),
        None => message.to_string(),
    }
}
