//! 上游调用层 Trait 定义
//!
//! 上游层只负责 HTTP 请求/响应，不包含任何协议转换逻辑。
//! 重试调度器通过 `Upstream` trait 调用上游，测试时可替换为脚本化实现。

use crate::models::codewhisperer::CodeWhispererRequest;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;

/// 字节流类型
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, BackendError>> + Send>>;

/// 上游调用结果
pub type BackendResult<T> = Result<T, BackendError>;

/// 上游错误
#[derive(Debug, Clone, PartialEq)]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
    /// HTTP 状态码（如果有）
    pub status_code: Option<u16>,
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(code) = self.status_code {
            write!(f, "{} ({}): {}", self.kind, code, self.message)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for BackendError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// 连接失败、读写中断等没有状态码的错误
    NetworkError,
    Timeout,
    /// 请求体序列化失败等本地错误
    Other,
}

impl std::fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NetworkError => write!(f, "NetworkError"),
            Self::Timeout => write!(f, "Timeout"),
            Self::Other => write!(f, "Other"),
        }
    }
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::NetworkError, message)
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            BackendErrorKind::Timeout
        } else if err.is_builder() {
            BackendErrorKind::Other
        } else {
            BackendErrorKind::NetworkError
        };
        Self {
            kind,
            message: err.to_string(),
            status_code: err.status().map(|s| s.as_u16()),
        }
    }
}

/// 上游 HTTP 响应：状态码 + 未读取的响应体
pub struct UpstreamResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl UpstreamResponse {
    pub fn new(status: u16, body: ByteStream) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 读取完整响应体为文本（用于错误响应）
    pub async fn text(mut self) -> String {
        let mut buf = Vec::new();
        while let Some(chunk) = self.body.next().await {
            match chunk {
                Ok(bytes) => buf.extend_from_slice(&bytes),
                Err(e) => {
                    tracing::warn!("[KIRO_BACKEND] 读取错误响应体失败: {}", e);
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// 上游 Trait
///
/// 一次调用对应一次 HTTP 请求，不做重试。
#[async_trait]
pub trait Upstream: Send + Sync {
    /// 发送会话请求
    async fn send(
        &self,
        region: &str,
        access_token: &str,
        payload: &CodeWhispererRequest,
    ) -> BackendResult<UpstreamResponse>;

    /// 获取上游名称
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_response_text_collects_chunks() {
        let chunks: Vec<Result<Bytes, BackendError>> = vec![
            Ok(Bytes::from_static(b"{\"message\":")),
            Ok(Bytes::from_static(b"\"bad\"}")),
        ];
        let response = UpstreamResponse::new(400, Box::pin(futures::stream::iter(chunks)));
        assert!(!response.is_success());
        assert_eq!(response.text().await, "{\"message\":\"bad\"}");
    }

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::network("connection reset");
        assert_eq!(err.to_string(), "NetworkError: connection reset");
    }
}
