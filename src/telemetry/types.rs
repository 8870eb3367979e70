//! 遥测类型定义
//!
//! 每个完成的模型请求对应一条 `RequestRecord`

use crate::models::ApiDialect;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 指标事件的 tracing target
pub const METRICS_TARGET: &str = "kirogate::metrics";

/// 请求记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    /// 请求时间戳
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    /// 返回给客户端的 HTTP 状态码
    pub status: u16,
    /// 请求持续时间（毫秒）
    pub duration_ms: u64,
    /// 客户端请求的模型名
    pub model: Option<String>,
    pub dialect: ApiDialect,
    pub streaming: bool,
    /// 错误信息（如果失败）
    pub error: Option<String>,
}

impl RequestRecord {
    /// 创建新的请求记录，时间戳为当前时间
    pub fn new(method: &str, path: &str, dialect: ApiDialect, streaming: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            method: method.to_string(),
            path: path.to_string(),
            status: 200,
            duration_ms: 0,
            model: None,
            dialect,
            streaming,
            error: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// 标记完成
    pub fn finish(mut self, status: u16, duration_ms: u64, error: Option<String>) -> Self {
        self.status = status;
        self.duration_ms = duration_ms;
        self.error = error;
        self
    }

    /// 2xx 与 3xx 计为成功
    /// 流式响应已发出 200 后中断时，`error` 非空，也算失败
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status) && self.error.is_none()
    }

    /// 以结构化 tracing 事件输出，由外部收集器持久化
    pub fn emit(&self) {
        tracing::info!(
            target: METRICS_TARGET,
            timestamp = %self.timestamp.to_rfc3339(),
            method = %self.method,
            path = %self.path,
            status = self.status,
            duration_ms = self.duration_ms,
            model = self.model.as_deref().unwrap_or(""),
            dialect = self.dialect.as_str(),
            streaming = self.streaming,
            error = self.error.as_deref().unwrap_or(""),
            "[METRICS] {} {} -> {} ({}ms)",
            self.method,
            self.path,
            self.status,
            self.duration_ms
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_success_range() {
        let record = RequestRecord::new("POST", "/v1/messages", ApiDialect::Anthropic, true);
        assert!(record.clone().finish(200, 5, None).is_success());
        assert!(record.clone().finish(302, 5, None).is_success());
        assert!(!record.clone().finish(400, 5, None).is_success());
        assert!(!record.clone().finish(500, 5, Some("boom".into())).is_success());
        assert!(!record.finish(200, 5, Some("stream interrupted".into())).is_success());
    }

    #[test]
    fn test_record_serializes_dialect_lowercase() {
        let record = RequestRecord::new("POST", "/v1/chat/completions", ApiDialect::OpenAi, false)
            .with_model("auto")
            .finish(200, 12, None);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["dialect"], "openai");
        assert_eq!(json["model"], "auto");
        assert_eq!(json["duration_ms"], 12);
    }
}
