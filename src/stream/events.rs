//! 上游流事件类型
//!
//! 解析器 (parsers) 与转换器 (generators) 之间的中间表示。
//!
//! # 设计原则
//!
//! - 只有 `AwsEventStreamParser` 产生 `UpstreamEvent`
//! - OpenAI / Anthropic 生成器消费同一个事件序列
//! - 工具调用参数由累加器拼装，生成器在流结束时拿到完整列表

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 上游事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UpstreamEvent {
    /// 文本增量（已去除重复与 followupPrompt）
    ContentDelta(String),

    /// 工具调用开始
    ToolStart {
        id: String,
        name: String,
        /// 内联的初始参数片段
        input: String,
        /// 是否同时携带 stop 标记
        stop: bool,
    },

    /// 工具调用参数片段
    ToolInputDelta(String),

    /// 工具调用结束
    ToolStop,

    /// 上游计费信息（原样保留）
    Usage(Value),

    /// 上下文使用百分比
    ContextUsagePercentage(f64),
}

impl UpstreamEvent {
    /// 是否算作“首 token”
    ///
    /// 文本增量或工具调用开始都表示模型已经开始响应。
    pub fn is_first_token(&self) -> bool {
        matches!(
            self,
            UpstreamEvent::ContentDelta(_) | UpstreamEvent::ToolStart { .. }
        )
    }
}

/// 一次完整的工具调用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishedToolCall {
    pub id: String,
    pub name: String,
    /// 规范化后的 JSON 参数字符串
    pub arguments: String,
}
