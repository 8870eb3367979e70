//! 单轮响应的汇总状态
//!
//! 流式与非流式两条路径共用：累计文本、上下文百分比与计费信息，
//! 流结束时结合工具调用列表得出用量。

use crate::stream::events::{FinishedToolCall, UpstreamEvent};
use crate::stream::usage::UsageEstimate;
use serde_json::Value;

#[derive(Debug, Default, Clone)]
pub struct TurnCollector {
    content: String,
    context_usage_percentage: Option<f64>,
    credits: Option<Value>,
}

impl TurnCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, event: &UpstreamEvent) {
        match event {
            UpstreamEvent::ContentDelta(text) => self.content.push_str(text),
            UpstreamEvent::ContextUsagePercentage(pct) => {
                self.context_usage_percentage = Some(*pct)
            }
            UpstreamEvent::Usage(value) => self.credits = Some(value.clone()),
            _ => {}
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn credits(&self) -> Option<&Value> {
        self.credits.as_ref()
    }

    pub fn usage(&self, local_prompt_tokens: u64) -> UsageEstimate {
        UsageEstimate::compute(
            &self.content,
            self.context_usage_percentage,
            local_prompt_tokens,
        )
    }

    /// 结束本轮，得到不可变的汇总结果
    pub fn complete(self, tool_calls: Vec<FinishedToolCall>, local_prompt_tokens: u64) -> CompletedTurn {
        let usage = self.usage(local_prompt_tokens);
        CompletedTurn {
            content: self.content,
            tool_calls,
            usage,
            credits: self.credits,
        }
    }
}

/// 一轮完整的上游响应
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedTurn {
    pub content: String,
    pub tool_calls: Vec<FinishedToolCall>,
    pub usage: UsageEstimate,
    pub credits: Option<Value>,
}

impl CompletedTurn {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}
