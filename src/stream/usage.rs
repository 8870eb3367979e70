//! Token 用量估算
//!
//! 上游报告了上下文使用百分比时，用它推算总量再减去输出得到输入；
//! 否则按“约 4 个字符 = 1 token”在本地近似。

use crate::config::MAX_INPUT_TOKENS;
use crate::models::openai::{ChatCompletionRequest, ChatMessage};
use serde::Serialize;

/// 用量数据来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UsageSource {
    UpstreamSubtraction,
    LocalApproximation,
}

impl std::fmt::Display for UsageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UsageSource::UpstreamSubtraction => write!(f, "upstream-subtraction"),
            UsageSource::LocalApproximation => write!(f, "local-approximation"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageEstimate {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub prompt_source: UsageSource,
    pub total_source: UsageSource,
}

/// 约 4 个字符 = 1 token，向上取整
pub fn count_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(4)
}

/// 本地估算请求的输入 token：所有消息文本 + 序列化后的工具定义
pub fn estimate_prompt_tokens(request: &ChatCompletionRequest) -> u64 {
    let messages: u64 = request.messages.iter().map(message_tokens).sum();
    let tools: u64 = request
        .tools
        .iter()
        .flatten()
        .map(|tool| {
            serde_json::to_string(tool)
                .map(|json| count_tokens(&json))
                .unwrap_or(0)
        })
        .sum();
    messages + tools
}

fn message_tokens(message: &ChatMessage) -> u64 {
    count_tokens(&message.get_content_text())
}

impl UsageEstimate {
    /// 计算一轮对话的用量
    ///
    /// `local_prompt_tokens` 只在上游没有报告百分比时使用。
    pub fn compute(
        full_content: &str,
        context_usage_percentage: Option<f64>,
        local_prompt_tokens: u64,
    ) -> Self {
        let completion_tokens = count_tokens(full_content);

        let reported = context_usage_percentage.filter(|pct| pct.is_finite() && *pct > 0.0);

        if let Some(pct) = reported {
            // 百分比极小时总量可能向下取整为 0，来源仍是上游
            let upstream_total = (pct / 100.0 * MAX_INPUT_TOKENS as f64).floor() as u64;
            Self {
                prompt_tokens: upstream_total.saturating_sub(completion_tokens),
                completion_tokens,
                total_tokens: upstream_total,
                prompt_source: UsageSource::UpstreamSubtraction,
                total_source: UsageSource::UpstreamSubtraction,
            }
        } else {
            Self {
                prompt_tokens: local_prompt_tokens,
                completion_tokens,
                total_tokens: local_prompt_tokens + completion_tokens,
                prompt_source: UsageSource::LocalApproximation,
                total_source: UsageSource::LocalApproximation,
            }
        }
    }

    pub fn log(&self, model: &str) {
        tracing::debug!(
            "[USAGE] {}: prompt_tokens={} ({}), completion_tokens={}, total_tokens={} ({})",
            model,
            self.prompt_tokens,
            self.prompt_source,
            self.completion_tokens,
            self.total_tokens,
            self.total_source
        );
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_percentage() -> impl Strategy<Value = Option<f64>> {
        prop_oneof![Just(None), (-10.0f64..100.0).prop_map(Some)]
    }

    proptest! {
        #[test]
        fn prop_provenance_and_totals(content in ".{0,200}", pct in arb_percentage(), local in 0u64..10_000) {
            let usage = UsageEstimate::compute(&content, pct, local);
            match pct.filter(|p| *p > 0.0) {
                Some(p) => {
                    let upstream_total = (p / 100.0 * MAX_INPUT_TOKENS as f64).floor() as u64;
                    prop_assert_eq!(usage.prompt_source, UsageSource::UpstreamSubtraction);
                    prop_assert_eq!(usage.total_tokens, upstream_total);
                    prop_assert_eq!(
                        usage.prompt_tokens,
                        upstream_total.saturating_sub(usage.completion_tokens)
                    );
                }
                None => {
                    prop_assert_eq!(usage.prompt_source, UsageSource::LocalApproximation);
                    prop_assert_eq!(usage.total_tokens, usage.prompt_tokens + usage.completion_tokens);
                }
            }
        }
    }
}
