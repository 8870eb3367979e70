//! 客户端模型名到 Kiro 内部模型 ID 的映射
use indexmap::IndexMap;
use once_cell::sync::Lazy;

/// 模型映射表（保持插入顺序，模型列表按此顺序输出）
pub static MODEL_MAPPING: Lazy<IndexMap<&'static str, &'static str>> = Lazy::new(|| {
    IndexMap::from([
        // Opus 4.5
        ("claude-opus-4-5", "claude-opus-4.5"),
        ("claude-opus-4-5-20251101", "claude-opus-4.5"),
        // Haiku 4.5
        ("claude-haiku-4-5", "claude-haiku-4.5"),
        ("claude-haiku-4.5", "claude-haiku-4.5"),
        // Sonnet 4.5
        ("claude-sonnet-4-5", "CLAUDE_SONNET_4_5_20250929_V1_0"),
        (
            "claude-sonnet-4-5-20250929",
            "CLAUDE_SONNET_4_5_20250929_V1_0",
        ),
        // Sonnet 4
        ("claude-sonnet-4", "CLAUDE_SONNET_4_20250514_V1_0"),
        ("claude-sonnet-4-20250514", "CLAUDE_SONNET_4_20250514_V1_0"),
        // Sonnet 3.7
        (
            "claude-3-7-sonnet-20250219",
            "CLAUDE_3_7_SONNET_20250219_V1_0",
        ),
        ("auto", "claude-sonnet-4.5"),
    ])
});

/// 不出现在 `/v1/models` 中的别名
const HIDDEN_ALIASES: &[&str] = &["auto", "claude-haiku-4.5"];

/// 获取内部模型 ID，未知模型原样透传
pub fn map_model(model: &str) -> String {
    MODEL_MAPPING
        .get(model)
        .map(|id| id.to_string())
        .unwrap_or_else(|| model.to_string())
}

/// 对外公布的模型列表
pub fn available_models() -> Vec<&'static str> {
    MODEL_MAPPING
        .keys()
        .copied()
        .filter(|name| !HIDDEN_ALIASES.contains(name))
        .collect()
}
