//! 数据模型
//!
//! - `openai`: 统一的内部请求格式（即 OpenAI Chat Completions）
//! - `anthropic`: Anthropic Messages 请求
//! - `codewhisperer`: Kiro 上游请求体
//! - `model_map`: 模型名映射

pub mod anthropic;
pub mod codewhisperer;
pub mod model_map;
pub mod openai;

use serde::{Deserialize, Serialize};

/// 客户端协议方言
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiDialect {
    OpenAi,
    Anthropic,
}

impl ApiDialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiDialect::OpenAi => "openai",
            ApiDialect::Anthropic => "anthropic",
        }
    }
}

impl std::fmt::Display for ApiDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
