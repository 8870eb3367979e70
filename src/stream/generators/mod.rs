//! 客户端响应生成器
//!
//! 消费同一个 `UpstreamEvent` 序列，分别输出两种客户端格式。
//!
//! # 支持的格式
//!
//! - OpenAI (`data: {...}`，以 `data: [DONE]` 结束)
//! - Anthropic (`event: xxx\ndata: {...}`)

pub mod anthropic_sse;
pub mod openai_sse;

pub use anthropic_sse::AnthropicSseGenerator;
pub use openai_sse::OpenAiSseGenerator;
