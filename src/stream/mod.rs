//! 流式处理层
//!
//! 提供统一的流式数据处理能力，包括：
//! - 事件类型定义 (events)
//! - 上游流格式解析 (parsers)
//! - 客户端流格式生成 (generators)
//!
//! # 架构设计
//!
//! ```text
//! Kiro 响应流 ──> [AwsEventStreamParser] ──> UpstreamEvent ──> [Generator] ──> 客户端 SSE
//!
//! UpstreamEvent ──> [AnthropicSseGenerator] ──> Anthropic SSE
//! UpstreamEvent ──> [OpenAiSseGenerator] ──> OpenAI SSE
//! UpstreamEvent ──> [TurnCollector] ──> 非流式 JSON
//! ```
//!
//! # 模块结构
//!
//! - `events`: 上游事件类型定义 (`UpstreamEvent`)
//! - `parsers`: 上游流格式解析器
//! - `generators`: 客户端流格式生成器
//! - `tool_accumulator`: 工具调用参数拼装与去重
//! - `turn`: 单轮响应汇总
//! - `usage`: token 用量估算

pub mod events;
pub mod generators;
pub mod parsers;
pub mod pipeline;
pub mod tool_accumulator;
pub mod turn;
pub mod usage;

// 重新导出核心类型
pub use events::{FinishedToolCall, UpstreamEvent};
pub use generators::{AnthropicSseGenerator, OpenAiSseGenerator};
pub use parsers::{AwsEventStreamParser, ParserState};
pub use pipeline::{collect_turn, create_sse_stream, PipelineConfig, StreamPipeline, StreamSummary};
pub use turn::{CompletedTurn, TurnCollector};
pub use usage::{count_tokens, estimate_prompt_tokens, UsageEstimate, UsageSource};
