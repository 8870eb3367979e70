//! 请求格式转换
//!
//! - `anthropic_to_openai`: Anthropic Messages -> 统一格式
//! - `openai_to_cw`: 统一格式 -> Kiro 会话请求
//! - `tool_docs`: 超长工具描述处理

pub mod anthropic_to_openai;
pub mod openai_to_cw;
pub mod tool_docs;

pub use anthropic_to_openai::convert_anthropic_to_openai;
pub use openai_to_cw::{build_kiro_payload, merge_adjacent_messages};
pub use tool_docs::{reference_description, relocate_long_descriptions, ProcessedTools};
