//! 上游调用层
//!
//! 只负责 HTTP 请求/响应，不包含任何协议转换逻辑。
//!
//! # 架构设计
//!
//! ```text
//! backends/
//! ├── traits.rs          # Upstream trait 定义
//! └── kiro.rs            # Kiro/CodeWhisperer 上游
//! ```
//!
//! # 职责说明
//!
//! - **只做 HTTP 调用**: 构建 HTTP 请求，发送，接收响应
//! - **不做协议转换**: 协议转换在 converter 层完成
//! - **不做重试**: 重试与 Token 刷新由 `resilience::RetryDispatcher` 负责

pub mod kiro;
pub mod traits;

#[cfg(test)]
pub(crate) mod mock;

// 重新导出核心类型
pub use kiro::KiroBackend;
pub use traits::{BackendError, BackendErrorKind, BackendResult, ByteStream, Upstream, UpstreamResponse};
