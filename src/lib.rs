//! Kiro 网关库
//!
//! 接收 OpenAI (`/v1/chat/completions`) 与 Anthropic (`/v1/messages`) 格式的请求，
//! 转换为 Kiro 会话请求，并把上游响应流翻译回客户端格式。

pub mod backends;
pub mod config;
pub mod converter;
pub mod credential;
pub mod error;
pub mod logger;
pub mod models;
pub mod resilience;
pub mod server;
pub mod stream;
pub mod telemetry;

pub use config::Settings;
pub use error::GatewayError;
