//! 上游响应流解析器
//!
//! 把 Kiro 返回的原始字节解析为 `UpstreamEvent`。

pub mod aws_event_stream;

pub use aws_event_stream::{AwsEventStreamParser, ParserState};
