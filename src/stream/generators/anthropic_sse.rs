//! Anthropic SSE 生成器
//!
//! 将 `UpstreamEvent` 转换为 Anthropic Messages API SSE 格式。
//!
//! # 格式说明
//!
//! ```text
//! event: message_start
//! data: {"type":"message_start","message":{...}}
//!
//! event: content_block_start
//! data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}
//!
//! event: content_block_delta
//! data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}
//!
//! event: content_block_stop
//! data: {"type":"content_block_stop","index":0}
//!
//! event: message_delta
//! data: {"type":"message_delta","delta":{"stop_reason":"end_turn","stop_sequence":null},"usage":{"output_tokens":1}}
//!
//! event: message_stop
//! data: {"type": "message_stop"}
//! ```

use crate::stream::events::{FinishedToolCall, UpstreamEvent};
use crate::stream::generators::openai_sse::generate_completion_id;
use crate::stream::turn::{CompletedTurn, TurnCollector};
use serde_json::{json, Value};

/// 生成 `msg_{24 位十六进制}` 形式的消息 ID
pub fn generate_message_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("msg_{}", &hex[..24])
}

/// 上游没有给出工具 ID 时的兜底 ID
fn fallback_tool_id() -> String {
    let completion = generate_completion_id();
    format!("toolu_{}", &completion["chatcmpl-".len()..])
}

fn stop_reason(has_tool_calls: bool) -> &'static str {
    if has_tool_calls {
        "tool_use"
    } else {
        "end_turn"
    }
}

/// 工具参数字符串解析为对象，失败时为空对象
fn tool_input(arguments: &str) -> Value {
    serde_json::from_str::<Value>(arguments).unwrap_or_else(|_| json!({}))
}

fn sse_event(name: &str, data: &Value) -> String {
    format!("event: {name}\ndata: {data}\n\n")
}

#[derive(Debug)]
pub struct AnthropicSseGenerator {
    message_id: String,
    model: String,
    /// 当前内容块索引
    block_index: u32,
    text_block_started: bool,
    turn: TurnCollector,
}

impl AnthropicSseGenerator {
    pub fn new(model: String) -> Self {
        Self::with_id(generate_message_id(), model)
    }

    pub fn with_id(id: String, model: String) -> Self {
        Self {
            message_id: id,
            model,
            block_index: 0,
            text_block_started: false,
            turn: TurnCollector::new(),
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// 流开始时立即发送的 message_start
    pub fn start(&self) -> String {
        sse_event(
            "message_start",
            &json!({
                "type": "message_start",
                "message": {
                    "id": self.message_id,
                    "type": "message",
                    "role": "assistant",
                    "content": [],
                    "model": self.model,
                    "stop_reason": Value::Null,
                    "stop_sequence": Value::Null,
                    "usage": { "input_tokens": 0, "output_tokens": 0 }
                }
            }),
        )
    }

    pub fn generate(&mut self, event: &UpstreamEvent) -> Vec<String> {
        self.turn.observe(event);

        let UpstreamEvent::ContentDelta(text) = event else {
            return Vec::new();
        };

        let mut out = Vec::with_capacity(2);
        if !self.text_block_started {
            self.text_block_started = true;
            out.push(sse_event(
                "content_block_start",
                &json!({
                    "type": "content_block_start",
                    "index": self.block_index,
                    "content_block": { "type": "text", "text": "" }
                }),
            ));
        }
        out.push(sse_event(
            "content_block_delta",
            &json!({
                "type": "content_block_delta",
                "index": self.block_index,
                "delta": { "type": "text_delta", "text": text }
            }),
        ));
        out
    }

    /// 流结束：关闭文本块，逐个发送 tool_use 块，最后 message_delta 与 message_stop
    pub fn finish(&mut self, tool_calls: &[FinishedToolCall], local_prompt_tokens: u64) -> Vec<String> {
        let mut out = Vec::new();

        if self.text_block_started {
            out.push(self.block_stop());
            self.block_index += 1;
            self.text_block_started = false;
        }

        for call in tool_calls {
            let id = if call.id.is_empty() {
                fallback_tool_id()
            } else {
                call.id.clone()
            };

            out.push(sse_event(
                "content_block_start",
                &json!({
                    "type": "content_block_start",
                    "index": self.block_index,
                    "content_block": {
                        "type": "tool_use",
                        "id": id,
                        "name": call.name,
                        "input": {}
                    }
                }),
            ));

            let input = tool_input(&call.arguments);
            let non_empty = input.as_object().map(|o| !o.is_empty()).unwrap_or(false);
            if non_empty {
                out.push(sse_event(
                    "content_block_delta",
                    &json!({
                        "type": "content_block_delta",
                        "index": self.block_index,
                        "delta": {
                            "type": "input_json_delta",
                            "partial_json": input.to_string()
                        }
                    }),
                ));
            }

            out.push(self.block_stop());
            self.block_index += 1;
        }

        let usage = self.turn.usage(local_prompt_tokens);
        tracing::debug!(
            "[ANTHROPIC_SSE] {}: input_tokens={}, output_tokens={}",
            self.model,
            usage.prompt_tokens,
            usage.completion_tokens
        );

        out.push(sse_event(
            "message_delta",
            &json!({
                "type": "message_delta",
                "delta": {
                    "stop_reason": stop_reason(!tool_calls.is_empty()),
                    "stop_sequence": Value::Null
                },
                "usage": { "output_tokens": usage.completion_tokens }
            }),
        ));
        out.push(generate_message_stop());
        out
    }

    fn block_stop(&self) -> String {
        sse_event(
            "content_block_stop",
            &json!({ "type": "content_block_stop", "index": self.block_index }),
        )
    }
}

pub fn generate_message_stop() -> String {
    "event: message_stop\ndata: {\"type\": \"message_stop\"}\n\n".to_string()
}

/// 流内错误事件
pub fn generate_error(message: &str) -> String {
    sse_event(
        "error",
        &json!({
            "type": "error",
            "error": { "type": "api_error", "message": message }
        }),
    )
}

/// 构建非流式响应体
pub fn build_message(turn: &CompletedTurn, model: &str) -> Value {
    let mut content = Vec::new();
    if !turn.content.is_empty() {
        content.push(json!({ "type": "text", "text": turn.content }));
    }
    for call in &turn.tool_calls {
        let id = if call.id.is_empty() {
            fallback_tool_id()
        } else {
            call.id.clone()
        };
        content.push(json!({
            "type": "tool_use",
            "id": id,
            "name": call.name,
            "input": tool_input(&call.arguments),
        }));
    }

    json!({
        "id": generate_message_id(),
        "type": "message",
        "role": "assistant",
        "content": content,
        "model": model,
        "stop_reason": stop_reason(turn.has_tool_calls()),
        "stop_sequence": Value::Null,
        "usage": {
            "input_tokens": turn.usage.prompt_tokens,
            "output_tokens": turn.usage.completion_tokens
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::usage::{UsageEstimate, UsageSource};

    fn parse_event(sse: &str) -> (String, Value) {
        let mut lines = sse.trim_end().lines();
        let event = lines.next().unwrap().strip_prefix("event: ").unwrap().to_string();
        let data = lines.next().unwrap().strip_prefix("data: ").unwrap();
        (event, serde_json::from_str(data).unwrap())
    }

    #[test]
    fn test_message_start() {
        let generator = AnthropicSseGenerator::new("claude-sonnet-4-5".to_string());
        let (name, data) = parse_event(&generator.start());
        assert_eq!(name, "message_start");
        assert_eq!(data["message"]["role"], "assistant");
        assert_eq!(data["message"]["model"], "claude-sonnet-4-5");
        assert_eq!(data["message"]["usage"]["input_tokens"], 0);
        assert!(data["message"]["id"].as_str().unwrap().starts_with("msg_"));
        assert_eq!(data["message"]["id"].as_str().unwrap().len(), 28);
    }

    #[test]
    fn test_text_then_tool_blocks() {
        let mut generator = AnthropicSseGenerator::new("m".to_string());
        let first = generator.generate(&UpstreamEvent::ContentDelta("Hi".into()));
        assert_eq!(first.len(), 2);
        assert_eq!(parse_event(&first[0]).0, "content_block_start");
        let second = generator.generate(&UpstreamEvent::ContentDelta(" there".into()));
        assert_eq!(second.len(), 1);
        let (_, delta) = parse_event(&second[0]);
        assert_eq!(delta["delta"]["text"], " there");
        assert_eq!(delta["index"], 0);

        let calls = vec![
            FinishedToolCall {
                id: "tooluse_a".into(),
                name: "read".into(),
                arguments: "{\"path\":\"a\"}".into(),
            },
            FinishedToolCall {
                id: "tooluse_b".into(),
                name: "noop".into(),
                arguments: "{}".into(),
            },
        ];
        let out = generator.finish(&calls, 0);
        let names: Vec<String> = out.iter().map(|e| parse_event(e).0).collect();
        assert_eq!(
            names,
            vec![
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        let (_, tool_start) = parse_event(&out[1]);
        assert_eq!(tool_start["index"], 1);
        assert_eq!(tool_start["content_block"]["id"], "tooluse_a");
        let (_, input_delta) = parse_event(&out[2]);
        assert_eq!(input_delta["delta"]["partial_json"], "{\"path\":\"a\"}");
        let (_, second_start) = parse_event(&out[4]);
        assert_eq!(second_start["index"], 2);

        let (_, message_delta) = parse_event(&out[6]);
        assert_eq!(message_delta["delta"]["stop_reason"], "tool_use");
        assert_eq!(out[7], "event: message_stop\ndata: {\"type\": \"message_stop\"}\n\n");
    }

    #[test]
    fn test_no_content_no_tools() {
        let mut generator = AnthropicSseGenerator::new("m".to_string());
        let out = generator.finish(&[], 0);
        assert_eq!(out.len(), 2);
        let (_, delta) = parse_event(&out[0]);
        assert_eq!(delta["delta"]["stop_reason"], "end_turn");
        assert_eq!(delta["usage"]["output_tokens"], 0);
    }

    #[test]
    fn test_build_message() {
        let turn = CompletedTurn {
            content: String::new(),
            tool_calls: vec![FinishedToolCall {
                id: String::new(),
                name: "f".into(),
                arguments: "{\"x\":1}".into(),
            }],
            usage: UsageEstimate {
                prompt_tokens: 5,
                completion_tokens: 0,
                total_tokens: 5,
                prompt_source: UsageSource::LocalApproximation,
                total_source: UsageSource::LocalApproximation,
            },
            credits: None,
        };
        let body = build_message(&turn, "m");
        assert_eq!(body["type"], "message");
        assert_eq!(body["stop_reason"], "tool_use");
        assert_eq!(body["content"].as_array().unwrap().len(), 1);
        assert_eq!(body["content"][0]["input"]["x"], 1);
        assert!(body["content"][0]["id"].as_str().unwrap().starts_with("toolu_"));
        assert_eq!(body["usage"]["input_tokens"], 5);
    }

    #[test]
    fn test_error_event() {
        let (name, data) = parse_event(&generate_error("boom"));
        assert_eq!(name, "error");
        assert_eq!(data["error"]["type"], "api_error");
        assert_eq!(data["error"]["message"], "boom");
    }
}
