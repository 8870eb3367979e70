//! OpenAI SSE 生成器
//!
//! 将 `UpstreamEvent` 转换为 OpenAI Chat Completions 格式。
//!
//! # 格式说明
//!
//! ```text
//! data: {"id":"chatcmpl-xxx","object":"chat.completion.chunk","created":1234567890,"model":"auto","choices":[{"index":0,"delta":{"content":"Hello","role":"assistant"},"finish_reason":null}]}
//!
//! data: [DONE]
//! ```
//!
//! 工具调用在流结束后一次性发送，随后是带 `finish_reason` 与 `usage` 的结束块。

use crate::stream::events::{FinishedToolCall, UpstreamEvent};
use crate::stream::turn::{CompletedTurn, TurnCollector};
use crate::stream::usage::UsageEstimate;
use serde::Serialize;
use serde_json::{json, Value};

/// 生成 `chatcmpl-{24 位十六进制}` 形式的响应 ID
pub fn generate_completion_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("chatcmpl-{}", &hex[..24])
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Debug)]
pub struct OpenAiSseGenerator {
    response_id: String,
    model: String,
    created: i64,
    first_chunk: bool,
    turn: TurnCollector,
}

impl OpenAiSseGenerator {
    pub fn new(model: String) -> Self {
        Self::with_id(generate_completion_id(), model)
    }

    pub fn with_id(id: String, model: String) -> Self {
        Self {
            response_id: id,
            model,
            created: unix_now(),
            first_chunk: true,
            turn: TurnCollector::new(),
        }
    }

    pub fn response_id(&self) -> &str {
        &self.response_id
    }

    /// 处理一个上游事件，返回需要发送的 SSE 片段
    pub fn generate(&mut self, event: &UpstreamEvent) -> Option<String> {
        self.turn.observe(event);

        let UpstreamEvent::ContentDelta(text) = event else {
            return None;
        };

        let role = if self.first_chunk {
            self.first_chunk = false;
            Some("assistant")
        } else {
            None
        };

        let chunk = OpenAiStreamChunk {
            id: &self.response_id,
            object: "chat.completion.chunk",
            created: self.created,
            model: &self.model,
            choices: vec![OpenAiChoice {
                index: 0,
                delta: OpenAiDelta {
                    content: Some(text.as_str()),
                    role,
                    tool_calls: None,
                },
                finish_reason: None,
            }],
            usage: None,
        };
        Some(sse_data(&chunk))
    }

    /// 流结束：工具调用块、结束块与 `[DONE]`
    pub fn finish(&mut self, tool_calls: &[FinishedToolCall], local_prompt_tokens: u64) -> Vec<String> {
        let mut out = Vec::new();

        if !tool_calls.is_empty() {
            let deltas: Vec<OpenAiToolCallDelta<'_>> = tool_calls
                .iter()
                .enumerate()
                .map(|(index, call)| OpenAiToolCallDelta {
                    index,
                    id: &call.id,
                    r#type: "function",
                    function: OpenAiFunction {
                        name: &call.name,
                        arguments: &call.arguments,
                    },
                })
                .collect();

            let chunk = OpenAiStreamChunk {
                id: &self.response_id,
                object: "chat.completion.chunk",
                created: self.created,
                model: &self.model,
                choices: vec![OpenAiChoice {
                    index: 0,
                    delta: OpenAiDelta {
                        content: None,
                        role: None,
                        tool_calls: Some(deltas),
                    },
                    finish_reason: None,
                }],
                usage: None,
            };
            out.push(sse_data(&chunk));
        }

        let usage = self.turn.usage(local_prompt_tokens);
        usage.log(&self.model);

        let finish_reason = finish_reason(!tool_calls.is_empty());
        let chunk = OpenAiStreamChunk {
            id: &self.response_id,
            object: "chat.completion.chunk",
            created: self.created,
            model: &self.model,
            choices: vec![OpenAiChoice {
                index: 0,
                delta: OpenAiDelta::default(),
                finish_reason: Some(finish_reason),
            }],
            usage: Some(usage_json(&usage, self.turn.credits())),
        };
        out.push(sse_data(&chunk));
        out.push(generate_done());
        out
    }
}

/// 流内错误
pub fn generate_error(message: &str) -> String {
    format!("data: {}\n\n", json!({ "error": message }))
}

pub fn generate_done() -> String {
    "data: [DONE]\n\n".to_string()
}

fn finish_reason(has_tool_calls: bool) -> &'static str {
    if has_tool_calls {
        "tool_calls"
    } else {
        "stop"
    }
}

fn usage_json(usage: &UsageEstimate, credits: Option<&Value>) -> Value {
    let mut value = json!({
        "prompt_tokens": usage.prompt_tokens,
        "completion_tokens": usage.completion_tokens,
        "total_tokens": usage.total_tokens,
    });
    if let (Some(credits), Some(obj)) = (credits, value.as_object_mut()) {
        obj.insert("credits_used".to_string(), credits.clone());
    }
    value
}

fn sse_data<T: Serialize>(chunk: &T) -> String {
    match serde_json::to_string(chunk) {
        Ok(json) => format!("data: {json}\n\n"),
        Err(e) => {
            tracing::error!("[OPENAI_SSE] 序列化失败: {}", e);
            String::new()
        }
    }
}

/// 构建非流式响应体
pub fn build_chat_completion(turn: &CompletedTurn, model: &str) -> Value {
    let mut message = json!({
        "role": "assistant",
        "content": turn.content,
    });

    if turn.has_tool_calls() {
        let calls: Vec<Value> = turn
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": { "name": call.name, "arguments": call.arguments },
                })
            })
            .collect();
        message["tool_calls"] = Value::Array(calls);
    }

    json!({
        "id": generate_completion_id(),
        "object": "chat.completion",
        "created": unix_now(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason(turn.has_tool_calls()),
        }],
        "usage": usage_json(&turn.usage, turn.credits.as_ref()),
    })
}

// ============================================================================
// OpenAI SSE 数据结构
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiStreamChunk<'a> {
    id: &'a str,
    object: &'a str,
    created: i64,
    model: &'a str,
    choices: Vec<OpenAiChoice<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<Value>,
}

#[derive(Debug, Serialize)]
struct OpenAiChoice<'a> {
    index: usize,
    delta: OpenAiDelta<'a>,
    finish_reason: Option<&'a str>,
}

#[derive(Debug, Default, Serialize)]
struct OpenAiDelta<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCallDelta<'a>>>,
}

#[derive(Debug, Serialize)]
struct OpenAiToolCallDelta<'a> {
    index: usize,
    id: &'a str,
    r#type: &'a str,
    function: OpenAiFunction<'a>,
}

#[derive(Debug, Serialize)]
struct OpenAiFunction<'a> {
    name: &'a str,
    arguments: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::usage::UsageSource;

    fn parse_data(sse: &str) -> Value {
        let body = sse
            .strip_prefix("data: ")
            .and_then(|s| s.strip_suffix("\n\n"))
            .unwrap();
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn test_first_chunk_carries_role() {
        let mut generator = OpenAiSseGenerator::new("auto".to_string());
        let first = generator
            .generate(&UpstreamEvent::ContentDelta("Hel".into()))
            .unwrap();
        let second = generator
            .generate(&UpstreamEvent::ContentDelta("lo".into()))
            .unwrap();

        let first = parse_data(&first);
        assert_eq!(first["object"], "chat.completion.chunk");
        assert_eq!(first["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(first["choices"][0]["delta"]["content"], "Hel");
        assert!(first["choices"][0]["finish_reason"].is_null());

        let second = parse_data(&second);
        assert!(second["choices"][0]["delta"].get("role").is_none());
        assert_eq!(second["id"], first["id"]);
    }

    #[test]
    fn test_non_content_events_emit_nothing() {
        let mut generator = OpenAiSseGenerator::new("auto".to_string());
        assert!(generator
            .generate(&UpstreamEvent::ContextUsagePercentage(3.0))
            .is_none());
        assert!(generator.generate(&UpstreamEvent::ToolStop).is_none());
    }

    #[test]
    fn test_finish_with_tool_calls() {
        let mut generator = OpenAiSseGenerator::new("auto".to_string());
        generator.generate(&UpstreamEvent::Usage(json!(0.5)));
        let calls = vec![FinishedToolCall {
            id: "call_1".into(),
            name: "read".into(),
            arguments: "{\"p\":1}".into(),
        }];
        let out = generator.finish(&calls, 10);
        assert_eq!(out.len(), 3);

        let tools = parse_data(&out[0]);
        let call = &tools["choices"][0]["delta"]["tool_calls"][0];
        assert_eq!(call["index"], 0);
        assert_eq!(call["id"], "call_1");
        assert_eq!(call["type"], "function");
        assert_eq!(call["function"]["arguments"], "{\"p\":1}");

        let last = parse_data(&out[1]);
        assert_eq!(last["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(last["choices"][0]["delta"], json!({}));
        assert_eq!(last["usage"]["prompt_tokens"], 10);
        assert_eq!(last["usage"]["credits_used"], 0.5);
        assert_eq!(out[2], "data: [DONE]\n\n");
    }

    #[test]
    fn test_finish_without_tools_is_stop() {
        let mut generator = OpenAiSseGenerator::new("auto".to_string());
        generator.generate(&UpstreamEvent::ContentDelta("abcd".into()));
        let out = generator.finish(&[], 3);
        assert_eq!(out.len(), 2);
        let last = parse_data(&out[0]);
        assert_eq!(last["choices"][0]["finish_reason"], "stop");
        assert_eq!(last["usage"]["total_tokens"], 4);
        assert!(last["usage"].get("credits_used").is_none());
    }

    #[test]
    fn test_build_chat_completion() {
        let turn = CompletedTurn {
            content: "hi there".into(),
            tool_calls: vec![],
            usage: UsageEstimate {
                prompt_tokens: 1,
                completion_tokens: 2,
                total_tokens: 3,
                prompt_source: UsageSource::LocalApproximation,
                total_source: UsageSource::LocalApproximation,
            },
            credits: None,
        };
        let body = build_chat_completion(&turn, "auto");
        assert_eq!(body["object"], "chat.completion");
        assert!(body["id"].as_str().unwrap().starts_with("chatcmpl-"));
        assert_eq!(body["id"].as_str().unwrap().len(), 33);
        assert_eq!(body["choices"][0]["message"]["role"], "assistant");
        assert!(body["choices"][0]["message"].get("tool_calls").is_none());
        assert_eq!(body["usage"]["total_tokens"], 3);
    }

    #[test]
    fn test_error_chunk() {
        assert_eq!(
            generate_error("boom"),
            "data: {\"error\":\"boom\"}\n\n"
        );
    }
}
