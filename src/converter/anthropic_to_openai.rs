//! Anthropic Messages 请求转换为统一的 OpenAI 请求格式
//!
//! 含 `tool_result` 的消息只保留结果块并以 user 角色发送，
//! 同一消息中的文本与 `tool_use` 块会被丢弃（上游不允许二者出现在同一轮）。

use crate::models::anthropic::{AnthropicContent, AnthropicMessagesRequest, ContentBlock};
use crate::models::openai::{
    ChatCompletionRequest, ChatMessage, FunctionCall, FunctionDef, MessageContent, Tool, ToolCall,
};
use serde_json::{json, Value};

/// 转换请求
pub fn convert_anthropic_to_openai(request: &AnthropicMessagesRequest) -> ChatCompletionRequest {
    let mut messages: Vec<ChatMessage> = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system) = &request.system {
        let text = system.text();
        if !text.is_empty() {
            messages.push(ChatMessage::new("system", Some(MessageContent::Text(text))));
        }
    }

    for msg in &request.messages {
        match &msg.content {
            AnthropicContent::Text(text) => {
                messages.push(ChatMessage::new(
                    &msg.role,
                    Some(MessageContent::Text(text.clone())),
                ));
            }
            AnthropicContent::Blocks(blocks) => messages.push(convert_blocks(&msg.role, blocks)),
        }
    }

    let tools = request.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|t| {
                Tool::function(FunctionDef {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                })
            })
            .collect()
    });

    ChatCompletionRequest {
        model: request.model.clone(),
        messages,
        stream: request.stream,
        temperature: request.temperature,
        top_p: request.top_p,
        max_tokens: request.max_tokens,
        tools,
        tool_choice: None,
        stop: request
            .stop_sequences
            .as_ref()
            .map(|s| Value::from(s.clone())),
    }
}

fn convert_blocks(role: &str, blocks: &[ContentBlock]) -> ChatMessage {
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut tool_results: Vec<Value> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                if !text.is_empty() {
                    text_parts.push(text.clone());
                }
            }
            ContentBlock::ToolUse { id, name, input } => {
                let input = input.clone().filter(|v| !v.is_null()).unwrap_or_else(|| json!({}));
                tool_calls.push(ToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: FunctionCall {
                        name: name.clone(),
                        arguments: input.to_string(),
                    },
                    index: None,
                });
            }
            ContentBlock::ToolResult { .. } => match serde_json::to_value(block) {
                Ok(value) => tool_results.push(value),
                Err(e) => tracing::warn!("[ANTHROPIC_CONVERT] tool_result 序列化失败: {}", e),
            },
            ContentBlock::Thinking { thinking, .. } => {
                if !thinking.is_empty() {
                    text_parts.push(format!("<thinking>{thinking}</thinking>"));
                }
            }
            ContentBlock::Image { source } => match source.source_type.as_str() {
                "base64" => text_parts.push(format!(
                    "[Image: {}]",
                    source.media_type.as_deref().unwrap_or("image")
                )),
                "url" => text_parts.push(format!(
                    "[Image URL: {}]",
                    source.url.as_deref().unwrap_or_default()
                )),
                _ => {}
            },
            ContentBlock::Other => {}
        }
    }

    if !tool_results.is_empty() {
        return ChatMessage::new("user", Some(MessageContent::Parts(tool_results)));
    }

    let text = text_parts.join("\n");
    let mut message = ChatMessage::new(
        role,
        if text.is_empty() {
            None
        } else {
            Some(MessageContent::Text(text))
        },
    );
    if !tool_calls.is_empty() {
        message.tool_calls = Some(tool_calls);
    }
    message
}
