//! OpenAI 格式转换为 Kiro 会话请求
//!
//! 转换顺序：
//! 1. 抽出 system 消息并拼接
//! 2. 超长工具描述移入 system prompt 附录
//! 3. 连续的 tool 消息折叠为一条只含 `tool_result` 块的 user 消息
//! 4. 合并相邻同角色消息（assistant 的 tool_calls 同样拼接，否则上游返回 400）
//! 5. 最后一条作为当前消息，其余作为历史；system prompt 放进第一条 user 历史或当前消息
//! 6. 当前消息必须由用户发出：assistant 结尾时移入历史并以 `Continue` 代替

use crate::config::TOOL_DESCRIPTION_MAX_LENGTH;
use crate::converter::tool_docs::relocate_long_descriptions;
use crate::error::GatewayError;
use crate::models::codewhisperer::*;
use crate::models::model_map::map_model;
use crate::models::openai::{extract_text, ChatCompletionRequest, ChatMessage, MessageContent, Tool};
use serde_json::{json, Value};

pub const CONTINUE_PROMPT: &str = "Continue";
pub const EMPTY_TOOL_RESULT: &str = "(empty result)";

/// 折叠 tool 消息并合并相邻同角色消息
pub fn merge_adjacent_messages(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    if messages.is_empty() {
        return Vec::new();
    }

    let mut processed: Vec<ChatMessage> = Vec::with_capacity(messages.len());
    let mut pending_results: Vec<Value> = Vec::new();

    for msg in messages {
        if msg.role == "tool" {
            let text = msg.get_content_text();
            pending_results.push(json!({
                "type": "tool_result",
                "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                "content": if text.is_empty() { EMPTY_TOOL_RESULT.to_string() } else { text },
            }));
            continue;
        }
        if !pending_results.is_empty() {
            processed.push(tool_results_message(std::mem::take(&mut pending_results)));
        }
        processed.push(msg.clone());
    }
    if !pending_results.is_empty() {
        processed.push(tool_results_message(pending_results));
    }

    let mut merged: Vec<ChatMessage> = Vec::with_capacity(processed.len());
    for msg in processed {
        if !merged.last().is_some_and(|last| last.role == msg.role) {
            merged.push(msg);
            continue;
        }
        let Some(last) = merged.last_mut() else {
            continue;
        };

        last.content = Some(merge_content(last.content.take(), msg.content));

        if msg.role == "assistant" {
            if let Some(calls) = msg.tool_calls {
                let existing = last.tool_calls.get_or_insert_with(Vec::new);
                existing.extend(calls);
                tracing::debug!(
                    "[KIRO_PAYLOAD] 合并 tool_calls，当前共 {} 个",
                    existing.len()
                );
            }
        }
    }

    merged
}

fn tool_results_message(results: Vec<Value>) -> ChatMessage {
    ChatMessage::new("user", Some(MessageContent::Parts(results)))
}

fn text_part(text: String) -> Value {
    json!({ "type": "text", "text": text })
}

fn content_text(content: &Option<MessageContent>) -> String {
    content.as_ref().map(|c| c.text()).unwrap_or_default()
}

fn merge_content(last: Option<MessageContent>, next: Option<MessageContent>) -> MessageContent {
    match (last, next) {
        (Some(MessageContent::Parts(mut a)), Some(MessageContent::Parts(b))) => {
            a.extend(b);
            MessageContent::Parts(a)
        }
        (Some(MessageContent::Parts(mut a)), next) => {
            a.push(text_part(content_text(&next)));
            MessageContent::Parts(a)
        }
        (last, Some(MessageContent::Parts(b))) => {
            let mut parts = vec![text_part(content_text(&last))];
            parts.extend(b);
            MessageContent::Parts(parts)
        }
        (last, next) => MessageContent::Text(format!(
            "{}\n{}",
            content_text(&last),
            content_text(&next)
        )),
    }
}

fn block_type(value: &Value) -> Option<&str> {
    value.get("type").and_then(|t| t.as_str())
}

/// 提取内容块中的 `tool_result`
fn extract_tool_results(content: Option<&MessageContent>) -> Vec<CWToolResult> {
    let Some(content) = content else {
        return Vec::new();
    };
    content
        .parts()
        .iter()
        .filter(|part| block_type(part) == Some("tool_result"))
        .map(|part| CWToolResult {
            content: vec![CWTextContent {
                text: extract_text(part.get("content").unwrap_or(&Value::Null)),
            }],
            status: "success".to_string(),
            tool_use_id: part
                .get("tool_use_id")
                .and_then(|id| id.as_str())
                .unwrap_or_default()
                .to_string(),
        })
        .collect()
}

/// 提取 assistant 消息中的工具调用（`tool_calls` 字段与 `tool_use` 内容块）
fn extract_tool_uses(msg: &ChatMessage) -> Vec<CWToolUse> {
    let mut uses = Vec::new();

    for call in msg.tool_calls.iter().flatten() {
        let raw = if call.function.arguments.is_empty() {
            "{}"
        } else {
            call.function.arguments.as_str()
        };
        let input = serde_json::from_str::<Value>(raw).unwrap_or_else(|e| {
            tracing::warn!(
                "[KIRO_PAYLOAD] 工具调用参数解析失败 {}: {}",
                call.function.name,
                e
            );
            json!({})
        });
        uses.push(CWToolUse {
            name: call.function.name.clone(),
            input,
            tool_use_id: call.id.clone(),
        });
    }

    if let Some(content) = &msg.content {
        for part in content.parts() {
            if block_type(part) != Some("tool_use") {
                continue;
            }
            let field = |key: &str| {
                part.get(key)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string()
            };
            uses.push(CWToolUse {
                name: field("name"),
                input: part
                    .get("input")
                    .filter(|v| !v.is_null())
                    .cloned()
                    .unwrap_or_else(|| json!({})),
                tool_use_id: field("id"),
            });
        }
    }

    uses
}

fn build_history(messages: &[ChatMessage], model_id: &str) -> Vec<HistoryItem> {
    let mut history = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role.as_str() {
            "user" => {
                let mut user_input = UserInputMessage::new(msg.get_content_text(), model_id);
                let results = extract_tool_results(msg.content.as_ref());
                if !results.is_empty() {
                    user_input.user_input_message_context = Some(UserInputMessageContext {
                        tools: None,
                        tool_results: Some(results),
                    });
                }
                history.push(HistoryItem::User(UserHistoryItem {
                    user_input_message: user_input,
                }));
            }
            "assistant" => {
                let uses = extract_tool_uses(msg);
                history.push(HistoryItem::Assistant(AssistantHistoryItem {
                    assistant_response_message: AssistantResponseMessage {
                        content: msg.get_content_text(),
                        tool_uses: if uses.is_empty() { None } else { Some(uses) },
                    },
                }));
            }
            other => {
                tracing::debug!("[KIRO_PAYLOAD] 跳过不支持的历史角色: {}", other);
            }
        }
    }

    history
}

/// 在消息文本前加上 system prompt，保留非文本内容块
fn prepend_system(msg: &mut ChatMessage, system_prompt: &str) {
    let combined = format!("{system_prompt}\n\n{}", msg.get_content_text());
    msg.content = Some(match msg.content.take() {
        Some(MessageContent::Parts(parts)) => {
            let mut rebuilt = vec![text_part(combined)];
            rebuilt.extend(
                parts
                    .into_iter()
                    .filter(|p| !matches!(p, Value::String(_)) && !p.get("text").is_some_and(Value::is_string)),
            );
            MessageContent::Parts(rebuilt)
        }
        _ => MessageContent::Text(combined),
    });
}

fn to_cw_tools(tools: &[Tool]) -> Vec<CWTool> {
    tools
        .iter()
        .filter_map(|tool| tool.function.as_ref())
        .map(|function| CWTool {
            tool_specification: ToolSpecification {
                name: function.name.clone(),
                description: function.description.clone().unwrap_or_default(),
                input_schema: InputSchema {
                    json: function.parameters.clone().unwrap_or_else(|| json!({})),
                },
            },
        })
        .collect()
}

/// tool 消息必须带 `tool_call_id`
fn validate_tool_messages(messages: &[ChatMessage]) -> Result<(), GatewayError> {
    let missing = messages.iter().position(|msg| {
        msg.role == "tool" && msg.tool_call_id.as_deref().map_or(true, str::is_empty)
    });
    match missing {
        Some(index) => Err(GatewayError::InvalidRequest(format!(
            "messages[{index}]: tool message is missing tool_call_id"
        ))),
        None => Ok(()),
    }
}

/// 构建 Kiro 会话请求
pub fn build_kiro_payload(
    request: &ChatCompletionRequest,
    conversation_id: &str,
    profile_arn: Option<&str>,
) -> Result<CodeWhispererRequest, GatewayError> {
    validate_tool_messages(&request.messages)?;

    let processed_tools =
        relocate_long_descriptions(request.tools.as_deref(), TOOL_DESCRIPTION_MAX_LENGTH);

    let mut system_prompt = String::new();
    let mut conversation: Vec<ChatMessage> = Vec::with_capacity(request.messages.len());
    for msg in &request.messages {
        if msg.role == "system" {
            system_prompt.push_str(&msg.get_content_text());
            system_prompt.push('\n');
        } else {
            conversation.push(msg.clone());
        }
    }
    let mut system_prompt = system_prompt.trim().to_string();

    if !processed_tools.documentation.is_empty() {
        if system_prompt.is_empty() {
            system_prompt = processed_tools.documentation.trim().to_string();
        } else {
            system_prompt.push_str(&processed_tools.documentation);
        }
    }

    let mut merged = merge_adjacent_messages(&conversation);
    let Some(current) = merged.pop() else {
        return Err(GatewayError::PayloadConstruction(
            "No messages to send".to_string(),
        ));
    };

    let model_id = map_model(&request.model);

    if !system_prompt.is_empty() {
        if let Some(first) = merged.first_mut().filter(|m| m.role == "user") {
            prepend_system(first, &system_prompt);
        }
    }

    let mut history = build_history(&merged, &model_id);

    let mut current_content = current.get_content_text();
    if !system_prompt.is_empty() && history.is_empty() {
        current_content = format!("{system_prompt}\n\n{current_content}");
    }

    if current.role == "assistant" {
        history.push(HistoryItem::Assistant(AssistantHistoryItem {
            assistant_response_message: AssistantResponseMessage {
                content: current_content,
                tool_uses: None,
            },
        }));
        current_content = CONTINUE_PROMPT.to_string();
    }

    if current_content.is_empty() {
        current_content = CONTINUE_PROMPT.to_string();
    }

    let mut user_input = UserInputMessage::new(current_content, &model_id);

    let tools = processed_tools
        .tools
        .as_deref()
        .map(to_cw_tools)
        .filter(|t| !t.is_empty());
    let tool_results = Some(extract_tool_results(current.content.as_ref())).filter(|r| !r.is_empty());
    if tools.is_some() || tool_results.is_some() {
        user_input.user_input_message_context = Some(UserInputMessageContext {
            tools,
            tool_results,
        });
    }

    tracing::debug!(
        "[KIRO_PAYLOAD] 构建完成: model={}, history={}, current_len={}",
        model_id,
        history.len(),
        user_input.content.len()
    );

    Ok(CodeWhispererRequest {
        conversation_state: ConversationState {
            chat_trigger_type: CHAT_TRIGGER_MANUAL.to_string(),
            conversation_id: conversation_id.to_string(),
            current_message: CurrentMessage {
                user_input_message: user_input,
            },
            history: if history.is_empty() {
                None
            } else {
                Some(history)
            },
        },
        profile_arn: profile_arn
            .filter(|arn| !arn.is_empty())
            .map(|arn| arn.to_string()),
    })
}
