//! Kiro 响应流解析器
//!
//! 上游响应体是首尾相接、没有分隔符的 JSON 对象序列（夹杂二进制帧头），
//! 每种对象可由其首个键识别。解析器维护字节缓冲区，反复寻找最早出现的
//! 已知前缀，再用括号计数（识别字符串与转义）截取完整对象。
//!
//! 所有前缀都是 ASCII，因此按字节扫描不会切断多字节字符；
//! 截取出的对象整体做 UTF-8 解码。

use crate::stream::events::{FinishedToolCall, UpstreamEvent};
use crate::stream::tool_accumulator::ToolCallAccumulator;
use serde_json::Value;

/// 已知对象前缀及其类型
const EVENT_PATTERNS: &[(&[u8], EventKind)] = &[
    (b"{\"content\":", EventKind::Content),
    (b"{\"name\":", EventKind::ToolStart),
    (b"{\"input\":", EventKind::ToolInput),
    (b"{\"stop\":", EventKind::ToolStop),
    (b"{\"usage\":", EventKind::Usage),
    (b"{\"contextUsagePercentage\":", EventKind::ContextUsage),
    (b"{\"followupPrompt\":", EventKind::Followup),
];

/// 最长前缀长度，未命中时缓冲区只需保留这么多尾部字节
const MAX_PATTERN_LEN: usize = 26;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    Content,
    ToolStart,
    ToolInput,
    ToolStop,
    Usage,
    ContextUsage,
    Followup,
}

/// 解析器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// 等待更多数据
    Idle,
    /// 缓冲区中有未完成的对象
    Partial,
}

#[derive(Debug, Default)]
pub struct AwsEventStreamParser {
    buffer: Vec<u8>,
    last_content: Option<String>,
    tools: ToolCallAccumulator,
}

impl AwsEventStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ParserState {
        if find_earliest_pattern(&self.buffer).is_some() {
            ParserState::Partial
        } else {
            ParserState::Idle
        }
    }

    /// 喂入一段字节，返回其中解析出的全部事件（按到达顺序）
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<UpstreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        loop {
            let Some((pos, kind)) = find_earliest_pattern(&self.buffer) else {
                self.trim_unmatched();
                break;
            };

            // 前缀之前是帧头等无关字节
            self.buffer.drain(..pos);

            let Some(end) = find_matching_brace(&self.buffer) else {
                break;
            };

            let parsed = std::str::from_utf8(&self.buffer[..end])
                .ok()
                .and_then(|text| serde_json::from_str::<Value>(text).ok());

            match parsed {
                Some(Value::Object(obj)) => {
                    self.buffer.drain(..end);
                    if let Some(event) = self.classify(kind, &obj) {
                        events.push(event);
                    }
                }
                _ => {
                    let preview = String::from_utf8_lossy(&self.buffer[..end.min(100)]);
                    tracing::warn!("[KIRO_STREAM] 无法解析的 JSON 片段，跳过: {}", preview);
                    // 不是真正的对象起点，前进一个字节后重试
                    self.buffer.drain(..1);
                }
            }
        }

        events
    }

    /// 返回去重后的完整工具调用，会封存仍在构建的调用
    pub fn tool_calls(&mut self) -> Vec<FinishedToolCall> {
        self.tools.tool_calls()
    }

    fn classify(&mut self, kind: EventKind, obj: &serde_json::Map<String, Value>) -> Option<UpstreamEvent> {
        match kind {
            EventKind::Content => {
                let content = obj
                    .get("content")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                if is_truthy(obj.get("followupPrompt"))
                    || self.last_content.as_deref() == Some(content.as_str())
                {
                    return None;
                }
                self.last_content = Some(content.clone());
                Some(UpstreamEvent::ContentDelta(content))
            }
            EventKind::ToolStart => {
                let name = obj
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let requested_id = obj
                    .get("toolUseId")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                let input = input_fragment(obj.get("input"));
                let stop = is_truthy(obj.get("stop"));
                let id = self
                    .tools
                    .start(requested_id, name.clone(), input.clone(), stop);
                Some(UpstreamEvent::ToolStart {
                    id,
                    name,
                    input,
                    stop,
                })
            }
            EventKind::ToolInput => {
                let fragment = input_fragment(obj.get("input"));
                self.tools.append(&fragment);
                Some(UpstreamEvent::ToolInputDelta(fragment))
            }
            EventKind::ToolStop => {
                if !is_truthy(obj.get("stop")) {
                    return None;
                }
                self.tools.stop();
                Some(UpstreamEvent::ToolStop)
            }
            EventKind::Usage => Some(UpstreamEvent::Usage(
                obj.get("usage").cloned().unwrap_or(Value::Null),
            )),
            EventKind::ContextUsage => obj
                .get("contextUsagePercentage")
                .and_then(|v| v.as_f64())
                .map(UpstreamEvent::ContextUsagePercentage),
            EventKind::Followup => None,
        }
    }

    /// 没有任何前缀时，只保留可能构成前缀开头的尾部字节
    fn trim_unmatched(&mut self) {
        let keep = MAX_PATTERN_LEN - 1;
        if self.buffer.len() > keep {
            let cut = self.buffer.len() - keep;
            self.buffer.drain(..cut);
        }
    }
}

fn find_earliest_pattern(buffer: &[u8]) -> Option<(usize, EventKind)> {
    EVENT_PATTERNS
        .iter()
        .filter_map(|(pattern, kind)| find_subsequence(buffer, pattern).map(|pos| (pos, *kind)))
        .min_by_key(|(pos, _)| *pos)
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// 从缓冲区开头的 `{` 起找到配对的 `}`，返回对象末尾之后的位置
fn find_matching_brace(bytes: &[u8]) -> Option<usize> {
    if bytes.first() != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, &b) in bytes.iter().enumerate() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match b {
            b'\\' if in_string => escape_next = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }

    None
}

/// 把 input 字段转成参数片段：对象序列化，字符串原样，假值为空
fn input_fragment(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(v @ (Value::Object(_) | Value::Array(_))) => v.to_string(),
        Some(v) if is_truthy(Some(v)) => v.to_string(),
        Some(_) => String::new(),
    }
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}
