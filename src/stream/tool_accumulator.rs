//! 工具调用累加器
//!
//! 上游把工具调用拆成 tool-start / tool-input / tool-stop 多个片段发送，
//! 这里负责把片段拼装成完整的调用。
//!
//! 状态：Idle（`current == None`）与 Building（`current == Some`）。

use super::events::FinishedToolCall;
use std::collections::HashSet;

/// 生成 `call_{8 位十六进制}` 形式的调用 ID
pub fn generate_tool_call_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("call_{}", &hex[..8])
}

#[derive(Debug, Clone)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    current: Option<PendingToolCall>,
    finished: Vec<FinishedToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_building(&self) -> bool {
        self.current.is_some()
    }

    /// 开始新的工具调用，返回实际使用的调用 ID
    ///
    /// 正在构建的调用会先被封存。
    pub fn start(&mut self, id: Option<String>, name: String, input: String, stop: bool) -> String {
        if self.current.is_some() {
            self.finalize_current();
        }

        let id = id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(generate_tool_call_id);

        tracing::debug!("[TOOL_ACC] 工具调用开始: {} ({})", name, id);
        self.current = Some(PendingToolCall {
            id: id.clone(),
            name,
            arguments: input,
        });

        if stop {
            self.finalize_current();
        }
        id
    }

    /// 追加参数片段；Idle 状态下忽略
    pub fn append(&mut self, fragment: &str) {
        if let Some(call) = self.current.as_mut() {
            call.arguments.push_str(fragment);
        }
    }

    /// 收到 stop 标记
    pub fn stop(&mut self) {
        if self.current.is_some() {
            self.finalize_current();
        }
    }

    /// 封存当前调用
    ///
    /// 参数解析失败时替换为 `{}`，错误不向外传播。
    pub fn finalize_current(&mut self) {
        let Some(call) = self.current.take() else {
            return;
        };

        let arguments = canonicalize_arguments(&call.name, &call.arguments);
        self.finished.push(FinishedToolCall {
            id: call.id,
            name: call.name,
            arguments,
        });
    }

    /// 返回去重后的完整调用列表（保持顺序）
    ///
    /// 调用前会封存仍在构建的调用。去重依据为 `名称 + 参数`。
    pub fn tool_calls(&mut self) -> Vec<FinishedToolCall> {
        self.finalize_current();

        let mut seen = HashSet::new();
        self.finished
            .iter()
            .filter(|call| seen.insert(format!("{}-{}", call.name, call.arguments)))
            .cloned()
            .collect()
    }
}

fn canonicalize_arguments(name: &str, raw: &str) -> String {
    if raw.trim().is_empty() {
        return "{}".to_string();
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => value.to_string(),
        Err(e) => {
            tracing::warn!(
                "[TOOL_ACC] 工具 {} 的参数不是合法 JSON，使用空对象: {}",
                name,
                e
            );
            "{}".to_string()
        }
    }
}
