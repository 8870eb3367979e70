//! 超长工具描述处理
//!
//! 上游对工具描述长度有限制。超过上限的描述整体移到 system prompt 的
//! "Tool Documentation" 附录中，工具定义里只保留一个引用字符串。

use crate::models::openai::{FunctionDef, Tool};

const TOOL_DOCS_HEADER: &str = "\n\n---\n# Tool Documentation\nThe following tools have detailed documentation that couldn't fit in the tool definition.\n\n";
const TOOL_DOCS_SEPARATOR: &str = "\n\n---\n\n";

/// 替换后的工具描述
pub fn reference_description(tool_name: &str) -> String {
    format!("[Full documentation in system prompt under '## Tool: {tool_name}']")
}

/// 处理结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessedTools {
    /// 处理后的工具列表；输入为空时为 None
    pub tools: Option<Vec<Tool>>,
    /// 需要追加到 system prompt 的附录，没有超长描述时为空串
    pub documentation: String,
}

/// 把超长描述移到附录
///
/// `max_len` 为 0 时不做处理。长度按字符计。
pub fn relocate_long_descriptions(tools: Option<&[Tool]>, max_len: usize) -> ProcessedTools {
    let tools = match tools {
        Some(tools) if !tools.is_empty() => tools,
        _ => return ProcessedTools::default(),
    };

    if max_len == 0 {
        return ProcessedTools {
            tools: Some(tools.to_vec()),
            documentation: String::new(),
        };
    }

    let mut doc_parts: Vec<String> = Vec::new();
    let mut processed: Vec<Tool> = Vec::with_capacity(tools.len());

    for tool in tools {
        let function = match (&tool.function, tool.tool_type.as_str()) {
            (Some(function), "function") => function,
            _ => {
                processed.push(tool.clone());
                continue;
            }
        };

        let description = function.description.as_deref().unwrap_or_default();
        let length = description.chars().count();
        if length <= max_len {
            processed.push(tool.clone());
            continue;
        }

        tracing::debug!(
            "[KIRO_PAYLOAD] 工具 '{}' 描述过长 ({} > {})，移到 system prompt",
            function.name,
            length,
            max_len
        );
        doc_parts.push(format!("## Tool: {}\n\n{}", function.name, description));
        processed.push(Tool::function(FunctionDef {
            name: function.name.clone(),
            description: Some(reference_description(&function.name)),
            parameters: function.parameters.clone(),
        }));
    }

    let documentation = if doc_parts.is_empty() {
        String::new()
    } else {
        format!("{TOOL_DOCS_HEADER}{}", doc_parts.join(TOOL_DOCS_SEPARATOR))
    };

    ProcessedTools {
        tools: Some(processed),
        documentation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, description: &str) -> Tool {
        Tool::function(FunctionDef {
            name: name.to_string(),
            description: Some(description.to_string()),
            parameters: Some(json!({"type": "object"})),
        })
    }

    #[test]
    fn test_short_descriptions_untouched() {
        let tools = vec![tool("read", "Read a file")];
        let result = relocate_long_descriptions(Some(&tools), 4000);
        assert_eq!(result.tools, Some(tools));
        assert!(result.documentation.is_empty());
    }

    #[test]
    fn test_long_description_moved() {
        let long = "x".repeat(4001);
        let tools = vec![tool("bash", &long), tool("ls", "list")];
        let result = relocate_long_descriptions(Some(&tools), 4000);

        let processed = result.tools.unwrap();
        let bash = processed[0].function.as_ref().unwrap();
        assert_eq!(
            bash.description.as_deref(),
            Some("[Full documentation in system prompt under '## Tool: bash']")
        );
        assert_eq!(bash.parameters, Some(json!({"type": "object"})));
        assert_eq!(
            processed[1].function.as_ref().unwrap().description.as_deref(),
            Some("list")
        );

        assert!(result
            .documentation
            .starts_with("\n\n---\n# Tool Documentation\n"));
        assert!(result
            .documentation
            .ends_with(&format!("## Tool: bash\n\n{long}")));
        assert_eq!(result.documentation.matches(&long).count(), 1);
    }

    #[test]
    fn test_non_function_tools_and_disabled_limit() {
        let web: Tool = serde_json::from_value(json!({"type": "web_search"})).unwrap();
        let long = tool("big", &"y".repeat(10));
        let tools = vec![web.clone(), long.clone()];

        let result = relocate_long_descriptions(Some(&tools), 5);
        let processed = result.tools.unwrap();
        assert_eq!(processed[0], web);
        assert!(!result.documentation.is_empty());

        let disabled = relocate_long_descriptions(Some(&tools), 0);
        assert_eq!(disabled.tools, Some(tools));
        assert!(disabled.documentation.is_empty());
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(relocate_long_descriptions(None, 4000), ProcessedTools::default());
        assert_eq!(
            relocate_long_descriptions(Some(&[]), 4000),
            ProcessedTools::default()
        );
    }
}
