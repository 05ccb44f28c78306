//! 解析错误恢复
//!
//! 根据 ToolCallErrorKind 生成追加到 agent_chat_history 的纠错提示，供下一轮 plan 带着上下文重试。

use crate::core::ToolCallErrorKind;

/// 纠错提示中给出的调用格式示例
const CALL_FORMAT_HINT: &str =
    r#"{"name": "<tool name>", "kwargs": {"<parameter>": "<value>"}}"#;

/// 把解析错误映射为给模型的纠错提示
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// available_tools：本轮提供给模型的工具名，列入提示中帮助模型改正
    pub fn feedback(&self, kind: &ToolCallErrorKind, available_tools: &[String]) -> String {
        let tools = if available_tools.is_empty() {
            "(none)".to_string()
        } else {
            available_tools.join(", ")
        };
        match kind {
            ToolCallErrorKind::ToolNotExist => format!(
                "Your last reply did not call any tool. You must call exactly one tool. \
                 Output a single JSON object in this format: {CALL_FORMAT_HINT}. \
                 If no other tool applies, call give_final_response. Available tools: {tools}."
            ),
            ToolCallErrorKind::ToolNotFound { name } => format!(
                "The tool '{name}' does not exist. Choose one of the available tools: {tools}. \
                 Format: {CALL_FORMAT_HINT}."
            ),
            ToolCallErrorKind::ToolParameterNotExist { tool, param } => format!(
                "The call to '{tool}' is missing the required parameter '{param}'. \
                 Call the tool again with all required parameters. Format: {CALL_FORMAT_HINT}."
            ),
            ToolCallErrorKind::MultipleToolName { names } => format!(
                "You called several different tools at once ({}). Call only one tool per step. \
                 Format: {CALL_FORMAT_HINT}.",
                names.join(", ")
            ),
        }
    }
}
