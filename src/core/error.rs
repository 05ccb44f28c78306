//! 错误类型
//!
//! AgentError：本轮致命错误（检索/LLM/工具后端失败、配置错误），直接冒泡到调用方；
//! ToolCallErrorKind：规划输出解析失败，可在 plan/validate 子图内带纠错提示重试。

use thiserror::Error;

/// 一轮对话中无法在编排层恢复的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Retrieval error: {0}")]
    RetrievalError(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Duplicate tool: {0}")]
    DuplicateTool(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Bot not found: {bot_id} ({version})")]
    BotNotFound { bot_id: String, version: String },

    #[error("Bot inactive: {0}")]
    BotInactive(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    /// 图执行违反不变量（如终态 answer 被写两次、步数超出上界）
    #[error("Graph error: {0}")]
    GraphError(String),
}

impl From<crate::llm::LlmError> for AgentError {
    fn from(e: crate::llm::LlmError) -> Self {
        AgentError::LlmError(e.to_string())
    }
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::StorageError(e.to_string())
    }
}

/// 工具调用解析失败的种类（按校验顺序）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolCallErrorKind {
    /// 输出中没有可识别的工具调用
    #[error("No tool invocation found in model output")]
    ToolNotExist,

    /// 工具名在当前 scene 的注册表中不存在
    #[error("Tool not found: {name}")]
    ToolNotFound { name: String },

    /// 缺少必填参数
    #[error("Tool {tool} is missing required parameter: {param}")]
    ToolParameterNotExist { tool: String, param: String },

    /// 同一轮提出了多个不同工具
    #[error("Multiple tool names in one step: {}", names.join(", "))]
    MultipleToolName { names: Vec<String> },
}
