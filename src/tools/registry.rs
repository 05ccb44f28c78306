//! 工具注册表
//!
//! 所有工具实现 Tool trait（名称、描述、参数 schema、执行模式、异步调用），由 ToolRegistry 按 (name, scene) 注册与查找。
//! 注册表在进程启动时构建一次，之后以 Arc 只读共享给编排器、解析器与执行器。

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::{AgentError, ChatbotState};
use crate::llm::LlmClient;
use crate::retrieval::Retriever;

/// 默认 scene
pub const COMMON_SCENE: &str = "common";

/// 执行模式：ONCE 被选中即结束规划循环（产出答案）；LOOP 的结果回灌给下一轮规划
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolMode {
    Once,
    Loop,
}

impl fmt::Display for ToolMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolMode::Once => write!(f, "once"),
            ToolMode::Loop => write!(f, "loop"),
        }
    }
}

/// 工具后端的结构化输出（code 为 0 表示成功）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub code: i32,
    pub result: String,
}

impl ToolOutput {
    pub fn ok(result: impl Into<String>) -> Self {
        Self {
            code: 0,
            result: result.into(),
        }
    }
}

/// 工具调用时可访问的上下文：当前状态与外部协作者
pub struct ToolContext<'a> {
    pub state: &'a ChatbotState,
    pub retriever: &'a dyn Retriever,
    pub llm: &'a dyn LlmClient,
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（模型输出中的 "name" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；"required" 数组即必填参数集合
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    fn mode(&self) -> ToolMode;

    async fn invoke(&self, ctx: &ToolContext<'_>, kwargs: &Value) -> Result<ToolOutput, String>;
}

/// 从参数 schema 读出必填参数名
pub fn required_params(tool: &dyn Tool) -> Vec<String> {
    tool.parameters_schema()
        .get("required")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Tool {name} already registered in scene {scene}")]
    DuplicateTool { name: String, scene: String },

    #[error("Tool {name} not found in scene {scene}")]
    ToolNotFound { name: String, scene: String },
}

impl From<RegistryError> for AgentError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::DuplicateTool { .. } => AgentError::DuplicateTool(e.to_string()),
            RegistryError::ToolNotFound { .. } => AgentError::ToolNotFound(e.to_string()),
        }
    }
}

/// 工具注册表：(name, scene) -> Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<(String, String), Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；同一 scene 下重名返回 DuplicateTool，不覆盖
    pub fn register(&mut self, scene: &str, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        self.register_arc(scene, Arc::new(tool))
    }

    pub fn register_arc(&mut self, scene: &str, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let key = (tool.name().to_string(), scene.to_string());
        if self.tools.contains_key(&key) {
            return Err(RegistryError::DuplicateTool {
                name: key.0,
                scene: key.1,
            });
        }
        tracing::debug!(tool = %key.0, scene = %key.1, mode = %tool.mode(), "tool registered");
        self.tools.insert(key, tool);
        Ok(())
    }

    pub fn lookup(&self, name: &str, scene: &str) -> Result<Arc<dyn Tool>, RegistryError> {
        self.tools
            .get(&(name.to_string(), scene.to_string()))
            .cloned()
            .ok_or_else(|| RegistryError::ToolNotFound {
                name: name.to_string(),
                scene: scene.to_string(),
            })
    }

    pub fn contains(&self, name: &str, scene: &str) -> bool {
        self.tools
            .contains_key(&(name.to_string(), scene.to_string()))
    }

    /// scene 下所有 LOOP 模式工具名（用于校验规划输出是否可回灌）
    pub fn names_with_loop_mode(&self, scene: &str) -> BTreeSet<String> {
        self.tools
            .iter()
            .filter(|((_, s), tool)| s == scene && tool.mode() == ToolMode::Loop)
            .map(|((name, _), _)| name.clone())
            .collect()
    }

    /// 按给定顺序生成工具定义（供规划 prompt），跳过不存在的名字
    pub fn tool_defs(&self, names: &[String], scene: &str) -> Vec<Value> {
        names
            .iter()
            .filter_map(|name| self.lookup(name, scene).ok())
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
